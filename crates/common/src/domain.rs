use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::error::CoreError;

/// One of the three order types the kitchen can specialize on (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    DineIn,
    Takeout,
    Delivery,
}

impl OrderType {
    pub const ALL: [OrderType; 3] = [OrderType::DineIn, OrderType::Takeout, OrderType::Delivery];

    /// Simulated cooking time in seconds, per §4.2.
    pub fn cooking_seconds(self) -> u64 {
        match self {
            OrderType::DineIn => 8,
            OrderType::Takeout => 10,
            OrderType::Delivery => 12,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::DineIn => "dine_in",
            OrderType::Takeout => "takeout",
            OrderType::Delivery => "delivery",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dine_in" => Ok(OrderType::DineIn),
            "takeout" => Ok(OrderType::Takeout),
            "delivery" => Ok(OrderType::Delivery),
            other => Err(CoreError::validation(
                "order_type",
                format!("must be one of [dine_in, takeout, delivery] (got {other})"),
            )),
        }
    }
}

/// Status monotonically advances `received -> cooking -> ready` (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Received,
    Cooking,
    Ready,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Received => "received",
            OrderStatus::Cooking => "cooking",
            OrderStatus::Ready => "ready",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(OrderStatus::Received),
            "cooking" => Ok(OrderStatus::Cooking),
            "ready" => Ok(OrderStatus::Ready),
            other => Err(CoreError::validation(
                "status",
                format!("unknown order status: {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Online,
    Offline,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Online => "online",
            WorkerStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(WorkerStatus::Online),
            "offline" => Ok(WorkerStatus::Offline),
            other => Err(CoreError::validation(
                "status",
                format!("unknown worker status: {other}"),
            )),
        }
    }
}

/// Integer in {1,5,10} derived from total amount (§3, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority(pub i32);

impl Priority {
    pub fn from_total(total: f64) -> Self {
        if total > 100.0 {
            Priority(10)
        } else if total >= 50.0 {
            Priority(5)
        } else {
            Priority(1)
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub number: String,
    pub customer_name: String,
    pub order_type: OrderType,
    pub table_number: Option<i32>,
    pub delivery_address: Option<String>,
    pub total_amount: f64,
    pub priority: i32,
    pub status: OrderStatus,
    pub processed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub name: String,
    pub quantity: i32,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusLogEntry {
    pub id: i64,
    pub order_id: i64,
    pub status: OrderStatus,
    pub changed_by: String,
    pub notes: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub order_types: String,
    pub status: WorkerStatus,
    pub orders_processed: i64,
    pub last_seen: DateTime<Utc>,
}

// ---------- Ingress wire DTOs (§4.1) ----------

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrderItemRequest {
    pub name: String,
    pub quantity: i32,
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OrderRequest {
    pub customer_name: String,
    pub order_type: String,
    #[serde(default)]
    pub table_number: Option<i32>,
    #[serde(default)]
    pub delivery_address: Option<String>,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderResponse {
    pub order_number: String,
    pub status: String,
    pub total_amount: f64,
}

// ---------- Tracking reader wire DTOs (§4.3) ----------

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderStatusResponse {
    pub order_number: String,
    pub current_status: String,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_completion: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderHistoryEntry {
    pub status: String,
    pub changed_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WorkerStatusEntry {
    pub worker_name: String,
    pub status: String,
    pub orders_processed: i64,
    pub last_seen: DateTime<Utc>,
}

// ---------- Broker wire DTOs (§4.4) ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateMessage {
    pub order_number: String,
    pub old_status: String,
    pub new_status: String,
    pub changed_by: String,
    pub timestamp: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_thresholds() {
        assert_eq!(Priority::from_total(18.5).0, 1);
        assert_eq!(Priority::from_total(50.0).0, 5);
        assert_eq!(Priority::from_total(72.0).0, 5);
        assert_eq!(Priority::from_total(100.0).0, 5);
        assert_eq!(Priority::from_total(100.01).0, 10);
        assert_eq!(Priority::from_total(150.0).0, 10);
    }

    #[test]
    fn order_type_round_trips() {
        for t in OrderType::ALL {
            assert_eq!(t.to_string().parse::<OrderType>().unwrap().as_str(), t.as_str());
        }
    }

    #[test]
    fn order_type_rejects_unknown() {
        assert!("pizza".parse::<OrderType>().is_err());
    }
}
