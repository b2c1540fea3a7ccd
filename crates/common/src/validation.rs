use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{OrderRequest, OrderType};
use crate::error::CoreError;

static CUSTOMER_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z\s\-']{1,100}$").unwrap());

/// A validated order ready for insertion; mirrors the shape of `Order` minus
/// the fields the store assigns (id, number, status, timestamps).
pub struct ValidatedOrder {
    pub customer_name: String,
    pub order_type: OrderType,
    pub table_number: Option<i32>,
    pub delivery_address: Option<String>,
    pub items: Vec<ValidatedItem>,
}

pub struct ValidatedItem {
    pub name: String,
    pub quantity: i32,
    pub price: f64,
}

/// Exactly the invariants of §3, reported with the offending field name
/// (§4.1: "failure returns 400 ... naming the offending field").
pub fn validate_order_request(req: &OrderRequest) -> Result<ValidatedOrder, CoreError> {
    if !CUSTOMER_NAME_RE.is_match(&req.customer_name) {
        return Err(CoreError::validation(
            "customer_name",
            "must be 1-100 characters, only letters, spaces, hyphens, and apostrophes",
        ));
    }

    let order_type: OrderType = req.order_type.parse()?;

    match order_type {
        OrderType::DineIn => {
            let Some(table) = req.table_number else {
                return Err(CoreError::validation(
                    "table_number",
                    "table_number is required for dine_in orders",
                ));
            };
            if !(1..=100).contains(&table) {
                return Err(CoreError::validation(
                    "table_number",
                    "table_number must be between 1 and 100",
                ));
            }
            if req.delivery_address.is_some() {
                return Err(CoreError::validation(
                    "delivery_address",
                    "delivery_address must not be set for dine_in orders",
                ));
            }
        }
        OrderType::Takeout => {
            if req.table_number.is_some() {
                return Err(CoreError::validation(
                    "table_number",
                    "table_number must not be set for takeout orders",
                ));
            }
            if req.delivery_address.is_some() {
                return Err(CoreError::validation(
                    "delivery_address",
                    "delivery_address must not be set for takeout orders",
                ));
            }
        }
        OrderType::Delivery => {
            if req.table_number.is_some() {
                return Err(CoreError::validation(
                    "table_number",
                    "table_number must not be set for delivery orders",
                ));
            }
            let Some(addr) = &req.delivery_address else {
                return Err(CoreError::validation(
                    "delivery_address",
                    "delivery_address is required for delivery orders",
                ));
            };
            if addr.len() < 10 {
                return Err(CoreError::validation(
                    "delivery_address",
                    "delivery_address must be at least 10 characters",
                ));
            }
        }
    }

    if req.items.is_empty() || req.items.len() > 20 {
        return Err(CoreError::validation(
            "items",
            format!("items count is invalid: got {}, allowed 1-20", req.items.len()),
        ));
    }

    let mut items = Vec::with_capacity(req.items.len());
    for (i, item) in req.items.iter().enumerate() {
        if item.name.is_empty() || item.name.len() > 50 {
            return Err(CoreError::validation(
                format!("items[{i}].name"),
                "length must be 1-50",
            ));
        }
        if !(1..=10).contains(&item.quantity) {
            return Err(CoreError::validation(
                format!("items[{i}].quantity"),
                format!("got {}, allowed 1-10", item.quantity),
            ));
        }
        if !(0.01..=999.99).contains(&item.price) {
            return Err(CoreError::validation(
                format!("items[{i}].price"),
                format!("got {:.2}, allowed 0.01-999.99", item.price),
            ));
        }
        items.push(ValidatedItem {
            name: item.name.clone(),
            quantity: item.quantity,
            price: item.price,
        });
    }

    Ok(ValidatedOrder {
        customer_name: req.customer_name.clone(),
        order_type,
        table_number: req.table_number,
        delivery_address: req.delivery_address.clone(),
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> OrderRequest {
        OrderRequest {
            customer_name: "Anna".into(),
            order_type: "dine_in".into(),
            table_number: Some(5),
            delivery_address: None,
            items: vec![
                crate::domain::OrderItemRequest {
                    name: "Margherita".into(),
                    quantity: 1,
                    price: 12.5,
                },
                crate::domain::OrderItemRequest {
                    name: "Coke".into(),
                    quantity: 2,
                    price: 3.0,
                },
            ],
        }
    }

    #[test]
    fn accepts_valid_dine_in_order() {
        assert!(validate_order_request(&base_request()).is_ok());
    }

    #[test]
    fn rejects_dine_in_without_table_number() {
        let mut req = base_request();
        req.table_number = None;
        let err = validate_order_request(&req).unwrap_err();
        assert!(err.to_string().contains("table_number"));
    }

    #[test]
    fn rejects_delivery_without_address() {
        let mut req = base_request();
        req.order_type = "delivery".into();
        req.table_number = None;
        let err = validate_order_request(&req).unwrap_err();
        assert!(err.to_string().contains("delivery_address"));
    }

    #[test]
    fn rejects_takeout_with_table_number() {
        let mut req = base_request();
        req.order_type = "takeout".into();
        let err = validate_order_request(&req).unwrap_err();
        assert!(err.to_string().contains("table_number"));
    }

    #[test]
    fn rejects_too_many_items() {
        let mut req = base_request();
        req.items = (0..21)
            .map(|i| crate::domain::OrderItemRequest {
                name: format!("item-{i}"),
                quantity: 1,
                price: 1.0,
            })
            .collect();
        assert!(validate_order_request(&req).is_err());
    }

    #[test]
    fn rejects_invalid_customer_name() {
        let mut req = base_request();
        req.customer_name = "Anna123".into();
        let err = validate_order_request(&req).unwrap_err();
        assert!(err.to_string().contains("customer_name"));
    }
}
