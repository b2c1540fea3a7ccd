use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::{
    Order, OrderItem, OrderStatus, OrderStatusLogEntry, Priority, Worker, WorkerStatus,
};
use crate::error::CoreError;
use crate::validation::ValidatedOrder;

/// Thin wrapper around a `PgPool`, the store-side counterpart of the
/// teacher's `Producer`/`Consumer` structs: one struct per concern, built
/// once at startup and shared behind an `Arc` by the handlers/tasks that
/// need it.
#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

/// Outcome of `claim_order`, distinguishing a fresh claim from a redelivery
/// that finds the order already past `received`.
pub enum ClaimOutcome {
    /// `received -> cooking` succeeded; this is a new claim.
    Claimed(Order),
    /// Already `cooking` and owned by this worker; redelivery of a message
    /// claimed before a crash. Resume the cook-wait without re-publishing
    /// the claim status update.
    Resumed(Order),
    /// Already `ready`; redelivery of a message that finished before the
    /// ack landed. Nothing left to do but acknowledge it.
    AlreadyDone(Order),
}

impl Repository {
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(CoreError::StoreFatal)?;
        Ok(Repository { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// §4.1: allocate the daily sequence, compute total/priority, insert the
    /// order + items + initial status log, all within one transaction.
    pub async fn insert_order(&self, draft: ValidatedOrder) -> Result<Order, CoreError> {
        let mut tx = self.pool.begin().await?;

        let number = allocate_order_number(&mut tx).await?;

        let total_amount: f64 = draft
            .items
            .iter()
            .map(|i| i.quantity as f64 * i.price)
            .sum();
        let priority = Priority::from_total(total_amount).0;

        let row: (i64, DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO orders
                (number, customer_name, type, table_number, delivery_address,
                 total_amount, priority, status, processed_by, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'received', NULL, NULL)
            RETURNING id, created_at, updated_at
            "#,
        )
        .bind(&number)
        .bind(&draft.customer_name)
        .bind(draft.order_type.as_str())
        .bind(draft.table_number)
        .bind(&draft.delivery_address)
        .bind(total_amount)
        .bind(priority)
        .fetch_one(&mut *tx)
        .await?;
        let (order_id, created_at, updated_at) = row;

        let mut items = Vec::with_capacity(draft.items.len());
        for item in &draft.items {
            let (item_id, item_created_at): (i64, DateTime<Utc>) = sqlx::query_as(
                r#"
                INSERT INTO order_items (order_id, name, quantity, price)
                VALUES ($1, $2, $3, $4)
                RETURNING id, created_at
                "#,
            )
            .bind(order_id)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.price)
            .fetch_one(&mut *tx)
            .await?;
            items.push(OrderItem {
                id: item_id,
                order_id,
                name: item.name.clone(),
                quantity: item.quantity,
                price: item.price,
                created_at: item_created_at,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO order_status_log (order_id, status, changed_by, notes)
            VALUES ($1, 'received', 'system', 'Order created')
            "#,
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Order {
            id: order_id,
            number,
            customer_name: draft.customer_name,
            order_type: draft.order_type,
            table_number: draft.table_number,
            delivery_address: draft.delivery_address,
            total_amount,
            priority,
            status: OrderStatus::Received,
            processed_by: None,
            completed_at: None,
            created_at,
            updated_at,
            items,
        })
    }

    /// §4.2 claim step: `received -> cooking`, sets `processed_by`, appends a
    /// status-log row. If the order is no longer `received`, this is a
    /// redelivery of a message whose first claim (or finish) already landed
    /// before the worker crashed — §8's redelivery invariant requires
    /// resuming from wherever the order actually is instead of failing, so
    /// at-least-once delivery can't poison-loop an order that already
    /// advanced.
    pub async fn claim_order(&self, number: &str, worker_name: &str) -> Result<ClaimOutcome, CoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
               SET status = 'cooking', processed_by = $1, updated_at = now()
             WHERE number = $2 AND status = 'received'
            "#,
        )
        .bind(worker_name)
        .bind(number)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() > 0 {
            let order_id = order_id_by_number(&mut tx, number).await?;

            sqlx::query(
                r#"
                INSERT INTO order_status_log (order_id, status, changed_by, notes)
                VALUES ($1, 'cooking', $2, NULL)
                "#,
            )
            .bind(order_id)
            .bind(worker_name)
            .execute(&mut *tx)
            .await?;

            let order = fetch_order_tx(&mut tx, number).await?;
            tx.commit().await?;
            return Ok(ClaimOutcome::Claimed(order));
        }

        let order = fetch_order_tx(&mut tx, number).await?;
        tx.commit().await?;

        match order.status {
            OrderStatus::Cooking if order.processed_by.as_deref() == Some(worker_name) => {
                Ok(ClaimOutcome::Resumed(order))
            }
            OrderStatus::Ready => Ok(ClaimOutcome::AlreadyDone(order)),
            _ => Err(CoreError::NotFound),
        }
    }

    /// §4.2 finish step: `cooking -> ready`, stamps completion, increments
    /// the worker's throughput counter, appends a status-log row.
    pub async fn finish_order(&self, number: &str, worker_name: &str) -> Result<Order, CoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
               SET status = 'ready', completed_at = now(), updated_at = now()
             WHERE number = $1 AND status = 'cooking'
            "#,
        )
        .bind(number)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(CoreError::NotFound);
        }

        let order_id = order_id_by_number(&mut tx, number).await?;

        sqlx::query(
            r#"
            INSERT INTO order_status_log (order_id, status, changed_by, notes)
            VALUES ($1, 'ready', $2, NULL)
            "#,
        )
        .bind(order_id)
        .bind(worker_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE workers SET orders_processed = orders_processed + 1 WHERE name = $1
            "#,
        )
        .bind(worker_name)
        .execute(&mut *tx)
        .await?;

        let order = fetch_order_tx(&mut tx, number).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// §3/§8 worker start state machine: fresh name inserts; `offline`
    /// flips to `online`; `online` is rejected as a duplicate registration.
    pub async fn get_worker_status(&self, name: &str) -> Result<Option<WorkerStatus>, CoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM workers WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((status,)) => Ok(Some(status.parse()?)),
            None => Ok(None),
        }
    }

    pub async fn insert_worker(&self, name: &str, order_types: &str) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO workers (name, type, status, orders_processed, last_seen)
            VALUES ($1, $2, 'online', 0, now())
            "#,
        )
        .bind(name)
        .bind(order_types)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_worker_status(
        &self,
        name: &str,
        status: WorkerStatus,
    ) -> Result<(), CoreError> {
        sqlx::query("UPDATE workers SET status = $1 WHERE name = $2")
            .bind(status.as_str())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// §4.2 heartbeat: bump `last_seen` and force `online`, independent of
    /// whatever the stored status was (a crashed-then-restarted worker's
    /// first heartbeat should still win).
    pub async fn touch_worker_heartbeat(&self, name: &str) -> Result<(), CoreError> {
        let updated = sqlx::query(
            "UPDATE workers SET last_seen = now(), status = 'online' WHERE name = $1",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(CoreError::NotFound);
        }
        Ok(())
    }

    /// §4.3: `GET /orders/{order_number}/status`.
    pub async fn get_order_status(&self, number: &str) -> Result<Order, CoreError> {
        fetch_order(&self.pool, number).await
    }

    /// §4.3: `GET /orders/{order_number}/history`, ascending by `changed_at`.
    pub async fn get_order_history(
        &self,
        number: &str,
    ) -> Result<Vec<OrderStatusLogEntry>, CoreError> {
        let rows: Vec<(i64, i64, String, String, Option<String>, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT osl.id, osl.order_id, osl.status, osl.changed_by, osl.notes, osl.changed_at
              FROM order_status_log osl
              JOIN orders o ON o.id = osl.order_id
             WHERE o.number = $1
             ORDER BY osl.changed_at ASC
            "#,
        )
        .bind(number)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(CoreError::NotFound);
        }

        rows.into_iter()
            .map(|(id, order_id, status, changed_by, notes, changed_at)| {
                Ok(OrderStatusLogEntry {
                    id,
                    order_id,
                    status: status.parse()?,
                    changed_by,
                    notes,
                    changed_at,
                })
            })
            .collect()
    }

    /// §4.3: `GET /workers/status`. Effective status (heartbeat-timeout
    /// forcing) is derived by the caller, not here, since it depends on the
    /// tracking service's own `--heartbeat-timeout` policy.
    pub async fn list_workers(&self) -> Result<Vec<Worker>, CoreError> {
        let rows: Vec<(String, String, String, i64, DateTime<Utc>)> = sqlx::query_as(
            "SELECT name, type, status, orders_processed, last_seen FROM workers",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(name, order_types, status, orders_processed, last_seen)| {
                Ok(Worker {
                    name,
                    order_types,
                    status: status.parse()?,
                    orders_processed,
                    last_seen,
                })
            })
            .collect()
    }
}

async fn allocate_order_number(tx: &mut Transaction<'_, Postgres>) -> Result<String, CoreError> {
    let day = Utc::now().format("%Y-%m-%d").to_string();

    let (seq,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO order_number_seq (day, seq)
        VALUES ($1::date, 1)
        ON CONFLICT (day) DO UPDATE
          SET seq = order_number_seq.seq + 1
        RETURNING seq
        "#,
    )
    .bind(&day)
    .fetch_one(&mut **tx)
    .await?;

    let compact_day = day.replace('-', "");
    Ok(format!("ORD_{compact_day}_{seq:03}"))
}

async fn order_id_by_number(
    tx: &mut Transaction<'_, Postgres>,
    number: &str,
) -> Result<i64, CoreError> {
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM orders WHERE number = $1")
        .bind(number)
        .fetch_one(&mut **tx)
        .await?;
    Ok(id)
}

type OrderRow = (
    i64,
    String,
    String,
    String,
    Option<i32>,
    Option<String>,
    f64,
    i32,
    String,
    Option<String>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

const ORDER_COLUMNS: &str = "id, number, customer_name, type, table_number, delivery_address, \
     total_amount, priority, status, processed_by, completed_at, created_at, updated_at";

fn row_to_order(row: OrderRow) -> Result<Order, CoreError> {
    let (
        id,
        number,
        customer_name,
        order_type,
        table_number,
        delivery_address,
        total_amount,
        priority,
        status,
        processed_by,
        completed_at,
        created_at,
        updated_at,
    ) = row;
    Ok(Order {
        id,
        number,
        customer_name,
        order_type: order_type.parse()?,
        table_number,
        delivery_address,
        total_amount,
        priority,
        status: status.parse()?,
        processed_by,
        completed_at,
        created_at,
        updated_at,
        items: Vec::new(),
    })
}

async fn fetch_order(pool: &PgPool, number: &str) -> Result<Order, CoreError> {
    let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1");
    let row: OrderRow = sqlx::query_as(&query)
        .bind(number)
        .fetch_one(pool)
        .await?;
    row_to_order(row)
}

async fn fetch_order_tx(
    tx: &mut Transaction<'_, Postgres>,
    number: &str,
) -> Result<Order, CoreError> {
    let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1");
    let row: OrderRow = sqlx::query_as(&query)
        .bind(number)
        .fetch_one(&mut **tx)
        .await?;
    row_to_order(row)
}
