use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use lapin::message::Delivery as LapinDelivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::{RwLock, mpsc};
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::domain::{Order, OrderType, StatusUpdateMessage};
use crate::error::CoreError;

pub const ORDERS_TOPIC: &str = "orders_topic";
pub const NOTIFICATIONS_FANOUT: &str = "notifications_fanout";
pub const ORDERS_DLX: &str = "orders_dlx";
pub const ORDERS_DLQ: &str = "orders_dlq";

/// Connection parameters plus the fixed reconnect backoff (§4.4:
/// "sleeps the configured backoff, re-dials, re-opens a channel,
/// re-declares exchanges/queues/bindings").
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub amqp_url: String,
    pub reconnect_backoff: Duration,
}

impl BrokerConfig {
    pub fn new(amqp_url: impl Into<String>) -> Self {
        BrokerConfig {
            amqp_url: amqp_url.into(),
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

fn routing_key(order_type: OrderType, priority: i32) -> String {
    format!("kitchen.{}.{}", order_type.as_str(), priority)
}

async fn dial(url: &str) -> Result<(Connection, Channel), CoreError> {
    let conn = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(CoreError::BrokerFatal)?;
    let channel = conn.create_channel().await.map_err(CoreError::BrokerFatal)?;
    Ok((conn, channel))
}

/// Declares the shared topology of §4.4: the work topic exchange, the
/// dead-letter path, and the notification fanout. Every role that touches
/// the broker calls this on every (re)connect so the exchanges exist
/// regardless of startup order.
pub async fn declare_topology(channel: &Channel) -> Result<(), CoreError> {
    channel
        .exchange_declare(
            ORDERS_TOPIC,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .exchange_declare(
            NOTIFICATIONS_FANOUT,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .exchange_declare(
            ORDERS_DLX,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(
            ORDERS_DLQ,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_bind(
            ORDERS_DLQ,
            ORDERS_DLX,
            "#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    Ok(())
}

fn dead_letter_args() -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        lapin::types::AMQPValue::LongString(ORDERS_DLX.into()),
    );
    args
}

/// Work-exchange publisher, used only by the order ingress (§4.1). Holds
/// the live channel behind a lock so a background reconnect task can swap
/// it out from under in-flight publishers, mirroring the teacher's
/// `Producer` but adding the reconnection behavior the teacher's own
/// producer lacks (it only retries once, at startup).
pub struct OrderPublisher {
    channel: Arc<RwLock<Channel>>,
}

impl OrderPublisher {
    pub async fn connect(cfg: BrokerConfig) -> Result<Self, CoreError> {
        let (conn, channel) = dial(&cfg.amqp_url).await?;
        declare_topology(&channel).await?;
        channel.confirm_select(ConfirmSelectOptions::default()).await?;

        let shared = Arc::new(RwLock::new(channel));
        spawn_reconnect_watcher(conn, cfg, shared.clone(), |ch| {
            let ch = ch.clone();
            Box::pin(async move {
                ch.confirm_select(ConfirmSelectOptions::default()).await?;
                Ok(())
            })
        });

        Ok(OrderPublisher { channel: shared })
    }

    /// §4.4 work publish contract: JSON body, persistent delivery, priority
    /// header, routed by `kitchen.{type}.{priority}`.
    pub async fn publish(&self, order: &Order) -> Result<(), CoreError> {
        let body = serde_json::to_vec(order)
            .map_err(|e| CoreError::Malformed(e.to_string()))?;
        let key = routing_key(order.order_type, order.priority);

        let channel = self.channel.read().await.clone();
        let confirm = channel
            .basic_publish(
                ORDERS_TOPIC,
                &key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2)
                    .with_priority(order.priority as u8),
            )
            .await?;
        confirm.await?;
        Ok(())
    }

    /// Closes the underlying channel on shutdown (§5). The connection
    /// itself lives inside the reconnect watcher task and is dropped, and
    /// with it, when that task notices the channel close.
    pub async fn close(&self) {
        let channel = self.channel.read().await.clone();
        if let Err(err) = channel.close(200, "shutdown").await {
            warn!(error = %err, "error closing publisher channel during shutdown");
        }
    }
}

/// A single queued delivery, tagged with the channel it arrived on so it
/// can be ack'd/nack'd against the right connection even across a
/// reconnect (a delivery from a dead channel simply fails to ack, which is
/// fine: the broker already redelivers it once the old channel closes).
pub struct Delivery {
    inner: LapinDelivery,
    channel: Channel,
}

impl Delivery {
    pub async fn ack(&self) -> Result<(), CoreError> {
        self.channel
            .basic_ack(self.inner.delivery_tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    pub async fn nack_requeue(&self) -> Result<(), CoreError> {
        self.channel
            .basic_nack(
                self.inner.delivery_tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub async fn nack_drop(&self) -> Result<(), CoreError> {
        self.channel
            .basic_nack(
                self.inner.delivery_tag,
                BasicNackOptions {
                    requeue: false,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    pub fn body(&self) -> &[u8] {
        &self.inner.data
    }
}

/// Kitchen-side broker client: declares the per-type queues plus the
/// catch-all, consumes from all of them into one channel, and publishes
/// status-update notifications. Grounded on `machine-service/src/rabbitmq.rs`'s
/// `Consumer`, generalized to §4.4's multi-queue topology and enriched with
/// the reconnect loop from the design notes.
pub struct KitchenConsumer {
    channel: Arc<RwLock<Channel>>,
}

impl KitchenConsumer {
    pub async fn connect(
        cfg: BrokerConfig,
        worker_name: String,
        configured_types: Vec<OrderType>,
        prefetch: u16,
    ) -> Result<(Self, mpsc::Receiver<(Order, Delivery)>), CoreError> {
        let (conn, channel) = dial(&cfg.amqp_url).await?;
        declare_topology(&channel).await?;
        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;

        let (tx, rx) = mpsc::channel(prefetch.max(1) as usize * 4);
        start_queue_consumers(&channel, &worker_name, &configured_types, tx.clone()).await?;

        let shared = Arc::new(RwLock::new(channel));
        let types_for_reconnect = configured_types.clone();
        let name_for_reconnect = worker_name.clone();
        spawn_reconnect_watcher(conn, cfg, shared.clone(), move |ch| {
            let ch = ch.clone();
            let tx = tx.clone();
            let types = types_for_reconnect.clone();
            let name = name_for_reconnect.clone();
            Box::pin(async move {
                ch.basic_qos(prefetch, BasicQosOptions::default()).await?;
                start_queue_consumers(&ch, &name, &types, tx).await
            })
        });

        Ok((KitchenConsumer { channel: shared }, rx))
    }

    /// §4.4 status publish contract: published to the fanout with an empty
    /// routing key.
    pub async fn publish_status_update(&self, msg: &StatusUpdateMessage) -> Result<(), CoreError> {
        let body = serde_json::to_vec(msg).map_err(|e| CoreError::Malformed(e.to_string()))?;
        let channel = self.channel.read().await.clone();
        let confirm = channel
            .basic_publish(
                NOTIFICATIONS_FANOUT,
                "",
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await?;
        confirm.await?;
        Ok(())
    }
}

fn queue_name_for(order_type: OrderType) -> String {
    format!("kitchen_{}_queue", order_type.as_str())
}

async fn start_queue_consumers(
    channel: &Channel,
    worker_name: &str,
    configured_types: &[OrderType],
    tx: mpsc::Sender<(Order, Delivery)>,
) -> Result<(), CoreError> {
    let dlx_args = dead_letter_args();

    let mut queues: Vec<(String, Option<OrderType>)> = configured_types
        .iter()
        .map(|t| (queue_name_for(*t), Some(*t)))
        .collect();
    queues.push(("kitchen_queue".to_string(), None));

    for (queue_name, order_type) in queues {
        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                dlx_args.clone(),
            )
            .await?;

        let pattern = match order_type {
            Some(t) => format!("kitchen.{}.*", t.as_str()),
            None => "kitchen.*".to_string(),
        };
        channel
            .queue_bind(
                &queue_name,
                ORDERS_TOPIC,
                &pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let consumer_tag = format!("{worker_name}-{queue_name}");
        let mut consumer = channel
            .basic_consume(
                &queue_name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let forward_channel = channel.clone();
        let forward_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(err) => {
                        error!(error = %err, "consumer stream error");
                        break;
                    }
                };
                let order: Order = match serde_json::from_slice(&delivery.data) {
                    Ok(o) => o,
                    Err(err) => {
                        warn!(error = %err, "malformed order message, dropping");
                        let _ = delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..Default::default()
                            })
                            .await;
                        continue;
                    }
                };
                let wrapped = Delivery {
                    inner: delivery,
                    channel: forward_channel.clone(),
                };
                if forward_tx.send((order, wrapped)).await.is_err() {
                    break;
                }
            }
        });
    }

    Ok(())
}

/// Notification-sink consumer (§4.5): its own durable queue bound to the
/// fanout with an empty routing key.
pub struct NotificationConsumer {
    channel: Channel,
    queue_name: String,
}

impl NotificationConsumer {
    pub async fn connect(cfg: BrokerConfig, queue_name: &str) -> Result<Self, CoreError> {
        let (_conn, channel) = dial(&cfg.amqp_url).await?;
        declare_topology(&channel).await?;

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                queue_name,
                NOTIFICATIONS_FANOUT,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(NotificationConsumer {
            channel,
            queue_name: queue_name.to_string(),
        })
    }

    pub async fn run(
        &self,
        mut on_event: impl FnMut(StatusUpdateMessage) + Send,
    ) -> Result<(), CoreError> {
        let mut consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                "notification-subscriber",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;
            match serde_json::from_slice::<StatusUpdateMessage>(&delivery.data) {
                Ok(msg) => {
                    on_event(msg);
                    delivery.ack(BasicAckOptions::default()).await?;
                }
                Err(err) => {
                    warn!(error = %err, "malformed status-update payload, dropping");
                    delivery
                        .nack(BasicNackOptions {
                            requeue: false,
                            ..Default::default()
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Builds an RFC3339/UTC status-update message for the publish after a
/// claim or finish transition (§4.2, §9's fixed old/new-status ordering).
pub fn status_update(
    order: &Order,
    old_status: &str,
    changed_by: &str,
    cooking_seconds: u64,
) -> StatusUpdateMessage {
    let now = Utc::now();
    StatusUpdateMessage {
        order_number: order.number.clone(),
        old_status: old_status.to_string(),
        new_status: order.status.as_str().to_string(),
        changed_by: changed_by.to_string(),
        timestamp: now,
        estimated_completion: now + chrono::Duration::seconds(cooking_seconds as i64),
    }
}

type SetupFn = Box<
    dyn Fn(&Channel) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), CoreError>> + Send>>
        + Send
        + Sync,
>;

/// Watches the connection for closure and re-establishes it with the same
/// backoff/re-declare/re-consume dance on every role (§4.4 Reconnection,
/// design notes "Reconnection bookkeeping"). `setup` re-runs whatever
/// per-role state (confirm-select, queue consumers) the channel needs
/// after a fresh dial.
/// Registers a fresh close-notification channel on `conn`, per the design
/// notes ("the close watcher must install a fresh notification channel
/// after each successful reconnect; otherwise the second disconnect is
/// missed"). `Connection::on_error` fires a synchronous callback, bridged
/// here into a one-shot so the reconnect loop can simply `.await` it.
fn watch_close(conn: &Connection) -> tokio::sync::oneshot::Receiver<lapin::Error> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    conn.on_error(move |err| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(err);
        }
    });
    rx
}

fn spawn_reconnect_watcher(
    conn: Connection,
    cfg: BrokerConfig,
    shared: Arc<RwLock<Channel>>,
    setup: impl Fn(&Channel) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), CoreError>> + Send>>
        + Send
        + Sync
        + 'static,
) {
    let setup: SetupFn = Box::new(setup);
    tokio::spawn(async move {
        let mut conn = conn;
        let mut close_rx = watch_close(&conn);
        loop {
            let reason = close_rx.await;
            warn!(?reason, "broker connection closed, reconnecting");

            loop {
                sleep(cfg.reconnect_backoff).await;
                match dial(&cfg.amqp_url).await {
                    Ok((new_conn, new_channel)) => {
                        if let Err(err) = declare_topology(&new_channel).await {
                            error!(error = %err, "failed to redeclare topology after reconnect");
                            continue;
                        }
                        if let Err(err) = setup(&new_channel).await {
                            error!(error = %err, "failed to re-run channel setup after reconnect");
                            continue;
                        }
                        *shared.write().await = new_channel;
                        conn = new_conn;
                        info!("broker reconnected");
                        break;
                    }
                    Err(err) => {
                        error!(error = %err, "reconnect attempt failed");
                    }
                }
            }
            close_rx = watch_close(&conn);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_key_matches_grammar() {
        assert_eq!(routing_key(OrderType::Takeout, 5), "kitchen.takeout.5");
        assert_eq!(routing_key(OrderType::Delivery, 10), "kitchen.delivery.10");
    }

    #[test]
    fn queue_name_follows_type() {
        assert_eq!(queue_name_for(OrderType::DineIn), "kitchen_dine_in_queue");
    }
}
