use clap::Parser;
use common::broker::{BrokerConfig, NotificationConsumer};
use common::config::AppConfig;
use tracing::{error, info};

/// Drains the notifications fanout and logs every status transition.
/// Has no HTTP surface and writes nothing back to the store (§4.4, §9).
#[derive(Parser, Debug)]
#[command(name = "notification-subscriber", version, about = "Status notification sink")]
struct Args {
    /// Queue bound to the notifications fanout for this subscriber instance.
    #[arg(long = "queue-name", default_value = "notifications_queue")]
    queue_name: String,

    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init("notification-subscriber");

    let args = Args::parse();
    let config = AppConfig::load(&args.config).unwrap_or_default();
    let cfg = BrokerConfig::new(config.amqp_url());

    info!(action = "service_started", queue_name = %args.queue_name, "notification-subscriber starting");

    loop {
        match NotificationConsumer::connect(cfg.clone(), &args.queue_name).await {
            Ok(consumer) => {
                let result = consumer
                    .run(|msg| {
                        info!(
                            order_number = %msg.order_number,
                            old_status = %msg.old_status,
                            new_status = %msg.new_status,
                            changed_by = %msg.changed_by,
                            timestamp = %msg.timestamp,
                            action = "status_notification",
                            "order status changed"
                        );
                    })
                    .await;
                if let Err(err) = result {
                    error!(error = %err, action = "consumer_dropped", "notification consumer loop ended, reconnecting");
                }
            }
            Err(err) => {
                error!(error = %err, action = "connect_failed", "failed to connect to broker, retrying");
            }
        }

        tokio::time::sleep(cfg.reconnect_backoff).await;
    }
}
