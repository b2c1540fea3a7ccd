use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use common::broker::{BrokerConfig, KitchenConsumer, status_update};
use common::cli::{
    parse_order_types, validate_heartbeat_interval, validate_prefetch, validate_worker_name,
};
use common::config::AppConfig;
use common::domain::{OrderType, WorkerStatus};
use common::error::CoreError;
use common::repository::{ClaimOutcome, Repository};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Consumes orders of its declared types, drives each through
/// cooking -> ready, emits status updates, heartbeats its liveness (§4.2).
#[derive(Parser, Debug)]
#[command(name = "kitchen-worker", version, about = "Kitchen worker service")]
struct Args {
    /// Unique identifier for this worker, used as the registry key.
    #[arg(long = "worker-name")]
    worker_name: String,

    /// Comma-separated subset of dine_in, takeout, delivery.
    #[arg(long = "order-types", default_value = "takeout,dine_in,delivery")]
    order_types: String,

    /// Seconds between heartbeats, (0, 50].
    #[arg(long = "heartbeat-interval", default_value_t = 30)]
    heartbeat_interval: u32,

    /// Broker prefetch count, (0, 10].
    #[arg(long, default_value_t = 1)]
    prefetch: u16,

    #[arg(long, default_value = "config.yaml")]
    config: String,
}

enum ProcessOutcome {
    Completed,
    Cancelled,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init("kitchen-worker");
    let args = Args::parse();

    validate_worker_name(&args.worker_name)?;
    let order_types = parse_order_types(&args.order_types)?;
    validate_heartbeat_interval(args.heartbeat_interval)?;
    validate_prefetch(args.prefetch)?;

    let config = AppConfig::load(&args.config).unwrap_or_default();
    let repo = Repository::connect(&config.database_url()).await?;

    register_worker(&repo, &args.worker_name, &args.order_types).await?;
    info!(worker_name = %args.worker_name, action = "service_started", "kitchen-worker registered");

    let (consumer, mut order_rx) = KitchenConsumer::connect(
        BrokerConfig::new(config.amqp_url()),
        args.worker_name.clone(),
        order_types.clone(),
        args.prefetch,
    )
    .await?;
    let consumer = Arc::new(consumer);

    let cancel = CancellationToken::new();
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<anyhow::Error>(1);

    let heartbeat_handle = {
        let repo = repo.clone();
        let worker_name = args.worker_name.clone();
        let cancel = cancel.clone();
        let fatal_tx = fatal_tx.clone();
        let interval_secs = args.heartbeat_interval as u64;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = repo.touch_worker_heartbeat(&worker_name).await {
                            error!(error = %err, action = "heartbeat_failed", "heartbeat failed, worker is losing the store");
                            let _ = fatal_tx.send(anyhow::anyhow!(err)).await;
                            break;
                        }
                    }
                }
            }
        })
    };

    let processor_handle = {
        let repo = repo.clone();
        let consumer = consumer.clone();
        let worker_name = args.worker_name.clone();
        let configured = order_types.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let (order, delivery) = tokio::select! {
                    _ = cancel.cancelled() => break,
                    maybe = order_rx.recv() => match maybe {
                        Some(pair) => pair,
                        None => break,
                    },
                };

                if !configured.contains(&order.order_type) {
                    warn!(
                        order_number = %order.number,
                        action = "specialization_reject",
                        "order type not handled by this worker, requeuing"
                    );
                    let _ = delivery.nack_requeue().await;
                    continue;
                }

                match process_order(
                    &repo,
                    &consumer,
                    &worker_name,
                    &order.number,
                    order.order_type,
                    &cancel,
                )
                .await
                {
                    Ok(ProcessOutcome::Completed) => {
                        let _ = delivery.ack().await;
                    }
                    Ok(ProcessOutcome::Cancelled) => {
                        // Leave the delivery un-ack'd/un-nack'd; the broker
                        // redelivers it once this channel disconnects.
                        break;
                    }
                    Err(err) => {
                        error!(
                            error = %err,
                            order_number = %order.number,
                            action = "order_processing_failed",
                            "nacking with requeue"
                        );
                        let _ = delivery.nack_requeue().await;
                    }
                }
            }
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!(action = "shutdown", "shutdown signal received");
        }
        Some(err) = fatal_rx.recv() => {
            error!(error = %err, action = "fatal_shutdown", "fatal error, shutting down");
        }
    }

    cancel.cancel();
    let _ = heartbeat_handle.await;
    let _ = processor_handle.await;

    if let Err(err) = repo.set_worker_status(&args.worker_name, WorkerStatus::Offline).await {
        error!(error = %err, "failed to flip worker offline during shutdown");
    }
    repo.close().await;

    Ok(())
}

/// The slice of `Repository` the registration state machine needs,
/// pulled out as a trait so the machine itself can be exercised against
/// an in-memory fake instead of a live Postgres instance.
trait WorkerRegistry {
    async fn get_worker_status(&self, name: &str) -> Result<Option<WorkerStatus>, CoreError>;
    async fn insert_worker(&self, name: &str, order_types: &str) -> Result<(), CoreError>;
    async fn set_worker_status(&self, name: &str, status: WorkerStatus) -> Result<(), CoreError>;
}

impl WorkerRegistry for Repository {
    async fn get_worker_status(&self, name: &str) -> Result<Option<WorkerStatus>, CoreError> {
        Repository::get_worker_status(self, name).await
    }

    async fn insert_worker(&self, name: &str, order_types: &str) -> Result<(), CoreError> {
        Repository::insert_worker(self, name, order_types).await
    }

    async fn set_worker_status(&self, name: &str, status: WorkerStatus) -> Result<(), CoreError> {
        Repository::set_worker_status(self, name, status).await
    }
}

/// §3/§8 worker start state machine.
async fn register_worker(
    repo: &impl WorkerRegistry,
    name: &str,
    order_types: &str,
) -> Result<(), CoreError> {
    match repo.get_worker_status(name).await? {
        None => repo.insert_worker(name, order_types).await,
        Some(WorkerStatus::Offline) => repo.set_worker_status(name, WorkerStatus::Online).await,
        Some(WorkerStatus::Online) => Err(CoreError::DuplicateWorker(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeRegistry {
        state: Mutex<Option<WorkerStatus>>,
    }

    impl FakeRegistry {
        fn new(initial: Option<WorkerStatus>) -> Self {
            FakeRegistry {
                state: Mutex::new(initial),
            }
        }
    }

    impl WorkerRegistry for FakeRegistry {
        async fn get_worker_status(&self, _name: &str) -> Result<Option<WorkerStatus>, CoreError> {
            Ok(*self.state.lock().unwrap())
        }

        async fn insert_worker(&self, _name: &str, _order_types: &str) -> Result<(), CoreError> {
            *self.state.lock().unwrap() = Some(WorkerStatus::Online);
            Ok(())
        }

        async fn set_worker_status(
            &self,
            _name: &str,
            status: WorkerStatus,
        ) -> Result<(), CoreError> {
            *self.state.lock().unwrap() = Some(status);
            Ok(())
        }
    }

    #[tokio::test]
    async fn absent_worker_registers_online() {
        let registry = FakeRegistry::new(None);
        register_worker(&registry, "w1", "takeout").await.unwrap();
        assert_eq!(*registry.state.lock().unwrap(), Some(WorkerStatus::Online));
    }

    #[tokio::test]
    async fn offline_worker_flips_online() {
        let registry = FakeRegistry::new(Some(WorkerStatus::Offline));
        register_worker(&registry, "w1", "takeout").await.unwrap();
        assert_eq!(*registry.state.lock().unwrap(), Some(WorkerStatus::Online));
    }

    #[tokio::test]
    async fn online_worker_is_rejected_as_duplicate() {
        let registry = FakeRegistry::new(Some(WorkerStatus::Online));
        let err = register_worker(&registry, "w1", "takeout").await.unwrap_err();
        assert!(matches!(err, CoreError::DuplicateWorker(_)));
    }
}

/// Drives one order through `cooking -> ready` (§4.2): claim, publish,
/// cancellation-aware wait, finish, publish.
///
/// The claim step can land on a redelivered message instead of a fresh one
/// (§8): an order already `cooking` under this worker resumes the cook-wait
/// without re-publishing the claim notification, and an order already
/// `ready` is just acknowledged as already complete.
async fn process_order(
    repo: &Repository,
    consumer: &KitchenConsumer,
    worker_name: &str,
    order_number: &str,
    order_type: OrderType,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, CoreError> {
    let cooking_seconds = order_type.cooking_seconds();

    match repo.claim_order(order_number, worker_name).await? {
        ClaimOutcome::Claimed(order) => {
            let claim_update = status_update(&order, "received", worker_name, cooking_seconds);
            consumer.publish_status_update(&claim_update).await?;
        }
        ClaimOutcome::Resumed(_) => {}
        ClaimOutcome::AlreadyDone(_) => return Ok(ProcessOutcome::Completed),
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cooking_seconds)) => {}
        _ = cancel.cancelled() => return Ok(ProcessOutcome::Cancelled),
    }

    let finished = repo.finish_order(order_number, worker_name).await?;
    let finish_update = status_update(&finished, "cooking", worker_name, 0);
    consumer.publish_status_update(&finish_update).await?;

    Ok(ProcessOutcome::Completed)
}
