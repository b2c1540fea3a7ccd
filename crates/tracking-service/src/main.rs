use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router};
use chrono::Utc;
use clap::Parser;
use common::config::AppConfig;
use common::domain::{
    OrderHistoryEntry, OrderStatusResponse, WorkerStatus, WorkerStatusEntry,
};
use common::error::CoreError;
use common::repository::Repository;
use tokio::net::TcpListener;
use tracing::info;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

/// Read-only HTTP surface over order and worker state (§4.3). Derives
/// worker "effective" status at read time; never writes to the store.
#[derive(Parser, Debug)]
#[command(name = "tracking-service", version, about = "Order and worker tracking API")]
struct Args {
    #[arg(long, default_value_t = 3002)]
    port: u16,

    /// Seconds of silence before an `online` worker reads as `offline`.
    /// Defaults to 3x a kitchen-worker's default heartbeat interval.
    #[arg(long = "heartbeat-timeout", default_value_t = 90)]
    heartbeat_timeout: u64,

    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[derive(Clone)]
struct AppState {
    repo: Repository,
    heartbeat_timeout: Duration,
}

#[derive(OpenApi)]
#[openapi(
    paths(order_status, order_history, workers_status),
    components(schemas(OrderStatusResponse, OrderHistoryEntry, WorkerStatusEntry)),
    tags((name = "Tracking", description = "Order and worker tracking API"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init("tracking-service");

    let args = Args::parse();
    common::cli::validate_port(args.port, true)?;

    let config = AppConfig::load(&args.config).unwrap_or_default();
    let repo = Repository::connect(&config.database_url()).await?;

    let state = AppState {
        repo,
        heartbeat_timeout: Duration::from_secs(args.heartbeat_timeout),
    };

    let (api_router, api_spec) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(utoipa_axum::routes![order_status, order_history, workers_status])
        .split_for_parts();

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_spec))
        .merge(api_router)
        .with_state(state);

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, action = "service_started", "tracking-service listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(action = "shutdown", "shutdown signal received");
        })
        .await?;

    Ok(())
}

/// `GET /orders/{order_number}/status` (§4.3). `estimated_completion` is
/// derived, not stored: the order's `updated_at` (the moment it entered
/// `cooking`) plus its type's simulated cooking duration, present only
/// while the order is still cooking.
#[utoipa::path(
    get,
    path = "/orders/{order_number}/status",
    tag = "Tracking",
    params(("order_number" = String, Path, description = "Order number")),
    responses(
        (status = 200, description = "Current order status", body = OrderStatusResponse, content_type = "application/json"),
        (status = 404, description = "Order not found")
    )
)]
async fn order_status(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderStatusResponse>, CoreError> {
    let order = state.repo.get_order_status(&order_number).await?;

    let estimated_completion = if order.status == common::domain::OrderStatus::Cooking {
        Some(order.updated_at + chrono::Duration::seconds(order.order_type.cooking_seconds() as i64))
    } else {
        None
    };

    Ok(Json(OrderStatusResponse {
        order_number: order.number,
        current_status: order.status.as_str().to_string(),
        updated_at: order.updated_at,
        estimated_completion,
        processed_by: order.processed_by,
    }))
}

/// `GET /orders/{order_number}/history` (§4.3), ascending by `changed_at`.
#[utoipa::path(
    get,
    path = "/orders/{order_number}/history",
    tag = "Tracking",
    params(("order_number" = String, Path, description = "Order number")),
    responses(
        (status = 200, description = "Full status history", body = Vec<OrderHistoryEntry>, content_type = "application/json"),
        (status = 404, description = "Order not found")
    )
)]
async fn order_history(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<Vec<OrderHistoryEntry>>, CoreError> {
    let entries = state.repo.get_order_history(&order_number).await?;

    Ok(Json(
        entries
            .into_iter()
            .map(|entry| OrderHistoryEntry {
                status: entry.status.as_str().to_string(),
                changed_by: entry.changed_by,
                timestamp: entry.changed_at,
            })
            .collect(),
    ))
}

/// `GET /workers/status` (§4.3). Forces `online` workers whose heartbeat
/// has gone stale to read as `offline`, without writing that back to the
/// store — the next real heartbeat or restart is what flips the row.
#[utoipa::path(
    get,
    path = "/workers/status",
    tag = "Tracking",
    responses((status = 200, description = "All workers with effective status", body = Vec<WorkerStatusEntry>, content_type = "application/json"))
)]
async fn workers_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<WorkerStatusEntry>>, CoreError> {
    let workers = state.repo.list_workers().await?;
    let now = Utc::now();

    Ok(Json(
        workers
            .into_iter()
            .map(|worker| {
                let effective = effective_status(worker.status, worker.last_seen, now, state.heartbeat_timeout);
                WorkerStatusEntry {
                    worker_name: worker.name,
                    status: effective.as_str().to_string(),
                    orders_processed: worker.orders_processed,
                    last_seen: worker.last_seen,
                }
            })
            .collect(),
    ))
}

/// A worker whose stored status is `online` but whose last heartbeat is
/// older than `heartbeat_timeout` reads as `offline`, without writing
/// anything back — only the worker's own next heartbeat or restart does
/// that.
fn effective_status(
    stored: WorkerStatus,
    last_seen: chrono::DateTime<Utc>,
    now: chrono::DateTime<Utc>,
    heartbeat_timeout: Duration,
) -> WorkerStatus {
    let stale = now.signed_duration_since(last_seen)
        > chrono::Duration::from_std(heartbeat_timeout).unwrap_or_default();
    if stored == WorkerStatus::Online && stale {
        WorkerStatus::Offline
    } else {
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_within_timeout_stays_online() {
        let now = Utc::now();
        let last_seen = now - chrono::Duration::seconds(10);
        let status = effective_status(WorkerStatus::Online, last_seen, now, Duration::from_secs(90));
        assert_eq!(status, WorkerStatus::Online);
    }

    #[test]
    fn online_past_timeout_reads_offline() {
        let now = Utc::now();
        let last_seen = now - chrono::Duration::seconds(200);
        let status = effective_status(WorkerStatus::Online, last_seen, now, Duration::from_secs(90));
        assert_eq!(status, WorkerStatus::Offline);
    }

    #[test]
    fn stored_offline_stays_offline_regardless_of_last_seen() {
        let now = Utc::now();
        let status = effective_status(WorkerStatus::Offline, now, now, Duration::from_secs(90));
        assert_eq!(status, WorkerStatus::Offline);
    }
}
