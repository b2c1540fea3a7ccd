use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router};
use clap::Parser;
use common::broker::{BrokerConfig, OrderPublisher};
use common::config::AppConfig;
use common::domain::{OrderRequest, OrderResponse};
use common::error::CoreError;
use common::repository::Repository;
use common::validation::validate_order_request;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

/// Accepts HTTP order submissions, validates them, persists them
/// transactionally, and publishes them to the kitchen topic (§4.1).
#[derive(Parser, Debug)]
#[command(name = "order-service", version, about = "Order ingress service")]
struct Args {
    /// TCP port. Must be in [1024, 49151] if explicitly set.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// Maximum number of concurrent in-flight order submissions.
    #[arg(long = "max-concurrent", default_value_t = 50)]
    max_concurrent: u32,

    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[derive(Clone)]
struct AppState {
    repo: Repository,
    publisher: Arc<OrderPublisher>,
    concurrency: Arc<Semaphore>,
}

#[derive(OpenApi)]
#[openapi(
    paths(post_order),
    components(schemas(
        common::domain::OrderItemRequest,
        common::domain::OrderRequest,
        common::domain::OrderResponse
    )),
    tags((name = "Orders", description = "Order ingress API"))
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    common::logging::init("order-service");

    let args = Args::parse();
    common::cli::validate_port(args.port, true)?;
    common::cli::validate_max_concurrent(args.max_concurrent)?;

    let config = AppConfig::load(&args.config).unwrap_or_default();

    let repo = Repository::connect(&config.database_url()).await?;
    let publisher = Arc::new(OrderPublisher::connect(BrokerConfig::new(config.amqp_url())).await?);

    let state = AppState {
        repo: repo.clone(),
        publisher: publisher.clone(),
        concurrency: Arc::new(Semaphore::new(args.max_concurrent as usize)),
    };

    let (api_router, api_spec) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .routes(utoipa_axum::routes![post_order])
        .split_for_parts();

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_spec))
        .merge(api_router)
        .with_state(state);

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, action = "service_started", "order-service listening");

    let serve = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    // §5: stop accepting new connections the instant the signal fires, then
    // give in-flight handlers up to 5s to drain before forcing the exit.
    match tokio::time::timeout(Duration::from_secs(5), serve).await {
        Ok(result) => result?,
        Err(_) => warn!(action = "shutdown_timeout", "5s drain window elapsed, forcing exit"),
    }

    publisher.close().await;
    repo.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!(action = "shutdown", "shutdown signal received, draining in-flight requests");
}

/// `POST /orders` (§4.1): validate, insert within one transaction, publish
/// to the kitchen topic. If the publish fails after commit the order stays
/// `received` in the store — an accepted trade-off (§7) for keeping the
/// database write atomic.
#[utoipa::path(
    post,
    path = "/orders",
    tag = "Orders",
    request_body(
        content = common::domain::OrderRequest,
        description = "Order to submit",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Order received", body = common::domain::OrderResponse, content_type = "application/json"),
        (status = 400, description = "Validation error"),
        (status = 500, description = "Internal server error")
    )
)]
async fn post_order(
    State(state): State<AppState>,
    Json(payload): Json<OrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), CoreError> {
    let _permit = state.concurrency.acquire().await;

    let validated = validate_order_request(&payload)?;
    let order = state.repo.insert_order(validated).await?;

    if let Err(err) = state.publisher.publish(&order).await {
        error!(error = %err, order_number = %order.number, action = "publish_failed", "order persisted but publish failed");
        return Err(err);
    }

    Ok((
        StatusCode::OK,
        Json(OrderResponse {
            order_number: order.number,
            status: "received".to_string(),
            total_amount: order.total_amount,
        }),
    ))
}
