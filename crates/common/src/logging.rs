use tracing_subscriber::EnvFilter;

/// Initializes structured JSON-lines logging to stdout, matching §6's log
/// schema (`timestamp`, `level`, `message`, plus whatever fields each call
/// site attaches). `tracing_subscriber`'s JSON formatter emits
/// `timestamp`/`level`/`fields` natively; `service`/`hostname` are logged
/// once here as the startup event, same as every teacher `main.rs` calling
/// `tracing_subscriber::fmt().with_env_filter(...).init()` once at startup.
pub fn init(service: &str) {
    let hostname = resolve_hostname();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .with_current_span(true)
        .with_span_list(false)
        .init();

    tracing::info!(service, hostname, action = "startup", "logging initialized");
}

fn resolve_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}
