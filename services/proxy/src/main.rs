use proxy::Proxy;
use proxy::config;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::parse_args();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        scope_port = cfg.scope_port,
        http_port = cfg.http_port,
        "scope proxy starting"
    );

    let proxy = match Proxy::start(cfg).await {
        Ok(proxy) => proxy,
        Err(e) => {
            eprintln!("FATAL: failed to bind: {e}");
            std::process::exit(1);
        }
    };
    info!(scope = %proxy.scope_addr, http = %proxy.http_addr, "listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("FATAL: signal handler failed: {e}");
        std::process::exit(1);
    }
    info!("shutting down");
}
