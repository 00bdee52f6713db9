//! proxy: bridges a scope host's STP socket to an HTTP debugger client.
//!
//! One host, one client. The host speaks STP over a dedicated TCP port; the
//! client long-polls an HTTP interface. Session semantics live in
//! scope-core, framing in stp-wire; this crate owns the sockets and the
//! route table.

pub mod config;
pub mod host;
pub mod http_api;
pub mod snapshot;

use crate::config::ProxyConfig;
use crate::host::MessageTrace;
use crate::http_api::ApiState;
use scope_core::Session;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::error;

/// Handle to a running proxy: its bound addresses and session context.
///
/// Both listeners accept `port 0`, so the integration suites can start a
/// proxy per test and read the real addresses back.
pub struct Proxy {
    pub scope_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub session: Arc<Session>,
}

impl Proxy {
    /// Bind both listeners and spawn the host acceptor and HTTP server.
    pub async fn start(cfg: ProxyConfig) -> std::io::Result<Proxy> {
        let session = Arc::new(Session::new());
        let trace = MessageTrace {
            enabled: cfg.verbose,
            format_payload: cfg.format_payload,
        };

        let scope_listener =
            TcpListener::bind(("127.0.0.1", cfg.scope_port)).await?;
        let scope_addr = scope_listener.local_addr()?;
        tokio::spawn(host::run_host_acceptor(
            scope_listener,
            session.clone(),
            trace,
        ));

        let http_listener = TcpListener::bind(("127.0.0.1", cfg.http_port)).await?;
        let http_addr = http_listener.local_addr()?;
        let router = http_api::build_router(ApiState {
            session: session.clone(),
            poll_timeout: cfg.poll_timeout,
            snapshot_dir: cfg.snapshot_dir.clone(),
            trace,
        });
        tokio::spawn(async move {
            if let Err(e) = axum::serve(http_listener, router).await {
                error!(error = %e, "http server failed");
            }
        });

        Ok(Proxy {
            scope_addr,
            http_addr,
            session,
        })
    }
}
