//! The HTTP client interface.
//!
//! Six routes, all answering `200 OK` with `Cache-Control: no-cache` on
//! success and `400` with `<bad/>` on semantic failure:
//!
//! - `GET  /services` — the catalog as `<services><service name=".."/></services>`;
//!   on an STP/1 host this first runs schema discovery
//! - `GET  /enable/{service}` — `<ok/>` or `<bad/>`
//! - `GET  /get-message` — long poll; the next host message or `<timeout/>`.
//!   Message envelope rides in `X-Scope-Message-*` headers, the payload is
//!   the body
//! - `POST /post-command/{service}` — STP/0 command, body is the XML
//! - `POST /post-command/{service}/{command_id}/{tag}` — STP/1 command,
//!   body is the payload
//! - `POST /snapshot` — store a markup snapshot

use crate::host::MessageTrace;
use crate::snapshot;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use scope_core::{
    Dialect, EnableOutcome, PollReply, ScopeMessage, Session, pretty, schema,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stp_wire::Stp1Message;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<Session>,
    pub poll_timeout: Duration,
    pub snapshot_dir: PathBuf,
    pub trace: MessageTrace,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/services", get(list_services))
        .route("/enable/{service}", get(enable))
        .route("/get-message", get(get_message))
        .route("/post-command/{service}", post(post_command_stp0))
        .route(
            "/post-command/{service}/{command_id}/{tag}",
            post(post_command_stp1),
        )
        .route("/snapshot", post(store_snapshot))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn xml(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [
            ("cache-control", "no-cache"),
            ("content-type", "application/xml"),
        ],
        body.into(),
    )
        .into_response()
}

fn ok() -> Response {
    xml(StatusCode::OK, "<ok/>")
}

fn bad() -> Response {
    xml(StatusCode::BAD_REQUEST, "<bad/>")
}

// ---------------------------------------------------------------------------
// GET handlers
// ---------------------------------------------------------------------------

async fn list_services(State(st): State<ApiState>) -> Response {
    if st.session.dialect().await == Dialect::Stp1 {
        // first request after negotiation triggers the introspection
        schema::ensure_schema(&st.session).await;
    }
    let items: String = st
        .session
        .service_names()
        .await
        .iter()
        .map(|name| format!("<service name=\"{name}\"/>"))
        .collect();
    xml(StatusCode::OK, format!("<services>{items}</services>"))
}

async fn enable(State(st): State<ApiState>, Path(service): Path<String>) -> Response {
    match st.session.enable_service(&service).await {
        EnableOutcome::Enabled | EnableOutcome::AlreadyEnabled => ok(),
        EnableOutcome::UnknownService => {
            warn!(service = %service, "enable of unknown service refused");
            bad()
        }
        EnableOutcome::HostGone => bad(),
    }
}

async fn get_message(State(st): State<ApiState>) -> Response {
    match st.session.next_message(st.poll_timeout).await {
        PollReply::Timeout => xml(StatusCode::OK, "<timeout/>"),
        PollReply::Message(ScopeMessage::Stp0 { service, payload }) => (
            StatusCode::OK,
            [
                ("cache-control", "no-cache".to_owned()),
                ("content-type", "application/xml".to_owned()),
                ("x-scope-message-service", service),
            ],
            payload,
        )
            .into_response(),
        PollReply::Message(ScopeMessage::Stp1(msg)) => {
            trace_outbound(&st, &msg).await;
            let payload = if msg.payload.is_empty() {
                // a downstream layer elides empty 200 bodies into 204s
                b" ".to_vec()
            } else {
                msg.payload
            };
            (
                StatusCode::OK,
                [
                    ("cache-control", "no-cache".to_owned()),
                    ("content-type", "text/plain".to_owned()),
                    ("x-scope-message-service", msg.service),
                    ("x-scope-message-command", msg.command_id.to_string()),
                    ("x-scope-message-status", msg.status.to_string()),
                    ("x-scope-message-tag", msg.tag.to_string()),
                ],
                payload,
            )
                .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// POST handlers
// ---------------------------------------------------------------------------

async fn post_command_stp0(
    State(st): State<ApiState>,
    Path(service): Path<String>,
    body: String,
) -> Response {
    if !st.session.is_enabled(&service).await {
        warn!(service = %service, "command posted before the service was enabled");
        return bad();
    }
    let body = if body.starts_with("<?xml") || body.starts_with("STP/1") {
        body
    } else {
        format!("<?xml version=\"1.0\"?>{body}")
    };
    if st.session.send_stp0(&format!("{service} {body}")).await {
        ok()
    } else {
        bad()
    }
}

async fn post_command_stp1(
    State(st): State<ApiState>,
    Path((service, command_id, tag)): Path<(String, u32, u32)>,
    body: Bytes,
) -> Response {
    let msg = Stp1Message::command(service, command_id, tag, body.to_vec());
    trace_outbound(&st, &msg).await;
    if st.session.send_stp1(&msg).await {
        ok()
    } else {
        bad()
    }
}

async fn store_snapshot(State(st): State<ApiState>, body: String) -> Response {
    match snapshot::store(&st.snapshot_dir, &body) {
        Ok(path) => {
            info!(path = %path.display(), "snapshot written");
            ok()
        }
        Err(e) => {
            warn!(error = %e, "snapshot rejected");
            bad()
        }
    }
}

async fn trace_outbound(st: &ApiState, msg: &Stp1Message) {
    if !st.trace.enabled {
        return;
    }
    if st.trace.format_payload {
        let schema = st.session.schema().await;
        info!(
            "message to client/host:\n{}",
            pretty::render_message(msg, schema.as_deref())
        );
    } else {
        info!(
            service = %msg.service,
            msg_type = %msg.msg_type,
            command = msg.command_id,
            status = msg.status,
            tag = msg.tag,
            "message"
        );
    }
}
