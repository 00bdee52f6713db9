//! The host session: owns the scope TCP connection.
//!
//! One connection at a time. Reads land in a single input buffer; a switch
//! on the session's current dialect at the top of the drain loop selects the
//! framer. Writes funnel through an unbounded channel to a writer task that
//! owns the write half, so every producer (HTTP handlers, schema discovery)
//! sees its frames flushed in submission order.

use bytes::{Buf, BytesMut};
use scope_core::{Dialect, ScopeMessage, Session, pretty};
use std::sync::Arc;
use stp_wire::stp0::Stp0Reader;
use stp_wire::stp1::{STP1_TOKEN, Stp1Codec};
use stp_wire::{Stp1Message, WireError};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Message-trace settings, carried from the CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageTrace {
    pub enabled: bool,
    pub format_payload: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum HostSessionError {
    #[error("framing: {0}")]
    Wire(#[from] WireError),
    #[error("dialect switch with partial STP/0 input buffered")]
    DirtyDialectSwitch,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Accept scope connections forever, one session at a time.
///
/// A framing or protocol error tears the session down; the next accepted
/// connection starts from a clean slate because `host_closed` resets the
/// session state either way.
pub async fn run_host_acceptor(listener: TcpListener, session: Arc<Session>, trace: MessageTrace) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!(%peer, "scope host connected");
                match run_host_session(stream, &session, trace).await {
                    Ok(()) => info!("scope host disconnected"),
                    Err(e) => error!(error = %e, "scope host session failed"),
                }
                session.host_closed().await;
            }
            Err(e) => {
                warn!(error = %e, "accepting a scope connection failed");
            }
        }
    }
}

async fn run_host_session(
    stream: TcpStream,
    session: &Session,
    trace: MessageTrace,
) -> Result<(), HostSessionError> {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });
    session.attach_host(tx).await;
    let result = read_loop(read_half, session, trace).await;
    writer.abort();
    result
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    session: &Session,
    trace: MessageTrace,
) -> Result<(), HostSessionError> {
    use tokio::io::AsyncReadExt;

    let mut in_buf = BytesMut::with_capacity(8192);
    let mut stp0 = Stp0Reader::new();
    let mut stp1 = Stp1Codec::new();
    loop {
        drain_frames(&mut in_buf, &mut stp0, &mut stp1, session, trace).await?;
        match read_half.read_buf(&mut in_buf).await {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(HostSessionError::Io(e)),
        }
    }
}

/// Pull every complete frame out of the buffers, switching on the dialect at
/// the top of each pass.
async fn drain_frames(
    in_buf: &mut BytesMut,
    stp0: &mut Stp0Reader,
    stp1: &mut Stp1Codec,
    session: &Session,
    trace: MessageTrace,
) -> Result<(), HostSessionError> {
    use tokio_util::codec::Decoder;

    loop {
        match session.dialect().await {
            Dialect::Negotiating => {
                // Mixing framings would corrupt the stream: a partial STP/0
                // frame must not be pending when the sentinel is awaited.
                if stp0.has_pending() {
                    return Err(HostSessionError::DirtyDialectSwitch);
                }
                if in_buf.len() >= STP1_TOKEN.len() {
                    if &in_buf[..STP1_TOKEN.len()] == STP1_TOKEN {
                        in_buf.advance(STP1_TOKEN.len());
                        info!("host announced STP/1");
                        session.set_dialect(Dialect::Stp1).await;
                    } else {
                        session.set_dialect(Dialect::Stp0).await;
                    }
                } else if !in_buf.is_empty() && !STP1_TOKEN.starts_with(&in_buf[..]) {
                    // cannot be the sentinel any more
                    session.set_dialect(Dialect::Stp0).await;
                } else {
                    return Ok(());
                }
            }
            Dialect::Stp0 => {
                if !in_buf.is_empty() {
                    let bytes = in_buf.split_to(in_buf.len());
                    stp0.feed(&bytes);
                }
                match stp0.next_frame()? {
                    Some((command, rest)) => handle_stp0_frame(session, command, rest).await,
                    None => return Ok(()),
                }
            }
            Dialect::Stp1 => match stp1.decode(in_buf)? {
                Some(msg) => {
                    trace_inbound(session, trace, &msg).await;
                    session.deliver_from_host(ScopeMessage::Stp1(msg)).await;
                }
                None => return Ok(()),
            },
        }
    }
}

async fn handle_stp0_frame(session: &Session, command: String, rest: String) {
    if command == "*services" {
        let names: Vec<String> = rest
            .split(',')
            .map(str::to_owned)
            .filter(|name| !name.is_empty())
            .collect();
        info!(services = ?names, "service catalog received");
        session.set_catalog(names).await;
    } else if session.knows_service(&command).await {
        debug!(service = %command, "message from host");
        session
            .deliver_from_host(ScopeMessage::Stp0 {
                service: command,
                payload: rest,
            })
            .await;
    } else {
        debug!(command = %command, "ignoring control message from host");
    }
}

async fn trace_inbound(session: &Session, trace: MessageTrace, msg: &Stp1Message) {
    if !trace.enabled {
        return;
    }
    if trace.format_payload {
        let schema = session.schema().await;
        info!(
            "message from host:\n{}",
            pretty::render_message(msg, schema.as_deref())
        );
    } else {
        info!(
            service = %msg.service,
            msg_type = %msg.msg_type,
            command = msg.command_id,
            status = msg.status,
            tag = msg.tag,
            "message from host"
        );
    }
}
