//! stp-wire: Scope Transfer Protocol framing.
//!
//! The two wire dialects spoken by a scope host:
//!
//! - **STP/0** -- text frames: an ASCII decimal length, a space, and the
//!   payload, the whole frame encoded UTF-16BE. The length counts characters
//!   of the decoded payload, not bytes on the wire.
//! - **STP/1** -- binary frames: the four-byte marker `STP\x01`, a varint
//!   body length, and a body of protobuf-style tagged fields. The first
//!   varint of every body is the message type.
//!
//! This crate is pure framing: no sockets, no session state. Readers are
//! incremental and never block mid-frame; partial input stays buffered until
//! more bytes arrive.

pub mod stp0;
pub mod stp1;
pub mod varint;

mod message;

pub use message::{
    FORMAT_JSON, Stp1Message, Stp1MessageType, client_id_field, field,
};

/// Errors raised while encoding or decoding either dialect.
///
/// Every variant except `Io` is fatal to the host session: the stream
/// position is unrecoverable once framing is lost.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("varint continues past 10 bytes")]
    VarintOverflow,
    #[error("frame does not start with the STP\\x01 marker")]
    BadMarker,
    #[error("wire type {0} is not valid in an STP/1 message")]
    InvalidWireType(u32),
    #[error("message type {0} is not in 1..=4")]
    InvalidMessageType(u64),
    #[error("message body ended inside a field")]
    TruncatedBody,
    #[error("text field is not valid UTF-8")]
    BadText,
    #[error("STP/0 length prefix {0:?} is not a decimal integer")]
    BadLengthPrefix(String),
    #[error("STP/0 payload is not valid UTF-16BE")]
    BadEncoding,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}
