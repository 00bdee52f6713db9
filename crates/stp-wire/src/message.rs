//! The STP/1 transport message.
//!
//! A frame body is `varint(messageType)` followed by tagged fields in
//! protobuf wire format. Only wire types 0 (varint) and 2 (length-delimited)
//! occur. Absent numeric fields default to 0 and an absent payload to empty.

use crate::WireError;
use crate::varint::{encode_varuint, take_varuint};
use std::fmt;

/// Field numbers of the STP/1 transport message.
pub mod field {
    pub const SERVICE: u32 = 1;
    pub const COMMAND_ID: u32 = 2;
    pub const FORMAT: u32 = 3;
    pub const STATUS: u32 = 4;
    pub const TAG: u32 = 5;
    pub const CLIENT_ID: u32 = 6;
    pub const UUID: u32 = 7;
    pub const PAYLOAD: u32 = 8;
}

/// The only payload format the proxy emits.
pub const FORMAT_JSON: u32 = 1;

const WIRE_VARINT: u32 = 0;
const WIRE_LENGTH_DELIMITED: u32 = 2;

// ---------------------------------------------------------------------------
// Message type
// ---------------------------------------------------------------------------

/// The first varint of every STP/1 body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stp1MessageType {
    Command = 1,
    Response = 2,
    Event = 3,
    Error = 4,
}

impl TryFrom<u64> for Stp1MessageType {
    type Error = WireError;

    fn try_from(value: u64) -> Result<Self, WireError> {
        match value {
            1 => Ok(Stp1MessageType::Command),
            2 => Ok(Stp1MessageType::Response),
            3 => Ok(Stp1MessageType::Event),
            4 => Ok(Stp1MessageType::Error),
            other => Err(WireError::InvalidMessageType(other)),
        }
    }
}

impl fmt::Display for Stp1MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stp1MessageType::Command => write!(f, "command"),
            Stp1MessageType::Response => write!(f, "response"),
            Stp1MessageType::Event => write!(f, "event"),
            Stp1MessageType::Error => write!(f, "error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// An STP/1 transport message with defaulted optional fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stp1Message {
    pub msg_type: Stp1MessageType,
    pub service: String,
    pub command_id: u32,
    pub format: u32,
    pub status: u32,
    /// 0 means untagged. Responses and errors carry the tag of the request
    /// they answer.
    pub tag: u32,
    /// Assigned by the host on its first message; sticky for the session.
    pub client_id: u32,
    pub uuid: Option<String>,
    pub payload: Vec<u8>,
}

impl Stp1Message {
    pub fn new(msg_type: Stp1MessageType) -> Self {
        Stp1Message {
            msg_type,
            service: String::new(),
            command_id: 0,
            format: 0,
            status: 0,
            tag: 0,
            client_id: 0,
            uuid: None,
            payload: Vec::new(),
        }
    }

    /// A JSON-format command, the only message shape the proxy originates.
    pub fn command(
        service: impl Into<String>,
        command_id: u32,
        tag: u32,
        payload: Vec<u8>,
    ) -> Self {
        Stp1Message {
            msg_type: Stp1MessageType::Command,
            service: service.into(),
            command_id,
            format: FORMAT_JSON,
            status: 0,
            tag,
            client_id: 0,
            uuid: None,
            payload,
        }
    }
}

/// The encoded clientID field (key + value) for a given id, as captured from
/// the first host message and replayed on proxy-originated commands.
pub fn client_id_field(client_id: u32) -> Vec<u8> {
    let mut out = encode_varuint(u64::from(field::CLIENT_ID) << 3 | u64::from(WIRE_VARINT));
    out.extend(encode_varuint(u64::from(client_id)));
    out
}

// ---------------------------------------------------------------------------
// Body decoding
// ---------------------------------------------------------------------------

/// Parse a complete frame body into a message.
///
/// Fields may arrive in any order; unknown field numbers are skipped by wire
/// type. Any wire type other than 0 or 2 is a protocol error.
pub(crate) fn decode_body(body: &[u8]) -> Result<Stp1Message, WireError> {
    let (raw_type, mut rest) = take_varuint(body)?;
    let mut msg = Stp1Message::new(Stp1MessageType::try_from(raw_type)?);
    while !rest.is_empty() {
        let (key, after_key) = take_varuint(rest)?;
        let number = (key >> 3) as u32;
        let wire = (key & 0x7) as u32;
        match wire {
            WIRE_VARINT => {
                let (value, after_value) = take_varuint(after_key)?;
                rest = after_value;
                match number {
                    field::COMMAND_ID => msg.command_id = value as u32,
                    field::FORMAT => msg.format = value as u32,
                    field::STATUS => msg.status = value as u32,
                    field::TAG => msg.tag = value as u32,
                    field::CLIENT_ID => msg.client_id = value as u32,
                    _ => {}
                }
            }
            WIRE_LENGTH_DELIMITED => {
                let (len, after_len) = take_varuint(after_key)?;
                let len = usize::try_from(len).map_err(|_| WireError::TruncatedBody)?;
                if after_len.len() < len {
                    return Err(WireError::TruncatedBody);
                }
                let value = &after_len[..len];
                rest = &after_len[len..];
                match number {
                    field::SERVICE => {
                        msg.service = std::str::from_utf8(value)
                            .map_err(|_| WireError::BadText)?
                            .to_owned();
                    }
                    field::UUID => {
                        msg.uuid = Some(
                            std::str::from_utf8(value)
                                .map_err(|_| WireError::BadText)?
                                .to_owned(),
                        );
                    }
                    field::PAYLOAD => msg.payload = value.to_vec(),
                    _ => {}
                }
            }
            other => return Err(WireError::InvalidWireType(other)),
        }
    }
    Ok(msg)
}

// ---------------------------------------------------------------------------
// Body encoding
// ---------------------------------------------------------------------------

/// Encode a message body with fields in ascending number.
///
/// The identity field is the captured `client_id_prefix` verbatim when known.
/// Before any host message has supplied a clientID, a uuid is derived from
/// the payload instead: when the payload is a JSON array whose second element
/// is a string (`["json","uuid:..."]`), that string becomes field 7.
pub(crate) fn encode_body(msg: &Stp1Message, client_id_prefix: Option<&[u8]>) -> Vec<u8> {
    let mut out = encode_varuint(msg.msg_type as u64);
    push_bytes(&mut out, field::SERVICE, msg.service.as_bytes());
    push_varint(&mut out, field::COMMAND_ID, u64::from(msg.command_id));
    push_varint(&mut out, field::FORMAT, u64::from(msg.format));
    if msg.status != 0 {
        push_varint(&mut out, field::STATUS, u64::from(msg.status));
    }
    push_varint(&mut out, field::TAG, u64::from(msg.tag));
    if let Some(prefix) = client_id_prefix {
        out.extend_from_slice(prefix);
    } else if let Some(uuid) = msg
        .uuid
        .clone()
        .or_else(|| extract_payload_uuid(&msg.payload))
    {
        push_bytes(&mut out, field::UUID, uuid.as_bytes());
    }
    push_bytes(&mut out, field::PAYLOAD, &msg.payload);
    out
}

fn push_varint(out: &mut Vec<u8>, number: u32, value: u64) {
    out.extend(encode_varuint(u64::from(number) << 3 | u64::from(WIRE_VARINT)));
    out.extend(encode_varuint(value));
}

fn push_bytes(out: &mut Vec<u8>, number: u32, value: &[u8]) {
    out.extend(encode_varuint(
        u64::from(number) << 3 | u64::from(WIRE_LENGTH_DELIMITED),
    ));
    out.extend(encode_varuint(value.len() as u64));
    out.extend_from_slice(value);
}

fn extract_payload_uuid(payload: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(payload).ok()?;
    match value.get(1)? {
        serde_json::Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
