//! STP/1 binary framing.
//!
//! A frame is the four-byte marker `STP\x01`, a varint body length, and the
//! body. The dialect itself is announced by the host with the ASCII sentinel
//! `STP/1\n` before the first frame; the sentinel is the host session's to
//! consume, not this codec's.

use crate::WireError;
use crate::message::{Stp1Message, decode_body, encode_body};
use crate::varint::{decode_varuint, encode_varuint};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// The dialect sentinel sent once by the host when switching to STP/1.
pub const STP1_TOKEN: &[u8] = b"STP/1\n";

const FRAME_MARKER: &[u8] = b"STP\x01";

/// Encode a complete frame for `msg`.
///
/// `client_id_prefix` is the captured identity field replayed verbatim on
/// proxy-originated commands (see [`crate::client_id_field`]).
pub fn encode_frame(msg: &Stp1Message, client_id_prefix: Option<&[u8]>) -> Vec<u8> {
    let body = encode_body(msg, client_id_prefix);
    let mut out = Vec::with_capacity(FRAME_MARKER.len() + 5 + body.len());
    out.extend_from_slice(FRAME_MARKER);
    out.extend(encode_varuint(body.len() as u64));
    out.extend(body);
    out
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum ReadState {
    Marker,
    Length,
    Body(usize),
}

/// Incremental STP/1 frame decoder.
///
/// Implements [`Decoder`] so the host session can drive it over a shared
/// [`BytesMut`]; a partial frame leaves the buffer untouched until more
/// bytes arrive, so feeding byte-by-byte yields the same messages as feeding
/// whole frames.
#[derive(Debug)]
pub struct Stp1Codec {
    state: ReadState,
}

impl Stp1Codec {
    pub fn new() -> Self {
        Stp1Codec {
            state: ReadState::Marker,
        }
    }
}

impl Default for Stp1Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for Stp1Codec {
    type Item = Stp1Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Stp1Message>, WireError> {
        loop {
            match self.state {
                ReadState::Marker => {
                    if src.len() < FRAME_MARKER.len() {
                        return Ok(None);
                    }
                    if &src[..FRAME_MARKER.len()] != FRAME_MARKER {
                        return Err(WireError::BadMarker);
                    }
                    src.advance(FRAME_MARKER.len());
                    self.state = ReadState::Length;
                }
                ReadState::Length => match decode_varuint(&src[..])? {
                    None => return Ok(None),
                    Some((len, used)) => {
                        src.advance(used);
                        let len = usize::try_from(len).map_err(|_| WireError::TruncatedBody)?;
                        self.state = ReadState::Body(len);
                    }
                },
                ReadState::Body(len) => {
                    if src.len() < len {
                        return Ok(None);
                    }
                    let body = src.split_to(len);
                    self.state = ReadState::Marker;
                    return decode_body(&body).map(Some);
                }
            }
        }
    }
}
