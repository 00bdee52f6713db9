//! STP/0 text framing.
//!
//! A frame is `<decimal length><SPACE><payload>`, the whole thing encoded
//! UTF-16BE on the wire. The length counts characters of the decoded
//! payload. The payload itself decomposes as `<command><SPACE><rest>` where
//! the command is a control word (`*services`, `*enable`, ...) or a service
//! name.

use crate::WireError;
use encoding::all::UTF_16BE;
use encoding::{DecoderTrap, EncoderTrap, Encoding};

/// Encode one frame: the character count of `msg`, a space, and `msg`,
/// all UTF-16BE.
pub fn encode_frame(msg: &str) -> Vec<u8> {
    let framed = format!("{} {}", msg.chars().count(), msg);
    UTF_16BE
        .encode(&framed, EncoderTrap::Strict)
        .expect("UTF-16BE encodes all of Unicode")
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Incremental STP/0 frame reader.
///
/// Bytes are decoded UTF-16BE as they arrive; a trailing lone high surrogate
/// is held back until its pair shows up, so frames may be fed in arbitrary
/// byte-sized chunks.
#[derive(Debug, Default)]
pub struct Stp0Reader {
    raw: Vec<u8>,
    text: String,
    /// Parsed length prefix of the frame currently being read.
    expect: Option<usize>,
}

impl Stp0Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw socket bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
    }

    /// True when any partial frame state is buffered. The host session must
    /// see this return false before it may switch dialects.
    pub fn has_pending(&self) -> bool {
        !self.raw.is_empty() || !self.text.is_empty() || self.expect.is_some()
    }

    /// Extract the next complete `(command, rest)` frame, or `None` when more
    /// input is needed.
    pub fn next_frame(&mut self) -> Result<Option<(String, String)>, WireError> {
        self.decode_available()?;
        if self.expect.is_none() {
            let Some(space) = self.text.find(' ') else {
                return Ok(None);
            };
            let length: usize = self.text[..space]
                .parse()
                .map_err(|_| WireError::BadLengthPrefix(self.text[..space].to_owned()))?;
            self.text.drain(..=space);
            self.expect = Some(length);
        }
        let Some(length) = self.expect else {
            return Ok(None);
        };
        let end = match self.text.char_indices().nth(length) {
            Some((offset, _)) => offset,
            None if self.text.chars().count() == length => self.text.len(),
            None => return Ok(None),
        };
        let frame: String = self.text.drain(..end).collect();
        self.expect = None;
        let (command, rest) = match frame.split_once(' ') {
            Some((command, rest)) => (command.to_owned(), rest.to_owned()),
            None => (frame, String::new()),
        };
        Ok(Some((command, rest)))
    }

    /// Decode every complete UTF-16BE unit in `raw` into `text`.
    fn decode_available(&mut self) -> Result<(), WireError> {
        let mut take = self.raw.len() & !1;
        if take >= 2 {
            let last = u16::from(self.raw[take - 2]) << 8 | u16::from(self.raw[take - 1]);
            if (0xD800..0xDC00).contains(&last) {
                // lone high surrogate: its low half has not arrived yet
                take -= 2;
            }
        }
        if take == 0 {
            return Ok(());
        }
        let chunk: Vec<u8> = self.raw.drain(..take).collect();
        let decoded = UTF_16BE
            .decode(&chunk, DecoderTrap::Strict)
            .map_err(|_| WireError::BadEncoding)?;
        self.text.push_str(&decoded);
        Ok(())
    }
}
