//! Message framing for the node's stdin/stdout transport
//!
//! Each envelope is one line of compact JSON terminated by `\n`.

use bytes::{Buf, BufMut, BytesMut};
use epidemic_core::Envelope;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum line size (16 MB); longer input lines are skipped
const MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Line too large: {0} bytes")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A decoded input line
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// A well-formed envelope
    Envelope(Envelope),
    /// A line that is not a valid envelope; the stream continues after it
    Malformed { line: String, reason: String },
}

/// Codec for newline-delimited JSON envelopes
pub struct EnvelopeCodec {
    /// Maximum accepted line length
    max_line_bytes: usize,
    /// Offset already scanned for a newline
    next_index: usize,
    /// Bytes dropped so far from an oversized line, if inside one
    discarding: Option<usize>,
}

impl EnvelopeCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_SIZE)
    }

    /// Create codec with a custom line limit
    pub fn with_max_line(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes,
            next_index: 0,
            discarding: None,
        }
    }

    fn oversized(&self, length: usize) -> Inbound {
        Inbound::Malformed {
            line: String::new(),
            reason: format!(
                "line of {} bytes exceeds the {} byte limit",
                length, self.max_line_bytes
            ),
        }
    }

    fn parse_line(line: &[u8]) -> Option<Inbound> {
        let line = trim_ascii(line);
        if line.is_empty() {
            return None;
        }

        Some(match serde_json::from_slice::<Envelope>(line) {
            Ok(envelope) => Inbound::Envelope(envelope),
            Err(e) => Inbound::Malformed {
                line: String::from_utf8_lossy(line).into_owned(),
                reason: e.to_string(),
            },
        })
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn trim_ascii(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

impl Decoder for EnvelopeCodec {
    type Item = Inbound;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

            let Some(offset) = newline else {
                if let Some(dropped) = self.discarding.as_mut() {
                    *dropped += src.len();
                    src.clear();
                    self.next_index = 0;
                } else if src.len() > self.max_line_bytes {
                    self.discarding = Some(src.len());
                    src.clear();
                    self.next_index = 0;
                } else {
                    self.next_index = src.len();
                }
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;

            if let Some(dropped) = self.discarding.take() {
                src.advance(line_end + 1);
                return Ok(Some(self.oversized(dropped + line_end)));
            }
            if line_end > self.max_line_bytes {
                src.advance(line_end + 1);
                return Ok(Some(self.oversized(line_end)));
            }

            let line = src.split_to(line_end + 1);
            if let Some(inbound) = Self::parse_line(&line) {
                return Ok(Some(inbound));
            }
            // Blank line, keep scanning
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(inbound) = self.decode(src)? {
            return Ok(Some(inbound));
        }

        // Final line without a trailing newline
        self.next_index = 0;
        let rest = src.split();
        if let Some(dropped) = self.discarding.take() {
            return Ok(Some(self.oversized(dropped + rest.len())));
        }
        Ok(Self::parse_line(&rest))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        serde_json::to_writer((&mut *dst).writer(), &item)?;

        let length = dst.len() - start;
        if length > self.max_line_bytes {
            dst.truncate(start);
            return Err(FrameError::TooLarge(length));
        }

        dst.put_u8(b'\n');
        Ok(())
    }
}
