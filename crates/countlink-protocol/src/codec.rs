//! Tokio codec for the instrument's line protocol.
//!
//! # Overview
//!
//! `LineCodec` implements:
//! - [`Decoder`]: extracts one response line from the accumulated read buffer
//! - [`Encoder<&str>`]: appends the CR command terminator
//!
//! ```text
//! Serial reads -> BytesMut -> Decoder -> String (trimmed line)
//! &str -> Encoder -> BytesMut ("COUNTS?\r") -> Serial write
//! ```
//!
//! A line is complete as soon as a CR or LF byte is present. Empty lines are
//! skipped, so the LF left behind by a CRLF-terminated response never shows up
//! as an empty response to the next command.
//!
//! # DoS Protection
//!
//! A buffer that grows past the maximum line length without a terminator is
//! rejected with [`std::io::ErrorKind::InvalidData`].

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use countlink_core::constants::{COMMAND_TERMINATOR, MAX_RESPONSE_LENGTH, RESPONSE_TERMINATORS};

/// Tokio codec for CR/LF-delimited ASCII lines.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::{Decoder, Encoder};
/// use countlink_protocol::LineCodec;
///
/// let mut codec = LineCodec::new();
///
/// let mut out = BytesMut::new();
/// codec.encode("*IDN?", &mut out).unwrap();
/// assert_eq!(&out[..], b"*IDN?\r");
///
/// let mut input = BytesMut::from(&b"10 20 0\r\n"[..]);
/// assert_eq!(codec.decode(&mut input).unwrap(), Some("10 20 0".to_string()));
/// ```
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Maximum allowed line length in bytes.
    max_length: usize,
}

impl LineCodec {
    /// Create a codec with the default maximum line length.
    pub fn new() -> Self {
        Self {
            max_length: MAX_RESPONSE_LENGTH,
        }
    }

    /// Create a codec with a custom maximum line length.
    pub fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }

    /// Get the maximum line length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Drop every complete line currently buffered and return how many were dropped.
    ///
    /// Used before sending a command so a late answer to an earlier, timed-out
    /// command cannot be mistaken for the new response.
    pub fn discard_complete_lines(&mut self, src: &mut BytesMut) -> usize {
        let mut dropped = 0;
        while let Ok(Some(_)) = self.decode(src) {
            dropped += 1;
        }
        dropped
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn is_terminator(byte: &u8) -> bool {
    RESPONSE_TERMINATORS.contains(byte)
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let leading = src.iter().take_while(|b| is_terminator(b)).count();
            src.advance(leading);

            let Some(end) = src.iter().position(is_terminator) else {
                if src.len() > self.max_length {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "response exceeds {} bytes without a line terminator",
                            self.max_length
                        ),
                    ));
                }
                return Ok(None);
            };

            let line = src.split_to(end);
            src.advance(1);

            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                return Ok(Some(text));
            }
        }
    }
}

impl Encoder<&str> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), io::Error> {
        if item.bytes().any(|b| is_terminator(&b)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "command text must not contain CR or LF",
            ));
        }
        if !item.is_ascii() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "command text must be ASCII",
            ));
        }

        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(&[COMMAND_TERMINATOR]);
        Ok(())
    }
}
