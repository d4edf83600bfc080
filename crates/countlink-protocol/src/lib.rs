//! Line protocol of the counting instrument.
//!
//! - [`LineCodec`] frames commands (`<text>\r`) and extracts response lines
//!   terminated by CR or LF.
//! - [`Command`] is the typed command set, rendered with [`Command::to_wire`].
//! - [`response`] parses response payloads into typed values.

pub mod codec;
pub mod commands;
pub mod response;

pub use codec::LineCodec;
pub use commands::Command;
pub use response::{CountsReading, Identity, parse_ack, parse_counts, parse_identity, parse_window};
