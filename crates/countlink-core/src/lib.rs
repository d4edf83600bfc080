//! Shared building blocks for the countlink instrument engine.
//!
//! This crate holds the pieces every other countlink crate depends on:
//! the error taxonomy, the engine [`Options`], protocol and timing
//! constants, and the [`ConnectionState`] enum.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::{Options, OptionsBuilder};
pub use error::{Error, ErrorKind, Result};
pub use types::ConnectionState;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
