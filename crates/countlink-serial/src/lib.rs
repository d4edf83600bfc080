//! Serial link engine for the countlink counting instrument.
//!
//! This crate owns everything between a host's serial capability and a
//! parsed response:
//!
//! - [`traits`]: the narrow host capability ([`SerialHost`], [`SerialPort`])
//! - [`devices`]: enum dispatch over host implementations
//! - [`mock`]: simulated host and instrument for tests and demos
//! - [`connection`]: connection state machine, lifecycle events and
//!   auto-reconnect
//! - [`CommandGate`]: FIFO serializer with minimum write spacing
//! - [`RetryPolicy`]: bounded linear-backoff retry of transient failures
//! - [`ExclusiveLock`]: process-wide named locks
//! - [`Instrument`]: the handle applications use
//!
//! Enable the `native-serial` feature for real USB-serial ports.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use countlink_core::Options;
//! use countlink_serial::{ConnectionEvent, Instrument};
//! use countlink_serial::mock::MockHost;
//!
//! #[tokio::main]
//! async fn main() -> countlink_core::Result<()> {
//!     let (host, _handle) = MockHost::new();
//!     let options = Options::builder().boot_delay(Duration::ZERO).build()?;
//!     let instrument = Instrument::new(host, options)?;
//!     let mut events = instrument.subscribe();
//!
//!     instrument.connect().await?;
//!     assert!(matches!(events.recv().await, Ok(ConnectionEvent::StateChanged { .. })));
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod devices;
mod dispatcher;
pub mod gate;
pub mod instrument;
pub mod locks;
pub mod mock;
#[cfg(feature = "native-serial")]
pub mod native;
pub mod retry;
pub mod traits;
pub mod types;

pub use connection::{ConnectionEvent, ConnectionManager, StateTransition};
pub use countlink_core::{ConnectionState, Error, ErrorKind, Options, Result};
pub use devices::{AnyHost, AnyPort};
pub use gate::{CommandGate, GatePermit};
pub use instrument::Instrument;
pub use locks::ExclusiveLock;
#[cfg(feature = "native-serial")]
pub use native::{NativeHost, NativePort};
pub use retry::RetryPolicy;
pub use traits::{SerialHost, SerialPort};
pub use types::{PortFilter, PortInfo};
