//! Host capability trait definitions.
//!
//! The engine never talks to an operating system API directly. It consumes
//! two narrow traits: [`SerialHost`] discovers ports, [`SerialPort`] opens
//! one and hands out its byte streams. Mock and native providers implement
//! both.
//!
//! All traits use native `async fn` methods (Rust 1.90 + Edition 2024 RPITIT).
//!
//! # Object Safety
//!
//! The traits are NOT object-safe because `async fn` methods return opaque
//! futures. Code that needs to hold "any host" uses the enum wrappers in
//! [`devices`](crate::devices):
//!
//! ```
//! use countlink_serial::devices::AnyHost;
//! use countlink_serial::mock::MockHost;
//! use countlink_serial::traits::SerialHost;
//!
//! let (host, _handle) = MockHost::new();
//! let host = AnyHost::Mock(host);
//! assert!(host.is_supported());
//! ```

#![allow(async_fn_in_trait)]

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use countlink_core::Result;

use crate::types::{PortFilter, PortInfo};

/// Read half handed out by an open port.
pub type PortReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half handed out by an open port.
pub type PortWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Provider of serial ports.
///
/// # Examples
///
/// ```no_run
/// use countlink_serial::traits::{SerialHost, SerialPort};
/// use countlink_serial::PortFilter;
///
/// async fn first_port<H: SerialHost>(host: &H) -> countlink_core::Result<String> {
///     let port = host.request_port(&PortFilter::vendor(0x2E8A)).await?;
///     Ok(port.info().name)
/// }
/// ```
pub trait SerialHost {
    /// Port type produced by this host.
    type Port: SerialPort;

    /// Whether the host provides the serial capability at all.
    fn is_supported(&self) -> bool;

    /// Whether the host can provide named exclusive locks.
    fn supports_exclusive_locks(&self) -> bool;

    /// Ask for a port matching `filter`.
    ///
    /// Interactive hosts show a selection prompt.
    ///
    /// # Errors
    ///
    /// - [`Error::DeviceSelectionCancelled`](countlink_core::Error::DeviceSelectionCancelled)
    ///   if the user declined
    /// - [`Error::ConnectionFailed`](countlink_core::Error::ConnectionFailed)
    ///   if no port can be offered
    async fn request_port(&self, filter: &PortFilter) -> Result<Self::Port>;

    /// Ports the user granted access to earlier, without prompting.
    async fn authorized_ports(&self) -> Result<Vec<Self::Port>>;
}

/// One serial port.
///
/// The life cycle is `open` → `readable`/`writable` (taken once per open)
/// → `close`. `close` is idempotent.
pub trait SerialPort {
    /// Description of the port.
    fn info(&self) -> PortInfo;

    /// Open the port at the given baud rate.
    async fn open(&mut self, baud_rate: u32) -> Result<()>;

    /// Take the read stream of an open port.
    fn readable(&mut self) -> Result<PortReader>;

    /// Take the write stream of an open port.
    fn writable(&mut self) -> Result<PortWriter>;

    /// Signal flipped to `true` once the device is physically removed.
    fn unplug_signal(&self) -> watch::Receiver<bool>;

    /// Close the port.
    async fn close(&mut self) -> Result<()>;
}
