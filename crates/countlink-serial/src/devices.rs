//! Enum wrappers for host dispatch.
//!
//! Native `async fn` in traits is not object-safe, so `Box<dyn SerialHost>`
//! is not an option. [`AnyHost`] and [`AnyPort`] give the connection manager
//! one concrete type to hold while keeping static dispatch, and the futures
//! they return stay `Send` so the manager can drive them from spawned tasks.
//!
//! # Examples
//!
//! ```
//! use countlink_serial::devices::AnyHost;
//! use countlink_serial::mock::MockHost;
//!
//! let (host, _handle) = MockHost::new();
//! let host: AnyHost = host.into();
//! ```

use tokio::sync::watch;

use countlink_core::Result;

use crate::mock::{MockHost, MockPort};
#[cfg(feature = "native-serial")]
use crate::native::{NativeHost, NativePort};
use crate::traits::{PortReader, PortWriter, SerialHost, SerialPort};
use crate::types::{PortFilter, PortInfo};

/// Enum wrapper for serial host dispatch.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum AnyHost {
    /// Simulated instrument for development and testing.
    Mock(MockHost),

    /// Operating system serial ports.
    #[cfg(feature = "native-serial")]
    Native(NativeHost),
}

impl From<MockHost> for AnyHost {
    fn from(host: MockHost) -> Self {
        Self::Mock(host)
    }
}

#[cfg(feature = "native-serial")]
impl From<NativeHost> for AnyHost {
    fn from(host: NativeHost) -> Self {
        Self::Native(host)
    }
}

impl SerialHost for AnyHost {
    type Port = AnyPort;

    fn is_supported(&self) -> bool {
        match self {
            Self::Mock(host) => host.is_supported(),
            #[cfg(feature = "native-serial")]
            Self::Native(host) => host.is_supported(),
        }
    }

    fn supports_exclusive_locks(&self) -> bool {
        match self {
            Self::Mock(host) => host.supports_exclusive_locks(),
            #[cfg(feature = "native-serial")]
            Self::Native(host) => host.supports_exclusive_locks(),
        }
    }

    async fn request_port(&self, filter: &PortFilter) -> Result<AnyPort> {
        match self {
            Self::Mock(host) => host.request_port(filter).await.map(AnyPort::Mock),
            #[cfg(feature = "native-serial")]
            Self::Native(host) => host.request_port(filter).await.map(AnyPort::Native),
        }
    }

    async fn authorized_ports(&self) -> Result<Vec<AnyPort>> {
        match self {
            Self::Mock(host) => Ok(host
                .authorized_ports()
                .await?
                .into_iter()
                .map(AnyPort::Mock)
                .collect()),
            #[cfg(feature = "native-serial")]
            Self::Native(host) => Ok(host
                .authorized_ports()
                .await?
                .into_iter()
                .map(AnyPort::Native)
                .collect()),
        }
    }
}

/// Enum wrapper for serial port dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyPort {
    /// Port of the simulated instrument.
    Mock(MockPort),

    /// Operating system serial port.
    #[cfg(feature = "native-serial")]
    Native(NativePort),
}

impl SerialPort for AnyPort {
    fn info(&self) -> PortInfo {
        match self {
            Self::Mock(port) => port.info(),
            #[cfg(feature = "native-serial")]
            Self::Native(port) => port.info(),
        }
    }

    async fn open(&mut self, baud_rate: u32) -> Result<()> {
        match self {
            Self::Mock(port) => port.open(baud_rate).await,
            #[cfg(feature = "native-serial")]
            Self::Native(port) => port.open(baud_rate).await,
        }
    }

    fn readable(&mut self) -> Result<PortReader> {
        match self {
            Self::Mock(port) => port.readable(),
            #[cfg(feature = "native-serial")]
            Self::Native(port) => port.readable(),
        }
    }

    fn writable(&mut self) -> Result<PortWriter> {
        match self {
            Self::Mock(port) => port.writable(),
            #[cfg(feature = "native-serial")]
            Self::Native(port) => port.writable(),
        }
    }

    fn unplug_signal(&self) -> watch::Receiver<bool> {
        match self {
            Self::Mock(port) => port.unplug_signal(),
            #[cfg(feature = "native-serial")]
            Self::Native(port) => port.unplug_signal(),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Mock(port) => port.close().await,
            #[cfg(feature = "native-serial")]
            Self::Native(port) => port.close().await,
        }
    }
}
