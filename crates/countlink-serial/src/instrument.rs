//! Instrument handle: the public face of the engine.
//!
//! ```text
//! Instrument::send_command
//!   └─ ExclusiveLock (optional, whole call)
//!       └─ RetryPolicy::run (bounded, linear backoff)
//!           └─ dispatch_once
//!               ├─ ConnectionManager::ensure_connected (auto-reconnect)
//!               ├─ CommandGate::acquire (FIFO, min spacing)
//!               └─ write + deadline-bound read
//! ```
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use countlink_core::Options;
//! use countlink_serial::Instrument;
//! use countlink_serial::mock::MockHost;
//!
//! #[tokio::main]
//! async fn main() -> countlink_core::Result<()> {
//!     let (host, handle) = MockHost::new();
//!     handle.set_counts(vec![10, 20, 30, 40, 50, 60, 70, 80]);
//!
//!     let options = Options::builder().boot_delay(Duration::ZERO).build()?;
//!     let instrument = Instrument::new(host, options)?;
//!     instrument.connect().await?;
//!
//!     let reading = instrument.read_counts().await?;
//!     assert_eq!(reading.count(2), Some(30));
//!
//!     instrument.disconnect().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;

use countlink_core::{ConnectionState, Options, Result};
use countlink_protocol::{
    Command, CountsReading, Identity, parse_ack, parse_counts, parse_identity, parse_window,
};

use crate::connection::{ConnectionEvent, ConnectionManager, StateTransition};
use crate::devices::AnyHost;
use crate::dispatcher;
use crate::gate::CommandGate;
use crate::locks::ExclusiveLock;
use crate::retry::RetryPolicy;

#[derive(Debug)]
struct Inner {
    manager: Arc<ConnectionManager>,
    gate: CommandGate,
    retry: RetryPolicy,
    options: Arc<Options>,
}

/// Cloneable handle to one counting instrument.
///
/// Clones share the connection, the gate and the event channel.
#[derive(Debug, Clone)]
pub struct Instrument {
    inner: Arc<Inner>,
}

impl Instrument {
    /// Create a disconnected handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`](countlink_core::Error::InvalidParameter)
    /// if `options` fail validation.
    pub fn new(host: impl Into<AnyHost>, options: Options) -> Result<Self> {
        options.validate()?;
        let options = Arc::new(options);

        Ok(Self {
            inner: Arc::new(Inner {
                manager: Arc::new(ConnectionManager::new(host.into(), Arc::clone(&options))),
                gate: CommandGate::new(options.rate_limit()),
                retry: RetryPolicy::from_options(&options),
                options,
            }),
        })
    }

    /// Engine options.
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.manager.state()
    }

    /// Whether a link is up.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Recent state transitions, oldest first.
    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.manager.history()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.manager.subscribe()
    }

    /// Connect to the instrument. See [`ConnectionManager::connect`].
    pub async fn connect(&self) -> Result<()> {
        self.inner.manager.connect().await
    }

    /// Re-open the previously authorized instrument. See [`ConnectionManager::reconnect`].
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.manager.reconnect().await
    }

    /// Close the link. See [`ConnectionManager::disconnect`].
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.manager.disconnect().await
    }

    /// Send raw command text and return the trimmed response.
    ///
    /// # Errors
    ///
    /// Any [`Error`](countlink_core::Error) from the dispatcher after retries.
    pub async fn send_command(&self, command: &str) -> Result<String> {
        let inner = &*self.inner;
        let use_lock =
            inner.options.use_exclusive_lock && inner.manager.supports_exclusive_locks();
        let _lock = if use_lock {
            Some(ExclusiveLock::acquire(&inner.options.lock_name).await)
        } else {
            None
        };

        let manager = &inner.manager;
        let gate = &inner.gate;
        inner
            .retry
            .run(command, move |_| dispatcher::dispatch_once(manager, gate, command))
            .await
    }

    /// Send a typed command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`](countlink_core::Error::InvalidParameter)
    /// without writing anything if the command's parameters are out of range.
    pub async fn execute(&self, command: Command) -> Result<String> {
        command.validate()?;
        self.send_command(&command.to_wire()).await
    }

    /// Query the identification string.
    pub async fn identify(&self) -> Result<Identity> {
        let command = Command::Identify.to_wire();
        let response = self.send_command(&command).await?;
        parse_identity(&command, &response)
    }

    /// Read (and clear) all counters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidResponse`](countlink_core::Error::InvalidResponse)
    /// if fewer than `channel_count + 1` integers come back.
    pub async fn read_counts(&self) -> Result<CountsReading> {
        let command = Command::ReadCounts.to_wire();
        let response = self.send_command(&command).await?;
        parse_counts(&command, &response, self.inner.options.channel_count)
    }

    /// Set the coincidence window in nanoseconds.
    pub async fn set_window(&self, ns: u32) -> Result<()> {
        let command = Command::set_window(ns)?.to_wire();
        let response = self.send_command(&command).await?;
        parse_ack(&command, &response)
    }

    /// Query the coincidence window in nanoseconds.
    pub async fn window(&self) -> Result<u32> {
        let command = Command::QueryWindow.to_wire();
        let response = self.send_command(&command).await?;
        parse_window(&command, &response)
    }

    /// Reset the instrument to power-on settings.
    pub async fn reset(&self) -> Result<()> {
        let command = Command::Reset.to_wire();
        let response = self.send_command(&command).await?;
        parse_ack(&command, &response)
    }
}
