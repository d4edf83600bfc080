//! Connection manager.
//!
//! Owns the host, the one live [`Link`] and the [`StateCell`]. Everything
//! that opens or closes the channel goes through here:
//!
//! ```text
//!            connect()                  unplug watcher
//!               │                            │
//!               ▼                            ▼
//!   Disconnected ──► Connecting ──► Connected ──► Disconnected
//!        │  ▲                        │   ▲             │
//!        │  └──── Reconnecting ◄─────┘   │             │
//!        └────────►     │ ───────────────┘    auto-reconnect sequence
//!                       ▼                     (attempt 1..=N, delay·attempt)
//!                 Disconnected
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, MutexGuard, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use countlink_core::{ConnectionState, Error, Options, Result};
use countlink_protocol::LineCodec;

use super::state::{ConnectionEvent, StateCell, StateTransition};
use crate::devices::{AnyHost, AnyPort};
use crate::traits::{PortReader, PortWriter, SerialHost, SerialPort};
use crate::types::{PortFilter, PortInfo};

/// The open channel: port, both streams and the carry-over read buffer.
pub(crate) struct Link {
    pub(crate) port: AnyPort,
    pub(crate) reader: PortReader,
    pub(crate) writer: PortWriter,
    pub(crate) buffer: BytesMut,
    pub(crate) codec: LineCodec,
}

/// Clears the reconnect flag on every exit path.
struct ReconnectGuard<'a>(&'a AtomicBool);

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Connection lifecycle of one instrument.
pub struct ConnectionManager {
    host: AnyHost,
    options: Arc<Options>,
    state: StateCell,
    link: Mutex<Option<Link>>,
    reconnecting: AtomicBool,
    sequence: Mutex<()>,
    watcher: StdMutex<Option<(u64, JoinHandle<()>)>>,
    generation: AtomicU64,
    /// Bumped by every explicit `disconnect()`.
    epoch: AtomicU64,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("host", &self.host)
            .field("state", &self.state.current())
            .field("reconnecting", &self.reconnecting.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state.
    pub fn new(host: AnyHost, options: Arc<Options>) -> Self {
        Self {
            host,
            options,
            state: StateCell::new(),
            link: Mutex::new(None),
            reconnecting: AtomicBool::new(false),
            sequence: Mutex::new(()),
            watcher: StdMutex::new(None),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Recent state transitions, oldest first.
    pub fn history(&self) -> Vec<StateTransition> {
        self.state.history()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.state.subscribe()
    }

    /// Engine options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Whether the host can provide named exclusive locks.
    pub fn supports_exclusive_locks(&self) -> bool {
        self.host.supports_exclusive_locks()
    }

    /// Lock the live link for one round trip.
    pub(crate) async fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().await
    }

    fn filter(&self) -> PortFilter {
        PortFilter::vendor(self.options.vendor_id)
    }

    /// Ask the host for a device and open it.
    ///
    /// Already connected is a no-op.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedCapability`] if the host has no serial support
    /// - [`Error::DeviceSelectionCancelled`] if the user declined the prompt
    /// - [`Error::ConnectionFailed`] for any other failure, including a
    ///   connect or reconnect already in progress
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if !self.host.is_supported() {
            return Err(Error::unsupported("serial"));
        }
        if self.state().is_connected() {
            debug!("Already connected");
            return Ok(());
        }

        self.state
            .transition(ConnectionState::Connecting)
            .map_err(|_| Error::connection_failed("connection attempt already in progress"))?;
        info!(vendor_id = self.options.vendor_id, "Connecting to instrument");

        let result = match self.host.request_port(&self.filter()).await {
            Ok(port) => self.establish(port).await,
            Err(e) => Err(e),
        };
        self.finish_opening(result).await
    }

    /// Re-open a previously authorized device without prompting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if another reconnect is running,
    /// no authorized port matches the vendor id, or opening fails.
    pub async fn reconnect(self: &Arc<Self>) -> Result<()> {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::connection_failed("reconnect already in progress"));
        }
        let _guard = ReconnectGuard(&self.reconnecting);

        self.state
            .transition(ConnectionState::Reconnecting)
            .map_err(|_| Error::connection_failed("connection attempt already in progress"))?;
        info!("Reconnecting to instrument");

        self.teardown().await;
        let result = match self.find_authorized_port().await {
            Ok(port) => self.establish(port).await,
            Err(e) => Err(e),
        };
        self.finish_opening(result).await
    }

    /// Tear the link down and move to `Disconnected`.
    ///
    /// Teardown is best-effort: each step logs and swallows its own failure.
    /// Publishes [`ConnectionEvent::Disconnected`] if the state changed.
    /// A running auto-reconnect sequence stops before its next attempt.
    pub async fn disconnect(&self) -> Result<()> {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some((_, watcher)) = self.take_watcher() {
            watcher.abort();
        }
        self.teardown().await;

        if self.state.force_disconnected().is_some() {
            self.state.publish(ConnectionEvent::Disconnected);
        }
        Ok(())
    }

    /// Make sure a link is up before a command runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if auto-reconnect is disabled or the
    /// reconnect sequence is exhausted.
    pub(crate) async fn ensure_connected(self: &Arc<Self>) -> Result<()> {
        let epoch = self.epoch.load(Ordering::Acquire);
        if self.settled_state().await.is_connected() {
            return Ok(());
        }
        if !self.options.auto_reconnect {
            return Err(Error::NotConnected);
        }

        debug!("Command issued while disconnected, starting auto-reconnect");
        if self.run_reconnect_sequence(epoch).await {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Run the auto-reconnect sequence on behalf of a caller that saw the
    /// disconnect `epoch`.
    ///
    /// Sequences never overlap. Before and after every backoff sleep the
    /// sequence stops if `disconnect()` was called since `epoch` (returning
    /// `false`) or if the link came back some other way (returning `true`).
    pub(crate) async fn run_reconnect_sequence(self: &Arc<Self>, epoch: u64) -> bool {
        let _sequence = self.sequence.lock().await;

        let attempts = self.options.reconnect_attempts;
        for attempt in 1..=attempts {
            if let Some(done) = self.sequence_settled(epoch).await {
                return done;
            }
            tokio::time::sleep(self.options.reconnect_delay() * attempt).await;
            if let Some(done) = self.sequence_settled(epoch).await {
                return done;
            }

            match self.reconnect().await {
                Ok(()) => {
                    info!(attempt, "Auto-reconnect succeeded");
                    self.state.publish(ConnectionEvent::Reconnected { attempt });
                    return true;
                }
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Reconnect attempt failed");
                }
            }
        }

        error!(attempts, "Auto-reconnect exhausted");
        self.state.publish(ConnectionEvent::ReconnectFailed { attempts });
        false
    }

    /// `Some(false)` if the user disconnected since `epoch`, `Some(true)` if a
    /// link is up, `None` if the sequence should keep going.
    async fn sequence_settled(&self, epoch: u64) -> Option<bool> {
        if self.epoch.load(Ordering::Acquire) != epoch {
            info!("Auto-reconnect stopped by explicit disconnect");
            return Some(false);
        }
        if self.settled_state().await.is_connected() {
            debug!("Link already restored, skipping reconnect");
            return Some(true);
        }
        None
    }

    /// Current state once no connect or reconnect is in flight.
    async fn settled_state(&self) -> ConnectionState {
        // Subscribe before reading so no transition is missed.
        let mut events = self.state.subscribe();
        loop {
            let state = self.state();
            if !matches!(state, ConnectionState::Connecting | ConnectionState::Reconnecting) {
                return state;
            }
            if let Err(broadcast::error::RecvError::Closed) = events.recv().await {
                return self.state();
            }
        }
    }

    async fn find_authorized_port(&self) -> Result<AnyPort> {
        let filter = self.filter();
        self.host
            .authorized_ports()
            .await?
            .into_iter()
            .find(|port| filter.matches(&port.info()))
            .ok_or_else(|| {
                Error::connection_failed(format!(
                    "no previously authorized port with vendor id {:04x}",
                    filter.vendor_id
                ))
            })
    }

    /// Open `port`, install the link and wait for the firmware to boot.
    async fn establish(&self, mut port: AnyPort) -> Result<watch::Receiver<bool>> {
        let info: PortInfo = port.info();
        port.open(self.options.baud_rate).await.map_err(|e| match e {
            e @ Error::ConnectionFailed { .. } => e,
            other => Error::connection_failed_with(format!("failed to open {info}"), other),
        })?;

        let (reader, writer) = match take_streams(&mut port) {
            Ok(streams) => streams,
            Err(e) => {
                if let Err(close_err) = port.close().await {
                    warn!(
                        port = %info,
                        error = %close_err,
                        "Failed to close port after setup error"
                    );
                }
                return Err(e);
            }
        };
        let unplug = port.unplug_signal();

        *self.link.lock().await = Some(Link {
            port,
            reader,
            writer,
            buffer: BytesMut::new(),
            codec: LineCodec::new(),
        });
        debug!(
            port = %info,
            boot_delay_ms = self.options.boot_delay_ms,
            "Port open, waiting for firmware boot"
        );

        tokio::time::sleep(self.options.boot_delay()).await;
        Ok(unplug)
    }

    /// Take the `Connected` edge, or fall back to `Disconnected` on failure.
    async fn finish_opening(self: &Arc<Self>, result: Result<watch::Receiver<bool>>) -> Result<()> {
        let unplug = match result {
            Ok(unplug) => unplug,
            Err(e) => {
                self.teardown().await;
                self.state.force_disconnected();
                warn!(error = %e, "Failed to open instrument link");
                return Err(e);
            }
        };

        if let Err(e) = self.state.transition(ConnectionState::Connected) {
            // A disconnect() raced the open.
            debug!(error = %e, "Link closed while opening");
            self.teardown().await;
            return Err(Error::connection_failed("connection closed while opening"));
        }

        self.spawn_watcher(unplug);
        Ok(())
    }

    /// Watch the unplug signal of the link just opened.
    fn spawn_watcher(self: &Arc<Self>, mut unplug: watch::Receiver<bool>) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let manager: Weak<Self> = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            // Err: the port was dropped without an unplug.
            if unplug.wait_for(|unplugged| *unplugged).await.is_err() {
                return;
            }
            if let Some(manager) = manager.upgrade() {
                manager.handle_unplug(generation).await;
            }
        });

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((generation, task));
        if let Some((_, previous)) = previous {
            previous.abort();
        }
    }

    fn take_watcher(&self) -> Option<(u64, JoinHandle<()>)> {
        self.watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn handle_unplug(self: &Arc<Self>, generation: u64) {
        {
            let mut watcher = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
            if !watcher.as_ref().is_some_and(|(current, _)| *current == generation) {
                return;
            }
            // Detach rather than abort: this code runs inside that task.
            watcher.take();
        }

        warn!("Instrument unplugged");
        let epoch = self.epoch.load(Ordering::Acquire);
        self.teardown().await;
        if self.state.force_disconnected().is_some() {
            self.state.publish(ConnectionEvent::Disconnected);
        }

        if self.options.auto_reconnect {
            self.run_reconnect_sequence(epoch).await;
        }
    }

    /// Close whatever link exists, swallowing each failure.
    async fn teardown(&self) {
        let Some(link) = self.link.lock().await.take() else {
            return;
        };
        let Link {
            mut port,
            reader,
            mut writer,
            ..
        } = link;

        if let Err(e) = writer.shutdown().await {
            warn!(error = %e, "Failed to shut down writer");
        }
        drop(writer);
        drop(reader);

        let info = port.info();
        if let Err(e) = port.close().await {
            warn!(port = %info, error = %e, "Failed to close port");
        } else {
            debug!(port = %info, "Link torn down");
        }
    }
}

fn take_streams(port: &mut AnyPort) -> Result<(PortReader, PortWriter)> {
    Ok((port.readable()?, port.writable()?))
}
