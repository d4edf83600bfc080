//! Mock serial host for testing and development.
//!
//! [`MockHost`] hands out [`MockPort`]s backed by an in-memory
//! [`tokio::io::duplex`] pipe whose far end runs the simulated instrument.
//! The paired [`MockHostHandle`] controls everything a test needs to stage:
//! declined prompts, failing opens, unplug events, scripted replies and
//! counter rates.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use countlink_core::constants::DEFAULT_VENDOR_ID;
use countlink_core::{Error, Result};

use super::instrument::{self, Counters, InstrumentState, MockReply, WriteRecord};
use crate::traits::{PortReader, PortWriter, SerialHost, SerialPort};
use crate::types::{PortFilter, PortInfo};

const MOCK_PRODUCT_ID: u16 = 0x000A;
const MOCK_PIPE_CAPACITY: usize = 1024;

/// Control block of the link that is currently open.
#[derive(Debug)]
struct LinkControl {
    id: u64,
    unplug: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) struct MockState {
    supported: bool,
    exclusive_locks: bool,
    decline_selection: bool,
    plugged: bool,
    authorized: bool,
    vendor_id: u16,
    open_failures: u32,
    open_count: u32,
    authorized_queries: u32,
    next_link_id: u64,
    link: Option<LinkControl>,
    pub(crate) instrument: InstrumentState,
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<MockState>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mock serial host.
///
/// # Examples
///
/// ```
/// use countlink_serial::mock::MockHost;
/// use countlink_serial::traits::{SerialHost, SerialPort};
/// use countlink_serial::PortFilter;
///
/// #[tokio::main]
/// async fn main() -> countlink_core::Result<()> {
///     let (host, handle) = MockHost::new();
///
///     let mut port = host.request_port(&PortFilter::vendor(0x2E8A)).await?;
///     port.open(115_200).await?;
///     assert!(handle.is_open());
///
///     port.close().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockHost {
    shared: Arc<Shared>,
}

impl MockHost {
    /// Create a host with one plugged-in instrument using the default vendor id.
    ///
    /// Returns a tuple of (MockHost, MockHostHandle) where the handle stages
    /// faults and inspects traffic.
    pub fn new() -> (Self, MockHostHandle) {
        Self::with_vendor_id(DEFAULT_VENDOR_ID)
    }

    /// Create a host whose instrument reports a custom vendor id.
    pub fn with_vendor_id(vendor_id: u16) -> (Self, MockHostHandle) {
        let shared = Arc::new(Shared {
            state: Mutex::new(MockState {
                supported: true,
                exclusive_locks: true,
                decline_selection: false,
                plugged: true,
                authorized: false,
                vendor_id,
                open_failures: 0,
                open_count: 0,
                authorized_queries: 0,
                next_link_id: 0,
                link: None,
                instrument: InstrumentState::new(),
            }),
        });

        let host = Self {
            shared: Arc::clone(&shared),
        };
        (host, MockHostHandle { shared })
    }

    fn port(&self, vendor_id: u16) -> MockPort {
        let (unplug, _) = watch::channel(false);
        MockPort {
            shared: Arc::clone(&self.shared),
            info: PortInfo::new("mock-counter")
                .with_usb_ids(vendor_id, MOCK_PRODUCT_ID)
                .with_serial_number("MOCK0001"),
            unplug: Arc::new(unplug),
            reader: None,
            writer: None,
            link_id: None,
        }
    }
}

impl SerialHost for MockHost {
    type Port = MockPort;

    fn is_supported(&self) -> bool {
        self.shared.lock().supported
    }

    fn supports_exclusive_locks(&self) -> bool {
        self.shared.lock().exclusive_locks
    }

    async fn request_port(&self, filter: &PortFilter) -> Result<MockPort> {
        let vendor_id = {
            let mut state = self.shared.lock();
            if state.decline_selection {
                return Err(Error::DeviceSelectionCancelled);
            }
            if !state.plugged || state.vendor_id != filter.vendor_id {
                // An empty chooser can only be dismissed.
                return Err(Error::DeviceSelectionCancelled);
            }
            state.authorized = true;
            state.vendor_id
        };
        Ok(self.port(vendor_id))
    }

    async fn authorized_ports(&self) -> Result<Vec<MockPort>> {
        let vendor_id = {
            let mut state = self.shared.lock();
            state.authorized_queries += 1;
            if !state.authorized || !state.plugged {
                return Ok(Vec::new());
            }
            state.vendor_id
        };
        Ok(vec![self.port(vendor_id)])
    }
}

/// Port of the mock host.
pub struct MockPort {
    shared: Arc<Shared>,
    info: PortInfo,
    unplug: Arc<watch::Sender<bool>>,
    reader: Option<PortReader>,
    writer: Option<PortWriter>,
    link_id: Option<u64>,
}

impl std::fmt::Debug for MockPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPort")
            .field("info", &self.info)
            .field("link_id", &self.link_id)
            .field("reader_taken", &self.reader.is_none())
            .field("writer_taken", &self.writer.is_none())
            .finish()
    }
}

impl SerialPort for MockPort {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    async fn open(&mut self, baud_rate: u32) -> Result<()> {
        let (near, far) = tokio::io::duplex(MOCK_PIPE_CAPACITY);

        let id = {
            let mut state = self.shared.lock();
            if !state.plugged {
                return Err(Error::connection_failed("mock instrument is unplugged"));
            }
            if state.open_failures > 0 {
                state.open_failures -= 1;
                return Err(Error::connection_failed_with(
                    "failed to open mock port",
                    io::Error::new(io::ErrorKind::PermissionDenied, "port busy"),
                ));
            }

            if let Some(previous) = state.link.take() {
                previous.task.abort();
            }

            state.open_count += 1;
            state.next_link_id += 1;
            let id = state.next_link_id;
            state.link = Some(LinkControl {
                id,
                unplug: Arc::clone(&self.unplug),
                task: tokio::spawn(instrument::serve(far, Arc::clone(&self.shared))),
            });
            id
        };

        self.unplug.send_replace(false);
        let (read, write) = tokio::io::split(near);
        self.reader = Some(Box::new(read));
        self.writer = Some(Box::new(write));
        self.link_id = Some(id);

        debug!(port = %self.info, baud_rate, link_id = id, "Mock port opened");
        Ok(())
    }

    fn readable(&mut self) -> Result<PortReader> {
        self.reader
            .take()
            .ok_or_else(|| {
                Error::connection_failed("mock port is not open or reader already taken")
            })
    }

    fn writable(&mut self) -> Result<PortWriter> {
        self.writer
            .take()
            .ok_or_else(|| {
                Error::connection_failed("mock port is not open or writer already taken")
            })
    }

    fn unplug_signal(&self) -> watch::Receiver<bool> {
        self.unplug.subscribe()
    }

    async fn close(&mut self) -> Result<()> {
        self.reader = None;
        self.writer = None;

        let Some(id) = self.link_id.take() else {
            return Ok(());
        };

        let mut state = self.shared.lock();
        if state.link.as_ref().is_some_and(|link| link.id == id) {
            if let Some(link) = state.link.take() {
                link.task.abort();
            }
        }
        debug!(port = %self.info, link_id = id, "Mock port closed");
        Ok(())
    }
}

/// Handle for staging conditions on a mock host.
///
/// Clones share the same instrument.
#[derive(Debug, Clone)]
pub struct MockHostHandle {
    shared: Arc<Shared>,
}

impl MockHostHandle {
    /// Make the host report the serial capability as missing (or present).
    pub fn set_supported(&self, supported: bool) {
        self.shared.lock().supported = supported;
    }

    /// Make the host report exclusive-lock support.
    pub fn set_exclusive_locks(&self, supported: bool) {
        self.shared.lock().exclusive_locks = supported;
    }

    /// Make the selection prompt decline (or grant) every request.
    pub fn decline_selection(&self, decline: bool) {
        self.shared.lock().decline_selection = decline;
    }

    /// Fail the next `count` port opens with a busy error.
    pub fn fail_next_opens(&self, count: u32) {
        self.shared.lock().open_failures = count;
    }

    /// Physically remove the instrument.
    ///
    /// Raises the unplug signal of the open port and tears the link down.
    pub fn unplug(&self) {
        let mut state = self.shared.lock();
        state.plugged = false;
        if let Some(link) = state.link.take() {
            link.task.abort();
            link.unplug.send_replace(true);
        }
        info!("Mock instrument unplugged");
    }

    /// Plug the instrument back in.
    pub fn plug_in(&self) {
        self.shared.lock().plugged = true;
        info!("Mock instrument plugged in");
    }

    /// Accumulate counts at fixed per-channel rates (counts per second).
    pub fn set_rates(&self, rates: Vec<f64>) {
        let mut state = self.shared.lock();
        state.instrument.counters = Counters::Rates(rates);
        state.instrument.clear_counters();
    }

    /// Return the same counts on every read.
    pub fn set_counts(&self, counts: Vec<u64>) {
        self.shared.lock().instrument.counters = Counters::Fixed(counts);
    }

    /// Set the overflow bitmask reported with every read.
    pub fn set_overflow(&self, overflow: u64) {
        self.shared.lock().instrument.overflow = overflow;
    }

    /// Queue a scripted reply for the next command.
    pub fn push_reply(&self, reply: MockReply) {
        self.shared.lock().instrument.script.push_back(reply);
    }

    /// Delay every answer by `delay`.
    pub fn set_response_delay(&self, delay: Duration) {
        self.shared.lock().instrument.response_delay = delay;
    }

    /// Commands received so far.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.shared.lock().instrument.writes.clone()
    }

    /// Number of commands received so far.
    pub fn write_count(&self) -> usize {
        self.shared.lock().instrument.writes.len()
    }

    /// Forget recorded commands.
    pub fn clear_writes(&self) {
        self.shared.lock().instrument.writes.clear();
    }

    /// Current coincidence window of the simulated firmware.
    pub fn window_ns(&self) -> u32 {
        self.shared.lock().instrument.window_ns
    }

    /// Number of successful port opens.
    pub fn open_count(&self) -> u32 {
        self.shared.lock().open_count
    }

    /// Number of times previously authorized ports were listed.
    pub fn authorized_queries(&self) -> u32 {
        self.shared.lock().authorized_queries
    }

    /// Whether a link is currently open.
    pub fn is_open(&self) -> bool {
        self.shared.lock().link.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_round_trip_through_mock_port() {
        let (host, handle) = MockHost::new();
        let mut port = host.request_port(&PortFilter::vendor(DEFAULT_VENDOR_ID)).await.unwrap();
        port.open(115_200).await.unwrap();

        let mut reader = port.readable().unwrap();
        let mut writer = port.writable().unwrap();
        writer.write_all(b"WINDOW?\r").await.unwrap();

        let mut buf = [0u8; 16];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"25\r\n");
        assert_eq!(handle.write_count(), 1);
    }

    #[tokio::test]
    async fn test_declined_selection() {
        let (host, handle) = MockHost::new();
        handle.decline_selection(true);

        let err = host
            .request_port(&PortFilter::vendor(DEFAULT_VENDOR_ID))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeviceSelectionCancelled));
    }

    #[tokio::test]
    async fn test_authorized_ports_requires_prior_grant() {
        let (host, handle) = MockHost::new();
        assert!(host.authorized_ports().await.unwrap().is_empty());

        host.request_port(&PortFilter::vendor(DEFAULT_VENDOR_ID)).await.unwrap();
        assert_eq!(host.authorized_ports().await.unwrap().len(), 1);

        handle.unplug();
        assert!(host.authorized_ports().await.unwrap().is_empty());
        assert_eq!(handle.authorized_queries(), 3);
    }

    #[tokio::test]
    async fn test_unplug_raises_signal_and_closes_stream() {
        let (host, handle) = MockHost::new();
        let mut port = host.request_port(&PortFilter::vendor(DEFAULT_VENDOR_ID)).await.unwrap();
        port.open(115_200).await.unwrap();
        let mut signal = port.unplug_signal();
        let mut reader = port.readable().unwrap();

        handle.unplug();

        signal.wait_for(|unplugged| *unplugged).await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert!(!handle.is_open());
        assert!(port.open(115_200).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_next_opens() {
        let (host, handle) = MockHost::new();
        handle.fail_next_opens(1);
        let mut port = host.request_port(&PortFilter::vendor(DEFAULT_VENDOR_ID)).await.unwrap();

        assert!(port.open(115_200).await.is_err());
        assert!(port.open(115_200).await.is_ok());
        assert_eq!(handle.open_count(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (host, handle) = MockHost::new();
        let mut port = host.request_port(&PortFilter::vendor(DEFAULT_VENDOR_ID)).await.unwrap();
        port.open(115_200).await.unwrap();

        port.close().await.unwrap();
        port.close().await.unwrap();
        assert!(!handle.is_open());
    }
}
