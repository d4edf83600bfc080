//! Operating system serial ports through the `serialport` crate.
//!
//! `serialport` exposes blocking reads and writes. Each open port gets one
//! reader thread and one writer thread, bridged to the async side with tokio
//! channels. A read or write failure other than a poll timeout is treated as
//! the device going away and raises the unplug signal.
//!
//! There is no selection prompt on a native host: `request_port` picks the
//! first USB port whose vendor id matches, and every matching port counts as
//! previously authorized.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use countlink_core::{Error, Result};

use crate::traits::{PortReader, PortWriter, SerialHost, SerialPort};
use crate::types::{PortFilter, PortInfo};

/// Poll interval of the blocking reader thread.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 256;
const READ_QUEUE_DEPTH: usize = 64;

/// Serial host backed by the operating system.
#[derive(Debug, Clone, Default)]
pub struct NativeHost;

impl NativeHost {
    /// Create a native host.
    pub fn new() -> Self {
        Self
    }

    fn matching_ports(&self, filter: &PortFilter) -> Result<Vec<NativePort>> {
        let ports = serialport::available_ports()
            .map_err(|e| Error::connection_failed_with("failed to enumerate serial ports", e))?;

        Ok(ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                serialport::SerialPortType::UsbPort(usb) => {
                    let mut info = PortInfo::new(port.port_name).with_usb_ids(usb.vid, usb.pid);
                    if let Some(serial) = usb.serial_number {
                        info = info.with_serial_number(serial);
                    }
                    Some(info)
                }
                _ => None,
            })
            .filter(|info| filter.matches(info))
            .map(NativePort::new)
            .collect())
    }
}

impl SerialHost for NativeHost {
    type Port = NativePort;

    fn is_supported(&self) -> bool {
        true
    }

    fn supports_exclusive_locks(&self) -> bool {
        true
    }

    async fn request_port(&self, filter: &PortFilter) -> Result<NativePort> {
        self.matching_ports(filter)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::connection_failed(format!(
                    "no USB serial port with vendor id {:04x}",
                    filter.vendor_id
                ))
            })
    }

    async fn authorized_ports(&self) -> Result<Vec<NativePort>> {
        // Vendor filtering happens in the connection manager.
        let ports = serialport::available_ports()
            .map_err(|e| Error::connection_failed_with("failed to enumerate serial ports", e))?;

        Ok(ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                serialport::SerialPortType::UsbPort(usb) => Some(NativePort::new(
                    PortInfo::new(port.port_name).with_usb_ids(usb.vid, usb.pid),
                )),
                _ => None,
            })
            .collect())
    }
}

/// Operating system serial port.
pub struct NativePort {
    info: PortInfo,
    unplug: Arc<watch::Sender<bool>>,
    stop: Arc<AtomicBool>,
    reader: Option<PortReader>,
    writer: Option<PortWriter>,
}

impl std::fmt::Debug for NativePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePort")
            .field("info", &self.info)
            .field("stopped", &self.stop.load(Ordering::Acquire))
            .finish()
    }
}

impl NativePort {
    fn new(info: PortInfo) -> Self {
        let (unplug, _) = watch::channel(false);
        Self {
            info,
            unplug: Arc::new(unplug),
            stop: Arc::new(AtomicBool::new(true)),
            reader: None,
            writer: None,
        }
    }
}

impl SerialPort for NativePort {
    fn info(&self) -> PortInfo {
        self.info.clone()
    }

    async fn open(&mut self, baud_rate: u32) -> Result<()> {
        let path = self.info.name.clone();
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(path, baud_rate)
                .timeout(READ_POLL_TIMEOUT)
                .open()
        })
        .await
        .map_err(|e| Error::connection_failed_with("serial open task failed", e))?
        .map_err(|e| {
            Error::connection_failed_with(format!("failed to open {}", self.info.name), e)
        })?;

        let write_port = port
            .try_clone()
            .map_err(|e| Error::connection_failed_with("failed to clone serial handle", e))?;

        let stop = Arc::new(AtomicBool::new(false));
        self.unplug.send_replace(false);

        let (read_tx, read_rx) = mpsc::channel(READ_QUEUE_DEPTH);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        spawn_reader(port, read_tx, Arc::clone(&stop), Arc::clone(&self.unplug))?;
        spawn_writer(write_port, write_rx, Arc::clone(&stop), Arc::clone(&self.unplug))?;

        self.stop = stop;
        self.reader = Some(Box::new(ChannelReader {
            rx: read_rx,
            pending: Bytes::new(),
        }));
        self.writer = Some(Box::new(ChannelWriter { tx: Some(write_tx) }));

        info!(port = %self.info, baud_rate, "Serial port opened");
        Ok(())
    }

    fn readable(&mut self) -> Result<PortReader> {
        self.reader
            .take()
            .ok_or_else(|| {
                Error::connection_failed("serial port is not open or reader already taken")
            })
    }

    fn writable(&mut self) -> Result<PortWriter> {
        self.writer
            .take()
            .ok_or_else(|| {
                Error::connection_failed("serial port is not open or writer already taken")
            })
    }

    fn unplug_signal(&self) -> watch::Receiver<bool> {
        self.unplug.subscribe()
    }

    async fn close(&mut self) -> Result<()> {
        // Threads notice the flag within one poll interval and drop the handles.
        self.stop.store(true, Ordering::Release);
        self.reader = None;
        self.writer = None;
        debug!(port = %self.info, "Serial port closed");
        Ok(())
    }
}

fn spawn_reader(
    mut port: Box<dyn serialport::SerialPort>,
    tx: mpsc::Sender<io::Result<Bytes>>,
    stop: Arc<AtomicBool>,
    unplug: Arc<watch::Sender<bool>>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("countlink-serial-rx".to_string())
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK];
            while !stop.load(Ordering::Acquire) && !tx.is_closed() {
                match port.read(&mut buf) {
                    Ok(0) => continue,
                    Ok(n) => {
                        if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                            break;
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                        ) => {}
                    Err(e) => {
                        if !stop.load(Ordering::Acquire) {
                            warn!(error = %e, "Serial read failed, treating device as unplugged");
                            unplug.send_replace(true);
                            let _ = tx.blocking_send(Err(e));
                        }
                        break;
                    }
                }
            }
        })
        .map(|_| ())
        .map_err(|e| Error::connection_failed_with("failed to spawn serial reader thread", e))
}

fn spawn_writer(
    mut port: Box<dyn serialport::SerialPort>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    unplug: Arc<watch::Sender<bool>>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("countlink-serial-tx".to_string())
        .spawn(move || {
            while let Some(data) = rx.blocking_recv() {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = port.write_all(&data).and_then(|()| port.flush()) {
                    warn!(error = %e, "Serial write failed, treating device as unplugged");
                    unplug.send_replace(true);
                    break;
                }
            }
        })
        .map(|_| ())
        .map_err(|e| Error::connection_failed_with("failed to spawn serial writer thread", e))
}

/// Async read side fed by the reader thread.
struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    pending: Bytes,
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.remaining());
                let chunk = self.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match ready!(self.rx.poll_recv(cx)) {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                // Reader thread gone: end of stream.
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// Async write side draining into the writer thread.
struct ChannelWriter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let sent = self
            .tx
            .as_ref()
            .is_some_and(|tx| tx.send(buf.to_vec()).is_ok());
        if sent {
            Poll::Ready(Ok(buf.len()))
        } else {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial writer thread has stopped",
            )))
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tx = None;
        Poll::Ready(Ok(()))
    }
}
