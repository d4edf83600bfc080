//! Single command round trip.
//!
//! One attempt is: make sure a link is up, take the gate, drop stale input,
//! write `command\r`, wait the settle delay, then read until the codec
//! yields a line or the deadline passes. The deadline runs from write
//! completion, so the settle delay counts against it.
//!
//! A response is complete as soon as a CR or LF arrives. This assumes the
//! firmware never embeds a bare CR or LF inside a field.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use countlink_core::{Error, Result};

use crate::connection::{ConnectionManager, Link};
use crate::gate::CommandGate;

/// Read buffer growth per read call.
const READ_RESERVE: usize = 256;

/// Run one attempt of `command` and return the trimmed response line.
///
/// # Errors
///
/// - [`Error::NotConnected`] if no link can be brought up
/// - [`Error::CommandTimeout`] if nothing arrived before the deadline
/// - [`Error::Communication`] on I/O failure or end of stream
/// - [`Error::InvalidParameter`] if `command` cannot be framed
pub(crate) async fn dispatch_once(
    manager: &Arc<ConnectionManager>,
    gate: &CommandGate,
    command: &str,
) -> Result<String> {
    loop {
        manager.ensure_connected().await?;

        let permit = gate.acquire().await;
        let mut guard = manager.link().await;
        let Some(link) = guard.as_mut() else {
            // The link dropped while this command was queued. Release the
            // gate and go back through the reconnect path.
            debug!(command, "Link lost while queued, waiting for reconnect");
            drop(guard);
            drop(permit);
            tokio::task::yield_now().await;
            continue;
        };

        let options = manager.options();
        return round_trip(link, command, options.command_delay(), options.timeout()).await;
    }
}

async fn round_trip(
    link: &mut Link,
    command: &str,
    settle: Duration,
    timeout: Duration,
) -> Result<String> {
    let comm = |e: io::Error| Error::communication(command, e);

    drop_stale_input(link, command).map_err(comm)?;

    let mut frame = BytesMut::new();
    link.codec.encode(command, &mut frame).map_err(|e| {
        Error::invalid_parameter(
            "command",
            format!("{command:?}"),
            format!("a single ASCII line ({e})"),
        )
    })?;

    link.writer.write_all(&frame).await.map_err(comm)?;
    link.writer.flush().await.map_err(comm)?;
    let written_at = Instant::now();
    let deadline = written_at + timeout;
    trace!(command, "Command written");

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    loop {
        match link.codec.decode(&mut link.buffer) {
            Ok(Some(line)) => {
                debug!(
                    command,
                    response = %line,
                    elapsed_ms = written_at.elapsed().as_millis() as u64,
                    "Command completed"
                );
                return Ok(line);
            }
            Ok(None) => {}
            Err(e) => {
                link.buffer.clear();
                return Err(comm(e));
            }
        }

        link.buffer.reserve(READ_RESERVE);
        match tokio::time::timeout_at(deadline, link.reader.read_buf(&mut link.buffer)).await {
            Err(_) => break,
            Ok(Ok(0)) => {
                return Err(comm(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed while waiting for response",
                )));
            }
            Ok(Ok(n)) => trace!(command, bytes = n, "Response bytes received"),
            Ok(Err(e)) => return Err(comm(e)),
        }
    }

    let partial = String::from_utf8_lossy(&link.buffer).trim().to_string();
    link.buffer.clear();

    if partial.is_empty() {
        Err(Error::timeout(command, timeout.as_millis() as u64))
    } else {
        warn!(
            command,
            response = %partial,
            "Deadline passed without line terminator, using partial response"
        );
        Ok(partial)
    }
}

/// Throw away everything received before this command is written.
///
/// Complete lines are late answers to earlier commands. A leftover that
/// already exceeds the maximum line length can never become a valid
/// response and is cleared too.
fn drop_stale_input(link: &mut Link, command: &str) -> io::Result<()> {
    drain_pending(link)?;

    let stale = link.codec.discard_complete_lines(&mut link.buffer);
    if stale > 0 {
        debug!(command, stale, "Discarded stale response lines");
    }
    if link.buffer.len() >= link.codec.max_length() {
        warn!(command, bytes = link.buffer.len(), "Discarded oversized unterminated input");
        link.buffer.clear();
    }
    Ok(())
}

/// Pull in bytes that are already waiting without blocking, up to the
/// codec's maximum line length.
///
/// A late answer to an earlier timed-out command sits here until read.
fn drain_pending(link: &mut Link) -> io::Result<()> {
    while link.buffer.len() < link.codec.max_length() {
        link.buffer.reserve(READ_RESERVE);
        match link.reader.read_buf(&mut link.buffer).now_or_never() {
            // Nothing ready, or end of stream (the write will report it).
            None | Some(Ok(0)) => return Ok(()),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e),
        }
    }
    Ok(())
}
