//! Command gate: one command on the wire at a time, spaced by a minimum interval.
//!
//! The gate is a baton. Callers queue on a FIFO-fair async mutex guarding the
//! time of the last write start. The holder sleeps off whatever remains of
//! the interval, stamps the new start time and keeps the [`GatePermit`] for
//! its whole round trip. Dropping the permit passes the baton on, on every
//! exit path including cancellation.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use countlink_serial::CommandGate;
//!
//! #[tokio::main]
//! async fn main() {
//!     let gate = CommandGate::new(Duration::from_millis(10));
//!
//!     let permit = gate.acquire().await;
//!     // write + read here
//!     drop(permit);
//!
//!     let _next = gate.acquire().await; // starts >= 10 ms after the first
//! }
//! ```

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::trace;

/// FIFO baton enforcing a minimum spacing between write starts.
#[derive(Debug)]
pub struct CommandGate {
    interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

/// Proof of holding the gate. The baton passes on drop.
#[derive(Debug)]
pub struct GatePermit<'a> {
    started_at: Instant,
    _baton: MutexGuard<'a, Option<Instant>>,
}

impl GatePermit<'_> {
    /// When this holder was admitted.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

impl CommandGate {
    /// Create a gate with the given minimum spacing.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_start: Mutex::new(None),
        }
    }

    /// Minimum spacing between write starts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the baton and the spacing interval.
    ///
    /// Waiters are admitted in arrival order.
    pub async fn acquire(&self) -> GatePermit<'_> {
        let mut baton = self.last_start.lock().await;

        if let Some(previous) = *baton {
            let ready_at = previous + self.interval;
            let now = Instant::now();
            if ready_at > now {
                trace!(wait_ms = (ready_at - now).as_millis() as u64, "Rate limiting command");
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let started_at = Instant::now();
        *baton = Some(started_at);
        GatePermit {
            started_at,
            _baton: baton,
        }
    }
}
