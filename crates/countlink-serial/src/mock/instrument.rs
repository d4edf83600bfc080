//! Simulated counting instrument.
//!
//! The far end of every mock link runs [`serve`], which decodes commands with
//! the same [`LineCodec`] the engine uses and answers them from an
//! [`InstrumentState`] shared with the test handle.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::trace;

use countlink_core::constants::{DEFAULT_CHANNEL_COUNT, MAX_WINDOW_NS, MIN_WINDOW_NS};
use countlink_protocol::LineCodec;

use super::host::Shared;

/// Coincidence window the simulated firmware boots with.
pub const MOCK_DEFAULT_WINDOW_NS: u32 = 25;

/// Identification string of the simulated instrument.
pub const MOCK_IDENTITY: &str = "Countlink,CL-8 Mock,MOCK0001,1.0.0";

/// Scripted answer to the next command, overriding the simulated firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Answer with a CRLF-terminated line.
    Line(String),

    /// Answer with bytes but no terminator.
    Partial(String),

    /// Swallow the command without answering.
    Silent,

    /// Drop the link as if the cable broke mid-command.
    Hangup,
}

/// One command received by the simulated instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    /// Command text without terminator.
    pub command: String,

    /// When the command was decoded.
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub(crate) enum Counters {
    /// Counts accumulate at a fixed rate per channel (counts per second).
    Rates(Vec<f64>),

    /// Every read returns the same values.
    Fixed(Vec<u64>),
}

#[derive(Debug)]
pub(crate) struct InstrumentState {
    pub(crate) counters: Counters,
    pub(crate) overflow: u64,
    pub(crate) window_ns: u32,
    pub(crate) script: VecDeque<MockReply>,
    pub(crate) writes: Vec<WriteRecord>,
    pub(crate) response_delay: Duration,
    last_read: Instant,
}

impl InstrumentState {
    pub(crate) fn new() -> Self {
        Self {
            counters: Counters::Rates(vec![0.0; DEFAULT_CHANNEL_COUNT]),
            overflow: 0,
            window_ns: MOCK_DEFAULT_WINDOW_NS,
            script: VecDeque::new(),
            writes: Vec::new(),
            response_delay: Duration::ZERO,
            last_read: Instant::now(),
        }
    }

    /// Restart counting from now.
    pub(crate) fn clear_counters(&mut self) {
        self.last_read = Instant::now();
    }

    fn read_counters(&mut self) -> String {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_read).as_secs_f64();
        self.last_read = now;

        let counts: Vec<u64> = match &self.counters {
            Counters::Rates(rates) => rates
                .iter()
                .map(|rate| (rate.max(0.0) * elapsed).round() as u64)
                .collect(),
            Counters::Fixed(values) => values.clone(),
        };

        let mut fields: Vec<String> = counts.iter().map(u64::to_string).collect();
        fields.push(self.overflow.to_string());
        fields.join(" ")
    }

    /// Record a command and produce its answer.
    pub(crate) fn respond(&mut self, command: &str) -> MockReply {
        self.writes.push(WriteRecord {
            command: command.to_string(),
            at: Instant::now(),
        });

        if let Some(reply) = self.script.pop_front() {
            return reply;
        }

        let line = match command {
            "*IDN?" => MOCK_IDENTITY.to_string(),
            "COUNTS?" => self.read_counters(),
            "WINDOW?" => self.window_ns.to_string(),
            "*RST" => {
                self.window_ns = MOCK_DEFAULT_WINDOW_NS;
                self.overflow = 0;
                self.clear_counters();
                "OK".to_string()
            }
            other => match other.strip_prefix("WINDOW ").map(str::parse::<u32>) {
                Some(Ok(ns)) if (MIN_WINDOW_NS..=MAX_WINDOW_NS).contains(&ns) => {
                    self.window_ns = ns;
                    "OK".to_string()
                }
                Some(_) => "ERR 2".to_string(),
                None => "ERR 1".to_string(),
            },
        };
        MockReply::Line(line)
    }
}

/// Serve commands arriving on `stream` until the link goes away.
pub(crate) async fn serve(stream: DuplexStream, shared: Arc<Shared>) {
    let (read, mut write) = tokio::io::split(stream);
    let mut commands = FramedRead::new(read, LineCodec::new());

    while let Some(Ok(command)) = commands.next().await {
        let (reply, delay) = {
            let mut state = shared.lock();
            let reply = state.instrument.respond(&command);
            (reply, state.instrument.response_delay)
        };
        trace!(command = %command, reply = ?reply, "Mock instrument answering");

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let bytes = match reply {
            MockReply::Line(text) => format!("{text}\r\n"),
            MockReply::Partial(text) => text,
            MockReply::Silent => continue,
            MockReply::Hangup => return,
        };
        if write.write_all(bytes.as_bytes()).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rates_accumulate_between_reads() {
        let mut state = InstrumentState::new();
        state.counters = Counters::Rates(vec![1000.0, 0.0, 250.0]);
        state.overflow = 4;
        state.clear_counters();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(
            state.respond("COUNTS?"),
            MockReply::Line("2000 0 500 4".to_string())
        );
        assert_eq!(
            state.respond("COUNTS?"),
            MockReply::Line("0 0 0 4".to_string())
        );
    }

    #[tokio::test]
    async fn test_window_commands() {
        let mut state = InstrumentState::new();

        assert_eq!(state.respond("WINDOW 40"), MockReply::Line("OK".to_string()));
        assert_eq!(state.respond("WINDOW?"), MockReply::Line("40".to_string()));
        assert_eq!(state.respond("WINDOW 0"), MockReply::Line("ERR 2".to_string()));
        assert_eq!(state.respond("*RST"), MockReply::Line("OK".to_string()));
        assert_eq!(state.window_ns, MOCK_DEFAULT_WINDOW_NS);
        assert_eq!(state.respond("BOGUS"), MockReply::Line("ERR 1".to_string()));
        assert_eq!(state.writes.len(), 5);
    }

    #[tokio::test]
    async fn test_script_overrides_firmware() {
        let mut state = InstrumentState::new();
        state.script.push_back(MockReply::Silent);

        assert_eq!(state.respond("*IDN?"), MockReply::Silent);
        assert_eq!(
            state.respond("*IDN?"),
            MockReply::Line(MOCK_IDENTITY.to_string())
        );
    }
}
