//! In-memory counter source for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use countlink_core::{Error, Result};
use countlink_protocol::CountsReading;

use crate::source::CounterSource;

/// Returns the same reading on every read, or a scripted error.
#[derive(Debug)]
pub(crate) struct ScriptedSource {
    reading: CountsReading,
    failure: Mutex<Option<Error>>,
    reads: AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn fixed(counts: Vec<u64>) -> Self {
        Self {
            reading: CountsReading { counts, overflow: 0 },
            failure: Mutex::new(None),
            reads: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(error: Error) -> Self {
        let source = Self::fixed(vec![0; 8]);
        *source.failure.lock().unwrap() = Some(error);
        source
    }

    pub(crate) fn with_overflow(mut self, overflow: u64) -> Self {
        self.reading.overflow = overflow;
        self
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl CounterSource for ScriptedSource {
    fn channel_count(&self) -> usize {
        self.reading.counts.len()
    }

    async fn read_counts(&self) -> Result<CountsReading> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(self.reading.clone()),
        }
    }
}
