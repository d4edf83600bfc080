//! Counter access used by the measurement engine.
//!
//! Measurements only need two things from an instrument: how many channels
//! it has and a way to read (and thereby clear) its counters. Keeping that
//! behind [`CounterSource`] lets the engine run against anything that can
//! produce a [`CountsReading`].

#![allow(async_fn_in_trait)]

use countlink_core::Result;
use countlink_protocol::CountsReading;
use countlink_serial::Instrument;

/// Something whose counters can be read and cleared.
///
/// # Examples
///
/// ```no_run
/// use countlink_measure::CounterSource;
///
/// async fn total<S: CounterSource>(source: &S) -> countlink_core::Result<u64> {
///     let reading = source.read_counts().await?;
///     Ok(reading.counts.iter().sum())
/// }
/// ```
pub trait CounterSource {
    /// Number of counter channels.
    fn channel_count(&self) -> usize;

    /// Read all counters. Reading clears them on the device.
    async fn read_counts(&self) -> Result<CountsReading>;
}

impl CounterSource for Instrument {
    fn channel_count(&self) -> usize {
        self.options().channel_count
    }

    async fn read_counts(&self) -> Result<CountsReading> {
        Instrument::read_counts(self).await
    }
}
