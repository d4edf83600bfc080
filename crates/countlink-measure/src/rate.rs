//! Single-channel count rates.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use countlink_core::Result;

use crate::sampling::{self, Sample};
use crate::source::CounterSource;
use crate::uncertainty::RateUncertainty;

/// Result of [`measure_rate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateMeasurement {
    /// Measured channel.
    pub channel: usize,

    /// Counts collected during the window.
    pub counts: u64,

    /// Integration time.
    pub duration: Duration,

    /// Counts per second.
    pub rate: f64,

    /// Poisson uncertainty of `counts` and `rate`.
    pub uncertainty: RateUncertainty,

    /// Whether the channel's counter saturated during the window.
    pub overflowed: bool,

    /// When the counters were cleared.
    pub started_at: DateTime<Utc>,
}

impl RateMeasurement {
    fn from_sample(channel: usize, duration: Duration, sample: &Sample) -> Self {
        let counts = sample.reading.count(channel).unwrap_or_default();
        let seconds = duration.as_secs_f64();

        Self {
            channel,
            counts,
            duration,
            rate: counts as f64 / seconds,
            uncertainty: RateUncertainty::from_counts(counts, seconds),
            overflowed: sample.reading.overflowed(channel),
            started_at: sample.started_at,
        }
    }
}

/// Measure the count rate of `channel` over `duration`.
///
/// Clears the counters with a read, waits `duration`, then reads again.
/// The token is checked before the first read and raced against the wait.
///
/// # Errors
///
/// - [`Error::InvalidParameter`] if `channel` is out of range or
///   `duration` is zero
/// - [`Error::OperationAborted`] if `cancel` fires first
/// - any error from reading the counters
///
/// [`Error::InvalidParameter`]: countlink_core::Error::InvalidParameter
/// [`Error::OperationAborted`]: countlink_core::Error::OperationAborted
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use countlink_core::Options;
/// use countlink_measure::measure_rate;
/// use countlink_serial::Instrument;
/// use countlink_serial::mock::MockHost;
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main(flavor = "current_thread", start_paused = true)]
/// async fn main() -> countlink_core::Result<()> {
///     let (host, handle) = MockHost::new();
///     handle.set_counts(vec![500, 0, 0, 0, 0, 0, 0, 0]);
///
///     let options = Options::builder().boot_delay(Duration::ZERO).build()?;
///     let instrument = Instrument::new(host, options)?;
///     instrument.connect().await?;
///
///     let cancel = CancellationToken::new();
///     let m = measure_rate(&instrument, 0, Duration::from_secs(5), &cancel).await?;
///     assert_eq!(m.rate, 100.0);
///     Ok(())
/// }
/// ```
pub async fn measure_rate<S: CounterSource>(
    source: &S,
    channel: usize,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<RateMeasurement> {
    sampling::validate_channel("channel", channel, source.channel_count())?;
    sampling::validate_duration(duration)?;

    let sample = sampling::integrate(source, "measure_rate", duration, cancel).await?;
    let measurement = RateMeasurement::from_sample(channel, duration, &sample);

    if measurement.overflowed {
        warn!(channel, "Counter overflowed during rate measurement");
    }
    info!(
        channel,
        counts = measurement.counts,
        rate = measurement.rate,
        rate_uncertainty = measurement.uncertainty.rate,
        "Rate measured"
    );
    Ok(measurement)
}
