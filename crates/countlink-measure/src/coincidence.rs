//! Two-detector coincidence rates with accidental correction.
//!
//! Singles on channels A and B, coincidences on a third channel. Chance
//! coincidences between two independent streams occur at
//! `2 · window · rate_a · rate_b`. The true rate is what remains after
//! subtracting them, clamped at zero.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use countlink_core::{Error, Result};

use crate::sampling;
use crate::source::CounterSource;
use crate::uncertainty::{accidental_rate, accidental_rate_uncertainty, poisson_sigma};

/// Coincidence window used when none is given, in seconds.
pub const DEFAULT_COINCIDENCE_WINDOW: f64 = 25e-9;

/// Parameters of [`measure_coincidence_rate`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use countlink_measure::CoincidenceOptions;
///
/// let options = CoincidenceOptions::new(0, 1, 4, Duration::from_secs(10)).window(5e-9);
/// assert!(options.validate(8).is_ok());
/// assert!(options.validate(4).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct CoincidenceOptions {
    /// Singles channel A.
    pub channel_a: usize,

    /// Singles channel B.
    pub channel_b: usize,

    /// Channel counting A∧B coincidences.
    pub coincidence_channel: usize,

    /// Integration time.
    pub duration: Duration,

    /// Coincidence window in seconds.
    pub window: f64,

    /// Aborts the integration wait.
    pub cancel: CancellationToken,
}

impl CoincidenceOptions {
    /// Options with the default window and a token nobody cancels.
    pub fn new(
        channel_a: usize,
        channel_b: usize,
        coincidence_channel: usize,
        duration: Duration,
    ) -> Self {
        Self {
            channel_a,
            channel_b,
            coincidence_channel,
            duration,
            window: DEFAULT_COINCIDENCE_WINDOW,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the coincidence window in seconds.
    pub fn window(mut self, seconds: f64) -> Self {
        self.window = seconds;
        self
    }

    /// Use `token` to cancel the measurement.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Check the options against an instrument with `channel_count` channels.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an out-of-range or repeated
    /// channel, a zero duration, or a negative or non-finite window.
    pub fn validate(&self, channel_count: usize) -> Result<()> {
        sampling::validate_channel("channel_a", self.channel_a, channel_count)?;
        sampling::validate_channel("channel_b", self.channel_b, channel_count)?;
        sampling::validate_channel("coincidence_channel", self.coincidence_channel, channel_count)?;

        if self.channel_a == self.channel_b {
            return Err(Error::invalid_parameter(
                "channel_b",
                self.channel_b,
                "different from channel_a",
            ));
        }
        let coincidence = self.coincidence_channel;
        if coincidence == self.channel_a || coincidence == self.channel_b {
            return Err(Error::invalid_parameter(
                "coincidence_channel",
                self.coincidence_channel,
                "different from both singles channels",
            ));
        }

        sampling::validate_duration(self.duration)?;

        if !self.window.is_finite() || self.window < 0.0 {
            return Err(Error::invalid_parameter(
                "window",
                self.window,
                "a finite number of seconds >= 0",
            ));
        }
        Ok(())
    }
}

/// Channels a coincidence measurement was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoincidenceChannels {
    pub a: usize,
    pub b: usize,
    pub coincidence: usize,
}

/// Raw counts of a coincidence measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoincidenceCounts {
    pub a: u64,
    pub b: u64,
    pub coincidence: u64,
}

/// One-sigma uncertainties of every derived rate, in counts per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoincidenceUncertainty {
    pub rate_a: f64,
    pub rate_b: f64,
    pub coincidence_rate: f64,
    pub accidental_rate: f64,
    pub true_coincidence_rate: f64,
}

/// Result of [`measure_coincidence_rate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoincidenceMeasurement {
    pub channels: CoincidenceChannels,
    pub counts: CoincidenceCounts,
    pub duration: Duration,
    /// Coincidence window in seconds.
    pub window: f64,
    pub rate_a: f64,
    pub rate_b: f64,
    pub coincidence_rate: f64,
    pub accidental_rate: f64,
    /// Coincidence rate minus accidentals, never negative.
    pub true_coincidence_rate: f64,
    pub uncertainty: CoincidenceUncertainty,
    /// When the counters were cleared.
    pub started_at: DateTime<Utc>,
}

impl CoincidenceMeasurement {
    /// Derive rates and uncertainties from raw counts.
    ///
    /// `duration` must be non-zero and `window` finite and non-negative.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use chrono::Utc;
    /// use countlink_measure::{CoincidenceChannels, CoincidenceCounts, CoincidenceMeasurement};
    ///
    /// let m = CoincidenceMeasurement::from_counts(
    ///     CoincidenceChannels { a: 0, b: 1, coincidence: 4 },
    ///     CoincidenceCounts { a: 1000, b: 1000, coincidence: 50 },
    ///     Duration::from_secs(1),
    ///     25e-9,
    ///     Utc::now(),
    /// );
    /// assert!((m.accidental_rate - 0.05).abs() < 1e-12);
    /// assert!((m.true_coincidence_rate - 49.95).abs() < 1e-9);
    /// ```
    pub fn from_counts(
        channels: CoincidenceChannels,
        counts: CoincidenceCounts,
        duration: Duration,
        window: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        let seconds = duration.as_secs_f64();
        let rate_a = counts.a as f64 / seconds;
        let rate_b = counts.b as f64 / seconds;
        let coincidence_rate = counts.coincidence as f64 / seconds;

        let accidental_rate = accidental_rate(window, rate_a, rate_b);
        let true_coincidence_rate = (coincidence_rate - accidental_rate).max(0.0);

        let sigma_a = poisson_sigma(counts.a);
        let sigma_b = poisson_sigma(counts.b);
        let sigma_c = poisson_sigma(counts.coincidence);
        let coincidence_unc = sigma_c / seconds;
        let accidental_unc =
            accidental_rate_uncertainty(window, seconds, rate_a, rate_b, sigma_a, sigma_b);

        Self {
            channels,
            counts,
            duration,
            window,
            rate_a,
            rate_b,
            coincidence_rate,
            accidental_rate,
            true_coincidence_rate,
            uncertainty: CoincidenceUncertainty {
                rate_a: sigma_a / seconds,
                rate_b: sigma_b / seconds,
                coincidence_rate: coincidence_unc,
                accidental_rate: accidental_unc,
                true_coincidence_rate: coincidence_unc.hypot(accidental_unc),
            },
            started_at,
        }
    }
}

/// Measure singles and coincidence rates over one integration window.
///
/// Uses the same clear, wait, read sequence as
/// [`measure_rate`](crate::measure_rate).
///
/// # Errors
///
/// - [`Error::InvalidParameter`] if the options fail validation
/// - [`Error::OperationAborted`] if `options.cancel` fires first
/// - any error from reading the counters
pub async fn measure_coincidence_rate<S: CounterSource>(
    source: &S,
    options: &CoincidenceOptions,
) -> Result<CoincidenceMeasurement> {
    options.validate(source.channel_count())?;

    let sample = sampling::integrate(
        source,
        "measure_coincidence_rate",
        options.duration,
        &options.cancel,
    )
    .await?;
    let reading = &sample.reading;

    let channels = CoincidenceChannels {
        a: options.channel_a,
        b: options.channel_b,
        coincidence: options.coincidence_channel,
    };
    for channel in [channels.a, channels.b, channels.coincidence] {
        if reading.overflowed(channel) {
            warn!(channel, "Counter overflowed during coincidence measurement");
        }
    }

    let counts = CoincidenceCounts {
        a: reading.count(channels.a).unwrap_or_default(),
        b: reading.count(channels.b).unwrap_or_default(),
        coincidence: reading.count(channels.coincidence).unwrap_or_default(),
    };
    let measurement = CoincidenceMeasurement::from_counts(
        channels,
        counts,
        options.duration,
        options.window,
        sample.started_at,
    );

    info!(
        rate_a = measurement.rate_a,
        rate_b = measurement.rate_b,
        coincidence_rate = measurement.coincidence_rate,
        accidental_rate = measurement.accidental_rate,
        true_coincidence_rate = measurement.true_coincidence_rate,
        "Coincidence rate measured"
    );
    Ok(measurement)
}
