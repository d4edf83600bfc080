//! Poisson statistics for counter readings.
//!
//! A count `N` from a Poisson process has standard deviation `sqrt(N)`.
//! Rates divide by the integration time; derived quantities combine
//! independent contributions in quadrature. Every function here returns a
//! finite, non-negative value for finite, non-negative inputs.

use serde::{Deserialize, Serialize};

/// Standard deviation of a Poisson count.
pub fn poisson_sigma(counts: u64) -> f64 {
    (counts as f64).sqrt()
}

/// Uncertainty of a single-channel rate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateUncertainty {
    /// Uncertainty of the raw count, `sqrt(counts)`.
    pub counts: f64,

    /// Uncertainty of the rate in counts per second.
    pub rate: f64,

    /// Relative uncertainty in percent; 0 when nothing was counted.
    pub relative_percent: f64,
}

impl RateUncertainty {
    /// Uncertainty of `counts` collected over `seconds`.
    ///
    /// # Examples
    ///
    /// ```
    /// use countlink_measure::RateUncertainty;
    ///
    /// let u = RateUncertainty::from_counts(400, 2.0);
    /// assert_eq!(u.counts, 20.0);
    /// assert_eq!(u.rate, 10.0);
    /// assert_eq!(u.relative_percent, 5.0);
    /// ```
    pub fn from_counts(counts: u64, seconds: f64) -> Self {
        let sigma = poisson_sigma(counts);
        let relative_percent = if counts > 0 {
            sigma / counts as f64 * 100.0
        } else {
            0.0
        };

        Self {
            counts: sigma,
            rate: sigma / seconds,
            relative_percent,
        }
    }
}

/// Expected rate of chance coincidences between two independent streams.
///
/// `window` is the coincidence window in seconds.
pub fn accidental_rate(window: f64, rate_a: f64, rate_b: f64) -> f64 {
    2.0 * window * rate_a * rate_b
}

/// Propagated uncertainty of [`accidental_rate`].
///
/// `sigma_a` and `sigma_b` are the count uncertainties of the two singles
/// channels, so `sigma / seconds` is the rate uncertainty.
pub fn accidental_rate_uncertainty(
    window: f64,
    seconds: f64,
    rate_a: f64,
    rate_b: f64,
    sigma_a: f64,
    sigma_b: f64,
) -> f64 {
    (2.0 * window / seconds) * (rate_b * sigma_a).hypot(rate_a * sigma_b)
}
