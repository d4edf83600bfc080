//! Timed counting measurements with Poisson uncertainty.
//!
//! - [`measure_rate`]: count rate of one channel
//! - [`measure_coincidence_rate`]: singles and coincidence rates with
//!   accidental-coincidence correction
//!
//! Both clear the counters, wait out the integration time (cancellable via a
//! [`CancellationToken`](tokio_util::sync::CancellationToken)) and read the
//! counters again. Any [`CounterSource`] works; [`Instrument`] is one.
//!
//! [`Instrument`]: countlink_serial::Instrument

pub mod coincidence;
pub mod rate;
mod sampling;
pub mod source;
#[cfg(test)]
mod test_support;
pub mod uncertainty;

pub use coincidence::{
    CoincidenceChannels, CoincidenceCounts, CoincidenceMeasurement, CoincidenceOptions,
    CoincidenceUncertainty, DEFAULT_COINCIDENCE_WINDOW, measure_coincidence_rate,
};
pub use rate::{RateMeasurement, measure_rate};
pub use source::CounterSource;
pub use uncertainty::{RateUncertainty, accidental_rate, accidental_rate_uncertainty, poisson_sigma};
