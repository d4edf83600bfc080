//! Clear, wait, read: the integration window shared by every measurement.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use countlink_core::{Error, Result};
use countlink_protocol::CountsReading;

use crate::source::CounterSource;

/// Counters collected over one integration window.
#[derive(Debug)]
pub(crate) struct Sample {
    pub reading: CountsReading,
    pub started_at: DateTime<Utc>,
}

/// Reject a zero-length window.
pub(crate) fn validate_duration(duration: Duration) -> Result<()> {
    if duration.is_zero() {
        return Err(Error::invalid_parameter(
            "duration",
            format!("{duration:?}"),
            "greater than zero",
        ));
    }
    Ok(())
}

/// Reject a channel the source does not have.
pub(crate) fn validate_channel(name: &str, channel: usize, channel_count: usize) -> Result<()> {
    if channel >= channel_count {
        return Err(Error::invalid_parameter(
            name,
            channel,
            format!("in 0..{channel_count}"),
        ));
    }
    Ok(())
}

/// Clear the counters, wait `duration`, then read them.
///
/// Cancellation is honoured on entry and during the wait. A counter read in
/// flight always runs to completion. After cancellation no further read is
/// issued.
pub(crate) async fn integrate<S: CounterSource>(
    source: &S,
    operation: &str,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<Sample> {
    if cancel.is_cancelled() {
        return Err(Error::aborted(operation));
    }

    source.read_counts().await?;
    let started_at = Utc::now();
    debug!(operation, duration_ms = duration.as_millis() as u64, "Counters cleared, integrating");

    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            debug!(operation, "Measurement cancelled during integration");
            return Err(Error::aborted(operation));
        }
        () = tokio::time::sleep(duration) => {}
    }

    let reading = source.read_counts().await?;
    Ok(Sample {
        reading,
        started_at,
    })
}
