//! Response payload parsers.
//!
//! Every parser takes the command text it answers so a failure can be
//! reported as [`Error::InvalidResponse`] with the full context.

use serde::{Deserialize, Serialize};

use countlink_core::{Error, Result};

/// One snapshot of the instrument counters.
///
/// Produced by the `COUNTS?` command, which returns `channel_count + 1`
/// whitespace-separated integers: the per-channel counts followed by the
/// overflow bitmask (bit `n` set when channel `n` saturated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountsReading {
    /// Counts per channel, index = channel number.
    pub counts: Vec<u64>,

    /// Overflow bitmask.
    pub overflow: u64,
}

impl CountsReading {
    /// Counts of one channel, if it exists.
    pub fn count(&self, channel: usize) -> Option<u64> {
        self.counts.get(channel).copied()
    }

    /// Whether the given channel overflowed during the integration.
    pub fn overflowed(&self, channel: usize) -> bool {
        channel < 64 && self.overflow & (1 << channel) != 0
    }

    /// Number of channels in the reading.
    pub fn channel_count(&self) -> usize {
        self.counts.len()
    }
}

/// Parse a `COUNTS?` response for an instrument with `channel_count` channels.
///
/// Fields beyond `channel_count + 1` are ignored.
///
/// # Errors
///
/// Returns [`Error::InvalidResponse`] if fewer than `channel_count + 1`
/// fields are present or a field is not a non-negative integer.
///
/// # Examples
///
/// ```
/// use countlink_protocol::parse_counts;
///
/// let reading = parse_counts("COUNTS?", "10 20 30 40 50 60 70 80 1", 8).unwrap();
/// assert_eq!(reading.counts, vec![10, 20, 30, 40, 50, 60, 70, 80]);
/// assert_eq!(reading.overflow, 1);
///
/// assert!(parse_counts("COUNTS?", "10 20 30 40 50 60 70", 8).is_err());
/// ```
pub fn parse_counts(command: &str, response: &str, channel_count: usize) -> Result<CountsReading> {
    let expected_fields = channel_count + 1;
    let expected = || format!("{expected_fields} whitespace-separated integers");

    let fields: Vec<&str> = response.split_whitespace().collect();
    if fields.len() < expected_fields {
        return Err(Error::invalid_response(command, response, expected()));
    }

    let mut values = Vec::with_capacity(expected_fields);
    for field in &fields[..expected_fields] {
        let value = field
            .parse::<u64>()
            .map_err(|_| Error::invalid_response(command, response, expected()))?;
        values.push(value);
    }

    let overflow = values.pop().unwrap_or_default();
    Ok(CountsReading {
        counts: values,
        overflow,
    })
}

/// Identification returned by `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Manufacturer name.
    pub vendor: String,

    /// Model name.
    pub model: String,

    /// Serial number, when reported.
    pub serial: Option<String>,

    /// Firmware version, when reported.
    pub firmware: Option<String>,
}

/// Parse a `*IDN?` response of the form `vendor,model[,serial[,firmware]]`.
///
/// # Errors
///
/// Returns [`Error::InvalidResponse`] if vendor or model is missing.
pub fn parse_identity(command: &str, response: &str) -> Result<Identity> {
    let mut parts = response.split(',').map(str::trim);
    let non_empty = |part: Option<&str>| part.filter(|p| !p.is_empty()).map(str::to_string);

    let vendor = non_empty(parts.next());
    let model = non_empty(parts.next());
    let (Some(vendor), Some(model)) = (vendor, model) else {
        return Err(Error::invalid_response(
            command,
            response,
            "vendor,model[,serial[,firmware]]",
        ));
    };

    Ok(Identity {
        vendor,
        model,
        serial: non_empty(parts.next()),
        firmware: non_empty(parts.next()),
    })
}

/// Parse a `WINDOW?` response (window in nanoseconds).
///
/// # Errors
///
/// Returns [`Error::InvalidResponse`] if the response is not an unsigned integer.
pub fn parse_window(command: &str, response: &str) -> Result<u32> {
    response
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::invalid_response(command, response, "window in nanoseconds"))
}

/// Check an `OK` acknowledgement.
///
/// # Errors
///
/// Returns [`Error::InvalidResponse`] for anything other than `OK`
/// (case-insensitive).
pub fn parse_ack(command: &str, response: &str) -> Result<()> {
    if response.trim().eq_ignore_ascii_case("OK") {
        Ok(())
    } else {
        Err(Error::invalid_response(command, response, "OK"))
    }
}
