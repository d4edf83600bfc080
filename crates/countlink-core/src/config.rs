//! Engine configuration.
//!
//! [`Options`] is built once and stays immutable for the lifetime of an
//! instrument handle. Timing fields are stored in milliseconds so the struct
//! round-trips cleanly through serde; use the `Duration` accessors in code.
//!
//! # Examples
//!
//! ```
//! use countlink_core::Options;
//! use std::time::Duration;
//!
//! let options = Options::builder()
//!     .timeout(Duration::from_millis(500))
//!     .command_retries(5)
//!     .auto_reconnect(false)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(options.timeout(), Duration::from_millis(500));
//! assert!(!options.auto_reconnect);
//! ```
//!
//! Partial configuration files fall back to the defaults:
//!
//! ```
//! use countlink_core::Options;
//!
//! let options: Options = serde_json::from_str(r#"{ "rate_limit_ms": 100 }"#).unwrap();
//! assert_eq!(options.rate_limit_ms, 100);
//! assert_eq!(options.baud_rate, 115_200);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{Error, Result};

/// Immutable configuration of the instrument engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Serial baud rate.
    pub baud_rate: u32,

    /// USB vendor identifier used to select the device.
    pub vendor_id: u16,

    /// Number of counter channels reported by the instrument.
    pub channel_count: usize,

    /// Firmware boot delay after opening the port.
    pub boot_delay_ms: u64,

    /// Settle delay between write and read.
    pub command_delay_ms: u64,

    /// Round-trip deadline measured from write completion.
    pub timeout_ms: u64,

    /// Total attempts per command made by the retry layer.
    pub command_retries: u32,

    /// Base linear backoff between command attempts.
    pub retry_delay_ms: u64,

    /// Minimum spacing between the starts of consecutive writes.
    pub rate_limit_ms: u64,

    /// Reconnect automatically on unplug or when a command finds the link down.
    pub auto_reconnect: bool,

    /// Attempts made by the auto-reconnect sequence.
    pub reconnect_attempts: u32,

    /// Base linear backoff of the auto-reconnect sequence.
    pub reconnect_delay_ms: u64,

    /// Run each retry-wrapped command under a process-wide exclusive lock.
    pub use_exclusive_lock: bool,

    /// Name of the exclusive lock.
    pub lock_name: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            vendor_id: DEFAULT_VENDOR_ID,
            channel_count: DEFAULT_CHANNEL_COUNT,
            boot_delay_ms: DEFAULT_BOOT_DELAY_MS,
            command_delay_ms: DEFAULT_COMMAND_DELAY_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            command_retries: DEFAULT_COMMAND_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            rate_limit_ms: DEFAULT_RATE_LIMIT_MS,
            auto_reconnect: true,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            use_exclusive_lock: false,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
        }
    }
}

impl Options {
    /// Create a builder starting from the defaults.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Check field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(Error::invalid_parameter("baud_rate", self.baud_rate, "> 0"));
        }
        if self.channel_count == 0 {
            return Err(Error::invalid_parameter(
                "channel_count",
                self.channel_count,
                "> 0",
            ));
        }
        if self.timeout_ms == 0 {
            return Err(Error::invalid_parameter("timeout_ms", self.timeout_ms, "> 0"));
        }
        if self.use_exclusive_lock && self.lock_name.trim().is_empty() {
            return Err(Error::invalid_parameter(
                "lock_name",
                format!("{:?}", self.lock_name),
                "non-empty when use_exclusive_lock is set",
            ));
        }
        Ok(())
    }

    /// Firmware boot delay.
    pub fn boot_delay(&self) -> Duration {
        Duration::from_millis(self.boot_delay_ms)
    }

    /// Settle delay between write and read.
    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    /// Round-trip deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Base retry backoff.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Minimum spacing between write starts.
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }

    /// Base reconnect backoff.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Total attempts the retry layer makes, never less than one.
    pub fn total_attempts(&self) -> u32 {
        self.command_retries.max(1)
    }
}

/// Fluent builder for [`Options`].
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Set the baud rate.
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.options.baud_rate = baud_rate;
        self
    }

    /// Set the USB vendor identifier.
    pub fn vendor_id(mut self, vendor_id: u16) -> Self {
        self.options.vendor_id = vendor_id;
        self
    }

    /// Set the channel count.
    pub fn channel_count(mut self, channel_count: usize) -> Self {
        self.options.channel_count = channel_count;
        self
    }

    /// Set the firmware boot delay.
    pub fn boot_delay(mut self, delay: Duration) -> Self {
        self.options.boot_delay_ms = duration_ms(delay);
        self
    }

    /// Set the settle delay between write and read.
    pub fn command_delay(mut self, delay: Duration) -> Self {
        self.options.command_delay_ms = duration_ms(delay);
        self
    }

    /// Set the round-trip deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the total attempts per command.
    pub fn command_retries(mut self, retries: u32) -> Self {
        self.options.command_retries = retries;
        self
    }

    /// Set the base retry backoff.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.options.retry_delay_ms = duration_ms(delay);
        self
    }

    /// Set the minimum spacing between write starts.
    pub fn rate_limit(mut self, interval: Duration) -> Self {
        self.options.rate_limit_ms = duration_ms(interval);
        self
    }

    /// Enable or disable auto-reconnect.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.options.auto_reconnect = enabled;
        self
    }

    /// Set the number of auto-reconnect attempts.
    pub fn reconnect_attempts(mut self, attempts: u32) -> Self {
        self.options.reconnect_attempts = attempts;
        self
    }

    /// Set the base reconnect backoff.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.options.reconnect_delay_ms = duration_ms(delay);
        self
    }

    /// Run commands under the named process-wide exclusive lock.
    pub fn exclusive_lock(mut self, name: impl Into<String>) -> Self {
        self.options.use_exclusive_lock = true;
        self.options.lock_name = name.into();
        self
    }

    /// Validate and build the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if a field is out of range.
    pub fn build(self) -> Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
