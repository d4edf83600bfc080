//! Typed instrument commands.
//!
//! | Command | Wire | Response |
//! |---------|------|----------|
//! | [`Command::Identify`] | `*IDN?` | `vendor,model,serial,firmware` |
//! | [`Command::ReadCounts`] | `COUNTS?` | `c0 c1 ... cN-1 overflow` |
//! | [`Command::SetWindow`] | `WINDOW <ns>` | `OK` |
//! | [`Command::QueryWindow`] | `WINDOW?` | `<ns>` |
//! | [`Command::Reset`] | `*RST` | `OK` |
//!
//! Reading the counters also clears them on the device.

use std::fmt;

use serde::{Deserialize, Serialize};

use countlink_core::constants::{MAX_WINDOW_NS, MIN_WINDOW_NS};
use countlink_core::{Error, Result};

/// Command understood by the counting instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum Command {
    /// Query the identification string.
    Identify,

    /// Read (and clear) all counters plus the overflow bitmask.
    ReadCounts,

    /// Set the coincidence window in nanoseconds.
    ///
    /// Build it with [`Command::set_window`], or call [`Command::validate`]
    /// before sending a hand-built value.
    SetWindow {
        /// Window width in nanoseconds.
        ns: u32,
    },

    /// Query the coincidence window in nanoseconds.
    QueryWindow,

    /// Reset the instrument to power-on settings.
    Reset,
}

impl Command {
    /// Create a validated window command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `ns` is outside the firmware range.
    ///
    /// # Examples
    ///
    /// ```
    /// use countlink_protocol::Command;
    ///
    /// assert_eq!(Command::set_window(25).unwrap().to_wire(), "WINDOW 25");
    /// assert!(Command::set_window(0).is_err());
    /// ```
    pub fn set_window(ns: u32) -> Result<Self> {
        let command = Self::SetWindow { ns };
        command.validate()?;
        Ok(command)
    }

    /// Check the command's parameters against the firmware limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for an out-of-range window.
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::SetWindow { ns } if !(MIN_WINDOW_NS..=MAX_WINDOW_NS).contains(&ns) => {
                Err(Error::invalid_parameter(
                    "window_ns",
                    ns,
                    format!("in {MIN_WINDOW_NS}..={MAX_WINDOW_NS}"),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Render the command text without the terminator.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Identify => "*IDN?".to_string(),
            Self::ReadCounts => "COUNTS?".to_string(),
            Self::SetWindow { ns } => format!("WINDOW {ns}"),
            Self::QueryWindow => "WINDOW?".to_string(),
            Self::Reset => "*RST".to_string(),
        }
    }

    /// Whether the instrument answers this command with a bare `OK`.
    pub fn expects_ack(&self) -> bool {
        matches!(self, Self::SetWindow { .. } | Self::Reset)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Command::Identify, "*IDN?")]
    #[case(Command::ReadCounts, "COUNTS?")]
    #[case(Command::SetWindow { ns: 25 }, "WINDOW 25")]
    #[case(Command::QueryWindow, "WINDOW?")]
    #[case(Command::Reset, "*RST")]
    fn test_wire_text(#[case] command: Command, #[case] wire: &str) {
        assert_eq!(command.to_wire(), wire);
        assert_eq!(command.to_string(), wire);
    }

    #[rstest]
    #[case(1, true)]
    #[case(10_000, true)]
    #[case(0, false)]
    #[case(10_001, false)]
    fn test_window_bounds(#[case] ns: u32, #[case] ok: bool) {
        assert_eq!(Command::set_window(ns).is_ok(), ok);
    }

    #[rstest]
    #[case(Command::SetWindow { ns: 0 }, false)]
    #[case(Command::SetWindow { ns: 20_000 }, false)]
    #[case(Command::SetWindow { ns: 40 }, true)]
    #[case(Command::Reset, true)]
    fn test_validate_hand_built(#[case] command: Command, #[case] ok: bool) {
        assert_eq!(command.validate().is_ok(), ok);
    }

    #[test]
    fn test_expects_ack() {
        assert!(Command::Reset.expects_ack());
        assert!(Command::SetWindow { ns: 5 }.expects_ack());
        assert!(!Command::ReadCounts.expects_ack());
        assert!(!Command::Identify.expects_ack());
    }
}
