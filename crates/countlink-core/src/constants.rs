//! Protocol and timing constants.
//!
//! Defaults for [`Options`](crate::Options) and the fixed wire-format
//! constants of the instrument's line protocol.
//!
//! # Wire format
//!
//! ```text
//! host  -> device:  COMMAND<CR>
//! device -> host:   RESPONSE<CR><LF>   (either CR or LF ends a response)
//! ```

// ============================================================================
// Wire format
// ============================================================================

/// Terminator appended to every outgoing command.
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// Bytes that end an incoming response line.
///
/// A response is considered complete as soon as either byte is seen. This
/// assumes no response field ever embeds a bare CR or LF.
pub const RESPONSE_TERMINATORS: [u8; 2] = [b'\r', b'\n'];

/// Maximum length of a single response line in bytes.
///
/// The longest legitimate response is a counts line for a large channel
/// count; anything longer indicates a desynchronized stream.
pub const MAX_RESPONSE_LENGTH: usize = 4 * 1024;

// ============================================================================
// Connection defaults
// ============================================================================

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default USB vendor identifier used to filter device selection.
pub const DEFAULT_VENDOR_ID: u16 = 0x2E8A;

/// Default number of counter channels on the instrument.
pub const DEFAULT_CHANNEL_COUNT: usize = 8;

/// Delay after opening the port before the firmware accepts commands (ms).
pub const DEFAULT_BOOT_DELAY_MS: u64 = 2000;

// ============================================================================
// Command defaults
// ============================================================================

/// Settle delay between writing a command and starting to read (ms).
pub const DEFAULT_COMMAND_DELAY_MS: u64 = 10;

/// Round-trip deadline, measured from write completion (ms).
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Total attempts the retry layer makes per command.
pub const DEFAULT_COMMAND_RETRIES: u32 = 3;

/// Base backoff between command attempts (ms); attempt `k` waits `k` times this.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

/// Minimum spacing between the starts of consecutive command writes (ms).
pub const DEFAULT_RATE_LIMIT_MS: u64 = 10;

// ============================================================================
// Reconnect defaults
// ============================================================================

/// Attempts made by the auto-reconnect sequence.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Base backoff of the auto-reconnect sequence (ms); attempt `k` waits `k` times this.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Name of the process-wide exclusive lock guarding the channel.
pub const DEFAULT_LOCK_NAME: &str = "countlink-serial";

// ============================================================================
// Instrument limits
// ============================================================================

/// Smallest coincidence window the firmware accepts (ns).
pub const MIN_WINDOW_NS: u32 = 1;

/// Largest coincidence window the firmware accepts (ns).
pub const MAX_WINDOW_NS: u32 = 10_000;
