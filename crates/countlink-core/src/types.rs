//! Shared types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the instrument connection.
///
/// # Valid Transitions
///
/// - Disconnected → Connecting → Connected / Disconnected
/// - Disconnected / Connected → Reconnecting → Connected / Disconnected
/// - Connected → Disconnected
///
/// # Examples
///
/// ```
/// use countlink_core::ConnectionState;
///
/// assert!(ConnectionState::Disconnected.can_transition_to(ConnectionState::Connecting));
/// assert!(!ConnectionState::Disconnected.can_transition_to(ConnectionState::Connected));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No channel is open.
    #[default]
    Disconnected,

    /// A user-initiated connect is opening the channel.
    Connecting,

    /// The channel is open and usable.
    Connected,

    /// A reconnect is re-opening a previously authorized device.
    Reconnecting,
}

impl ConnectionState {
    /// Check if the edge `self → target` is part of the state machine.
    pub fn can_transition_to(self, target: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, target),
            (Disconnected, Connecting | Reconnecting)
                | (Connecting, Connected | Disconnected)
                | (Connected, Disconnected | Reconnecting)
                | (Reconnecting, Connected | Disconnected)
        )
    }

    /// Whether a channel is usable in this state.
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
        };
        write!(f, "{}", state_str)
    }
}
