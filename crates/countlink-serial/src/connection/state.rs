//! Connection state machine and lifecycle events.
//!
//! [`StateMachine`] is the only place a [`ConnectionState`] changes. It
//! validates the edge, records the transition and, wrapped in the manager's
//! [`StateCell`], publishes a [`ConnectionEvent::StateChanged`] for it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use countlink_core::{ConnectionState, Error, Result};

/// Maximum number of transitions kept in history.
pub const MAX_HISTORY_SIZE: usize = 32;

/// Capacity of the lifecycle event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle notification published by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },

    /// The link was torn down (voluntarily or by an unplug).
    Disconnected,

    /// The auto-reconnect sequence restored the link.
    Reconnected {
        /// 1-based attempt that succeeded.
        attempt: u32,
    },

    /// The auto-reconnect sequence gave up.
    ReconnectFailed {
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Record of one state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state transitioned from.
    pub from: ConnectionState,

    /// The state transitioned to.
    pub to: ConnectionState,

    /// When the transition occurred.
    pub at: DateTime<Utc>,
}

impl StateTransition {
    fn new(from: ConnectionState, to: ConnectionState) -> Self {
        Self {
            from,
            to,
            at: Utc::now(),
        }
    }
}

/// Connection state machine with bounded history.
///
/// # Examples
///
/// ```
/// use countlink_core::ConnectionState;
/// use countlink_serial::connection::StateMachine;
///
/// let mut machine = StateMachine::new();
/// machine.transition_to(ConnectionState::Connecting).unwrap();
/// machine.transition_to(ConnectionState::Connected).unwrap();
///
/// assert!(machine.transition_to(ConnectionState::Connecting).is_err());
/// assert_eq!(machine.history().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current_state: ConnectionState,
    history: VecDeque<StateTransition>,
}

impl StateMachine {
    /// Create a machine in the `Disconnected` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn current_state(&self) -> ConnectionState {
        self.current_state
    }

    /// Transitions recorded so far, oldest first.
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Take the edge to `new_state`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if the edge is not part of
    /// the machine. The state is left unchanged.
    pub fn transition_to(&mut self, new_state: ConnectionState) -> Result<StateTransition> {
        if !self.current_state.can_transition_to(new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.current_state.to_string(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.current_state = new_state;

        self.history.push_back(transition.clone());
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        Ok(transition)
    }
}

/// Shared state machine plus event fan-out.
#[derive(Debug)]
pub(crate) struct StateCell {
    machine: Mutex<StateMachine>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            machine: Mutex::new(StateMachine::new()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn current(&self) -> ConnectionState {
        self.lock().current_state()
    }

    pub(crate) fn history(&self) -> Vec<StateTransition> {
        self.lock().history().iter().cloned().collect()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Validate and take an edge, then publish it.
    pub(crate) fn transition(&self, to: ConnectionState) -> Result<StateTransition> {
        let transition = self.lock().transition_to(to)?;
        self.announce(&transition);
        Ok(transition)
    }

    /// Move to `Disconnected` from wherever the machine is.
    ///
    /// Returns `None` if it already was disconnected.
    pub(crate) fn force_disconnected(&self) -> Option<StateTransition> {
        let transition = {
            let mut machine = self.lock();
            if machine.current_state() == ConnectionState::Disconnected {
                return None;
            }
            // Every other state has an edge to Disconnected.
            machine.transition_to(ConnectionState::Disconnected).ok()?
        };
        self.announce(&transition);
        Some(transition)
    }

    fn announce(&self, transition: &StateTransition) {
        if transition.to == ConnectionState::Connected
            || transition.to == ConnectionState::Disconnected
        {
            info!(from = %transition.from, to = %transition.to, "Connection state changed");
        } else {
            debug!(from = %transition.from, to = %transition.to, "Connection state changed");
        }
        self.publish(ConnectionEvent::StateChanged {
            previous: transition.from,
            current: transition.to,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn test_new_machine_starts_disconnected() {
        let machine = StateMachine::new();
        assert_eq!(machine.current_state(), Disconnected);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut machine = StateMachine::new();
        let err = machine.transition_to(Connected).unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidStateTransition { ref from, ref to }
                if from == "Disconnected" && to == "Connected"
        ));
        assert_eq!(machine.current_state(), Disconnected);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut machine = StateMachine::new();
        for _ in 0..MAX_HISTORY_SIZE {
            machine.transition_to(Reconnecting).unwrap();
            machine.transition_to(Disconnected).unwrap();
        }

        assert_eq!(machine.history().len(), MAX_HISTORY_SIZE);
        assert_eq!(machine.history().back().map(|t| t.to), Some(Disconnected));
    }

    #[tokio::test]
    async fn test_cell_publishes_every_transition() {
        let cell = StateCell::new();
        let mut events = cell.subscribe();

        cell.transition(Connecting).unwrap();
        cell.transition(Connected).unwrap();
        assert!(cell.force_disconnected().is_some());
        assert!(cell.force_disconnected().is_none());

        let expected = [
            (Disconnected, Connecting),
            (Connecting, Connected),
            (Connected, Disconnected),
        ];
        for (previous, current) in expected {
            assert_eq!(
                events.recv().await.unwrap(),
                ConnectionEvent::StateChanged { previous, current }
            );
        }
        assert!(events.try_recv().is_err());
        assert_eq!(cell.history().len(), 3);
    }

    #[test]
    fn test_event_serde_shape() {
        let json = serde_json::to_string(&ConnectionEvent::Reconnected { attempt: 2 }).unwrap();
        assert_eq!(json, r#"{"event":"reconnected","attempt":2}"#);
    }
}
