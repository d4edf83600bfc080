//! Connection lifecycle: state machine, events and the manager that owns the link.

mod manager;
mod state;

pub(crate) use manager::Link;
pub use manager::ConnectionManager;
pub use state::{
    ConnectionEvent, EVENT_CHANNEL_CAPACITY, MAX_HISTORY_SIZE, StateMachine, StateTransition,
};
