//! Mock host and instrument for testing without hardware.

mod host;
mod instrument;

pub use host::{MockHost, MockHostHandle, MockPort};
pub use instrument::{MOCK_DEFAULT_WINDOW_NS, MOCK_IDENTITY, MockReply, WriteRecord};
