//! Shared helpers for countlink-serial integration tests.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use countlink_serial::mock::{MockHost, MockHostHandle};
use countlink_serial::{Instrument, Options};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route engine logs to the test writer. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Options with no boot delay and short timings, suitable for paused time.
pub fn fast_options() -> Options {
    Options::builder()
        .boot_delay(Duration::ZERO)
        .timeout(Duration::from_millis(200))
        .retry_delay(Duration::from_millis(50))
        .reconnect_delay(Duration::from_millis(100))
        .build()
        .expect("fast options are valid")
}

/// A connected instrument on a fresh mock host.
pub async fn connected(options: Options) -> (Instrument, MockHostHandle) {
    init_tracing();
    let (host, handle) = MockHost::new();
    let instrument = Instrument::new(host, options).expect("options are valid");
    instrument.connect().await.expect("mock connect succeeds");
    (instrument, handle)
}

/// Drain events until `pick` returns `Some`, or give up after `within`.
pub async fn wait_for_event<T>(
    events: &mut broadcast::Receiver<countlink_serial::ConnectionEvent>,
    within: Duration,
    mut pick: impl FnMut(&countlink_serial::ConnectionEvent) -> Option<T>,
) -> Option<T> {
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(&event) {
                        return Some(found);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
