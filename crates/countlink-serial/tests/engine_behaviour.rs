//! End-to-end behaviour of the instrument engine against the mock host.
//!
//! All tests run on paused time, so the timing assertions are exact.

mod common;

use std::time::Duration;

use countlink_serial::mock::MockReply;
use countlink_serial::{ConnectionEvent, ConnectionState, Error, ErrorKind, Instrument, Options};
use rstest::rstest;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_concurrent_commands_are_spaced_by_rate_limit() {
    let options = Options {
        rate_limit_ms: 100,
        ..common::fast_options()
    };
    let (instrument, handle) = common::connected(options).await;
    let start = Instant::now();

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let instrument = instrument.clone();
            tokio::spawn(async move { instrument.window().await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 25);
    }

    let writes = handle.writes();
    assert_eq!(writes.len(), 5);
    for pair in writes.windows(2) {
        assert!(pair[1].at - pair[0].at >= Duration::from_millis(100));
    }
    assert!(start.elapsed() >= Duration::from_millis(400));
}

#[tokio::test(start_paused = true)]
async fn test_transient_silence_is_retried() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    handle.push_reply(MockReply::Silent);
    handle.push_reply(MockReply::Silent);

    assert_eq!(instrument.window().await.unwrap(), 25);
    assert_eq!(handle.write_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_return_timeout() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    for _ in 0..3 {
        handle.push_reply(MockReply::Silent);
    }

    let err = instrument.send_command("COUNTS?").await.unwrap_err();
    assert!(matches!(err, Error::CommandTimeout { ref command, .. } if command == "COUNTS?"));
    assert_eq!(handle.write_count(), 3);
}

#[rstest]
#[case::garbage_window("abc", true)]
#[case::rejected_reset("ERR 1", false)]
#[tokio::test(start_paused = true)]
async fn test_invalid_responses_make_one_attempt(#[case] reply: &str, #[case] query_window: bool) {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    handle.push_reply(MockReply::Line(reply.to_string()));

    let result = if query_window {
        instrument.window().await.map(|_| ())
    } else {
        instrument.reset().await
    };
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidResponse);
    assert_eq!(handle.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_not_connected_is_not_retried() {
    common::init_tracing();
    let (host, handle) = countlink_serial::mock::MockHost::new();
    let options = Options {
        auto_reconnect: false,
        ..common::fast_options()
    };
    let instrument = Instrument::new(host, options).unwrap();

    let err = instrument.send_command("*IDN?").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
    assert_eq!(handle.write_count(), 0);
    assert_eq!(handle.authorized_queries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unplug_then_replug_reconnects() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    let mut events = instrument.subscribe();

    handle.unplug();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.plug_in();

    let attempt = common::wait_for_event(&mut events, Duration::from_secs(5), |event| match event {
        ConnectionEvent::Reconnected { attempt } => Some(*attempt),
        _ => None,
    })
    .await
    .expect("reconnected");

    assert!((1..=3).contains(&attempt));
    assert_eq!(instrument.state(), ConnectionState::Connected);
    assert_eq!(instrument.window().await.unwrap(), 25);
}

#[tokio::test(start_paused = true)]
async fn test_unplug_without_device_gives_up_after_bounded_attempts() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    let mut events = instrument.subscribe();

    handle.unplug();

    let attempts = common::wait_for_event(&mut events, Duration::from_secs(5), |event| match event {
        ConnectionEvent::ReconnectFailed { attempts } => Some(*attempts),
        _ => None,
    })
    .await
    .expect("reconnect failure reported");

    assert_eq!(attempts, 3);
    assert_eq!(handle.authorized_queries(), 3);
    assert_eq!(instrument.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_unplug_publishes_disconnected_first() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    let mut events = instrument.subscribe();

    handle.unplug();

    let first = common::wait_for_event(&mut events, Duration::from_secs(1), |event| match event {
        ConnectionEvent::Disconnected => Some(true),
        ConnectionEvent::Reconnected { .. } | ConnectionEvent::ReconnectFailed { .. } => {
            Some(false)
        }
        _ => None,
    })
    .await;
    assert_eq!(first, Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_command_while_disconnected_triggers_reconnect() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    instrument.disconnect().await.unwrap();
    assert!(!instrument.is_connected());
    let opens = handle.open_count();

    assert_eq!(instrument.window().await.unwrap(), 25);
    assert!(instrument.is_connected());
    assert_eq!(handle.open_count(), opens + 1);
}

#[tokio::test(start_paused = true)]
async fn test_counts_follow_configured_rates() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    handle.set_rates(vec![1000.0, 2000.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    instrument.read_counts().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let reading = instrument.read_counts().await.unwrap();

    let a = reading.count(0).unwrap();
    let b = reading.count(1).unwrap();
    assert!((900..=1100).contains(&a), "channel 0 counted {a}");
    assert!((1800..=2200).contains(&b), "channel 1 counted {b}");
    assert_eq!(reading.count(2), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_queued_commands_survive_unplug() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    handle.set_response_delay(Duration::from_millis(50));

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let instrument = instrument.clone();
            tokio::spawn(async move { instrument.window().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.unplug();
    handle.plug_in();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), 25);
    }
    assert_eq!(instrument.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_auto_reconnect() {
    let (instrument, handle) = common::connected(common::fast_options()).await;
    let mut events = instrument.subscribe();

    handle.unplug();
    tokio::time::sleep(Duration::from_millis(10)).await;
    instrument.disconnect().await.unwrap();
    handle.plug_in();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(instrument.state(), ConnectionState::Disconnected);
    assert_eq!(handle.open_count(), 1);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ConnectionEvent::Reconnected { .. }));
    }
}

#[tokio::test(start_paused = true)]
async fn test_command_during_connect_waits_for_it() {
    common::init_tracing();
    let options = Options {
        boot_delay_ms: 300,
        ..common::fast_options()
    };
    let (host, handle) = countlink_serial::mock::MockHost::new();
    let instrument = Instrument::new(host, options).unwrap();

    let connecting = {
        let instrument = instrument.clone();
        tokio::spawn(async move { instrument.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(instrument.window().await.unwrap(), 25);
    connecting.await.unwrap().unwrap();

    assert_eq!(handle.open_count(), 1);
    assert!(
        instrument
            .history()
            .iter()
            .all(|t| t.to != ConnectionState::Reconnecting)
    );
}

#[tokio::test(start_paused = true)]
async fn test_explicit_connect_during_backoff_ends_sequence() {
    let (instrument, handle) = common::connected(common::fast_options()).await;

    handle.unplug();
    handle.plug_in();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(instrument.state(), ConnectionState::Disconnected);

    instrument.connect().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(instrument.state(), ConnectionState::Connected);
    assert_eq!(handle.open_count(), 2);
    assert!(
        instrument
            .history()
            .iter()
            .all(|t| t.to != ConnectionState::Reconnecting)
    );
}
