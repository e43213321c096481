//! Writes queued through a running connector

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use fieldlink_core::test_utils::{channel, property, tcp_device, TestHarness, TransportCall};
use fieldlink_core::{
    ConnectionState, Connector, ConnectorError, DataType, EngineConfig, MemoryRepository,
    PropertyValue, RegisterKind, TransportError, WriteFailureMapping, WriteOutcome,
};

fn harness() -> TestHarness {
    TestHarness::new(
        MemoryRepository::new()
            .with_device(tcp_device(1, 1))
            .with_channel(channel(10, 1, Some(3)))
            .with_property(property(100, 10, DataType::Int, true)),
    )
}

fn quiet_config() -> EngineConfig {
    // Ticks far apart so writes are the only traffic
    EngineConfig {
        tick_interval_ms: 60_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn writes_inside_debounce_window_reach_device_once() {
    let h = harness();
    let config = quiet_config();
    let window = config.write_debounce_ms;
    let handle = Connector::new(h.ctx.clone(), config).unwrap().start();

    let first = handle
        .set_expected_and_write(1, 10, 100, PropertyValue::Integer(70_000))
        .await
        .unwrap();
    h.clock.advance(window);
    let second = handle
        .set_expected_and_write(1, 10, 100, PropertyValue::Integer(70_001))
        .await
        .unwrap();

    assert_eq!(first, WriteOutcome::Written);
    assert_eq!(second, WriteOutcome::Debounced);
    assert_eq!(
        h.transport.writes(),
        vec![TransportCall::WriteRegisters {
            unit: 1,
            address: 3,
            values: vec![0x0001, 0x1170],
        }]
    );
    assert_eq!(h.property_state(100).pending, None);

    // Once the window is over the next write goes out
    h.clock.advance(1);
    let third = handle.write_property(1, 10, 100).await.unwrap();
    assert_eq!(third, WriteOutcome::Written);
    assert_eq!(h.transport.writes().len(), 2);
    assert_eq!(h.transport.word(1, RegisterKind::Holding, 4), 0x1171);

    handle.disconnect().await.unwrap();
}

#[tokio::test]
async fn failed_write_can_be_retried_immediately() {
    let h = harness();
    let handle = Connector::new(h.ctx.clone(), quiet_config())
        .unwrap()
        .start();

    h.transport
        .fail_next(TransportError::connection("connection refused"));
    let err = handle
        .set_expected_and_write(1, 10, 100, PropertyValue::Integer(5))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Transport(_)));
    assert_eq!(h.property_state(100).pending, None);

    let retry = handle.write_property(1, 10, 100).await.unwrap();
    assert_eq!(retry, WriteOutcome::Written);

    handle.disconnect().await.unwrap();
}

#[tokio::test]
async fn rejected_write_maps_to_device_state() {
    let h = harness();
    let config = EngineConfig {
        write_failure_mapping: WriteFailureMapping::http(),
        ..quiet_config()
    };
    let handle = Connector::new(h.ctx.clone(), config).unwrap().start();

    h.transport.fail_writes(TransportError::Rejected {
        status: 503,
        message: "service unavailable".to_string(),
    });
    handle
        .set_expected_and_write(1, 10, 100, PropertyValue::Integer(1))
        .await
        .unwrap_err();
    // A later tick may already have reconnected the device
    assert!(h.queue.device_states(1).contains(&ConnectionState::Lost));

    handle.disconnect().await.unwrap();
}

#[tokio::test]
async fn connector_restarts_over_same_context() {
    let h = harness();
    let handle = Connector::new(h.ctx.clone(), quiet_config())
        .unwrap()
        .start();
    let ctx = h.ctx.clone();
    handle.disconnect().await.unwrap();
    assert_eq!(h.device_state(1), ConnectionState::Disconnected);

    let handle = Connector::new(ctx, quiet_config()).unwrap().start();
    assert!(!handle.is_closed());
    handle.disconnect().await.unwrap();
    assert!(h.transport.writes().is_empty());
}
