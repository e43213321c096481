#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::io::Write;

use fieldlink_core::{DeviceConfigRepository, RegisterKind};
use linksrv::{LinksrvConfig, LinksrvError};
use tempfile::NamedTempFile;

fn write_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn parse(yaml: &str) -> LinksrvConfig {
    serde_yaml::from_str(yaml).unwrap()
}

// ========== Loading tests ==========

#[test]
fn shipped_config_loads_and_validates() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/linksrv.yaml");
    let config = LinksrvConfig::load(path).unwrap();

    assert_eq!(config.devices.len(), 2);
    assert_eq!(config.disabled_devices().collect::<Vec<_>>(), vec![2]);
    assert_eq!(config.engine.read_max_attempts, 5);

    let warnings = config.validate().unwrap();
    assert!(warnings.is_empty(), "{:?}", warnings);
}

#[test]
fn toml_file_with_defaults() {
    let file = write_config(
        ".toml",
        r#"
[service]
name = "linksrv-test"

[[devices]]
id = 7
identifier = "meter"
address = { kind = "station", unit = 4 }

[[devices.channels]]
id = 70
identifier = "energy"
address = 100

[[devices.channels.properties]]
id = 700
identifier = "value"
data_type = "uint"
"#,
    );

    let config = LinksrvConfig::load(file.path()).unwrap();
    assert_eq!(config.service.name, "linksrv-test");
    assert_eq!(config.service.event_queue_size, 1024);
    assert_eq!(config.engine.tick_interval_ms, 10);
    assert_eq!(config.logging.level, "info");

    let repository = config.to_repository();
    let device = repository.device(7).unwrap();
    assert_eq!(device.address.unwrap().unit(), 4);
    assert_eq!(repository.property(700).unwrap().channel, 70);
}

#[test]
fn missing_file_is_an_error() {
    let result = LinksrvConfig::load("/nonexistent/linksrv.yaml");
    assert!(matches!(result, Err(LinksrvError::Config(_))));
}

// ========== Validation tests ==========

#[test]
fn duplicate_ids_are_rejected() {
    let duplicate_device = parse(
        r#"
devices:
  - { id: 1, identifier: a }
  - { id: 1, identifier: b }
"#,
    );
    assert!(matches!(
        duplicate_device.validate(),
        Err(LinksrvError::DuplicateDevice(1))
    ));

    let duplicate_channel = parse(
        r#"
devices:
  - id: 1
    identifier: a
    channels:
      - { id: 5, identifier: x, properties: [{ id: 50, identifier: v, data_type: ushort }] }
  - id: 2
    identifier: b
    channels:
      - { id: 5, identifier: y, properties: [{ id: 51, identifier: v, data_type: ushort }] }
"#,
    );
    assert!(matches!(
        duplicate_channel.validate(),
        Err(LinksrvError::DuplicateChannel(5))
    ));

    let duplicate_property = parse(
        r#"
devices:
  - id: 1
    identifier: a
    channels:
      - { id: 5, identifier: x, properties: [{ id: 50, identifier: v, data_type: ushort }] }
      - { id: 6, identifier: y, properties: [{ id: 50, identifier: w, data_type: ushort }] }
"#,
    );
    assert!(matches!(
        duplicate_property.validate(),
        Err(LinksrvError::DuplicateProperty(50))
    ));
}

#[test]
fn invalid_engine_settings_are_rejected() {
    let config = parse("engine:\n  tick_interval_ms: 0\n");
    assert!(matches!(config.validate(), Err(LinksrvError::Connector(_))));
}

#[test]
fn overlapping_registers_warn() {
    let config = parse(
        r#"
devices:
  - id: 1
    identifier: meter
    address: { kind: ip, host: 127.0.0.1, port: 502 }
    channels:
      - { id: 10, identifier: power, address: 0, properties: [{ id: 100, identifier: v, data_type: float }] }
      - { id: 11, identifier: status, address: 1, properties: [{ id: 110, identifier: v, data_type: ushort }] }
      - { id: 12, identifier: alarm, address: 0, properties: [{ id: 120, identifier: v, data_type: boolean }] }
"#,
    );

    let warnings = config.validate().unwrap();
    assert_eq!(warnings.len(), 1, "{:?}", warnings);
    assert!(warnings[0].contains("meter/status"));
    assert!(warnings[0].contains("power"));
}

#[test]
fn unpollable_channels_warn() {
    let config = parse(
        r#"
devices:
  - id: 1
    identifier: meter
    channels:
      - { id: 10, identifier: floating, properties: [{ id: 100, identifier: v, data_type: ushort }] }
      - { id: 11, identifier: label, address: 4, properties: [{ id: 110, identifier: v, data_type: string }] }
"#,
    );

    let warnings = config.validate().unwrap();
    assert_eq!(warnings.len(), 3, "{:?}", warnings);
    assert!(warnings[0].contains("no address and will be stopped"));
    assert!(warnings[1].contains("meter/floating"));
    assert!(warnings[2].contains("meter/label"));
}

#[test]
fn register_kind_override_is_kept() {
    let config = parse(
        r#"
devices:
  - id: 1
    identifier: plc
    channels:
      - id: 10
        identifier: mode
        address: 3
        register_kind: holding
        properties: [{ id: 100, identifier: v, data_type: ushort }]
"#,
    );

    let channel = config.to_repository().channel(10).unwrap();
    assert_eq!(channel.register_kind, Some(RegisterKind::Holding));
}
