//! Configuration document tests.
//!
//! Tests for `DaqConfig`: section defaults, simulated board lists,
//! waveform tables, unknown field rejection and semantic validation.

use daqhat_common::board::BoardModel;
use daqhat_common::config::{ConfigError, ConfigLoader, DaqConfig, LogLevel, Waveform};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_config(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("daqhat.toml");
    fs::write(&path, content).unwrap();
    path
}

// ─── Tests ──────────────────────────────────────────────────────────

/// Test: an empty document yields the built-in defaults.
#[test]
fn empty_document_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(tmp.path(), "");

    let config = DaqConfig::load(&path).expect("should load");
    assert!(config.validate().is_ok());
    assert_eq!(config.shared.service_name, "daqhat");
    assert_eq!(config.shared.log_level, LogLevel::Info);
    assert_eq!(config.bus.lock_timeout_ms, 5_000);
    assert_eq!(config.bus.lock_file, PathBuf::from("/tmp/.mcc_spi_lockfile"));
    assert_eq!(config.scan.sync_timeout_ms, 10_000);
    assert!(config.simulation.boards.is_empty());
}

/// Test: full document with simulated boards and waveforms.
#[test]
fn full_document_loads() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        tmp.path(),
        r#"
[shared]
log_level = "debug"
service_name = "bench-rig"

[bus]
lock_file = "/run/daqhat.lock"
lock_timeout_ms = 250
address_pins = [5, 6, 7]

[scan]
sync_timeout_ms = 2000
trigger_poll_us = 200

[[simulation.boards]]
address = 0
model = "mcc118"
waveforms = [
    { kind = "constant", volts = 1.25 },
    { kind = "ramp", start = -5.0, slope = 0.5 },
]

[[simulation.boards]]
address = 4
model = "mcc172"
waveforms = [{ kind = "sine", amplitude = 2.0, frequency = 50.0 }]
calibration = [{ slope = 1.001, offset = -3.0 }]
"#,
    );

    let config = DaqConfig::load_or_default(Some(&path)).expect("should load");
    assert_eq!(config.shared.log_level, LogLevel::Debug);
    assert_eq!(config.bus.address_pins, vec![5, 6, 7]);
    assert_eq!(config.scan.sync_timeout_ms, 2_000);
    // Unset fields in a present section still default.
    assert_eq!(config.scan.sync_poll_us, 1_000);

    assert_eq!(config.simulation.boards.len(), 2);
    let first = &config.simulation.boards[0];
    assert_eq!(first.model, BoardModel::Mcc118);
    assert_eq!(first.waveforms[0], Waveform::Constant { volts: 1.25 });
    let second = &config.simulation.boards[1];
    assert_eq!(second.model, BoardModel::Mcc172);
    assert!(matches!(
        second.waveforms[0],
        Waveform::Sine { offset, .. } if offset == 0.0
    ));
    assert_eq!(second.calibration[0].slope, 1.001);
}

/// Test: unknown fields are rejected (deny_unknown_fields).
#[test]
fn unknown_field_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        tmp.path(),
        r#"
[bus]
lock_timeout_ms = 100
bogus_field = "should fail"
"#,
    );

    assert!(matches!(
        DaqConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

/// Test: unknown board model is rejected at parse time.
#[test]
fn unknown_model_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        tmp.path(),
        r#"
[[simulation.boards]]
address = 0
model = "mcc999"
"#,
    );

    assert!(matches!(
        DaqConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

/// Test: duplicate simulated addresses fail validation.
#[test]
fn duplicate_address_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        tmp.path(),
        r#"
[[simulation.boards]]
address = 2
model = "mcc118"

[[simulation.boards]]
address = 2
model = "mcc128"
"#,
    );

    let result = DaqConfig::load_or_default(Some(&path));
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

/// Test: address beyond the bus range fails validation.
#[test]
fn out_of_range_address_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        tmp.path(),
        r#"
[[simulation.boards]]
address = 8
model = "mcc118"
"#,
    );

    let result = DaqConfig::load_or_default(Some(&path));
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

/// Test: more waveforms than channels fails validation.
#[test]
fn too_many_waveforms_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        tmp.path(),
        r#"
[[simulation.boards]]
address = 0
model = "mcc172"
waveforms = [
    { kind = "constant", volts = 0.0 },
    { kind = "constant", volts = 0.0 },
    { kind = "constant", volts = 0.0 },
]
"#,
    );

    let result = DaqConfig::load_or_default(Some(&path));
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

/// Test: pin list must match the address line count.
#[test]
fn wrong_pin_count_rejected() {
    let tmp = TempDir::new().unwrap();
    let path = write_config(
        tmp.path(),
        r#"
[bus]
address_pins = [12, 13]
"#,
    );

    let result = DaqConfig::load_or_default(Some(&path));
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

/// Test: no path means defaults.
#[test]
fn missing_path_means_defaults() {
    let config = DaqConfig::load_or_default(None).unwrap();
    assert_eq!(config.bus.address_pins, vec![12, 13, 26]);
}
