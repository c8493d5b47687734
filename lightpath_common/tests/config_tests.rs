//! Device definition discovery tests.
//!
//! Tests for `load_device_dir()`: sorted discovery of `*.toml` files,
//! duplicate device detection, malformed files, nested definitions, and
//! resolution of `devices_dir` against the configuration file.

use lightpath_common::config::{ConfigError, LightpathConfig, load_device_dir};
use lightpath_common::schema::{Access, ComponentSchema};
use lightpath_common::value::{Value, ValueKind};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write a one-signal device definition named `name` into `dir/file`.
fn write_device(dir: &Path, file: &str, name: &str) {
    fs::write(
        dir.join(file),
        format!(
            r#"
name = "{name}"

[[components]]
component = "signal"
name = "state"
address = "TST:{name}:STATE"
dtype = "int"
"#
        ),
    )
    .unwrap();
}

#[test]
fn test_devices_load_in_file_name_order() {
    let dir = TempDir::new().unwrap();
    write_device(dir.path(), "20_stopper.toml", "stopper");
    write_device(dir.path(), "10_valve.toml", "valve");
    fs::write(dir.path().join("notes.txt"), "not a device").unwrap();

    let schemas = load_device_dir(dir.path()).unwrap();
    let names: Vec<_> = schemas.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["valve", "stopper"]);
}

#[test]
fn test_duplicate_device_names_rejected() {
    let dir = TempDir::new().unwrap();
    write_device(dir.path(), "a.toml", "valve");
    write_device(dir.path(), "b.toml", "valve");

    let result = load_device_dir(dir.path());
    assert!(
        matches!(&result, Err(ConfigError::ValidationError(msg)) if msg.contains("valve")),
        "got {result:?}"
    );
}

#[test]
fn test_missing_dir_is_file_not_found() {
    let dir = TempDir::new().unwrap();
    let result = load_device_dir(&dir.path().join("absent"));
    assert_eq!(result, Err(ConfigError::FileNotFound));
}

#[test]
fn test_malformed_definition_names_the_file() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("broken.toml"), "name = \"x\"\n[[components]]\ncomponent = \"gizmo\"\n")
        .unwrap();
    match load_device_dir(dir.path()) {
        Err(ConfigError::ParseError(msg)) => assert!(msg.contains("broken.toml")),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn test_nested_definition_with_light_section() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("att.toml"),
        r#"
name = "att"
trigger = { signal = "go", value = 1 }

[light]
z = 12.5
beamline = "TST"
transmission = 0.3
inserted = "IN"
removed = "OUT"

[light.mps]
veto = false
bypass = "bypass"

[[components]]
component = "signal"
name = "state"
address = "TST:ATT:STATE"
dtype = "enum"
enum_strs = ["IN", "OUT"]
stage_value = "IN"

[[components]]
component = "signal"
name = "go"
address = "TST:ATT:GO"
dtype = "int"

[[components]]
component = "signal"
name = "bypass"
address = "TST:ATT:BYP"
dtype = "bool"
access = "read_only"

[[components]]
component = "device"
name = "filter"

[[components.components]]
component = "signal"
name = "thickness"
address = "TST:ATT:F1:THK"
dtype = "float"
units = "um"
"#,
    )
    .unwrap();

    let schemas = load_device_dir(dir.path()).unwrap();
    let att = &schemas[0];
    assert_eq!(att.components.len(), 4);
    assert_eq!(att.trigger.as_ref().unwrap().value, Value::Int(1));

    let light = att.light.as_ref().unwrap();
    assert_eq!(light.state, "state");
    assert_eq!(light.inserted, Value::Str("IN".to_string()));
    assert_eq!(light.mps.as_ref().unwrap().bypass.as_deref(), Some("bypass"));

    match &att.components[2] {
        ComponentSchema::Signal(s) => assert_eq!(s.access, Access::ReadOnly),
        other => panic!("expected signal, got {other:?}"),
    }
    match &att.components[3] {
        ComponentSchema::Device(filter) => match &filter.components[0] {
            ComponentSchema::Signal(s) => {
                assert_eq!(s.dtype, ValueKind::Float);
                assert_eq!(s.units.as_deref(), Some("um"));
            }
            other => panic!("expected signal, got {other:?}"),
        },
        other => panic!("expected device, got {other:?}"),
    }
}

#[test]
fn test_relative_devices_dir_resolves_against_config_file() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("lightpath.toml");
    fs::write(
        &config_path,
        r#"
devices_dir = "devices"

[shared]
service_name = "lightpath-tst"
log_level = "debug"

[defaults]
timeout_s = 2.0
"#,
    )
    .unwrap();

    let config = LightpathConfig::from_file(&config_path).unwrap();
    assert_eq!(config.devices_dir, Some(dir.path().join("devices")));
    assert_eq!(config.defaults.timeout_s, 2.0);
}
