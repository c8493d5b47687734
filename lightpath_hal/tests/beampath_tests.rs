//! Beam path analysis tests.
//!
//! A simulated beamline of valves, a stopper, an intensity monitor and a
//! branching crystal, driven through the simulated transport.

use lightpath_hal::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Option<Duration> = Some(Duration::from_secs(2));

const INSERTED: i64 = 0;
const REMOVED: i64 = 1;
const UNKNOWN: i64 = 2;

#[derive(Clone, Copy)]
enum Role {
    Valve,
    Stopper,
    Monitor,
    Crystal(&'static str),
}

fn address(name: &str) -> String {
    format!("TST:{}:STATE", name.to_uppercase())
}

fn light_device(
    sim: &Arc<SimTransport>,
    name: &str,
    z: f64,
    beamline: &str,
    role: Role,
) -> Arc<LightDevice> {
    sim.add_channel(&address(name), REMOVED);
    let base = LightSchema::new(z, beamline, "IN", "OUT");
    let light = match role {
        Role::Valve => base.with_mps(MpsSchema::default()),
        Role::Stopper => base.with_mps(MpsSchema {
            veto: true,
            bypass: None,
        }),
        Role::Monitor => base.with_transmission(0.6).with_mps(MpsSchema::default()),
        Role::Crystal(branch) => base.with_branch(branch),
    };
    let schema = DeviceSchema::new(name)
        .with_signal(
            SignalSchema::new("state", address(name), ValueKind::Enum)
                .with_enum_strs(["IN", "OUT", "UNKNOWN"]),
        )
        .with_light(light);
    let device = DeviceBuilder::new(sim.clone())
        .build_light(&schema)
        .expect("build light device");
    assert!(device.device().connect(Duration::from_secs(1)).wait(WAIT).is_success());
    Arc::new(device)
}

fn beamline(sim: &Arc<SimTransport>, path: &str, downstream: &str) -> BeamPath {
    // Deliberately out of z order.
    let devices = vec![
        light_device(sim, "six", 30.0, downstream, Role::Valve),
        light_device(sim, "zero", 0.0, "TST", Role::Valve),
        light_device(sim, "four", 16.0, "TST", Role::Crystal("SIM")),
        light_device(sim, "one", 2.0, "TST", Role::Valve),
        light_device(sim, "two", 9.0, "TST", Role::Stopper),
        light_device(sim, "five", 24.0, downstream, Role::Monitor),
        light_device(sim, "three", 15.0, "TST", Role::Valve),
    ];
    BeamPath::new(path, devices)
}

fn set_state(sim: &SimTransport, name: &str, state: i64) {
    sim.inject(&address(name), state);
    sim.flush();
}

fn names(devices: &[Arc<LightDevice>]) -> Vec<String> {
    devices.iter().map(|d| d.name().to_string()).collect()
}

#[test]
fn test_devices_are_sorted_by_z() {
    let sim = Arc::new(SimTransport::new());
    let path = beamline(&sim, "TST", "TST");
    assert_eq!(
        names(path.devices()),
        vec!["zero", "one", "two", "three", "four", "five", "six"]
    );
    assert_eq!(path.range(), Some((0.0, 30.0)));
    assert_eq!(BeamPath::new("EMPTY", Vec::new()).range(), None);
}

#[test]
fn test_removed_devices_clear_the_path() {
    let sim = Arc::new(SimTransport::new());
    let path = beamline(&sim, "TST", "TST");
    assert!(path.cleared());
    assert!(path.blocking_devices().is_empty());
    assert!(path.impediment().is_none());
    assert!(path.incident_devices().is_empty());
}

#[test]
fn test_first_blocking_device_is_the_impediment() {
    let sim = Arc::new(SimTransport::new());
    let path = beamline(&sim, "TST", "TST");
    set_state(&sim, "three", INSERTED);
    set_state(&sim, "six", INSERTED);

    assert_eq!(names(&path.blocking_devices()), vec!["three", "six"]);
    assert_eq!(path.impediment().unwrap().name(), "three");
    assert_eq!(names(&path.incident_devices()), vec!["three"]);
    assert!(!path.cleared());
}

#[test]
fn test_transmissive_devices_do_not_block() {
    let sim = Arc::new(SimTransport::new());
    let path = beamline(&sim, "TST", "TST");
    set_state(&sim, "five", INSERTED);
    assert!(path.cleared());
    assert_eq!(names(&path.incident_devices()), vec!["five"]);

    let strict = path.clone().with_config(&BeamPathConfig {
        minimum_transmission: 0.7,
    });
    assert_eq!(strict.impediment().unwrap().name(), "five");
}

#[test]
fn test_unknown_state_blocks() {
    let sim = Arc::new(SimTransport::new());
    let path = beamline(&sim, "TST", "TST");
    set_state(&sim, "one", UNKNOWN);
    let one = path.impediment().unwrap();
    assert_eq!(one.name(), "one");
    assert_eq!(one.state(), LightState::Unknown);
}

#[test]
fn test_branching_device_routes_beam() {
    let sim = Arc::new(SimTransport::new());
    let main = beamline(&sim, "TST", "TST");
    let crystal = main.devices()[4].clone();
    assert_eq!(crystal.name(), "four");
    let branch = BeamPath::new("SIM", main.devices().to_vec());

    assert_eq!(crystal.destination(), vec!["TST"]);
    assert!(main.cleared());
    assert_eq!(branch.impediment().unwrap().name(), "four");

    set_state(&sim, "four", INSERTED);
    assert_eq!(crystal.destination(), vec!["SIM"]);
    assert_eq!(main.impediment().unwrap().name(), "four");
    assert!(branch.cleared());

    set_state(&sim, "four", UNKNOWN);
    assert_eq!(crystal.destination(), vec!["TST", "SIM"]);
    assert!(main.cleared());
    assert!(branch.cleared());
}

#[test]
fn test_tripped_devices_respect_upstream_veto() {
    let sim = Arc::new(SimTransport::new());
    let path = beamline(&sim, "TST", "TST");
    set_state(&sim, "one", INSERTED);
    set_state(&sim, "six", INSERTED);
    assert_eq!(names(&path.tripped_devices()), vec!["one", "six"]);

    set_state(&sim, "two", INSERTED);
    let stopper = path.devices()[2].clone();
    assert!(stopper.veto_capable());
    assert!(!stopper.mps_faulted());
    assert_eq!(names(&path.veto_devices()), vec!["two"]);
    assert_eq!(names(&path.tripped_devices()), vec!["one"]);
}

#[test]
fn test_bypassed_device_is_not_faulted() {
    let sim = Arc::new(SimTransport::new().with_channel("TST:VALVE:BYPASS", true));
    sim.add_channel("TST:VALVE:STATE", INSERTED);
    let light = LightSchema::new(5.0, "TST", "IN", "OUT").with_mps(MpsSchema {
        veto: false,
        bypass: Some("bypass".to_string()),
    });
    let schema = DeviceSchema::new("valve")
        .with_signal(
            SignalSchema::new("state", "TST:VALVE:STATE", ValueKind::Enum)
                .with_enum_strs(["IN", "OUT"]),
        )
        .with_signal(SignalSchema::new("bypass", "TST:VALVE:BYPASS", ValueKind::Bool))
        .with_light(light);
    let valve = DeviceBuilder::new(sim.clone()).build_light(&schema).unwrap();
    assert!(valve.device().connect(Duration::from_secs(1)).wait(WAIT).is_success());

    assert!(valve.inserted());
    assert!(valve.bypassed());
    assert!(!valve.mps_faulted());

    sim.inject("TST:VALVE:BYPASS", false);
    sim.flush();
    assert!(valve.mps_faulted());
}

#[test]
fn test_clear_removes_blocking_devices() {
    let sim = Arc::new(SimTransport::new());
    let path = beamline(&sim, "TST", "TST");
    for name in ["one", "three", "four", "five"] {
        set_state(&sim, name, INSERTED);
    }

    let status = path.clear(Some(Duration::from_secs(1)), false, &[]).unwrap();
    assert_eq!(status.wait(WAIT), Outcome::Success);
    assert!(path.cleared());
    // Transmissive devices stay unless the clear is passive.
    assert!(path.devices()[5].inserted());

    let status = path.clear(Some(Duration::from_secs(1)), true, &[]).unwrap();
    assert_eq!(status.wait(WAIT), Outcome::Success);
    assert!(path.devices().iter().all(|d| d.removed()));
}

#[test]
fn test_clear_inserts_branch_optic_and_honors_ignore() {
    let sim = Arc::new(SimTransport::new());
    let branch = beamline(&sim, "SIM", "SIM");
    set_state(&sim, "three", INSERTED);

    let status = branch.clear(None, false, &["three"]).unwrap();
    assert_eq!(status.wait(WAIT), Outcome::Success);
    assert!(branch.devices()[4].inserted());
    assert_eq!(branch.impediment().unwrap().name(), "three");

    let status = branch.clear(None, false, &[]).unwrap();
    assert_eq!(status.wait(WAIT), Outcome::Success);
    assert!(branch.cleared());
}

#[test]
fn test_split_and_join() {
    let sim = Arc::new(SimTransport::new());
    let path = beamline(&sim, "TST", "TST");
    let (upstream, downstream) = path.split(15.0);
    assert_eq!(upstream.name(), "TST_upstream");
    assert_eq!(names(upstream.devices()), vec!["zero", "one", "two", "three"]);
    assert_eq!(names(downstream.devices()), vec!["four", "five", "six"]);

    let joined = downstream.join(&upstream).join(&path);
    assert_eq!(joined.devices().len(), 7);
    assert_eq!(joined.devices()[0].name(), "zero");
}

#[test]
fn test_light_definitions_are_checked() {
    let sim = Arc::new(SimTransport::new());
    let builder = DeviceBuilder::new(sim.clone());
    let state = SignalSchema::new("state", "X:STATE", ValueKind::Enum).with_enum_strs(["IN", "OUT"]);

    let missing_light = DeviceSchema::new("v").with_signal(state.clone());
    assert!(matches!(
        builder.build_light(&missing_light),
        Err(HalError::Schema { .. })
    ));

    let missing_state = DeviceSchema::new("v")
        .with_signal(SignalSchema::new("pos", "X:POS", ValueKind::Float))
        .with_light(LightSchema::new(1.0, "TST", "IN", "OUT"));
    assert!(matches!(
        builder.build_light(&missing_state),
        Err(HalError::Schema { .. })
    ));

    let bad_states = DeviceSchema::new("v")
        .with_signal(state)
        .with_light(LightSchema::new(1.0, "TST", "IN", "HALF"));
    assert!(matches!(
        builder.build_light(&bad_states),
        Err(HalError::Schema { reason, .. }) if reason.contains("removed state")
    ));
}
