//! Beam path model.
//!
//! A [`LightDevice`] is a built [`Device`] with beamline metadata: where it
//! sits (`z`), which beamline it belongs to, how much beam passes when it is
//! inserted, and for branching optics which beamlines it can send beam to.
//! A [`BeamPath`] orders light devices along `z` and answers whether beam
//! reaches the end of the path, which device stops it, and which devices
//! would trip machine protection.

use crate::builder::schema_error;
use crate::device::Device;
use crate::error::HalError;
use crate::signal::Signal;
use crate::status::Status;
use crate::sync::combine;
use lightpath_common::config::BeamPathConfig;
use lightpath_common::schema::LightSchema;
use lightpath_common::value::{Value, ValueKind};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Insertion state of a light device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightState {
    /// In the beam.
    Inserted,
    /// Out of the beam.
    Removed,
    /// Neither, or not readable.
    Unknown,
}

/// A device on a beamline.
#[derive(Debug)]
pub struct LightDevice {
    device: Arc<Device>,
    state: Arc<Signal>,
    z: f64,
    beamline: String,
    transmission: f64,
    branches: Vec<String>,
    inserted: Value,
    removed: Value,
    mps: Option<Mps>,
}

#[derive(Debug)]
struct Mps {
    veto: bool,
    bypass: Option<Arc<Signal>>,
}

impl LightDevice {
    /// Attach beamline metadata to a built device.
    ///
    /// # Errors
    /// `HalError::Schema` if the state or bypass component is missing or of
    /// the wrong shape, the inserted/removed values are not valid states,
    /// or the numeric metadata is out of range.
    pub fn new(device: Arc<Device>, light: &LightSchema) -> Result<LightDevice, HalError> {
        let path = device.name().to_string();
        let state = device
            .signal(&light.state)
            .cloned()
            .ok_or_else(|| schema_error(&path, format!("no state signal '{}'", light.state)))?;
        if !state.is_writable() {
            return Err(schema_error(
                &path,
                format!("state signal '{}' is read-only", light.state),
            ));
        }
        let normalize = |value: &Value, role: &str| {
            state
                .spec()
                .validate(value)
                .map_err(|e| schema_error(&path, format!("{role} state {value}: {e}")))
        };
        let inserted = normalize(&light.inserted, "inserted")?;
        let removed = normalize(&light.removed, "removed")?;
        if inserted == removed {
            return Err(schema_error(&path, "inserted and removed states are equal"));
        }

        if !light.z.is_finite() {
            return Err(schema_error(&path, format!("invalid z {}", light.z)));
        }
        if !(0.0..=1.0).contains(&light.transmission) {
            return Err(schema_error(
                &path,
                format!("transmission {} outside [0, 1]", light.transmission),
            ));
        }
        if light.branches.len() == 1 {
            return Err(schema_error(&path, "a branching device needs two branches"));
        }

        let mps = match &light.mps {
            Some(mps) => {
                let bypass = match &mps.bypass {
                    Some(name) => {
                        let signal = device.signal(name).cloned().ok_or_else(|| {
                            schema_error(&path, format!("no bypass signal '{name}'"))
                        })?;
                        if signal.spec().kind != ValueKind::Bool {
                            return Err(schema_error(
                                &path,
                                format!("bypass signal '{name}' is not a bool"),
                            ));
                        }
                        Some(signal)
                    }
                    None => None,
                };
                Some(Mps {
                    veto: mps.veto,
                    bypass,
                })
            }
            None => None,
        };

        Ok(LightDevice {
            device,
            state,
            z: light.z,
            beamline: light.beamline.clone(),
            transmission: light.transmission,
            branches: light.branches.clone(),
            inserted,
            removed,
            mps,
        })
    }

    /// Underlying device.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Device name.
    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// Position along the beamline.
    pub fn z(&self) -> f64 {
        self.z
    }

    /// Beamline the device sits on.
    pub fn beamline(&self) -> &str {
        &self.beamline
    }

    /// Fraction of beam passed when inserted.
    pub fn transmission(&self) -> f64 {
        self.transmission
    }

    /// Beamlines a branching device can send beam to.
    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    /// Whether the device redirects beam instead of attenuating it.
    pub fn is_branching(&self) -> bool {
        !self.branches.is_empty()
    }

    /// Current insertion state from the cached state value.
    pub fn state(&self) -> LightState {
        match self.state.read() {
            Ok(value) if self.state.spec().matches(&self.inserted, &value) => LightState::Inserted,
            Ok(value) if self.state.spec().matches(&self.removed, &value) => LightState::Removed,
            _ => LightState::Unknown,
        }
    }

    /// Whether the device is in the beam.
    pub fn inserted(&self) -> bool {
        self.state() == LightState::Inserted
    }

    /// Whether the device is out of the beam.
    pub fn removed(&self) -> bool {
        self.state() == LightState::Removed
    }

    /// Move into the beam.
    ///
    /// # Errors
    /// Validation errors of the state write.
    pub fn insert(&self) -> Result<Status, HalError> {
        self.move_to(&self.inserted)
    }

    /// Move out of the beam.
    ///
    /// # Errors
    /// Validation errors of the state write.
    pub fn remove(&self) -> Result<Status, HalError> {
        self.move_to(&self.removed)
    }

    /// Beamlines receiving beam after this device.
    ///
    /// Branching devices send beam down their second branch when inserted,
    /// their own beamline when removed, and possibly any branch otherwise.
    pub fn destination(&self) -> Vec<String> {
        if !self.is_branching() {
            return vec![self.beamline.clone()];
        }
        match self.state() {
            LightState::Inserted => self.branches[1..2].to_vec(),
            LightState::Removed => vec![self.beamline.clone()],
            LightState::Unknown => self.branches.clone(),
        }
    }

    /// Whether the device can stop beam to protect devices downstream.
    pub fn veto_capable(&self) -> bool {
        self.mps.as_ref().is_some_and(|m| m.veto)
    }

    /// Whether the machine protection fault is bypassed.
    pub fn bypassed(&self) -> bool {
        self.mps
            .as_ref()
            .and_then(|m| m.bypass.as_ref())
            .and_then(|s| s.read().ok())
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Inserted, protected by MPS, not veto capable and not bypassed.
    pub fn mps_faulted(&self) -> bool {
        self.mps.is_some() && self.inserted() && !self.veto_capable() && !self.bypassed()
    }

    fn move_to(&self, value: &Value) -> Result<Status, HalError> {
        self.state
            .write_with_timeout(value.clone(), self.device.timeout())
    }
}

/// Light devices ordered along a beamline.
#[derive(Debug, Clone)]
pub struct BeamPath {
    name: String,
    devices: Vec<Arc<LightDevice>>,
    minimum_transmission: f64,
}

impl BeamPath {
    /// Path named after the beamline it ends on, sorted by `z`.
    pub fn new(name: impl Into<String>, mut devices: Vec<Arc<LightDevice>>) -> Self {
        devices.sort_by(|a, b| a.z.total_cmp(&b.z));
        let name = name.into();
        debug!("Beam path '{}' with {} devices", name, devices.len());
        Self {
            name,
            devices,
            minimum_transmission: BeamPathConfig::default().minimum_transmission,
        }
    }

    /// Apply analysis settings.
    pub fn with_config(mut self, config: &BeamPathConfig) -> Self {
        self.minimum_transmission = config.minimum_transmission;
        self
    }

    /// Path name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Devices ordered by `z`.
    pub fn devices(&self) -> &[Arc<LightDevice>] {
        &self.devices
    }

    /// `z` of the first and last device.
    pub fn range(&self) -> Option<(f64, f64)> {
        Some((self.devices.first()?.z, self.devices.last()?.z))
    }

    /// Devices currently stopping beam from reaching the end of the path.
    pub fn blocking_devices(&self) -> Vec<Arc<LightDevice>> {
        self.devices
            .iter()
            .filter(|d| self.blocks(d))
            .cloned()
            .collect()
    }

    /// Most upstream blocking device.
    pub fn impediment(&self) -> Option<Arc<LightDevice>> {
        self.devices.iter().find(|d| self.blocks(d)).cloned()
    }

    /// Whether beam reaches the end of the path.
    pub fn cleared(&self) -> bool {
        self.impediment().is_none()
    }

    /// Inserted devices the beam reaches, the impediment included.
    pub fn incident_devices(&self) -> Vec<Arc<LightDevice>> {
        let limit = self.impediment().map_or(f64::INFINITY, |d| d.z);
        self.devices
            .iter()
            .filter(|d| d.z <= limit && d.inserted())
            .cloned()
            .collect()
    }

    /// Devices able to stop beam for machine protection.
    pub fn veto_devices(&self) -> Vec<Arc<LightDevice>> {
        self.devices
            .iter()
            .filter(|d| d.veto_capable())
            .cloned()
            .collect()
    }

    /// Faulted devices without an inserted veto device upstream.
    pub fn tripped_devices(&self) -> Vec<Arc<LightDevice>> {
        let vetoes = self.veto_devices();
        self.devices
            .iter()
            .filter(|d| d.mps_faulted())
            .filter(|d| !vetoes.iter().any(|v| v.z < d.z && v.inserted()))
            .cloned()
            .collect()
    }

    /// Move devices so beam reaches the end of the path.
    ///
    /// Blocking devices are removed, or for branching devices whose branches
    /// include this path, inserted or removed to route beam here. With
    /// `passive`, every inserted non-branching device is removed as well.
    /// Devices named in `ignore` are left alone.
    ///
    /// # Errors
    /// Validation errors of the state writes.
    pub fn clear(
        &self,
        timeout: Option<Duration>,
        passive: bool,
        ignore: &[&str],
    ) -> Result<Status, HalError> {
        let mut targets: Vec<Arc<LightDevice>> = self.blocking_devices();
        if passive {
            let named: HashSet<String> = targets.iter().map(|d| d.name().to_string()).collect();
            targets.extend(
                self.devices
                    .iter()
                    .filter(|d| !d.is_branching() && d.inserted() && !named.contains(d.name()))
                    .cloned(),
            );
        }

        let mut statuses = Vec::new();
        for device in targets.iter().filter(|d| !ignore.contains(&d.name())) {
            let routes_here = device.branches.iter().position(|b| *b == self.name) == Some(1);
            let status = if routes_here {
                device.insert()?
            } else {
                device.remove()?
            };
            statuses.push(status);
        }
        info!(
            "Clearing beam path '{}': moving {} devices",
            self.name,
            statuses.len()
        );
        Ok(combine(&statuses, timeout))
    }

    /// Path containing the devices of both paths.
    pub fn join(&self, other: &BeamPath) -> BeamPath {
        let mut seen = HashSet::new();
        let devices = self
            .devices
            .iter()
            .chain(&other.devices)
            .filter(|d| seen.insert(d.name().to_string()))
            .cloned()
            .collect();
        BeamPath {
            minimum_transmission: self.minimum_transmission,
            ..BeamPath::new(format!("{}+{}", self.name, other.name), devices)
        }
    }

    /// Split into devices at or upstream of `z` and devices downstream.
    pub fn split(&self, z: f64) -> (BeamPath, BeamPath) {
        let (upstream, downstream): (Vec<_>, Vec<_>) =
            self.devices.iter().cloned().partition(|d| d.z <= z);
        let part = |suffix: &str, devices| BeamPath {
            name: format!("{}_{suffix}", self.name),
            devices,
            minimum_transmission: self.minimum_transmission,
        };
        (part("upstream", upstream), part("downstream", downstream))
    }

    fn blocks(&self, device: &LightDevice) -> bool {
        if device.is_branching() {
            return !device.destination().contains(&self.name);
        }
        match device.state() {
            LightState::Inserted => device.transmission < self.minimum_transmission,
            LightState::Removed => false,
            LightState::Unknown => true,
        }
    }
}
