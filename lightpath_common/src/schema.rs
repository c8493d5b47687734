//! Device definition schema.
//!
//! Device definitions are produced by an external device-definition tool and
//! consumed here as plain data: a device name, an ordered list of components
//! (signals or nested devices), the configuration options the device accepts,
//! and optional `set`/`trigger`/`light` sections. Nothing in this module
//! validates semantics; `lightpath_hal::builder` does that once, eagerly.
//!
//! # TOML Example
//!
//! ```toml
//! name = "motor"
//! set = "position"
//!
//! [[components]]
//! component = "signal"
//! name = "position"
//! address = "TST:MTR:01:POS"
//! dtype = "float"
//! range = [0.0, 100.0]
//! kind = "hinted"
//!
//! [[components]]
//! component = "signal"
//! name = "moving"
//! address = "TST:MTR:01:MOVN"
//! dtype = "bool"
//! access = "read_only"
//! ```

use crate::config::ConfigError;
use crate::consts::DEFAULT_STATE_COMPONENT;
use crate::value::{Value, ValueKind, ValueSpec};
use serde::{Deserialize, Serialize};

/// Definition of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSchema {
    /// Device name, unique among its siblings.
    pub name: String,

    /// Ordered components. Order fixes stage and read order.
    #[serde(default)]
    pub components: Vec<ComponentSchema>,

    /// Configuration options accepted by `configure`.
    #[serde(default)]
    pub options: Vec<OptionSchema>,

    /// Name of the signal written by `set`.
    #[serde(default)]
    pub set: Option<String>,

    /// Signal and value written by `trigger`.
    #[serde(default)]
    pub trigger: Option<TriggerSchema>,

    /// Beamline metadata for insertable devices.
    #[serde(default)]
    pub light: Option<LightSchema>,
}

impl DeviceSchema {
    /// Empty device definition with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Vec::new(),
            options: Vec::new(),
            set: None,
            trigger: None,
            light: None,
        }
    }

    /// Parse a device definition from TOML text.
    ///
    /// # Errors
    /// Returns `ConfigError::ParseError` if the TOML is malformed or does not
    /// match the schema.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Builder-style signal component.
    pub fn with_signal(mut self, signal: SignalSchema) -> Self {
        self.components.push(ComponentSchema::Signal(signal));
        self
    }

    /// Builder-style nested device component.
    pub fn with_device(mut self, device: DeviceSchema) -> Self {
        self.components.push(ComponentSchema::Device(device));
        self
    }

    /// Builder-style configuration option.
    pub fn with_option(mut self, option: OptionSchema) -> Self {
        self.options.push(option);
        self
    }

    /// Builder-style `set` target.
    pub fn with_set(mut self, signal: impl Into<String>) -> Self {
        self.set = Some(signal.into());
        self
    }

    /// Builder-style trigger.
    pub fn with_trigger(mut self, signal: impl Into<String>, value: impl Into<Value>) -> Self {
        self.trigger = Some(TriggerSchema {
            signal: signal.into(),
            value: value.into(),
        });
        self
    }

    /// Builder-style beamline metadata.
    pub fn with_light(mut self, light: LightSchema) -> Self {
        self.light = Some(light);
        self
    }
}

/// One named component of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "component", rename_all = "lowercase")]
pub enum ComponentSchema {
    /// A single channel.
    Signal(SignalSchema),
    /// A nested device.
    Device(DeviceSchema),
}

impl ComponentSchema {
    /// Component name within its parent device.
    pub fn name(&self) -> &str {
        match self {
            Self::Signal(s) => &s.name,
            Self::Device(d) => &d.name,
        }
    }
}

/// Channel access capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Value can only be observed.
    ReadOnly,
    /// Value can be observed and written.
    #[default]
    ReadWrite,
}

/// How a signal participates in device reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Included in `read()`.
    #[default]
    Normal,
    /// Included in `read_configuration()`.
    Config,
    /// Included in `read()` and reported by `hints()`.
    Hinted,
    /// Never reported.
    Omitted,
}

/// Definition of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSchema {
    /// Component name.
    pub name: String,

    /// Transport address of the channel.
    pub address: String,

    /// Declared value kind.
    pub dtype: ValueKind,

    /// Read/write capability.
    #[serde(default)]
    pub access: Access,

    /// Read participation.
    #[serde(default)]
    pub kind: SignalKind,

    /// Inclusive numeric range `[lo, hi]`.
    #[serde(default)]
    pub range: Option<[f64; 2]>,

    /// Enum state names.
    #[serde(default)]
    pub enum_strs: Vec<String>,

    /// Float readback tolerance.
    #[serde(default)]
    pub tolerance: Option<f64>,

    /// Engineering units.
    #[serde(default)]
    pub units: Option<String>,

    /// Value written on `stage()` and reverted on `unstage()`.
    #[serde(default)]
    pub stage_value: Option<Value>,

    /// Write confirmation timeout in seconds.
    #[serde(default)]
    pub timeout_s: Option<f64>,
}

impl SignalSchema {
    /// Minimal read-write normal signal.
    pub fn new(name: impl Into<String>, address: impl Into<String>, dtype: ValueKind) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            dtype,
            access: Access::default(),
            kind: SignalKind::default(),
            range: None,
            enum_strs: Vec::new(),
            tolerance: None,
            units: None,
            stage_value: None,
            timeout_s: None,
        }
    }

    /// Builder-style read-only access.
    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    /// Builder-style kind.
    pub fn with_kind(mut self, kind: SignalKind) -> Self {
        self.kind = kind;
        self
    }

    /// Builder-style range.
    pub fn with_range(mut self, lo: f64, hi: f64) -> Self {
        self.range = Some([lo, hi]);
        self
    }

    /// Builder-style enum states.
    pub fn with_enum_strs<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_strs = states.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style stage value.
    pub fn with_stage_value(mut self, value: impl Into<Value>) -> Self {
        self.stage_value = Some(value.into());
        self
    }

    /// Builder-style write timeout.
    pub fn with_timeout_s(mut self, timeout_s: f64) -> Self {
        self.timeout_s = Some(timeout_s);
        self
    }

    /// Value spec declared by this definition.
    pub fn value_spec(&self) -> ValueSpec {
        let mut spec = ValueSpec::new(self.dtype).with_enum_strs(self.enum_strs.iter().cloned());
        if let Some([lo, hi]) = self.range {
            spec = spec.with_range(lo, hi);
        }
        if let Some(tolerance) = self.tolerance {
            spec = spec.with_tolerance(tolerance);
        }
        spec
    }
}

/// Definition of one configuration option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSchema {
    /// Option name.
    pub name: String,

    /// Declared value kind.
    pub dtype: ValueKind,

    /// Inclusive numeric range `[lo, hi]`.
    #[serde(default)]
    pub range: Option<[f64; 2]>,

    /// Enum state names.
    #[serde(default)]
    pub enum_strs: Vec<String>,

    /// Value before the first `configure`.
    pub default: Value,
}

impl OptionSchema {
    /// Option with a default and no range.
    pub fn new(name: impl Into<String>, dtype: ValueKind, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            dtype,
            range: None,
            enum_strs: Vec::new(),
            default: default.into(),
        }
    }

    /// Builder-style range.
    pub fn with_range(mut self, lo: f64, hi: f64) -> Self {
        self.range = Some([lo, hi]);
        self
    }

    /// Value spec declared by this option.
    pub fn value_spec(&self) -> ValueSpec {
        let mut spec = ValueSpec::new(self.dtype).with_enum_strs(self.enum_strs.iter().cloned());
        if let Some([lo, hi]) = self.range {
            spec = spec.with_range(lo, hi);
        }
        spec
    }
}

/// Trigger definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSchema {
    /// Component name of the trigger signal.
    pub signal: String,
    /// Value written to fire the trigger.
    pub value: Value,
}

/// Beamline metadata of an insertable device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSchema {
    /// Position along the beamline.
    pub z: f64,

    /// Beamline the device sits on.
    pub beamline: String,

    /// Fraction of beam passed when inserted.
    #[serde(default)]
    pub transmission: f64,

    /// Beamlines a branching device can send beam to; `branches[1]` is the
    /// destination when inserted.
    #[serde(default)]
    pub branches: Vec<String>,

    /// Component holding the in/out state.
    #[serde(default = "default_state_component")]
    pub state: String,

    /// State value meaning "inserted".
    pub inserted: Value,

    /// State value meaning "removed".
    pub removed: Value,

    /// Machine protection section.
    #[serde(default)]
    pub mps: Option<MpsSchema>,
}

impl LightSchema {
    /// Blocking, non-branching device on `beamline` at `z`.
    pub fn new(
        z: f64,
        beamline: impl Into<String>,
        inserted: impl Into<Value>,
        removed: impl Into<Value>,
    ) -> Self {
        Self {
            z,
            beamline: beamline.into(),
            transmission: 0.0,
            branches: Vec::new(),
            state: default_state_component(),
            inserted: inserted.into(),
            removed: removed.into(),
            mps: None,
        }
    }

    /// Builder-style transmission.
    pub fn with_transmission(mut self, transmission: f64) -> Self {
        self.transmission = transmission;
        self
    }

    /// Builder-style branches. The device's own beamline is always the first.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branches = vec![self.beamline.clone(), branch.into()];
        self
    }

    /// Builder-style machine protection.
    pub fn with_mps(mut self, mps: MpsSchema) -> Self {
        self.mps = Some(mps);
        self
    }
}

fn default_state_component() -> String {
    DEFAULT_STATE_COMPONENT.to_string()
}

/// Machine protection metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MpsSchema {
    /// Device can stop beam upstream of protected devices.
    #[serde(default)]
    pub veto: bool,

    /// Component name of a bool signal that bypasses the fault.
    #[serde(default)]
    pub bypass: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOTOR: &str = r#"
name = "motor"
set = "position"

[[options]]
name = "velocity"
dtype = "float"
range = [0, 10]
default = 1.0

[[components]]
component = "signal"
name = "position"
address = "TST:MTR:01:POS"
dtype = "float"
range = [0, 100]
kind = "hinted"

[[components]]
component = "signal"
name = "moving"
address = "TST:MTR:01:MOVN"
dtype = "bool"
access = "read_only"

[[components]]
component = "device"
name = "brake"

[[components.components]]
component = "signal"
name = "enabled"
address = "TST:MTR:01:BRAKE"
dtype = "bool"
stage_value = false
"#;

    #[test]
    fn parses_nested_device_definition() {
        let schema = DeviceSchema::from_toml(MOTOR).unwrap();
        assert_eq!(schema.name, "motor");
        assert_eq!(schema.set.as_deref(), Some("position"));
        assert_eq!(schema.components.len(), 3);

        let ComponentSchema::Signal(position) = &schema.components[0] else {
            panic!("expected signal");
        };
        assert_eq!(position.range, Some([0.0, 100.0]));
        assert_eq!(position.kind, SignalKind::Hinted);
        assert_eq!(position.access, Access::ReadWrite);

        let ComponentSchema::Signal(moving) = &schema.components[1] else {
            panic!("expected signal");
        };
        assert_eq!(moving.access, Access::ReadOnly);

        let ComponentSchema::Device(brake) = &schema.components[2] else {
            panic!("expected device");
        };
        assert_eq!(brake.components[0].name(), "enabled");
        let ComponentSchema::Signal(enabled) = &brake.components[0] else {
            panic!("expected signal");
        };
        assert_eq!(enabled.stage_value, Some(Value::Bool(false)));

        assert_eq!(schema.options[0].default, Value::Float(1.0));
        assert_eq!(schema.options[0].value_spec().range, Some((0.0, 10.0)));
    }

    #[test]
    fn light_section_uses_default_state_component() {
        let schema = DeviceSchema::from_toml(
            r#"
name = "valve"
[light]
z = 40.0
beamline = "TST"
inserted = "IN"
removed = "OUT"
"#,
        )
        .unwrap();
        let light = schema.light.unwrap();
        assert_eq!(light.state, DEFAULT_STATE_COMPONENT);
        assert_eq!(light.transmission, 0.0);
        assert!(light.mps.is_none());
    }

    #[test]
    fn missing_address_is_a_parse_error() {
        let result = DeviceSchema::from_toml(
            r#"
name = "broken"
[[components]]
component = "signal"
name = "x"
dtype = "float"
"#,
        );
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn builder_matches_parsed_definition() {
        let built = DeviceSchema::new("motor")
            .with_signal(
                SignalSchema::new("position", "TST:MTR:01:POS", ValueKind::Float)
                    .with_range(0.0, 100.0),
            )
            .with_set("position");
        assert_eq!(built.components[0].name(), "position");
        assert_eq!(
            built.components[0],
            ComponentSchema::Signal(SignalSchema {
                range: Some([0.0, 100.0]),
                ..SignalSchema::new("position", "TST:MTR:01:POS", ValueKind::Float)
            })
        );
    }
}
