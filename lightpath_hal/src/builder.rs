//! Device construction from definitions.
//!
//! [`DeviceBuilder`] turns a [`DeviceSchema`] into a fixed [`Device`] graph.
//! Every semantic rule is checked here, once, before any signal exists, so a
//! built device never carries a malformed component, option or target.
//!
//! # Naming
//!
//! Full names join the parent's full name and the component name with `_`:
//! signal `position` of device `motor` is `motor_position`, signal `state` of
//! nested device `filter` in `attenuator` is `attenuator_filter_state`.

use crate::beampath::LightDevice;
use crate::device::{Component, Device, DeviceOption};
use crate::error::HalError;
use crate::signal::Signal;
use crate::transport::Transport;
use lightpath_common::config::DefaultsConfig;
use lightpath_common::consts::{
    MAX_DURATION_S, NAME_SEPARATOR, OPTION_PATH_SEPARATOR, SETTLE_TIME_OPTION, TIMEOUT_OPTION,
};
use lightpath_common::schema::{Access, ComponentSchema, DeviceSchema, SignalSchema};
use lightpath_common::value::{Value, ValueKind, ValueSpec};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds devices whose signals share one transport.
pub struct DeviceBuilder {
    transport: Arc<dyn Transport>,
    defaults: DefaultsConfig,
}

impl DeviceBuilder {
    /// Builder using `transport` and the built-in defaults.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            defaults: DefaultsConfig::default(),
        }
    }

    /// Initial `timeout` and `settle_time` of every built device.
    pub fn with_defaults(mut self, defaults: DefaultsConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Build one device.
    ///
    /// # Errors
    /// `HalError::Schema` naming the offending device path for any malformed
    /// component, option or target, and `HalError::Config` for invalid
    /// defaults.
    pub fn build(&self, schema: &DeviceSchema) -> Result<Arc<Device>, HalError> {
        self.defaults.validate()?;
        check_name(&schema.name, &schema.name)?;
        let device = self.build_device(schema, schema.name.clone(), &schema.name)?;
        info!(
            "Built device '{}' on {} transport",
            schema.name,
            self.transport.name()
        );
        Ok(device)
    }

    /// Build several devices; top-level names must be unique.
    ///
    /// # Errors
    /// As [`DeviceBuilder::build`], plus `HalError::Schema` for a repeated
    /// device name.
    pub fn build_all(&self, schemas: &[DeviceSchema]) -> Result<Vec<Arc<Device>>, HalError> {
        let mut names = HashSet::new();
        schemas
            .iter()
            .map(|schema| {
                if !names.insert(schema.name.as_str()) {
                    return Err(schema_error(&schema.name, "device defined twice"));
                }
                self.build(schema)
            })
            .collect()
    }

    /// Build an insertable beamline device.
    ///
    /// # Errors
    /// As [`DeviceBuilder::build`], plus `HalError::Schema` when the `light`
    /// section is missing or inconsistent with the components.
    pub fn build_light(&self, schema: &DeviceSchema) -> Result<LightDevice, HalError> {
        let light = schema
            .light
            .as_ref()
            .ok_or_else(|| schema_error(&schema.name, "missing light section"))?;
        let device = self.build(schema)?;
        LightDevice::new(device, light)
    }

    fn build_device(
        &self,
        schema: &DeviceSchema,
        full_name: String,
        path: &str,
    ) -> Result<Arc<Device>, HalError> {
        let mut seen = HashSet::new();
        let mut components = Vec::with_capacity(schema.components.len());
        for component in &schema.components {
            let name = component.name();
            check_name(path, name)?;
            if !seen.insert(name) {
                return Err(schema_error(path, format!("duplicate component '{name}'")));
            }
            let child_name = format!("{full_name}{NAME_SEPARATOR}{name}");
            let built = match component {
                ComponentSchema::Signal(signal) => {
                    Component::Signal(self.build_signal(signal, child_name, path)?)
                }
                ComponentSchema::Device(device) => {
                    let child_path = format!("{path}{OPTION_PATH_SEPARATOR}{name}");
                    Component::Device(self.build_device(device, child_name, &child_path)?)
                }
            };
            components.push((name.to_string(), built));
        }

        let options = self.build_options(schema, path)?;

        let set_target = schema
            .set
            .as_deref()
            .map(|name| writable_signal(&components, name, path, "set"))
            .transpose()?;

        let trigger = match &schema.trigger {
            Some(trigger) => {
                let signal = writable_signal(&components, &trigger.signal, path, "trigger")?;
                let value = signal.spec().validate(&trigger.value).map_err(|e| {
                    schema_error(path, format!("trigger value {}: {e}", trigger.value))
                })?;
                Some((signal, value))
            }
            None => None,
        };

        debug!(
            "Device '{}': {} components, {} options",
            full_name,
            components.len(),
            options.len()
        );
        Ok(Arc::new(Device::assemble(
            full_name, components, options, set_target, trigger,
        )))
    }

    fn build_signal(
        &self,
        schema: &SignalSchema,
        full_name: String,
        path: &str,
    ) -> Result<Arc<Signal>, HalError> {
        let component = &schema.name;
        if let Some(stage_value) = &schema.stage_value {
            if schema.access == Access::ReadOnly {
                return Err(schema_error(
                    path,
                    format!("read-only signal '{component}' declares a stage value"),
                ));
            }
            schema.value_spec().validate(stage_value).map_err(|e| {
                schema_error(path, format!("stage value of '{component}': {e}"))
            })?;
        }
        Signal::from_schema(full_name, schema, Arc::clone(&self.transport)).map_err(|e| match e {
            HalError::Schema { reason, .. } => {
                schema_error(path, format!("signal '{component}': {reason}"))
            }
            other => other,
        })
    }

    fn build_options(
        &self,
        schema: &DeviceSchema,
        path: &str,
    ) -> Result<Vec<(DeviceOption, Value)>, HalError> {
        let mut options = Vec::with_capacity(schema.options.len() + 2);
        let mut seen = HashSet::new();
        for option in &schema.options {
            check_name(path, &option.name)?;
            if !seen.insert(option.name.as_str()) {
                return Err(schema_error(
                    path,
                    format!("duplicate option '{}'", option.name),
                ));
            }
            let spec = option.value_spec();
            spec.check()
                .map_err(|reason| schema_error(path, format!("option '{}': {reason}", option.name)))?;
            let default = spec.validate(&option.default).map_err(|e| {
                schema_error(path, format!("default of option '{}': {e}", option.name))
            })?;
            options.push((
                DeviceOption {
                    name: option.name.clone(),
                    spec,
                },
                default,
            ));
        }

        // Every device accepts these; a definition may narrow them.
        let builtins = [
            (TIMEOUT_OPTION, self.defaults.timeout_s),
            (SETTLE_TIME_OPTION, self.defaults.settle_time_s),
        ];
        for (name, default) in builtins {
            if seen.contains(name) {
                continue;
            }
            options.push((
                DeviceOption {
                    name: name.to_string(),
                    spec: ValueSpec::new(ValueKind::Float).with_range(0.0, MAX_DURATION_S),
                },
                Value::Float(default),
            ));
        }
        Ok(options)
    }
}

fn writable_signal(
    components: &[(String, Component)],
    name: &str,
    path: &str,
    role: &str,
) -> Result<Arc<Signal>, HalError> {
    let signal = components
        .iter()
        .find_map(|(n, c)| match c {
            Component::Signal(s) if n == name => Some(s),
            _ => None,
        })
        .ok_or_else(|| schema_error(path, format!("{role} target '{name}' is not a signal")))?;
    if !signal.is_writable() {
        return Err(schema_error(
            path,
            format!("{role} target '{name}' is read-only"),
        ));
    }
    Ok(Arc::clone(signal))
}

fn check_name(path: &str, name: &str) -> Result<(), HalError> {
    if name.trim().is_empty() {
        return Err(schema_error(path, "empty name"));
    }
    if name.contains(OPTION_PATH_SEPARATOR) {
        return Err(schema_error(
            path,
            format!("name '{name}' contains '{OPTION_PATH_SEPARATOR}'"),
        ));
    }
    Ok(())
}

pub(crate) fn schema_error(path: &str, reason: impl Into<String>) -> HalError {
    HalError::Schema {
        device: path.to_string(),
        reason: reason.into(),
    }
}
