//! Composite devices.
//!
//! A [`Device`] is a fixed, named tree of [`Signal`]s and nested devices,
//! built once by [`DeviceBuilder`](crate::builder::DeviceBuilder). It exposes
//! the ophyd-style surface: `read`, `configure`, `stage`/`unstage`, `set` and
//! `trigger`, each operation fanning out to signals and folding the resulting
//! statuses with [`combine`].
//!
//! # Staging
//!
//! ```text
//! unstaged ──stage()──► staged ──unstage()──► unstaged
//! ```
//!
//! `stage()` writes stage values in declaration order (own signals first,
//! then nested devices) and remembers how to undo each write. `unstage()`
//! undoes them in exact reverse order and never stops on a failed reversal;
//! failures come back as warnings.

use crate::error::HalError;
use crate::signal::{Kind, Reading, Signal, SignalDescription};
use crate::status::{Outcome, Status};
use crate::sync::combine;
use lightpath_common::consts::{
    DEFAULT_SETTLE_TIME_S, DEFAULT_TIMEOUT_S, OPTION_PATH_SEPARATOR, SETTLE_TIME_OPTION,
    TIMEOUT_OPTION,
};
use lightpath_common::config::duration_from_secs;
use lightpath_common::value::{Value, ValueSpec};
use static_assertions::assert_impl_all;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One named part of a device.
#[derive(Debug, Clone)]
pub enum Component {
    /// A single channel.
    Signal(Arc<Signal>),
    /// A nested device.
    Device(Arc<Device>),
}

/// A declared configuration option.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceOption {
    /// Option name.
    pub name: String,
    /// Accepted values.
    pub spec: ValueSpec,
}

/// How to undo one stage write.
#[derive(Debug, Clone)]
pub struct ReversalAction {
    signal: Arc<Signal>,
    original: Option<Value>,
    staged: Value,
}

impl ReversalAction {
    /// Full name of the staged signal.
    pub fn signal(&self) -> &str {
        self.signal.name()
    }

    /// Cached value before staging; restored on unstage.
    pub fn original(&self) -> Option<&Value> {
        self.original.as_ref()
    }

    /// Value written by stage.
    pub fn staged(&self) -> &Value {
        &self.staged
    }

    fn revert(&self, timeout: Duration) -> Result<(), HalError> {
        let original = self.original.clone().ok_or_else(|| HalError::NotConnected {
            signal: self.signal.name().to_string(),
        })?;
        match self
            .signal
            .write_with_timeout(original, timeout)?
            .wait(Some(timeout))
        {
            Outcome::Success => Ok(()),
            Outcome::Failure(e) => Err(e),
            Outcome::Timeout | Outcome::Pending => Err(HalError::OperationTimeout {
                target: self.signal.name().to_string(),
                timeout,
            }),
        }
    }
}

/// Result of [`Device::stage`].
#[derive(Debug, Clone)]
pub struct Staged {
    /// Every stage write in issue order, nested devices included.
    pub actions: Vec<ReversalAction>,
    /// Composite status of the stage writes.
    pub status: Status,
}

/// A reversal that did not complete during unstage.
#[derive(Debug, Clone, PartialEq)]
pub struct UnstageWarning {
    /// Full name of the signal that was not restored.
    pub signal: String,
    /// Why.
    pub error: HalError,
}

/// Result of [`Device::unstage`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnstageReport {
    /// Failed reversals, in the order they were attempted.
    pub warnings: Vec<UnstageWarning>,
}

impl UnstageReport {
    /// Whether every reversal succeeded.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Result of [`Device::configure`], usable for rollback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configured {
    /// Values before the change, by key.
    pub previous: BTreeMap<String, Value>,
    /// Values after the change, by key.
    pub current: BTreeMap<String, Value>,
}

/// Composite of signals and nested devices.
pub struct Device {
    name: String,
    components: Vec<(String, Component)>,
    options: Vec<DeviceOption>,
    settings: RwLock<BTreeMap<String, Value>>,
    set_target: Option<Arc<Signal>>,
    trigger: Option<(Arc<Signal>, Value)>,
    staged: Mutex<Option<Vec<ReversalAction>>>,
}

assert_impl_all!(Device: Send, Sync);

impl Device {
    /// Assemble a device from already validated parts.
    pub(crate) fn assemble(
        name: String,
        components: Vec<(String, Component)>,
        options: Vec<(DeviceOption, Value)>,
        set_target: Option<Arc<Signal>>,
        trigger: Option<(Arc<Signal>, Value)>,
    ) -> Device {
        let settings = options
            .iter()
            .map(|(option, default)| (option.name.clone(), default.clone()))
            .collect();
        Device {
            name,
            components,
            options: options.into_iter().map(|(option, _)| option).collect(),
            settings: RwLock::new(settings),
            set_target,
            trigger,
            staged: Mutex::new(None),
        }
    }

    /// Full device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Components in declaration order.
    pub fn components(&self) -> impl Iterator<Item = (&str, &Component)> {
        self.components.iter().map(|(name, c)| (name.as_str(), c))
    }

    /// Component by name; dotted paths reach into nested devices.
    pub fn component(&self, path: &str) -> Option<&Component> {
        match path.split_once(OPTION_PATH_SEPARATOR) {
            Some((child, rest)) => self.child_device(child)?.component(rest),
            None => self
                .components
                .iter()
                .find(|(name, _)| name == path)
                .map(|(_, c)| c),
        }
    }

    /// Signal by (dotted) component path.
    pub fn signal(&self, path: &str) -> Option<&Arc<Signal>> {
        match self.component(path)? {
            Component::Signal(signal) => Some(signal),
            Component::Device(_) => None,
        }
    }

    /// Nested device by (dotted) component path.
    pub fn device(&self, path: &str) -> Option<&Arc<Device>> {
        match self.component(path)? {
            Component::Device(device) => Some(device),
            Component::Signal(_) => None,
        }
    }

    /// Declared configuration options.
    pub fn options(&self) -> &[DeviceOption] {
        &self.options
    }

    /// Whether the device is staged.
    pub fn is_staged(&self) -> bool {
        self.staged_lock().is_some()
    }

    /// Current write timeout.
    pub fn timeout(&self) -> Duration {
        self.duration_setting(TIMEOUT_OPTION, DEFAULT_TIMEOUT_S)
    }

    /// Current settle time after `set`.
    pub fn settle_time(&self) -> Duration {
        self.duration_setting(SETTLE_TIME_OPTION, DEFAULT_SETTLE_TIME_S)
    }

    /// Connect every signal in the tree.
    pub fn connect(&self, timeout: Duration) -> Status {
        let mut statuses = Vec::new();
        self.for_each_signal(&mut |signal| statuses.push(signal.connect(timeout)));
        combine(&statuses, Some(timeout))
    }

    /// Readings of every normal and hinted signal, by full name.
    ///
    /// # Errors
    /// `HalError::NotConnected` for the first unreachable signal.
    pub fn read(&self) -> Result<BTreeMap<String, Reading>, HalError> {
        self.read_kind(Kind::NORMAL)
    }

    /// Readings of every config signal, by full name.
    ///
    /// # Errors
    /// `HalError::NotConnected` for the first unreachable signal.
    pub fn read_configuration(&self) -> Result<BTreeMap<String, Reading>, HalError> {
        self.read_kind(Kind::CONFIG)
    }

    /// Descriptions of the signals reported by `read`.
    pub fn describe(&self) -> BTreeMap<String, SignalDescription> {
        let mut out = BTreeMap::new();
        self.for_each_signal(&mut |signal| {
            if signal.kind().contains(Kind::NORMAL) {
                out.insert(signal.name().to_string(), signal.describe());
            }
        });
        out
    }

    /// Full names of hinted signals.
    pub fn hints(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.for_each_signal(&mut |signal| {
            if signal.kind().contains(Kind::HINTED) {
                out.push(signal.name().to_string());
            }
        });
        out
    }

    /// Current option values, nested devices under dotted keys.
    pub fn configuration(&self) -> BTreeMap<String, Value> {
        let mut out = self
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for (name, component) in &self.components {
            if let Component::Device(child) = component {
                for (key, value) in child.configuration() {
                    out.insert(format!("{name}{OPTION_PATH_SEPARATOR}{key}"), value);
                }
            }
        }
        out
    }

    /// Change options. Either every key applies or none does.
    ///
    /// # Errors
    /// `HalError::UnknownOption` for undeclared keys, `HalError::InvalidValue`
    /// for values the option does not accept.
    pub fn configure(&self, options: &BTreeMap<String, Value>) -> Result<Configured, HalError> {
        let mut planned = Vec::with_capacity(options.len());
        for (key, value) in options {
            let (device, option) = self.resolve_option(key)?;
            let normalized = option
                .spec
                .validate(value)
                .map_err(|e| HalError::InvalidValue {
                    target: key.clone(),
                    reason: e.to_string(),
                })?;
            planned.push((key, device, option.name.as_str(), normalized));
        }

        let mut result = Configured::default();
        for (key, device, option, value) in planned {
            let previous = device
                .settings
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(option.to_string(), value.clone());
            if let Some(previous) = previous {
                result.previous.insert(key.clone(), previous);
            }
            result.current.insert(key.clone(), value);
        }
        debug!("Device '{}' configured: {:?}", self.name, result.current);
        Ok(result)
    }

    /// Roll back a `configure`.
    ///
    /// # Errors
    /// Same as [`Device::configure`].
    pub fn restore(&self, configured: &Configured) -> Result<Configured, HalError> {
        self.configure(&configured.previous)
    }

    /// Write every stage value and remember how to undo it.
    ///
    /// The device counts as staged from the moment the checks pass. If a
    /// write or a nested stage fails part way, everything already applied is
    /// undone and the device is left unstaged.
    ///
    /// # Errors
    /// `HalError::AlreadyStaged` if this device or a nested device is staged;
    /// nothing is written when the check fails up front.
    pub fn stage(&self) -> Result<Staged, HalError> {
        {
            let mut staged = self.staged_lock();
            if staged.is_some() {
                return Err(HalError::AlreadyStaged {
                    device: self.name.clone(),
                });
            }
            self.check_children_unstaged()?;
            *staged = Some(Vec::new());
        }

        let timeout = self.timeout();
        let mut own = Vec::new();
        let mut statuses = Vec::new();
        let mut failure = None;
        for (_, component) in &self.components {
            let Component::Signal(signal) = component else {
                continue;
            };
            let Some(value) = signal.stage_value() else {
                continue;
            };
            let original = signal.cached().map(|r| r.value);
            match signal.write_with_timeout(value.clone(), timeout) {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            own.push(ReversalAction {
                signal: Arc::clone(signal),
                original,
                staged: value.clone(),
            });
        }

        let mut actions = own.clone();
        let mut nested = Vec::new();
        if failure.is_none() {
            for child in self.child_devices() {
                match child.stage() {
                    Ok(child_staged) => {
                        actions.extend(child_staged.actions);
                        statuses.push(child_staged.status);
                        nested.push(child);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }

        if let Some(error) = failure {
            let report = self.revert(nested.into_iter().rev(), &own, timeout);
            *self.staged_lock() = None;
            warn!(
                "Device '{}' stage aborted: {} ({} reversal warnings)",
                self.name,
                error,
                report.warnings.len()
            );
            return Err(error);
        }

        *self.staged_lock() = Some(own);
        info!("Device '{}' staged ({} writes)", self.name, actions.len());
        Ok(Staged {
            actions,
            status: combine(&statuses, Some(timeout)),
        })
    }

    /// Undo `stage` in exact reverse order.
    ///
    /// Nested devices unstage first (last declared first), then this device's
    /// own writes are reverted last to first. Each reversal is awaited with
    /// the device timeout; failures are logged and collected, never fatal.
    /// Unstaging an unstaged device does nothing.
    pub fn unstage(&self) -> UnstageReport {
        // Leave the device marked staged but release the lock while reverting.
        let actions = match self.staged_lock().as_mut() {
            Some(actions) => std::mem::take(actions),
            None => return UnstageReport::default(),
        };

        let children: Vec<&Arc<Device>> = self.child_devices().collect();
        let report = self.revert(children.into_iter().rev(), &actions, self.timeout());
        *self.staged_lock() = None;
        info!(
            "Device '{}' unstaged ({} warnings)",
            self.name,
            report.warnings.len()
        );
        report
    }

    /// Move the set target to `value`. The status completes after the write
    /// is confirmed and the settle time has passed.
    ///
    /// # Errors
    /// `HalError::Unsupported` without a set target, and the validation
    /// errors of [`Signal::write`].
    pub fn set(&self, value: impl Into<Value>) -> Result<Status, HalError> {
        let target = self.set_target.as_ref().ok_or_else(|| HalError::Unsupported {
            device: self.name.clone(),
            operation: "set",
        })?;
        let timeout = self.timeout();
        let settle = self.settle_time();
        let write = target.write_with_timeout(value, timeout)?;
        let settle_target = format!("{} settle", self.name);
        Ok(combine(&[write], Some(timeout))
            .and_then(move || Ok(Status::delay(settle_target, settle))))
    }

    /// Fire this device's trigger and every nested device's.
    ///
    /// # Errors
    /// Validation errors of the trigger writes.
    pub fn trigger(&self) -> Result<Status, HalError> {
        let timeout = self.timeout();
        let mut statuses = Vec::new();
        if let Some((signal, value)) = &self.trigger {
            statuses.push(signal.write_with_timeout(value.clone(), timeout)?);
        }
        for (_, component) in &self.components {
            if let Component::Device(child) = component {
                statuses.push(child.trigger()?);
            }
        }
        Ok(combine(&statuses, Some(timeout)))
    }

    fn read_kind(&self, kind: Kind) -> Result<BTreeMap<String, Reading>, HalError> {
        let mut out = BTreeMap::new();
        let mut first_error = None;
        self.for_each_signal(&mut |signal| {
            if first_error.is_some() || !signal.kind().contains(kind) {
                return;
            }
            match signal.reading() {
                Ok(reading) => {
                    out.insert(signal.name().to_string(), reading);
                }
                Err(e) => first_error = Some(e),
            }
        });
        match first_error {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    fn for_each_signal(&self, f: &mut dyn FnMut(&Arc<Signal>)) {
        for (_, component) in &self.components {
            match component {
                Component::Signal(signal) => f(signal),
                Component::Device(child) => child.for_each_signal(f),
            }
        }
    }

    fn child_devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.components.iter().filter_map(|(_, c)| match c {
            Component::Device(d) => Some(d),
            Component::Signal(_) => None,
        })
    }

    /// Unstage `children`, then revert `actions` last to first.
    fn revert<'a>(
        &self,
        children: impl Iterator<Item = &'a Arc<Device>>,
        actions: &[ReversalAction],
        timeout: Duration,
    ) -> UnstageReport {
        let mut report = UnstageReport::default();
        for child in children {
            report.warnings.extend(child.unstage().warnings);
        }
        for action in actions.iter().rev() {
            if let Err(error) = action.revert(timeout) {
                warn!(
                    "Device '{}' could not restore '{}': {}",
                    self.name,
                    action.signal(),
                    error
                );
                report.warnings.push(UnstageWarning {
                    signal: action.signal().to_string(),
                    error,
                });
            }
        }
        report
    }

    fn child_device(&self, name: &str) -> Option<&Arc<Device>> {
        self.components.iter().find_map(|(n, c)| match c {
            Component::Device(d) if n == name => Some(d),
            _ => None,
        })
    }

    fn resolve_option(&self, key: &str) -> Result<(&Device, &DeviceOption), HalError> {
        let unknown = || HalError::UnknownOption {
            device: self.name.clone(),
            option: key.to_string(),
        };
        match key.split_once(OPTION_PATH_SEPARATOR) {
            Some((child, rest)) => self
                .child_device(child)
                .ok_or_else(unknown)?
                .resolve_option(rest)
                .map_err(|_| unknown()),
            None => self
                .options
                .iter()
                .find(|o| o.name == key)
                .map(|o| (self, o))
                .ok_or_else(unknown),
        }
    }

    fn check_children_unstaged(&self) -> Result<(), HalError> {
        for (_, component) in &self.components {
            if let Component::Device(child) = component {
                if child.is_staged() {
                    return Err(HalError::AlreadyStaged {
                        device: child.name.clone(),
                    });
                }
                child.check_children_unstaged()?;
            }
        }
        Ok(())
    }

    fn duration_setting(&self, key: &str, fallback_s: f64) -> Duration {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .and_then(Value::as_f64)
            .and_then(duration_from_secs)
            .unwrap_or_else(|| Duration::from_secs_f64(fallback_s))
    }

    fn staged_lock(&self) -> MutexGuard<'_, Option<Vec<ReversalAction>>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field(
                "components",
                &self.components.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("staged", &self.is_staged())
            .finish()
    }
}
