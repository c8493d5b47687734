//! Single addressable channel.
//!
//! A [`Signal`] owns the typed view of one transport address: its declared
//! [`ValueSpec`], access, read kind, the cached reading, and the connection
//! state. The cache only ever follows the channel; a write issues a request
//! and returns a [`Status`] that resolves when the channel reports the target
//! value.
//!
//! # Event Flow
//!
//! ```text
//! Transport delivery thread ──► sink ──► Signal::handle_event
//!                                           │
//!                    ┌──────────────────────┼──────────────────────┐
//!                    ▼                      ▼                      ▼
//!               Connected              Disconnected              Value
//!          (refresh, resolve        (fail pending writes)   (cache, notify,
//!           connect waiters)                                 resolve writes)
//! ```

use crate::error::{ChannelError, HalError};
use crate::status::{Completion, Outcome, Status};
use crate::transport::{ChannelEvent, ChannelSink, Transport};
use bitflags::bitflags;
use lightpath_common::config::duration_from_secs;
use lightpath_common::consts::{DEFAULT_TIMEOUT_S, MAX_DURATION_S};
use lightpath_common::schema::{Access, SignalKind, SignalSchema};
use lightpath_common::value::{Value, ValueKind, ValueSpec};
use serde::Serialize;
use static_assertions::assert_impl_all;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, trace, warn};

bitflags! {
    /// Read participation flags. An omitted signal carries no flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Kind: u8 {
        /// Reported by `Device::read`.
        const NORMAL = 0b001;
        /// Reported by `Device::read_configuration`.
        const CONFIG = 0b010;
        /// Reported by `Device::read` and `Device::hints`.
        const HINTED = 0b101;
    }
}

impl From<SignalKind> for Kind {
    fn from(kind: SignalKind) -> Self {
        match kind {
            SignalKind::Normal => Kind::NORMAL,
            SignalKind::Config => Kind::CONFIG,
            SignalKind::Hinted => Kind::HINTED,
            SignalKind::Omitted => Kind::empty(),
        }
    }
}

/// Connection state of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connection {
    /// No connection requested or channel lost.
    Disconnected,
    /// Connection requested, not yet confirmed.
    Connecting,
    /// Channel reachable.
    Connected,
}

/// A cached channel value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Normalized value.
    pub value: Value,
    /// Unix time of reception in seconds.
    pub timestamp: f64,
}

/// Value change delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalUpdate {
    /// New value.
    pub value: Value,
    /// Previous cached value, if any.
    pub old_value: Option<Value>,
    /// Unix time of reception in seconds.
    pub timestamp: f64,
}

/// Handle returned by [`Signal::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

/// Static description of a signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalDescription {
    /// `transport:address`.
    pub source: String,
    /// Declared kind.
    pub dtype: ValueKind,
    /// Inclusive numeric range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    /// Enum state names.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub enum_strs: Vec<String>,
    /// Engineering units.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

type Subscriber = Arc<dyn Fn(&SignalUpdate) + Send + Sync>;

struct ChannelState {
    connection: Connection,
    reading: Option<Reading>,
    ever_connected: bool,
}

struct Subscribers {
    next_token: u64,
    callbacks: BTreeMap<SubscriptionToken, Subscriber>,
}

struct PendingWrite {
    target: Value,
    completion: Completion,
}

#[derive(Default)]
struct Pending {
    writes: Vec<PendingWrite>,
    connects: Vec<Completion>,
}

/// One addressable channel with typed value and change notification.
pub struct Signal {
    name: String,
    address: String,
    spec: ValueSpec,
    access: Access,
    kind: Kind,
    units: Option<String>,
    stage_value: Option<Value>,
    timeout: Option<Duration>,
    transport: Arc<dyn Transport>,
    weak_self: Weak<Signal>,
    state: RwLock<ChannelState>,
    subscribers: Mutex<Subscribers>,
    pending: Mutex<Pending>,
    delivery: Mutex<()>,
    listening: AtomicBool,
}

assert_impl_all!(Signal: Send, Sync);

impl Signal {
    /// Create a disconnected signal named `name` from its definition.
    ///
    /// # Errors
    /// Returns `HalError::Schema` if the declared value spec is malformed or
    /// the address is empty.
    pub fn from_schema(
        name: impl Into<String>,
        schema: &SignalSchema,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Signal>, HalError> {
        let name = name.into();
        let spec = schema.value_spec();
        spec.check().map_err(|reason| HalError::Schema {
            device: name.clone(),
            reason,
        })?;
        if schema.address.trim().is_empty() {
            return Err(HalError::Schema {
                device: name,
                reason: "empty address".to_string(),
            });
        }
        let timeout = match schema.timeout_s {
            Some(t) => match duration_from_secs(t).filter(|d| !d.is_zero()) {
                Some(timeout) => Some(timeout),
                None => {
                    return Err(HalError::Schema {
                        device: name,
                        reason: format!("timeout_s must be in (0, {MAX_DURATION_S}], got {t}"),
                    });
                }
            },
            None => None,
        };

        debug!("Signal '{}' -> {} ({})", name, schema.address, transport.name());
        Ok(Arc::new_cyclic(|weak_self| Signal {
            name,
            address: schema.address.clone(),
            spec,
            access: schema.access,
            kind: schema.kind.into(),
            units: schema.units.clone(),
            stage_value: schema.stage_value.clone(),
            timeout,
            transport,
            weak_self: weak_self.clone(),
            state: RwLock::new(ChannelState {
                connection: Connection::Disconnected,
                reading: None,
                ever_connected: false,
            }),
            subscribers: Mutex::new(Subscribers {
                next_token: 0,
                callbacks: BTreeMap::new(),
            }),
            pending: Mutex::new(Pending::default()),
            delivery: Mutex::new(()),
            listening: AtomicBool::new(false),
        }))
    }

    /// Full name (`device_component`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Transport address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Declared value spec.
    pub fn spec(&self) -> &ValueSpec {
        &self.spec
    }

    /// Read participation flags.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Whether writes are allowed.
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// Value written on stage, if declared.
    pub fn stage_value(&self) -> Option<&Value> {
        self.stage_value.as_ref()
    }

    /// Write confirmation timeout used by [`Signal::write`].
    pub fn timeout(&self) -> Duration {
        self.timeout
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_TIMEOUT_S))
    }

    /// Current connection state.
    pub fn connection(&self) -> Connection {
        self.state_read().connection
    }

    /// Whether the channel is reachable.
    pub fn is_connected(&self) -> bool {
        self.connection() == Connection::Connected
    }

    /// Start connecting. The status succeeds once the channel is reachable
    /// and the first value has been cached.
    pub fn connect(&self, timeout: Duration) -> Status {
        let (status, completion) = Status::new(format!("{} connect", self.name));
        {
            let mut state = self.state_write();
            if state.connection == Connection::Connected {
                completion.succeed();
                return status;
            }
            state.connection = Connection::Connecting;
            let mut pending = self.pending_lock();
            pending.connects.retain(|c| !c.is_done());
            pending.connects.push(completion.clone());
        }

        if !self.listening.swap(true, Ordering::SeqCst) {
            let weak = self.weak_self.clone();
            let sink: ChannelSink = Arc::new(move |event| {
                if let Some(signal) = weak.upgrade() {
                    signal.handle_event(event);
                }
            });
            if let Err(e) = self.transport.subscribe(&self.address, sink) {
                self.listening.store(false, Ordering::SeqCst);
                self.state_write().connection = Connection::Disconnected;
                completion.fail(self.channel_error(e));
                return status;
            }
        }

        if let Err(e) = self.transport.connect(&self.address) {
            self.state_write().connection = Connection::Disconnected;
            completion.fail(self.channel_error(e));
            return status;
        }
        let weak = self.weak_self.clone();
        status.add_callback(move |outcome| {
            if let (Outcome::Timeout, Some(signal)) = (outcome, weak.upgrade()) {
                signal.on_connect_timeout();
            }
        });
        completion.arm_timeout(timeout);
        status
    }

    /// Current cached value.
    ///
    /// # Errors
    /// Returns `HalError::NotConnected` unless the signal is connected with a
    /// cached value.
    pub fn read(&self) -> Result<Value, HalError> {
        self.reading().map(|r| r.value)
    }

    /// Current cached value with its timestamp.
    ///
    /// # Errors
    /// Same as [`Signal::read`].
    pub fn reading(&self) -> Result<Reading, HalError> {
        let state = self.state_read();
        match (&state.connection, &state.reading) {
            (Connection::Connected, Some(reading)) => Ok(reading.clone()),
            _ => Err(HalError::NotConnected {
                signal: self.name.clone(),
            }),
        }
    }

    /// Last cached reading regardless of connection state.
    pub fn cached(&self) -> Option<Reading> {
        self.state_read().reading.clone()
    }

    /// Check that `value` could be written, and normalize it.
    ///
    /// # Errors
    /// `HalError::NotWritable` for read-only signals, `HalError::InvalidValue`
    /// when the value violates the declared spec.
    pub fn validate(&self, value: &Value) -> Result<Value, HalError> {
        if !self.is_writable() {
            return Err(HalError::NotWritable {
                signal: self.name.clone(),
            });
        }
        self.spec
            .validate(value)
            .map_err(|e| HalError::InvalidValue {
                target: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Write with the signal's own timeout.
    ///
    /// # Errors
    /// See [`Signal::write_with_timeout`].
    pub fn write(&self, value: impl Into<Value>) -> Result<Status, HalError> {
        self.write_with_timeout(value, self.timeout())
    }

    /// Issue a write and return a status tracking its confirmation.
    ///
    /// The status succeeds when the channel reports the target value (floats
    /// within tolerance), fails with `NotConnected` when the signal is or
    /// becomes disconnected, fails with `OperationFailed` when the transport
    /// refuses the write, and times out after `timeout`.
    ///
    /// # Errors
    /// Validation errors only, raised before the transport is touched.
    pub fn write_with_timeout(
        &self,
        value: impl Into<Value>,
        timeout: Duration,
    ) -> Result<Status, HalError> {
        let target = self.validate(&value.into())?;
        let (status, completion) = Status::new(format!("{} <- {}", self.name, target));

        if !self.is_connected() {
            completion.fail(HalError::NotConnected {
                signal: self.name.clone(),
            });
            return Ok(status);
        }

        {
            let mut pending = self.pending_lock();
            pending.writes.retain(|w| !w.completion.is_done());
            pending.writes.push(PendingWrite {
                target: target.clone(),
                completion: completion.clone(),
            });
        }

        trace!("Writing {} to '{}'", target, self.address);
        if let Err(e) = self.transport.write(&self.address, &target) {
            completion.fail(self.channel_error(e));
            return Ok(status);
        }
        completion.arm_timeout(timeout);
        Ok(status)
    }

    /// Register a callback for every value delivered from now on.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&SignalUpdate) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers_lock();
        let token = SubscriptionToken(subscribers.next_token);
        subscribers.next_token += 1;
        subscribers.callbacks.insert(token, Arc::new(callback));
        token
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.subscribers_lock().callbacks.remove(&token).is_some()
    }

    /// Static description of the channel.
    pub fn describe(&self) -> SignalDescription {
        SignalDescription {
            source: format!("{}:{}", self.transport.name(), self.address),
            dtype: self.spec.kind,
            range: self.spec.range,
            enum_strs: self.spec.enum_strs.clone(),
            units: self.units.clone(),
        }
    }

    fn handle_event(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => self.on_connected(),
            ChannelEvent::Disconnected => self.on_disconnected(),
            ChannelEvent::Value(value) => self.deliver(value),
        }
    }

    fn on_connected(&self) {
        let reconnect = {
            let mut state = self.state_write();
            state.connection = Connection::Connected;
            std::mem::replace(&mut state.ever_connected, true)
        };
        if reconnect {
            info!("Signal '{}' reconnected", self.name);
        } else {
            debug!("Signal '{}' connected", self.name);
        }

        // Subscribers get a fresh value on every (re)connection.
        match self.transport.read(&self.address) {
            Ok(value) => self.deliver(value),
            Err(e) => warn!("Signal '{}' connected without a value: {}", self.name, e),
        }

        let waiters = std::mem::take(&mut self.pending_lock().connects);
        for waiter in waiters {
            waiter.succeed();
        }
    }

    fn on_connect_timeout(&self) {
        let mut state = self.state_write();
        if state.connection != Connection::Connecting {
            return;
        }
        let mut pending = self.pending_lock();
        pending.connects.retain(|c| !c.is_done());
        if pending.connects.is_empty() {
            state.connection = Connection::Disconnected;
            debug!("Signal '{}' connect timed out", self.name);
        }
    }

    fn on_disconnected(&self) {
        self.state_write().connection = Connection::Disconnected;
        let writes = std::mem::take(&mut self.pending_lock().writes);
        let mut failed = 0;
        for write in writes {
            let error = HalError::NotConnected {
                signal: self.name.clone(),
            };
            if write.completion.fail(error) {
                failed += 1;
            }
        }
        warn!(
            "Signal '{}' disconnected ({} pending writes failed)",
            self.name, failed
        );
    }

    fn deliver(&self, raw: Value) {
        let _serial = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);

        let value = self.spec.validate(&raw).unwrap_or(raw);
        let timestamp = unix_now();
        let old_value = {
            let mut state = self.state_write();
            state
                .reading
                .replace(Reading {
                    value: value.clone(),
                    timestamp,
                })
                .map(|r| r.value)
        };

        let update = SignalUpdate {
            value,
            old_value,
            timestamp,
        };
        let callbacks: Vec<Subscriber> = self
            .subscribers_lock()
            .callbacks
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(&update);
        }

        let resolved: Vec<PendingWrite> = {
            let mut pending = self.pending_lock();
            let (resolved, waiting) = std::mem::take(&mut pending.writes)
                .into_iter()
                .partition(|w| {
                    w.completion.is_done() || self.spec.matches(&w.target, &update.value)
                });
            pending.writes = waiting;
            resolved
        };
        for write in resolved {
            write.completion.succeed();
        }
    }

    fn channel_error(&self, error: ChannelError) -> HalError {
        match error {
            ChannelError::Disconnected(_) => HalError::NotConnected {
                signal: self.name.clone(),
            },
            source => HalError::OperationFailed {
                target: self.name.clone(),
                source,
            },
        }
    }

    fn state_read(&self) -> RwLockReadGuard<'_, ChannelState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_write(&self) -> RwLockWriteGuard<'_, ChannelState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending_lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers_lock(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("connection", &self.connection())
            .finish()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
