//! Simulated transport implementation.
//!
//! `SimTransport` implements [`Transport`] over an in-memory channel table.
//! Every event is delivered on one background thread in the order the table
//! changed, which gives tests the same "updates arrive on another thread"
//! shape as a real control network. Test hooks let a caller take channels
//! offline, inject external updates, hold or ignore writes, and reject them.

use super::channel::{Notifier, SimChannel, WriteMode};
use crate::error::ChannelError;
use crate::transport::{ChannelEvent, ChannelSink, Transport};
use lightpath_common::value::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// In-memory transport for development and testing.
pub struct SimTransport {
    channels: Mutex<HashMap<String, SimChannel>>,
    write_log: Mutex<Vec<(String, Value)>>,
    notifier: Notifier,
}

impl SimTransport {
    /// Create an empty simulated transport.
    pub fn new() -> Self {
        info!("Simulation transport started");
        Self {
            channels: Mutex::new(HashMap::new()),
            write_log: Mutex::new(Vec::new()),
            notifier: Notifier::spawn(),
        }
    }

    /// Builder-style channel.
    pub fn with_channel(self, address: &str, value: impl Into<Value>) -> Self {
        self.add_channel(address, value);
        self
    }

    /// Add an online channel holding `value`. Replaces any existing channel
    /// state except its subscribers.
    pub fn add_channel(&self, address: &str, value: impl Into<Value>) {
        let mut channels = self.lock();
        let sinks = channels
            .remove(address)
            .map(|c| c.sinks)
            .unwrap_or_default();
        let mut channel = SimChannel::new(value.into());
        channel.sinks = sinks;
        channels.insert(address.to_string(), channel);
        debug!("Simulated channel '{}' added", address);
    }

    /// Current value of a channel.
    pub fn value(&self, address: &str) -> Option<Value> {
        self.lock().get(address).and_then(|c| c.value.clone())
    }

    /// Simulate an external update of a channel.
    pub fn inject(&self, address: &str, value: impl Into<Value>) {
        let value = value.into();
        let mut channels = self.lock();
        if let Some(channel) = channels.get_mut(address) {
            channel.value = Some(value.clone());
            if channel.online {
                self.notifier.send(&channel.sinks, ChannelEvent::Value(value));
            }
        }
    }

    /// Take a channel offline.
    pub fn disconnect(&self, address: &str) {
        let mut channels = self.lock();
        if let Some(channel) = channels.get_mut(address) {
            if channel.online {
                channel.online = false;
                self.notifier.send(&channel.sinks, ChannelEvent::Disconnected);
            }
        }
    }

    /// Bring a channel back online.
    pub fn reconnect(&self, address: &str) {
        let mut channels = self.lock();
        if let Some(channel) = channels.get_mut(address) {
            if !channel.online {
                channel.online = true;
                self.notifier.send(&channel.sinks, ChannelEvent::Connected);
            }
        }
    }

    /// Change how a channel answers writes.
    pub fn set_write_mode(&self, address: &str, mode: WriteMode) {
        if let Some(channel) = self.lock().get_mut(address) {
            channel.mode = mode;
        }
    }

    /// Reject every write to a channel with `reason`, or stop rejecting.
    pub fn reject_writes(&self, address: &str, reason: Option<&str>) {
        if let Some(channel) = self.lock().get_mut(address) {
            channel.reject = reason.map(str::to_string);
        }
    }

    /// Apply writes queued in `WriteMode::Hold`, in order. Returns how many
    /// were applied.
    pub fn complete_writes(&self, address: &str) -> usize {
        let mut channels = self.lock();
        let Some(channel) = channels.get_mut(address) else {
            return 0;
        };
        let held = std::mem::take(&mut channel.held);
        for value in &held {
            channel.value = Some(value.clone());
            self.notifier
                .send(&channel.sinks, ChannelEvent::Value(value.clone()));
        }
        held.len()
    }

    /// Every accepted write so far, in issue order.
    pub fn write_log(&self) -> Vec<(String, Value)> {
        self.write_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until every event queued so far has been delivered.
    ///
    /// Must not be called from a channel sink or subscriber callback.
    pub fn flush(&self) {
        self.notifier.flush();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SimChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimTransport {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn connect(&self, address: &str) -> Result<(), ChannelError> {
        let channels = self.lock();
        let channel = channels
            .get(address)
            .ok_or_else(|| ChannelError::UnknownChannel(address.to_string()))?;
        // Offline channels report `Connected` once `reconnect` is called.
        if channel.online {
            self.notifier.send(&channel.sinks, ChannelEvent::Connected);
        }
        Ok(())
    }

    fn read(&self, address: &str) -> Result<Value, ChannelError> {
        let channels = self.lock();
        let channel = channels
            .get(address)
            .ok_or_else(|| ChannelError::UnknownChannel(address.to_string()))?;
        if !channel.online {
            return Err(ChannelError::Disconnected(address.to_string()));
        }
        channel
            .value
            .clone()
            .ok_or_else(|| ChannelError::Transport(format!("'{address}' has no value")))
    }

    fn write(&self, address: &str, value: &Value) -> Result<(), ChannelError> {
        let mut channels = self.lock();
        let channel = channels
            .get_mut(address)
            .ok_or_else(|| ChannelError::UnknownChannel(address.to_string()))?;
        if !channel.online {
            return Err(ChannelError::Disconnected(address.to_string()));
        }
        if let Some(reason) = &channel.reject {
            return Err(ChannelError::Rejected {
                address: address.to_string(),
                reason: reason.clone(),
            });
        }

        self.write_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((address.to_string(), value.clone()));

        match channel.mode {
            WriteMode::Echo => {
                channel.value = Some(value.clone());
                self.notifier
                    .send(&channel.sinks, ChannelEvent::Value(value.clone()));
            }
            WriteMode::Hold => channel.held.push(value.clone()),
            WriteMode::Ignore => {}
        }
        Ok(())
    }

    fn subscribe(&self, address: &str, sink: ChannelSink) -> Result<(), ChannelError> {
        let mut channels = self.lock();
        let channel = channels
            .get_mut(address)
            .ok_or_else(|| ChannelError::UnknownChannel(address.to_string()))?;
        channel.sinks.push(sink);
        Ok(())
    }
}
