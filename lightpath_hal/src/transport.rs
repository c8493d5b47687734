//! Channel transport interface.
//!
//! Signals reach physical channels only through this trait, injected as an
//! `Arc<dyn Transport>` at construction. A transport offers four primitives:
//!
//! | Primitive | Contract |
//! |-----------|----------|
//! | `connect` | Start connecting; report `Connected` through the sink when up |
//! | `read` | Current channel value, or an error when unreachable |
//! | `write` | Issue a write; confirmation arrives later as a `Value` event |
//! | `subscribe` | Register a sink for every `ChannelEvent` of an address |
//!
//! Sinks are called on the transport's delivery thread, in channel order,
//! and must return quickly.

use crate::error::ChannelError;
use lightpath_common::value::Value;
use std::sync::Arc;

/// Event delivered by a transport for one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Channel became reachable.
    Connected,
    /// Channel became unreachable.
    Disconnected,
    /// Channel reported a value.
    Value(Value),
}

/// Receiver of channel events.
pub type ChannelSink = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Interface to a control-system channel layer.
pub trait Transport: Send + Sync {
    /// Returns the transport's identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Begin connecting to `address`.
    ///
    /// # Errors
    /// Returns `ChannelError::UnknownChannel` if the address cannot exist.
    fn connect(&self, address: &str) -> Result<(), ChannelError>;

    /// Read the current value of `address`.
    ///
    /// # Errors
    /// Any `ChannelError` when the channel is unreachable.
    fn read(&self, address: &str) -> Result<Value, ChannelError>;

    /// Issue a write of `value` to `address`.
    ///
    /// Returning `Ok` only means the write was accepted for delivery.
    ///
    /// # Errors
    /// Any `ChannelError` when the write cannot be issued.
    fn write(&self, address: &str, value: &Value) -> Result<(), ChannelError>;

    /// Register `sink` for all events of `address`.
    ///
    /// # Errors
    /// Returns `ChannelError::UnknownChannel` if the address cannot exist.
    fn subscribe(&self, address: &str, sink: ChannelSink) -> Result<(), ChannelError>;
}
