//! Prelude module for common re-exports.
//!
//! ```rust
//! use lightpath_hal::prelude::*;
//! ```

pub use lightpath_common::prelude::*;

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{ChannelError, HalError};

// ─── Signals and statuses ───────────────────────────────────────────
pub use crate::signal::{Connection, Kind, Reading, Signal, SignalUpdate, SubscriptionToken};
pub use crate::status::{Completion, Outcome, Status};
pub use crate::sync::{combine, combine_until, partial_failures, wait_all};

// ─── Devices ────────────────────────────────────────────────────────
pub use crate::beampath::{BeamPath, LightDevice, LightState};
pub use crate::builder::DeviceBuilder;
pub use crate::device::{Component, Configured, Device, Staged, UnstageReport};

// ─── Transports ─────────────────────────────────────────────────────
pub use crate::transport::{ChannelEvent, ChannelSink, Transport};
pub use crate::transports::simulation::{SimTransport, WriteMode};
