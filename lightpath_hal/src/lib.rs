//! # Lightpath HAL Library
//!
//! Typed device-signal abstraction with status tracking, device composition
//! and beam path analysis.
//!
//! Physical channels are reached only through the [`transport::Transport`]
//! trait. Signals wrap one channel each, devices compose signals and nested
//! devices, and every asynchronous operation returns a [`status::Status`].
//!
//! # Module Structure
//!
//! - [`signal`] - Single channel: cached reading, writes, subscriptions
//! - [`status`] - Completion handles with exactly one terminal transition
//! - [`sync`] - Status composition with deadlines
//! - [`device`] - Composite devices: read, configure, stage, set, trigger
//! - [`builder`] - Device construction from definitions
//! - [`beampath`] - Beamline devices and beam path analysis
//! - [`transport`] - Channel transport interface
//! - [`transports`] - Transport implementations
//! - [`error`] - Error types
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          lightpath_hal                            │
//! │  ┌──────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │ DeviceBuilder│───►│   Device     │───►│  combine (sync)     │  │
//! │  │ (schema)     │    │ (composite)  │    │  composite Status   │  │
//! │  └──────────────┘    └──────┬───────┘    └─────────────────────┘  │
//! │                             │                      ▲              │
//! │                             ▼                      │              │
//! │                      ┌──────────────┐    one Status per write     │
//! │                      │   Signal     │─────────────┘               │
//! │                      └──────┬───────┘                             │
//! │                             ▼                                     │
//! │                      ┌──────────────┐                             │
//! │                      │  Transport   │ (trait object)              │
//! │                      └──────────────┘                             │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use lightpath_hal::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), HalError> {
//!     let sim = Arc::new(SimTransport::new().with_channel("TST:MTR:POS", 0.0));
//!     let schema = DeviceSchema::new("motor")
//!         .with_signal(SignalSchema::new("position", "TST:MTR:POS", ValueKind::Float))
//!         .with_set("position");
//!
//!     let motor = DeviceBuilder::new(sim).build(&schema)?;
//!     motor.connect(Duration::from_secs(1)).wait(Some(Duration::from_secs(1)));
//!     let status = motor.set(10.0)?;
//!     assert!(status.wait(Some(Duration::from_secs(1))).is_success());
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

pub mod beampath;
pub mod builder;
pub mod device;
pub mod error;
pub mod prelude;
pub mod signal;
pub mod status;
pub mod sync;
pub mod transport;
pub mod transports;

// Re-export key types for convenience
pub use crate::builder::DeviceBuilder;
pub use crate::device::Device;
pub use crate::error::HalError;
pub use crate::signal::Signal;
pub use crate::status::{Outcome, Status};
