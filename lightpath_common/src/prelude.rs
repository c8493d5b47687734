//! Prelude module for common re-exports.
//!
//! ```rust
//! use lightpath_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;
pub use crate::logging::init_tracing;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    BeamPathConfig, ConfigError, ConfigLoader, DefaultsConfig, LightpathConfig, SharedConfig,
    load_device_dir,
};

// ─── Device definitions ─────────────────────────────────────────────
pub use crate::schema::{
    Access, ComponentSchema, DeviceSchema, LightSchema, MpsSchema, OptionSchema, SignalKind,
    SignalSchema, TriggerSchema,
};

// ─── Values ─────────────────────────────────────────────────────────
pub use crate::value::{Value, ValueError, ValueKind, ValueSpec};
