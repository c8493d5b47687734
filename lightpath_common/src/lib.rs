//! Lightpath Common Library
//!
//! This crate provides the shared data model and configuration loading
//! utilities for the lightpath workspace crates.
//!
//! # Module Structure
//!
//! - [`value`] - Typed channel values and their validation specs
//! - [`schema`] - Device definitions consumed by the device builder
//! - [`config`] - Configuration loading traits and types
//! - [`logging`] - Tracing subscriber setup
//! - [`consts`] - Workspace-wide defaults
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust,no_run
//! use lightpath_common::config::{ConfigError, LightpathConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = LightpathConfig::from_file(Path::new("lightpath.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod consts;
pub mod logging;
pub mod prelude;
pub mod schema;
pub mod value;
