//! Transport implementations.
//!
//! - [`simulation`] - In-process simulated channels for development and testing
//!
//! # Adding New Transports
//!
//! 1. Create a new submodule under `transports/`
//! 2. Implement the `Transport` trait from [`crate::transport`]
//! 3. Deliver every `ChannelEvent` for an address in channel order

pub mod simulation;
