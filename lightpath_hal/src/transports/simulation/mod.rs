//! Simulation transport module.
//!
//! Software-emulated channels with controllable connectivity and write
//! behavior, for development and testing without a control network.

mod channel;
mod transport;

pub use channel::WriteMode;
pub use transport::SimTransport;
