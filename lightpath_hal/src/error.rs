//! Error types for device and transport operations.
//!
//! Two families share [`HalError`]:
//! - validation errors (`NotWritable`, `InvalidValue`, `UnknownOption`,
//!   `AlreadyStaged`, `Unsupported`, `Schema`) are returned synchronously by
//!   the call that breaks the contract, before any transport call;
//! - runtime errors (`NotConnected`, `OperationTimeout`, `OperationFailed`,
//!   `ChildFailed`) travel through a [`Status`](crate::status::Status)
//!   outcome. `Signal::read` is the one synchronous `NotConnected`.

use lightpath_common::config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Error reported by a transport.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChannelError {
    /// No channel exists at the address.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// Channel exists but is not reachable.
    #[error("channel '{0}' is disconnected")]
    Disconnected(String),

    /// Channel refused the write.
    #[error("write to '{address}' rejected: {reason}")]
    Rejected {
        /// Channel address.
        address: String,
        /// Reason given by the channel.
        reason: String,
    },

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Error types for device, signal and status operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HalError {
    /// Signal is not connected to its channel.
    #[error("signal '{signal}' is not connected")]
    NotConnected {
        /// Full signal name.
        signal: String,
    },

    /// Write attempted on a read-only signal.
    #[error("signal '{signal}' is read-only")]
    NotWritable {
        /// Full signal name.
        signal: String,
    },

    /// Value rejected by the signal's or option's declared spec.
    #[error("invalid value for '{target}': {reason}")]
    InvalidValue {
        /// Full signal name or option key.
        target: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Configure key not declared by the device.
    #[error("device '{device}' has no option '{option}'")]
    UnknownOption {
        /// Device name.
        device: String,
        /// Rejected key.
        option: String,
    },

    /// `stage()` called on a staged device.
    #[error("device '{device}' is already staged")]
    AlreadyStaged {
        /// Device name.
        device: String,
    },

    /// Device has no component implementing the operation.
    #[error("device '{device}' does not support {operation}")]
    Unsupported {
        /// Device name.
        device: String,
        /// Operation name.
        operation: &'static str,
    },

    /// Operation did not complete before its deadline.
    #[error("'{target}' did not complete within {timeout:?}")]
    OperationTimeout {
        /// Operation description.
        target: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Transport rejected or failed the operation.
    #[error("'{target}' failed: {source}")]
    OperationFailed {
        /// Operation description.
        target: String,
        /// Underlying channel error.
        source: ChannelError,
    },

    /// A child of a composite operation failed.
    #[error("'{target}' failed: {source}")]
    ChildFailed {
        /// Child operation description.
        target: String,
        /// Child error.
        source: Box<HalError>,
    },

    /// Device definition rejected by the builder.
    #[error("invalid device definition '{device}': {reason}")]
    Schema {
        /// Device name (dotted path for nested devices).
        device: String,
        /// What is wrong.
        reason: String,
    },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HalError {
    /// Whether this error is raised synchronously by contract checks.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotWritable { .. }
                | Self::InvalidValue { .. }
                | Self::UnknownOption { .. }
                | Self::AlreadyStaged { .. }
                | Self::Unsupported { .. }
                | Self::Schema { .. }
        )
    }

    /// Innermost error of a `ChildFailed` chain.
    pub fn root_cause(&self) -> &HalError {
        match self {
            Self::ChildFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hal_error_display() {
        let err = HalError::NotWritable {
            signal: "motor_moving".to_string(),
        };
        assert!(err.to_string().contains("motor_moving"));

        let err = HalError::OperationFailed {
            target: "write motor_position".to_string(),
            source: ChannelError::Disconnected("TST:MTR:POS".to_string()),
        };
        assert!(err.to_string().contains("TST:MTR:POS"));
    }

    #[test]
    fn test_root_cause_unwraps_child_chain() {
        let inner = HalError::NotConnected {
            signal: "a".to_string(),
        };
        let wrapped = HalError::ChildFailed {
            target: "outer".to_string(),
            source: Box::new(HalError::ChildFailed {
                target: "inner".to_string(),
                source: Box::new(inner.clone()),
            }),
        };
        assert_eq!(wrapped.root_cause(), &inner);
        assert!(!wrapped.is_validation());
    }

    #[test]
    fn test_validation_classification() {
        assert!(
            HalError::AlreadyStaged {
                device: "d".to_string()
            }
            .is_validation()
        );
        assert!(
            !HalError::OperationTimeout {
                target: "t".to_string(),
                timeout: Duration::from_secs(1)
            }
            .is_validation()
        );
    }
}
