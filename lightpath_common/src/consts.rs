//! Workspace-wide constants for lightpath.
//!
//! Single source of truth for defaults and naming rules.

/// Default operation timeout in seconds for device writes.
pub const DEFAULT_TIMEOUT_S: f64 = 5.0;

/// Default settle time in seconds applied after a device `set`.
pub const DEFAULT_SETTLE_TIME_S: f64 = 0.0;

/// Default minimum transmission below which an inserted device blocks beam.
pub const DEFAULT_MINIMUM_TRANSMISSION: f64 = 0.1;

/// Default absolute tolerance when comparing float readbacks to a setpoint.
pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-9;

/// Separator joining device and component names into a full signal name.
pub const NAME_SEPARATOR: &str = "_";

/// Separator in configure keys routing an option into a nested device.
pub const OPTION_PATH_SEPARATOR: char = '.';

/// Name of the per-device timeout option.
pub const TIMEOUT_OPTION: &str = "timeout";

/// Name of the per-device settle time option.
pub const SETTLE_TIME_OPTION: &str = "settle_time";

/// Upper bound in seconds for any timeout or settle time.
pub const MAX_DURATION_S: f64 = 1.0e9;

/// Default name of the state component of an insertable device.
pub const DEFAULT_STATE_COMPONENT: &str = "state";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        assert!(DEFAULT_TIMEOUT_S > 0.0);
        assert!(DEFAULT_SETTLE_TIME_S >= 0.0);
        assert!((0.0..=1.0).contains(&DEFAULT_MINIMUM_TRANSMISSION));
        assert!(DEFAULT_FLOAT_TOLERANCE > 0.0);
        assert!(DEFAULT_TIMEOUT_S <= MAX_DURATION_S);
    }

    #[test]
    fn separators_do_not_collide() {
        assert!(!NAME_SEPARATOR.contains(OPTION_PATH_SEPARATOR));
    }
}
