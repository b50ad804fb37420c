//! Parameters structure for the joint simulator

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::robot::{JointLimit, NUM_JOINTS};
use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for the joint simulator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimParams {
    /// Time between two simulator ticks.
    ///
    /// Units: milliseconds
    pub tick_period_ms: u64,

    /// Speed the simulator starts at, as a percentage.
    pub default_speed_percent: f64,

    /// Animate motion towards the targets rather than jumping straight to them.
    pub animate: bool,

    /// Travel range of each joint.
    pub joint_limits: [JointLimit; NUM_JOINTS],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SimParamsError {
    #[error("Joint {0} has a minimum ({1}) above its maximum ({2})")]
    InvertedLimit(usize, f64, f64),

    #[error("Joint {0} has a non-finite limit")]
    NonFiniteLimit(usize),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimParams {
    /// Check that every joint has a usable travel range.
    pub fn validate(&self) -> Result<(), SimParamsError> {
        for (i, l) in self.joint_limits.iter().enumerate() {
            if !l.min_degrees.is_finite() || !l.max_degrees.is_finite() {
                return Err(SimParamsError::NonFiniteLimit(i));
            }

            if l.min_degrees > l.max_degrees {
                return Err(SimParamsError::InvertedLimit(i, l.min_degrees, l.max_degrees));
            }
        }

        Ok(())
    }
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            tick_period_ms: 50,
            default_speed_percent: 50.0,
            animate: true,
            joint_limits: default_joint_limits(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Limits of the reference six axis arm.
pub fn default_joint_limits() -> [JointLimit; NUM_JOINTS] {
    let limit = |name: &str, min: f64, max: f64| JointLimit {
        joint_name: String::from(name),
        min_degrees: min,
        max_degrees: max,
        max_speed: 90.0,
        max_acceleration: 180.0,
    };

    [
        limit("base", -170.0, 170.0),
        limit("shoulder", -42.0, 90.0),
        limit("elbow", -89.0, 52.0),
        limit("wrist_roll", -165.0, 165.0),
        limit("wrist_pitch", -105.0, 105.0),
        limit("wrist_yaw", -155.0, 155.0),
    ]
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validate() {
        assert_eq!(SimParams::default().validate(), Ok(()));

        let mut params = SimParams::default();
        params.joint_limits[2].min_degrees = 10.0;
        params.joint_limits[2].max_degrees = -10.0;
        assert_eq!(
            params.validate(),
            Err(SimParamsError::InvertedLimit(2, 10.0, -10.0))
        );

        let mut params = SimParams::default();
        params.joint_limits[4].max_degrees = f64::INFINITY;
        assert_eq!(params.validate(), Err(SimParamsError::NonFiniteLimit(4)));

        // A single point of travel is a valid range
        let mut params = SimParams::default();
        params.joint_limits[0].min_degrees = 5.0;
        params.joint_limits[0].max_degrees = 5.0;
        assert_eq!(params.validate(), Ok(()));
    }
}
