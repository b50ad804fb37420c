//! # Robot Data Model
//!
//! Shapes shared by the console, the simulated controller and the wire: joint vectors, joint
//! limits, the full robot state and the static robot configuration.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of rotational joints (degrees of freedom) on the arm.
pub const NUM_JOINTS: usize = 6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One angle per joint, in degrees.
///
/// The length is fixed at [`NUM_JOINTS`] and every entry is finite. Both invariants are checked
/// on construction and on deserialisation, so a `JointVector` received off the wire can be used
/// without further validation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct JointVector([f64; NUM_JOINTS]);

/// A 6-DOF cartesian pose of the tool point.
///
/// Units: metres for the position, degrees for the orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CartesianPose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Capabilities of a single joint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JointLimit {
    /// Human readable name of the joint
    #[serde(default)]
    pub joint_name: String,

    /// Lowest allowed absolute position.
    ///
    /// Units: degrees
    pub min_degrees: f64,

    /// Highest allowed absolute position.
    ///
    /// Units: degrees
    pub max_degrees: f64,

    /// Units: degrees/second
    pub max_speed: f64,

    /// Units: degrees/second^2
    pub max_acceleration: f64,
}

/// The complete state of the robot as mirrored into the console.
///
/// A `RobotState` is always replaced as a whole, either by a telemetry push from the controller or
/// by a simulator tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotState {
    pub joint_positions: JointVector,

    pub target_positions: JointVector,

    pub cartesian_position: Option<CartesianPose>,

    pub is_homed: bool,

    pub is_moving: bool,

    pub is_connected: bool,

    pub emergency_stop: bool,

    /// Free-form status label set by the state's producer
    pub status: String,

    pub last_update: DateTime<Utc>,
}

/// Denavit-Hartenberg parameters for one link of the arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DhParameter {
    pub joint_name: String,
    pub a: f64,
    pub d: f64,
    pub alpha: f64,
    pub theta: f64,
}

/// Serial link settings used by the controller to reach the arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub read_timeout: u32,
    pub write_timeout: u32,
}

/// Static description of the robot: kinematics, limits and serial link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotConfig {
    pub name: String,

    pub degrees_of_freedom: usize,

    #[serde(default)]
    pub dh_parameters: Vec<DhParameter>,

    pub joint_limits: Vec<JointLimit>,

    pub serial: Option<SerialConfig>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum JointVectorError {
    #[error("Expected {} joint values, found {0}", NUM_JOINTS)]
    WrongLength(usize),

    #[error("Joint {0} has a non-finite value ({1})")]
    NonFinite(usize, f64),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RobotConfigError {
    #[error("Expected {} degrees of freedom, found {0}", NUM_JOINTS)]
    WrongDof(usize),

    #[error("Expected {} joint limits, found {0}", NUM_JOINTS)]
    WrongNumLimits(usize),

    #[error("Joint {0} has a minimum ({1}) above its maximum ({2})")]
    InvertedLimit(usize, f64, f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl JointVector {
    /// Build a new vector, rejecting any non-finite entry.
    pub fn new(values: [f64; NUM_JOINTS]) -> Result<Self, JointVectorError> {
        for (i, v) in values.iter().enumerate() {
            if !v.is_finite() {
                return Err(JointVectorError::NonFinite(i, *v));
            }
        }

        Ok(Self(values))
    }

    /// All joints at zero degrees.
    pub fn zero() -> Self {
        Self([0.0; NUM_JOINTS])
    }

    /// Get the angle of one joint, or `None` if the index is out of range.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    /// Return a copy with one joint replaced.
    ///
    /// Out of range indices and non-finite values leave the vector unchanged.
    pub fn with(mut self, index: usize, value: f64) -> Self {
        if value.is_finite() {
            if let Some(v) = self.0.get_mut(index) {
                *v = value;
            }
        }
        self
    }

    pub fn as_array(&self) -> &[f64; NUM_JOINTS] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }
}

impl TryFrom<Vec<f64>> for JointVector {
    type Error = JointVectorError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        if values.len() != NUM_JOINTS {
            return Err(JointVectorError::WrongLength(values.len()));
        }

        let mut arr = [0.0; NUM_JOINTS];
        arr.copy_from_slice(&values);

        Self::new(arr)
    }
}

impl From<JointVector> for Vec<f64> {
    fn from(jv: JointVector) -> Self {
        jv.0.to_vec()
    }
}

impl std::ops::Index<usize> for JointVector {
    type Output = f64;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl JointLimit {
    /// Clamp the given angle into this joint's range.
    pub fn clamp(&self, degrees: f64) -> f64 {
        degrees.max(self.min_degrees).min(self.max_degrees)
    }

    /// Returns true if the angle is within the range, limits included.
    pub fn contains(&self, degrees: f64) -> bool {
        degrees >= self.min_degrees && degrees <= self.max_degrees
    }
}

impl RobotState {
    /// State shown before anything has been heard from a controller or simulator.
    pub fn disconnected() -> Self {
        Self {
            joint_positions: JointVector::zero(),
            target_positions: JointVector::zero(),
            cartesian_position: None,
            is_homed: false,
            is_moving: false,
            is_connected: false,
            emergency_stop: false,
            status: String::from("Disconnected"),
            last_update: Utc::now(),
        }
    }
}

impl Default for RobotState {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl RobotConfig {
    /// Check the configuration describes a 6 joint arm with sane limits.
    pub fn validate(&self) -> Result<(), RobotConfigError> {
        if self.degrees_of_freedom != NUM_JOINTS {
            return Err(RobotConfigError::WrongDof(self.degrees_of_freedom));
        }

        if self.joint_limits.len() != NUM_JOINTS {
            return Err(RobotConfigError::WrongNumLimits(self.joint_limits.len()));
        }

        for (i, l) in self.joint_limits.iter().enumerate() {
            if l.min_degrees > l.max_degrees {
                return Err(RobotConfigError::InvertedLimit(i, l.min_degrees, l.max_degrees));
            }
        }

        Ok(())
    }

    /// Joint limits as a fixed size array, or `None` if the configuration is invalid.
    pub fn limits_array(&self) -> Option<[JointLimit; NUM_JOINTS]> {
        if self.validate().is_err() {
            return None;
        }

        let l = &self.joint_limits;
        Some([
            l[0].clone(),
            l[1].clone(),
            l[2].clone(),
            l[3].clone(),
            l[4].clone(),
            l[5].clone(),
        ])
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_joint_vector_validation() {
        assert!(JointVector::new([0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).is_ok());
        assert!(matches!(
            JointVector::new([0.0, f64::NAN, 0.0, 0.0, 0.0, 0.0]),
            Err(JointVectorError::NonFinite(1, _))
        ));

        assert_eq!(
            JointVector::try_from(vec![1.0, 2.0]).unwrap_err(),
            JointVectorError::WrongLength(2)
        );

        // Wire form is a plain array and bad arrays are refused
        let jv: JointVector = serde_json::from_str("[45, 30, -45, 0, 60, 0]").unwrap();
        assert_eq!(jv[2], -45.0);
        assert!(serde_json::from_str::<JointVector>("[1, 2, 3]").is_err());
        assert_eq!(serde_json::to_string(&jv).unwrap(), "[45.0,30.0,-45.0,0.0,60.0,0.0]");
    }

    #[test]
    fn test_joint_vector_with() {
        let jv = JointVector::zero().with(3, 12.5).with(9, 1.0).with(0, f64::INFINITY);

        assert_eq!(jv.as_array(), &[0.0, 0.0, 0.0, 12.5, 0.0, 0.0]);
        assert_eq!(jv.get(6), None);
    }

    #[test]
    fn test_robot_state_wire_names() {
        let json = r#"{
            "jointPositions": [0, 0, 0, 0, 0, 0],
            "targetPositions": [10, 0, 0, 0, 0, 0],
            "cartesianPosition": null,
            "isHomed": true,
            "isMoving": true,
            "isConnected": true,
            "emergencyStop": false,
            "status": "Moving",
            "lastUpdate": "2024-03-01T12:00:00Z"
        }"#;

        let state: RobotState = serde_json::from_str(json).unwrap();

        assert!(state.is_homed);
        assert_eq!(state.target_positions[0], 10.0);
        assert_eq!(state.status, "Moving");
    }

    #[test]
    fn test_limit_clamp() {
        let limit = JointLimit {
            joint_name: String::from("J1"),
            min_degrees: -170.0,
            max_degrees: 170.0,
            max_speed: 90.0,
            max_acceleration: 180.0,
        };

        assert_eq!(limit.clamp(999.0), 170.0);
        assert_eq!(limit.clamp(-999.0), -170.0);
        assert_eq!(limit.clamp(12.0), 12.0);
        assert!(limit.contains(170.0));
        assert!(!limit.contains(170.1));
    }
}
