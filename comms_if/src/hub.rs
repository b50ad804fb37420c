//! # Hub Protocol
//!
//! Messages exchanged between the console and a robot controller hub.
//!
//! Two streams are carried:
//! - Invocations: the console calls a named hub method with JSON arguments and recieves exactly
//!   one [`Completion`] carrying the same `invocation_id`.
//! - Push events: the hub broadcasts [`HubEvent`]s (state snapshots, status lines and faults) to
//!   every connected console.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::robot::{CartesianPose, JointVector, RobotState};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Move the arm to an absolute target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint_angles: Option<JointVector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cartesian_target: Option<CartesianPose>,

    /// Speed as a percentage of the joint's maximum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_completion: Option<bool>,
}

/// Nudge a single joint by a relative angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JogCommand {
    pub joint_index: usize,

    pub delta_degrees: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

/// Result of a command as reported by the controller.
///
/// `success: false` is a business rejection by the controller, not a transport fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub timestamp: DateTime<Utc>,
}

/// An asynchronous fault raised by the hub, unrelated to any pending invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubError {
    pub message: String,

    /// Any extra fields the hub attached to the fault
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

/// A call of a hub method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub invocation_id: u64,

    pub target: HubMethod,

    #[serde(default)]
    pub arguments: Vec<Value>,
}

/// The single reply to an [`Invocation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub invocation_id: u64,

    #[serde(default)]
    pub result: Value,

    /// Set if the hub could not execute the invocation at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Methods exposed by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HubMethod {
    GetState,
    Move,
    Jog,
    Home,
    Stop,
    EmergencyStop,
    Connect,
    Disconnect,
}

/// Events pushed by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum HubEvent {
    /// A full replacement of the robot state
    StateUpdate(RobotState),

    /// A human-readable status line with no attached semantics
    StatusMessage(String),

    Error(HubError),
}

/// An operator command, discriminated by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Move(MoveCommand),
    Jog(JogCommand),
    Home,
    Stop,
    EmergencyStop,
    ConnectPort(String),
    DisconnectPort,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CommandResult {
    pub fn ok<S: Into<String>>(message: S) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn rejected<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }
}

impl HubError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }
}

impl Command {
    /// The hub method which carries this command.
    pub fn hub_method(&self) -> HubMethod {
        match self {
            Command::Move(_) => HubMethod::Move,
            Command::Jog(_) => HubMethod::Jog,
            Command::Home => HubMethod::Home,
            Command::Stop => HubMethod::Stop,
            Command::EmergencyStop => HubMethod::EmergencyStop,
            Command::ConnectPort(_) => HubMethod::Connect,
            Command::DisconnectPort => HubMethod::Disconnect,
        }
    }

    /// The invocation arguments for this command.
    pub fn arguments(&self) -> Result<Vec<Value>, serde_json::Error> {
        Ok(match self {
            Command::Move(m) => vec![serde_json::to_value(m)?],
            Command::Jog(j) => vec![serde_json::to_value(j)?],
            Command::ConnectPort(p) => vec![Value::String(p.clone())],
            Command::Home | Command::Stop | Command::EmergencyStop | Command::DisconnectPort => {
                vec![]
            }
        })
    }
}

impl std::fmt::Display for HubMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let evt: HubEvent =
            serde_json::from_str(r#"{"type": "StatusMessage", "payload": "Homing"}"#).unwrap();
        assert_eq!(evt, HubEvent::StatusMessage(String::from("Homing")));

        let evt: HubEvent = serde_json::from_str(
            r#"{"type": "Error", "payload": {"message": "Serial timeout", "code": 7}}"#,
        )
        .unwrap();
        match evt {
            HubEvent::Error(e) => {
                assert_eq!(e.message, "Serial timeout");
                assert_eq!(e.details["code"], 7);
            }
            _ => panic!("Expected an error event"),
        }
    }

    #[test]
    fn test_invocation_wire_format() {
        let inv = Invocation {
            invocation_id: 3,
            target: HubMethod::Jog,
            arguments: Command::Jog(JogCommand {
                joint_index: 2,
                delta_degrees: -5.0,
                speed: None,
            })
            .arguments()
            .unwrap(),
        };

        let json: Value = serde_json::to_value(&inv).unwrap();

        assert_eq!(json["invocationId"], 3);
        assert_eq!(json["target"], "Jog");
        assert_eq!(json["arguments"][0]["jointIndex"], 2);
        assert_eq!(json["arguments"][0]["deltaDegrees"], -5.0);
        assert!(json["arguments"][0].get("speed").is_none());
    }

    #[test]
    fn test_command_methods() {
        assert_eq!(Command::EmergencyStop.hub_method(), HubMethod::EmergencyStop);
        assert_eq!(
            Command::ConnectPort(String::from("/dev/ttyUSB0")).arguments().unwrap(),
            vec![Value::String(String::from("/dev/ttyUSB0"))]
        );
        assert!(Command::Home.arguments().unwrap().is_empty());
    }
}
