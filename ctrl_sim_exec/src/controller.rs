//! # Simulated Controller
//!
//! Executes hub invocations against a [`JointSim`] standing in for the arm, with the interlocks a
//! real controller applies: no motion while the robot's port is closed, and a latched emergency
//! stop which only homing clears.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Utc;
use comms_if::{
    hub::{CommandResult, HubMethod, Invocation, JogCommand, MoveCommand},
    robot::{RobotState, NUM_JOINTS},
};
use console_lib::joint_sim::{JointSim, SimParams};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct SimController {
    sim: JointSim,

    /// Name of the port the robot was opened on, if it is open
    port_name: Option<String>,

    is_homed: bool,

    emergency_stop: bool,

    /// Status lines to broadcast, drained by the main loop
    status_messages: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimController {
    pub fn new(params: &SimParams) -> Self {
        Self {
            sim: JointSim::new(params),
            port_name: None,
            is_homed: false,
            emergency_stop: false,
            status_messages: Vec::new(),
        }
    }

    /// Execute an invocation, returning its result or the reason it couldn't be executed at all.
    pub fn handle(&mut self, inv: &Invocation) -> Result<Value, String> {
        let result = match inv.target {
            HubMethod::GetState => return to_value(&self.state()),
            HubMethod::Connect => {
                let port: String = arg(inv)?;
                info!("Robot connected on {}", port);
                self.status_messages
                    .push(format!("Robot connected on {}", port));
                self.port_name = Some(port);
                return Ok(Value::Bool(true));
            }
            HubMethod::Disconnect => {
                self.sim.halt();
                if let Some(p) = self.port_name.take() {
                    info!("Robot disconnected from {}", p);
                    self.status_messages.push(String::from("Robot disconnected"));
                }
                return Ok(Value::Null);
            }
            HubMethod::Move => self.move_to(arg(inv)?),
            HubMethod::Jog => self.jog(arg(inv)?),
            HubMethod::Home => self.home(),
            HubMethod::Stop => {
                self.sim.halt();
                CommandResult::ok("Stopped")
            }
            HubMethod::EmergencyStop => {
                self.sim.halt();
                self.emergency_stop = true;
                warn!("Emergency stop latched");
                self.status_messages
                    .push(String::from("EMERGENCY STOP ACTIVE"));
                CommandResult::ok("Emergency stop engaged")
            }
        };

        if !result.success {
            info!("{} rejected: {}", inv.target, result.message);
        }

        to_value(&result)
    }

    /// Advance the arm one tick and return its new state.
    pub fn tick(&mut self) -> RobotState {
        self.sim.tick();
        self.state()
    }

    pub fn state(&self) -> RobotState {
        let snap = self.sim.snapshot();
        let is_connected = self.port_name.is_some();

        let status = if !is_connected {
            "Disconnected"
        } else if self.emergency_stop {
            "Emergency stop"
        } else if snap.is_moving {
            "Moving"
        } else {
            "Idle"
        };

        RobotState {
            joint_positions: snap.joint_positions,
            target_positions: snap.target_positions,
            cartesian_position: None,
            is_homed: self.is_homed,
            is_moving: snap.is_moving,
            is_connected,
            emergency_stop: self.emergency_stop,
            status: String::from(status),
            last_update: Utc::now(),
        }
    }

    pub fn take_status_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.status_messages)
    }

    fn move_to(&mut self, cmd: MoveCommand) -> CommandResult {
        if let Some(r) = self.check_motion_allowed() {
            return r;
        }

        let angles = match cmd.joint_angles {
            Some(a) => a,
            None => return CommandResult::rejected("Cartesian moves are not supported"),
        };

        if let Some(s) = cmd.speed {
            self.sim.set_speed(s);
        }

        if self.sim.set_targets(&angles) {
            CommandResult::ok("Moving")
        } else {
            CommandResult::rejected("Arm is busy")
        }
    }

    fn jog(&mut self, cmd: JogCommand) -> CommandResult {
        if let Some(r) = self.check_motion_allowed() {
            return r;
        }

        if cmd.joint_index >= NUM_JOINTS {
            return CommandResult::rejected(format!("Invalid joint index {}", cmd.joint_index));
        }

        if let Some(s) = cmd.speed {
            self.sim.set_speed(s);
        }

        let target = self.sim.snapshot().target_positions[cmd.joint_index] + cmd.delta_degrees;

        if self.sim.set_joint_target(cmd.joint_index, target) {
            CommandResult::ok(format!("Jogging joint {}", cmd.joint_index))
        } else {
            CommandResult::rejected("Invalid jog")
        }
    }

    fn home(&mut self) -> CommandResult {
        if self.port_name.is_none() {
            return CommandResult::rejected("Robot not connected");
        }

        if self.emergency_stop {
            info!("Emergency stop cleared by homing");
            self.emergency_stop = false;
        }

        self.sim.apply_preset("home");
        self.is_homed = true;

        CommandResult::ok("Homing")
    }

    fn check_motion_allowed(&self) -> Option<CommandResult> {
        if self.port_name.is_none() {
            Some(CommandResult::rejected("Robot not connected"))
        } else if self.emergency_stop {
            Some(CommandResult::rejected("Emergency stop active"))
        } else {
            None
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse the first argument of an invocation.
fn arg<T: DeserializeOwned>(inv: &Invocation) -> Result<T, String> {
    let raw = inv
        .arguments
        .get(0)
        .ok_or_else(|| format!("{} expects an argument", inv.target))?;

    serde_json::from_value(raw.clone())
        .map_err(|e| format!("Invalid argument for {}: {}", inv.target, e))
}

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, String> {
    serde_json::to_value(v).map_err(|e| e.to_string())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::hub::Command;

    fn invoke(ctrl: &mut SimController, cmd: Command) -> Result<Value, String> {
        ctrl.handle(&Invocation {
            invocation_id: 0,
            target: cmd.hub_method(),
            arguments: cmd.arguments().unwrap(),
        })
    }

    fn result(v: Result<Value, String>) -> CommandResult {
        serde_json::from_value(v.unwrap()).unwrap()
    }

    fn connected() -> SimController {
        let mut ctrl = SimController::new(&SimParams::default());
        assert_eq!(
            invoke(&mut ctrl, Command::ConnectPort(String::from("COM3"))),
            Ok(Value::Bool(true))
        );
        ctrl
    }

    fn move_cmd(angles: [f64; NUM_JOINTS]) -> Command {
        Command::Move(MoveCommand {
            joint_angles: Some(comms_if::robot::JointVector::new(angles).unwrap()),
            ..Default::default()
        })
    }

    #[test]
    fn test_motion_needs_connection() {
        let mut ctrl = SimController::new(&SimParams::default());

        let r = result(invoke(&mut ctrl, move_cmd([10.0; NUM_JOINTS])));
        assert!(!r.success);
        assert!(!ctrl.state().is_connected);

        let mut ctrl = connected();
        assert_eq!(ctrl.take_status_messages(), vec!["Robot connected on COM3"]);
        assert!(result(invoke(&mut ctrl, move_cmd([10.0; NUM_JOINTS]))).success);
        assert_eq!(ctrl.state().target_positions[0], 10.0);
    }

    #[test]
    fn test_estop_latches_until_home() {
        let mut ctrl = connected();
        invoke(&mut ctrl, move_cmd([30.0; NUM_JOINTS])).unwrap();
        ctrl.tick();

        assert!(result(invoke(&mut ctrl, Command::EmergencyStop)).success);
        let state = ctrl.state();
        assert!(state.emergency_stop);
        assert_eq!(state.target_positions, state.joint_positions);

        let r = result(invoke(&mut ctrl, move_cmd([0.0; NUM_JOINTS])));
        assert!(!r.success);
        assert_eq!(r.message, "Emergency stop active");

        assert!(result(invoke(&mut ctrl, Command::Home)).success);
        let state = ctrl.state();
        assert!(!state.emergency_stop);
        assert!(state.is_homed);
        assert!(result(invoke(&mut ctrl, move_cmd([5.0; NUM_JOINTS]))).success);
    }

    #[test]
    fn test_jog() {
        let mut ctrl = connected();

        let jog = |joint_index, delta_degrees| {
            Command::Jog(JogCommand {
                joint_index,
                delta_degrees,
                speed: None,
            })
        };

        assert!(result(invoke(&mut ctrl, jog(1, 20.0))).success);
        assert!(result(invoke(&mut ctrl, jog(1, 100.0))).success);
        assert_eq!(ctrl.state().target_positions[1], 90.0);

        assert!(!result(invoke(&mut ctrl, jog(6, 1.0))).success);
    }

    #[test]
    fn test_cartesian_move_rejected() {
        let mut ctrl = connected();

        let r = result(invoke(&mut ctrl, Command::Move(MoveCommand::default())));

        assert!(!r.success);
        assert_eq!(ctrl.state().target_positions[0], 0.0);
    }

    #[test]
    fn test_malformed_arguments() {
        let mut ctrl = connected();

        let r = ctrl.handle(&Invocation {
            invocation_id: 4,
            target: HubMethod::Jog,
            arguments: vec![Value::String(String::from("left a bit"))],
        });
        assert!(r.is_err());

        let r = ctrl.handle(&Invocation {
            invocation_id: 5,
            target: HubMethod::Connect,
            arguments: vec![],
        });
        assert!(r.is_err());
    }

    #[test]
    fn test_disconnect() {
        let mut ctrl = connected();
        ctrl.take_status_messages();

        assert_eq!(invoke(&mut ctrl, Command::DisconnectPort), Ok(Value::Null));

        let state = ctrl.state();
        assert!(!state.is_connected);
        assert_eq!(state.status, "Disconnected");
        assert_eq!(ctrl.take_status_messages(), vec!["Robot disconnected"]);
    }
}
