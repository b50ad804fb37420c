//! # Console Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::robot::{RobotConfig, RobotConfigError};
use serde::Deserialize;

use crate::{
    hub_client::ReconnectPolicy,
    joint_sim::{SimParams, SimParamsError},
    state_store::StateSource,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConsoleExecParams {
    /// Feed the robot view from the simulator rather than the live controller on startup
    pub start_simulated: bool,

    /// Connect to the hub as soon as the console starts
    pub connect_on_start: bool,

    /// Also print log records on stdout. Off by default since they interleave with the prompt.
    pub echo_log_stdout: bool,

    pub reconnect: ReconnectPolicy,

    pub sim: SimParams,

    /// Configuration of the arm. If given, its joint limits replace the simulator's.
    pub robot: Option<RobotConfig>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConsoleParamsError {
    #[error("Invalid robot configuration: {0}")]
    InvalidRobot(RobotConfigError),

    #[error("Invalid simulator parameters: {0}")]
    InvalidSim(SimParamsError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ConsoleExecParams {
    pub fn initial_source(&self) -> StateSource {
        if self.start_simulated {
            StateSource::Simulated
        } else {
            StateSource::Live
        }
    }

    /// Simulator parameters with the robot's own joint limits applied if a robot configuration
    /// was given.
    ///
    /// An invalid robot configuration is an error rather than falling back to the simulator's
    /// limits, as is a simulator range which could never be honoured.
    pub fn effective_sim_params(&self) -> Result<SimParams, ConsoleParamsError> {
        let mut sim = self.sim.clone();

        if let Some(ref robot) = self.robot {
            robot.validate().map_err(ConsoleParamsError::InvalidRobot)?;

            if let Some(limits) = robot.limits_array() {
                sim.joint_limits = limits;
            }
        }

        sim.validate().map_err(ConsoleParamsError::InvalidSim)?;

        Ok(sim)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
