//! # Console Commands
//!
//! Lines typed at the console prompt are parsed into a [`ConsoleCmd`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    hub::{Command, JogCommand, MoveCommand},
    robot::{JointVector, JointVectorError},
};
use console_lib::state_store::StateSource;
use std::{convert::TryFrom, str::FromStr};
use structopt::{clap::AppSettings, StructOpt};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A command entered at the console prompt.
#[derive(Debug, Clone, PartialEq, StructOpt)]
#[structopt(name = "arm", no_version)]
pub enum ConsoleCmd {
    /// Connect to the controller hub
    Connect,

    /// Disconnect from the controller hub
    Disconnect,

    /// Ask the controller for its current state
    State,

    /// Move every joint to an absolute angle in degrees
    #[structopt(setting = AppSettings::AllowNegativeNumbers)]
    Move {
        /// Six joint angles in degrees
        angles: Vec<f64>,

        /// Speed as a percentage of each joint's maximum
        #[structopt(short, long)]
        speed: Option<f64>,
    },

    /// Move a single joint by a relative angle in degrees
    #[structopt(setting = AppSettings::AllowNegativeNumbers)]
    Jog {
        joint: usize,

        delta: f64,

        #[structopt(short, long)]
        speed: Option<f64>,
    },

    /// Home the arm
    Home,

    /// Stop all motion
    Stop,

    /// Emergency stop
    Estop,

    /// Ask the controller to open the robot on a serial port
    PortConnect { port: String },

    /// Ask the controller to close the robot's serial port
    PortDisconnect,

    /// Select what feeds the robot view, `live` or `sim`
    Source { source: SourceArg },

    /// Set one simulated joint's target in degrees
    #[structopt(setting = AppSettings::AllowNegativeNumbers)]
    SimJoint { joint: usize, degrees: f64 },

    /// Send the simulator to a named preset (home, wave, reach, pick, place)
    SimPreset { name: String },

    /// Run the simulator's demo sequence
    SimDemo,

    /// Set the simulator speed percentage (10 to 100)
    SimSpeed { percent: f64 },

    /// Animate simulated motion, `on` or `off`
    SimAnimate { animate: OnOff },

    /// Return the simulator to zero
    SimReset,

    /// Print the robot view
    Show,

    /// Leave the console
    #[structopt(alias = "exit")]
    Quit,
}

/// Choice of robot state source on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceArg(pub StateSource);

/// An `on`/`off` switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnOff(pub bool);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ConsoleCmd {
    /// Parse one line of input.
    pub fn parse_line(line: &str) -> Result<Self, structopt::clap::Error> {
        Self::from_iter_safe(std::iter::once("arm").chain(line.split_whitespace()))
    }

    /// The hub command this console command issues, if it is one.
    pub fn hub_command(&self) -> Option<Result<Command, JointVectorError>> {
        Some(Ok(match self {
            ConsoleCmd::Move { angles, speed } => {
                let joint_angles = match JointVector::try_from(angles.clone()) {
                    Ok(j) => j,
                    Err(e) => return Some(Err(e)),
                };

                Command::Move(MoveCommand {
                    joint_angles: Some(joint_angles),
                    speed: *speed,
                    ..Default::default()
                })
            }
            ConsoleCmd::Jog {
                joint,
                delta,
                speed,
            } => Command::Jog(JogCommand {
                joint_index: *joint,
                delta_degrees: *delta,
                speed: *speed,
            }),
            ConsoleCmd::Home => Command::Home,
            ConsoleCmd::Stop => Command::Stop,
            ConsoleCmd::Estop => Command::EmergencyStop,
            ConsoleCmd::PortConnect { port } => Command::ConnectPort(port.clone()),
            ConsoleCmd::PortDisconnect => Command::DisconnectPort,
            _ => return None,
        }))
    }
}

impl FromStr for SourceArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(SourceArg(StateSource::Live)),
            "sim" | "simulated" => Ok(SourceArg(StateSource::Simulated)),
            _ => Err(format!("Expected `live` or `sim`, found `{}`", s)),
        }
    }
}

impl FromStr for OnOff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" | "true" => Ok(OnOff(true)),
            "off" | "false" => Ok(OnOff(false)),
            _ => Err(format!("Expected `on` or `off`, found `{}`", s)),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
