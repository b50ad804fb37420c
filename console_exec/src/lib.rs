//! # Console library.
//!
//! Everything the arm console is made of, exposed so the simulated controller and the tests can
//! reuse it.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Multi-listener event subscription
pub mod events;

/// Hub client - the console's connection to a robot controller
pub mod hub_client;

/// Joint simulator - a local kinematic model of the arm
pub mod joint_sim;

/// Mirror - folds telemetry and simulator ticks into the console state
pub mod mirror;

/// Parameters for the console executable
pub mod params;

/// State store - single writer, many reader store of the console state
pub mod state_store;
