//! # Simulated Controller Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use console_lib::joint_sim::SimParams;
use serde::Deserialize;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct CtrlSimExecParams {
    /// Endpoint the invocation (ROUTER) socket binds to
    pub invoke_endpoint: String,

    /// Endpoint the event (PUB) socket binds to
    pub event_endpoint: String,

    /// Parameters of the simulated arm
    #[serde(default)]
    pub sim: SimParams,
}
