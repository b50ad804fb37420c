//! # Simulated Controller Executable
//!
//! Stands in for a robot controller hub so the console's live path can be exercised without an
//! arm. Invocations from any number of consoles are executed against a joint simulator, and the
//! simulated robot state is broadcast on every tick.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Invocation handling against the simulated arm.
mod controller;

/// Hub server abstraction.
mod hub_server;

/// Parameters for the simulated controller executable.
mod params;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::hub::{Completion, HubError, HubEvent};
use log::{info, trace, warn};
use serde_json::Value;
use std::{
    thread,
    time::{Duration, Instant},
};

// Internal
use controller::SimController;
use hub_server::{HubServer, Incoming};
use params::CtrlSimExecParams;
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session =
        Session::new("ctrl_sim_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session, true).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Simulated Controller Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: CtrlSimExecParams = util::params::load("ctrl_sim_exec.toml")
        .wrap_err("Could not load the simulated controller parameters")?;

    params
        .sim
        .validate()
        .wrap_err("Invalid simulator parameters")?;

    info!("Parameters loaded");

    // ---- SERVER INITIALISATION ----

    let server = HubServer::new(&params).wrap_err("Failed to initialise server")?;
    let mut controller = SimController::new(&params.sim);
    let cycle_period = Duration::from_millis(params.sim.tick_period_ms.max(1));

    info!(
        "Serving invocations on {}, events on {}",
        params.invoke_endpoint, params.event_endpoint
    );

    // ---- MAIN LOOP ----

    info!("Initialisation complete, entering main loop");

    loop {
        let cycle_start = Instant::now();

        // Serve invocations until the end of this cycle
        while let Some(remaining) = cycle_period.checked_sub(cycle_start.elapsed()) {
            let incoming = match server.next_invocation(remaining.as_millis() as i64) {
                Some(i) => i,
                None => break,
            };

            let (peer, completion) = match incoming {
                Incoming::Invocation(peer, inv) => {
                    trace!("Invocation {} ({})", inv.invocation_id, inv.target);

                    let completion = match controller.handle(&inv) {
                        Ok(result) => Completion {
                            invocation_id: inv.invocation_id,
                            result,
                            error: None,
                        },
                        Err(e) => {
                            warn!("Could not execute {}: {}", inv.target, e);
                            publish(&server, HubEvent::Error(HubError::new(e.clone())));
                            Completion {
                                invocation_id: inv.invocation_id,
                                result: Value::Null,
                                error: Some(e),
                            }
                        }
                    };

                    (peer, completion)
                }
                Incoming::Malformed {
                    peer,
                    invocation_id,
                    error,
                } => {
                    warn!("Malformed invocation: {}", error);
                    publish(&server, HubEvent::Error(HubError::new(error.clone())));

                    match invocation_id {
                        Some(id) => (
                            peer,
                            Completion {
                                invocation_id: id,
                                result: Value::Null,
                                error: Some(error),
                            },
                        ),
                        // Nothing the console could correlate a reply with
                        None => continue,
                    }
                }
            };

            if let Err(e) = server.complete(&peer, &completion) {
                warn!("Could not send completion: {}", e);
            }
        }

        // Tick the arm and broadcast its state
        let state = controller.tick();

        for msg in controller.take_status_messages() {
            publish(&server, HubEvent::StatusMessage(msg));
        }
        publish(&server, HubEvent::StateUpdate(state));

        // Sleep out the rest of the cycle if invocation handling returned early
        if let Some(d) = cycle_period.checked_sub(cycle_start.elapsed()) {
            thread::sleep(d);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn publish(server: &HubServer, event: HubEvent) {
    if let Err(e) = server.publish(&event) {
        warn!("Could not publish event: {}", e);
    }
}
