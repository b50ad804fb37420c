//! # Arm Console Executable
//!
//! Interactive operator console for a six axis robot arm. The console mirrors the arm's state
//! either from a live controller hub or from the local joint simulator, and lets the operator
//! command both from a line prompt. Type `help` at the prompt for the list of commands.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Commands accepted at the prompt.
mod console_cmd;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use comms_if::{hub::CommandResult, net::NetParams, robot::RobotState};
use log::{info, warn};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

// Internal
use console_cmd::ConsoleCmd;
use console_lib::{
    hub_client::{transport::ZmqConnector, CommandOutcome, HubClient},
    joint_sim::{JointSim, SimRunner},
    mirror::Mirror,
    params::ConsoleExecParams,
    state_store::{state_store, ConsoleSnapshot, StateView},
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "arm $ ";

/// History file, relative to the software root
const HISTORY_PATH: &str = "data/console_history.txt";

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session =
        Session::new("console_exec", "sessions").wrap_err("Failed to create the session")?;

    // ---- LOAD PARAMETERS ----

    let params: ConsoleExecParams = util::params::load("console_exec.toml")
        .wrap_err("Could not load the console parameters")?;
    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load the network parameters")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session, params.echo_log_stdout)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Arm Console Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- STATE ----

    let (publisher, view) = state_store(params.initial_source());
    let mirror = Arc::new(Mutex::new(Mirror::new(publisher)));

    print_status_lines(&view);

    // ---- HUB CLIENT ----

    let client = HubClient::new(Box::new(ZmqConnector::new(net_params)), params.reconnect);
    {
        let mirror = mirror.clone();
        client.subscribe(move |evt| {
            if let Ok(mut m) = mirror.lock() {
                m.apply_channel_event(evt);
            }
        });
    }

    info!("Hub client initialised");

    // ---- SIMULATOR ----

    let sim_params = params
        .effective_sim_params()
        .wrap_err("Invalid simulator or robot parameters")?;
    let sim = SimRunner::start(
        JointSim::new(&sim_params),
        Duration::from_millis(sim_params.tick_period_ms),
    )
    .wrap_err("Failed to start the joint simulator")?;
    {
        let mirror = mirror.clone();
        sim.subscribe(move |snap| {
            if let Ok(mut m) = mirror.lock() {
                m.apply_sim_snapshot(snap);
            }
        });
    }

    info!("Simulator initialised");

    if params.connect_on_start && !client.connect() {
        println!("Could not connect to the hub, use `connect` to try again");
    }

    // ---- PROMPT LOOP ----

    info!("Initialisation complete, entering prompt loop");

    let mut rl = DefaultEditor::new().wrap_err("Could not create the line editor")?;
    let history_path = host::get_sw_root().ok().map(|r| r.join(HISTORY_PATH));
    if let Some(ref p) = history_path {
        if rl.load_history(p).is_err() {
            info!("No console history found at {:?}", p);
        }
    }

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                warn!("Could not read from the prompt: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }
        rl.add_history_entry(line.as_str()).ok();

        let cmd = match ConsoleCmd::parse_line(&line) {
            Ok(c) => c,
            Err(e) => {
                println!("{}", e.message);
                continue;
            }
        };

        info!("Operator command: {:?}", cmd);

        if !run_command(cmd, &client, &sim, &mirror, &view) {
            break;
        }
    }

    // ---- SHUTDOWN ----

    info!("Shutting down");

    if let Some(p) = history_path {
        save_history(&mut rl, p);
    }

    client.disconnect();

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Execute one console command. Returns `false` if the console should exit.
fn run_command(
    cmd: ConsoleCmd,
    client: &HubClient,
    sim: &SimRunner,
    mirror: &Arc<Mutex<Mirror>>,
    view: &StateView,
) -> bool {
    if let Some(hub_cmd) = cmd.hub_command() {
        match hub_cmd {
            Ok(c) => print_outcome(client.execute(&c)),
            Err(e) => println!("Invalid command: {}", e),
        }
        return true;
    }

    match cmd {
        ConsoleCmd::Connect => {
            if client.connect() {
                println!("Connected");
            } else {
                println!("Connection failed");
            }
        }
        ConsoleCmd::Disconnect => client.disconnect(),
        ConsoleCmd::State => match client.get_state() {
            Some(s) => print_robot(&s),
            None => println!("No state available"),
        },
        ConsoleCmd::Source { source } => match mirror.lock() {
            Ok(mut m) => m.select_source(source.0),
            Err(_) => warn!("State mirror is poisoned, cannot change source"),
        },
        ConsoleCmd::SimJoint { joint, degrees } => {
            report(sim.with_sim(|s| s.set_joint_target(joint, degrees)))
        }
        ConsoleCmd::SimPreset { name } => report(sim.with_sim(|s| s.apply_preset(&name))),
        ConsoleCmd::SimDemo => report(sim.with_sim(|s| s.start_demo())),
        ConsoleCmd::SimSpeed { percent } => sim.with_sim(|s| s.set_speed(percent)),
        ConsoleCmd::SimAnimate { animate } => sim.with_sim(|s| s.set_animate(animate.0)),
        ConsoleCmd::SimReset => sim.with_sim(|s| s.reset()),
        ConsoleCmd::Show => print_snapshot(&view.snapshot()),
        ConsoleCmd::Quit => return false,

        // Hub commands are handled above
        _ => (),
    }

    true
}

/// Print every new status line as soon as it is published.
fn print_status_lines(view: &StateView) {
    let last: Mutex<Option<String>> = Mutex::new(None);

    view.subscribe(move |snap| {
        if let Ok(mut last) = last.lock() {
            if snap.status_message.is_some() && *last != snap.status_message {
                *last = snap.status_message.clone();
                if let Some(ref m) = snap.status_message {
                    println!("[{}]", m);
                }
            }
        }
    });
}

fn report(accepted: bool) {
    if !accepted {
        println!("Rejected (is the demo running?)");
    }
}

fn print_outcome(outcome: Option<CommandOutcome>) {
    match outcome {
        Some(CommandOutcome::Result(r)) => print_result(&r),
        Some(CommandOutcome::PortConnected(true)) => println!("Robot port opened"),
        Some(CommandOutcome::PortConnected(false)) => println!("Robot port could not be opened"),
        Some(CommandOutcome::PortDisconnected) => println!("Robot port closed"),
        None => println!("No response (is the hub connected?)"),
    }
}

fn print_result(result: &CommandResult) {
    if result.success {
        println!("OK: {}", result.message);
    } else {
        println!("REJECTED: {}", result.message);
    }
}

fn print_robot(s: &RobotState) {
    println!("  position: {:?}", s.joint_positions.as_array());
    println!("  target:   {:?}", s.target_positions.as_array());
    println!(
        "  moving: {}, homed: {}, connected: {}, estop: {}",
        s.is_moving, s.is_homed, s.is_connected, s.emergency_stop
    );
    println!("  status: {}", s.status);
}

fn print_snapshot(snap: &ConsoleSnapshot) {
    println!(
        "source: {:?}, hub: {:?}, seq: {}",
        snap.source, snap.connection, snap.seq
    );
    print_robot(&snap.robot);
    if let Some(ref m) = snap.status_message {
        println!("  last message: {}", m);
    }
}

fn save_history(rl: &mut DefaultEditor, path: PathBuf) {
    if let Some(dir) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!("Could not create the history directory: {}", e);
            return;
        }
    }

    if let Err(e) = rl.save_history(&path) {
        warn!("Could not save the console history: {}", e);
    }
}
