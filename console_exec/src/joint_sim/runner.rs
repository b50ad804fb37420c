//! Real time driver for the joint simulator

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::{JointSim, SimSnapshot};
use crate::events::{EventBus, SubscriptionId};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Owns a [`JointSim`] and ticks it at a fixed rate on its own thread, publishing each snapshot
/// to subscribers.
///
/// The tick thread is stopped when the runner is dropped.
pub struct SimRunner {
    sim: Arc<Mutex<JointSim>>,

    snapshots: Arc<EventBus<SimSnapshot>>,

    stop: Arc<AtomicBool>,

    handle: Option<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimRunnerError {
    #[error("The tick period must be greater than zero")]
    ZeroTickPeriod,

    #[error("Could not start the simulator thread: {0}")]
    ThreadSpawnError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimRunner {
    /// Start ticking `sim` once every `period`.
    pub fn start(sim: JointSim, period: Duration) -> Result<Self, SimRunnerError> {
        if period == Duration::from_millis(0) {
            return Err(SimRunnerError::ZeroTickPeriod);
        }

        let sim = Arc::new(Mutex::new(sim));
        let snapshots = Arc::new(EventBus::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let sim = sim.clone();
            let snapshots = snapshots.clone();
            let stop = stop.clone();

            thread::Builder::new()
                .name(String::from("joint_sim"))
                .spawn(move || tick_loop(sim, snapshots, stop, period))
                .map_err(SimRunnerError::ThreadSpawnError)?
        };

        debug!("Simulator running with a {} ms tick", period.as_millis());

        Ok(Self {
            sim,
            snapshots,
            stop,
            handle: Some(handle),
        })
    }

    /// Be notified of the snapshot produced by every tick.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&SimSnapshot) + Send + Sync + 'static,
    {
        self.snapshots.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.snapshots.unsubscribe(id)
    }

    /// Run `f` with exclusive access to the simulator, between two ticks.
    pub fn with_sim<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut JointSim) -> R,
    {
        f(&mut lock(&self.sim))
    }

    pub fn snapshot(&self) -> SimSnapshot {
        lock(&self.sim).snapshot()
    }
}

impl Drop for SimRunner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);

        if let Some(h) = self.handle.take() {
            if h.join().is_err() {
                warn!("The simulator thread panicked");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn tick_loop(
    sim: Arc<Mutex<JointSim>>,
    snapshots: Arc<EventBus<SimSnapshot>>,
    stop: Arc<AtomicBool>,
    period: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        let cycle_start = Instant::now();

        // Release the simulator before notifying so listeners may call back into the runner
        let snapshot = lock(&sim).tick();
        snapshots.emit(&snapshot);

        match period.checked_sub(cycle_start.elapsed()) {
            Some(d) => thread::sleep(d),
            None => warn!(
                "Simulator tick overran by {:.3} s",
                cycle_start.elapsed().as_secs_f64() - period.as_secs_f64()
            ),
        }
    }
}

fn lock(sim: &Mutex<JointSim>) -> MutexGuard<'_, JointSim> {
    match sim.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_runner_publishes_ticks() {
        let runner = SimRunner::start(JointSim::default(), Duration::from_millis(5)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        runner.subscribe(move |snap| s.lock().unwrap().push(snap.clone()));

        assert!(runner.with_sim(|sim| sim.apply_preset("wave")));

        let deadline = Instant::now() + Duration::from_secs(5);
        let settled = |s: SimSnapshot| s.joint_positions == s.target_positions;
        while !settled(runner.snapshot()) || seen.lock().unwrap().len() < 3 {
            assert!(Instant::now() < deadline, "Simulator never settled");
            thread::sleep(Duration::from_millis(5));
        }

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0].clock_ms < w[1].clock_ms));
        assert_eq!(runner.snapshot().joint_positions[0], 45.0);
    }

    #[test]
    fn test_zero_period() {
        assert!(matches!(
            SimRunner::start(JointSim::default(), Duration::from_millis(0)),
            Err(SimRunnerError::ZeroTickPeriod)
        ));
    }
}
