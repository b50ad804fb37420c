//! Implementation of the joint simulator state machine

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Utc;
use comms_if::robot::{JointLimit, JointVector, RobotState, NUM_JOINTS};
use log::{debug, trace};

use super::{
    is_travelling, preset, step, SimParams, DEMO_HOLD_MS, DEMO_SEQUENCE, MAX_SPEED_PERCENT,
    MIN_SPEED_PERCENT,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The simulated arm.
#[derive(Debug, Clone)]
pub struct JointSim {
    limits: [JointLimit; NUM_JOINTS],

    tick_period_ms: u64,

    current: [f64; NUM_JOINTS],

    target: [f64; NUM_JOINTS],

    speed_percent: f64,

    animate: bool,

    is_moving: bool,

    /// Name of the preset last applied, cleared on a manual edit
    active_preset: Option<&'static str>,

    demo: Option<DemoProgress>,

    /// Virtual time, advanced by one tick period on each tick.
    ///
    /// Units: milliseconds
    clock_ms: u64,
}

/// Immutable picture of the simulator after a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SimSnapshot {
    pub joint_positions: JointVector,

    pub target_positions: JointVector,

    pub is_moving: bool,

    pub speed_percent: f64,

    pub animate: bool,

    pub active_preset: Option<String>,

    /// Index into the demo sequence, if the demo is running
    pub demo_step: Option<usize>,

    /// Units: milliseconds
    pub clock_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct DemoProgress {
    step: usize,
    step_started_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl JointSim {
    pub fn new(params: &SimParams) -> Self {
        let mut sim = Self {
            limits: params.joint_limits.clone(),
            tick_period_ms: params.tick_period_ms,
            current: [0.0; NUM_JOINTS],
            target: [0.0; NUM_JOINTS],
            speed_percent: clamp_speed(params.default_speed_percent),
            animate: params.animate,
            is_moving: false,
            active_preset: None,
            demo: None,
            clock_ms: 0,
        };

        // Zero may be outside the range of an oddly configured joint
        sim.reset();

        sim
    }

    // ---- MANUAL CONTROLS ----

    /// Set the target of one joint.
    ///
    /// Returns `false` and changes nothing if the demo is running, the index is out of range or
    /// the angle isn't finite.
    pub fn set_joint_target(&mut self, index: usize, degrees: f64) -> bool {
        if self.demo_running() || index >= NUM_JOINTS || !degrees.is_finite() {
            return false;
        }

        self.target[index] = self.limits[index].clamp(degrees);
        self.active_preset = None;

        true
    }

    /// Set the targets of every joint at once. Rejected while the demo is running.
    pub fn set_targets(&mut self, targets: &JointVector) -> bool {
        if self.demo_running() {
            return false;
        }

        self.write_targets(targets.as_array());
        self.active_preset = None;

        true
    }

    /// Send the arm to a named preset. Unknown names and requests made while the demo is running
    /// are ignored and return `false`.
    pub fn apply_preset(&mut self, name: &str) -> bool {
        if self.demo_running() {
            return false;
        }

        self.activate_preset(name)
    }

    /// Start the demo sequence from its first preset. Returns `false` if it is already running.
    pub fn start_demo(&mut self) -> bool {
        if self.demo_running() {
            return false;
        }

        debug!("Starting demo sequence");
        self.demo = Some(DemoProgress {
            step: 0,
            step_started_ms: self.clock_ms,
        });
        self.activate_preset(DEMO_SEQUENCE[0]);

        true
    }

    /// Set the speed, clamped to the allowed range. Non-finite values are ignored.
    pub fn set_speed(&mut self, speed_percent: f64) {
        if speed_percent.is_finite() {
            self.speed_percent = clamp_speed(speed_percent);
        }
    }

    pub fn set_animate(&mut self, animate: bool) {
        self.animate = animate;
    }

    /// Return every joint and target to zero, clear the active preset and stop the demo.
    pub fn reset(&mut self) {
        for i in 0..NUM_JOINTS {
            let zero = self.limits[i].clamp(0.0);
            self.current[i] = zero;
            self.target[i] = zero;
        }

        self.is_moving = false;
        self.active_preset = None;
        self.demo = None;
    }

    /// Stop where the arm currently is. Also stops the demo.
    pub fn halt(&mut self) {
        self.target = self.current;
        self.active_preset = None;
        self.demo = None;
    }

    // ---- ACCESSORS ----

    pub fn demo_running(&self) -> bool {
        self.demo.is_some()
    }

    pub fn is_moving(&self) -> bool {
        self.is_moving
    }

    pub fn limits(&self) -> &[JointLimit; NUM_JOINTS] {
        &self.limits
    }

    pub fn snapshot(&self) -> SimSnapshot {
        SimSnapshot {
            joint_positions: JointVector::new(self.current).unwrap_or_default(),
            target_positions: JointVector::new(self.target).unwrap_or_default(),
            is_moving: self.is_moving,
            speed_percent: self.speed_percent,
            animate: self.animate,
            active_preset: self.active_preset.map(String::from),
            demo_step: self.demo.map(|d| d.step),
            clock_ms: self.clock_ms,
        }
    }

    // ---- CYCLIC PROCESSING ----

    /// Advance the simulation by one tick period.
    pub fn tick(&mut self) -> SimSnapshot {
        self.clock_ms += self.tick_period_ms;

        self.advance_demo();

        if self.animate {
            for i in 0..NUM_JOINTS {
                self.current[i] = step(self.current[i], self.target[i], self.speed_percent);
            }
        } else {
            self.current = self.target;
        }

        self.is_moving = self
            .current
            .iter()
            .zip(self.target.iter())
            .any(|(c, t)| is_travelling(*c, *t));

        trace!("Sim tick {} ms: {:?}", self.clock_ms, self.current);

        self.snapshot()
    }

    fn advance_demo(&mut self) {
        let mut progress = match self.demo {
            Some(p) => p,
            None => return,
        };

        if self.clock_ms.saturating_sub(progress.step_started_ms) < DEMO_HOLD_MS {
            return;
        }

        progress.step += 1;
        progress.step_started_ms += DEMO_HOLD_MS;

        match DEMO_SEQUENCE.get(progress.step) {
            Some(name) => {
                self.demo = Some(progress);
                self.activate_preset(name);
            }
            None => {
                debug!("Demo sequence complete");
                self.demo = None;
                self.active_preset = None;
            }
        }
    }

    fn activate_preset(&mut self, name: &str) -> bool {
        let pose = match preset(name) {
            Some(p) => p,
            None => return false,
        };

        self.write_targets(&pose);

        // Keep the canonical static name rather than the caller's spelling
        self.active_preset = super::PRESETS
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(n, _)| *n);

        debug!("Preset {} applied", name);

        true
    }

    fn write_targets(&mut self, targets: &[f64; NUM_JOINTS]) {
        for i in 0..NUM_JOINTS {
            if targets[i].is_finite() {
                self.target[i] = self.limits[i].clamp(targets[i]);
            }
        }
    }
}

impl Default for JointSim {
    fn default() -> Self {
        Self::new(&SimParams::default())
    }
}

impl SimSnapshot {
    /// Express the simulator as a robot state, as shown when the simulator feeds the console.
    pub fn to_robot_state(&self) -> RobotState {
        RobotState {
            joint_positions: self.joint_positions,
            target_positions: self.target_positions,
            cartesian_position: None,
            is_homed: false,
            is_moving: self.is_moving,
            is_connected: true,
            emergency_stop: false,
            status: String::from(if self.is_moving { "Moving" } else { "Idle" }),
            last_update: Utc::now(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn clamp_speed(speed_percent: f64) -> f64 {
    speed_percent.max(MIN_SPEED_PERCENT).min(MAX_SPEED_PERCENT)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn targets_reached(s: &SimSnapshot) -> bool {
        s.joint_positions
            .iter()
            .zip(s.target_positions.iter())
            .all(|(c, t)| !is_travelling(*c, *t))
    }

    #[test]
    fn test_convergence() {
        let mut sim = JointSim::default();
        assert!(sim.apply_preset("wave"));

        let mut prev_moving = false;
        let mut stopped_at = None;

        for n in 1..=80 {
            let snap = sim.tick();

            if !snap.is_moving {
                // Stops moving exactly when the last joint gets within tolerance
                assert!(targets_reached(&snap));
                assert!(prev_moving);
                stopped_at = Some(n);
                break;
            }

            assert!(!targets_reached(&snap));
            prev_moving = snap.is_moving;
        }

        assert!(stopped_at.is_some(), "Did not converge within 80 ticks");
    }

    #[test]
    fn test_fixed_point() {
        let mut sim = JointSim::default();
        sim.apply_preset("reach");

        for _ in 0..100 {
            sim.tick();
        }

        let arrived = sim.snapshot();
        assert_eq!(arrived.joint_positions, arrived.target_positions);

        for _ in 0..20 {
            let snap = sim.tick();
            assert_eq!(snap.joint_positions, arrived.joint_positions);
            assert!(!snap.is_moving);
        }
    }

    #[test]
    fn test_clamping() {
        let mut sim = JointSim::default();

        assert!(sim.set_joint_target(0, 999.0));
        assert!(sim.set_joint_target(1, -999.0));
        let snap = sim.snapshot();
        assert_eq!(snap.target_positions[0], 170.0);
        assert_eq!(snap.target_positions[1], -42.0);

        // Presets are clamped too
        sim.apply_preset("place");
        assert_eq!(sim.snapshot().target_positions[5], 155.0);

        // Positions never leave the range
        for _ in 0..200 {
            let snap = sim.tick();
            for (i, p) in snap.joint_positions.iter().enumerate() {
                assert!(sim.limits()[i].contains(*p));
            }
        }

        // Bad indices and values are refused
        assert!(!sim.set_joint_target(6, 10.0));
        assert!(!sim.set_joint_target(0, f64::NAN));
    }

    #[test]
    fn test_joints_independent() {
        let mut sim = JointSim::default();
        sim.set_joint_target(0, 90.0);

        for _ in 0..10 {
            sim.tick();
        }
        let before = sim.snapshot().joint_positions[0];

        // Retargeting another joint does not restart joint 0's motion
        sim.set_joint_target(2, -30.0);
        let snap = sim.tick();

        assert!(snap.joint_positions[0] > before);
        assert_eq!(snap.target_positions[0], 90.0);
        assert!(snap.joint_positions[2] < 0.0);
    }

    #[test]
    fn test_speed() {
        let mut slow = JointSim::default();
        let mut fast = JointSim::default();
        slow.set_speed(1.0);
        fast.set_speed(500.0);

        assert_eq!(slow.snapshot().speed_percent, MIN_SPEED_PERCENT);
        assert_eq!(fast.snapshot().speed_percent, MAX_SPEED_PERCENT);

        slow.set_joint_target(0, 100.0);
        fast.set_joint_target(0, 100.0);

        assert!((slow.tick().joint_positions[0] - 2.0).abs() < 1e-9);
        assert!((fast.tick().joint_positions[0] - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_teleport() {
        let mut sim = JointSim::default();
        sim.set_animate(false);
        sim.apply_preset("pick");

        let snap = sim.tick();

        assert_eq!(snap.joint_positions, snap.target_positions);
        assert!(!snap.is_moving);
        assert_eq!(snap.joint_positions[0], 90.0);
    }

    #[test]
    fn test_demo_sequence() {
        let mut sim = JointSim::default();

        assert!(sim.start_demo());
        assert!(!sim.start_demo());

        let mut activations = vec![sim.snapshot().active_preset.clone().unwrap()];
        let mut last_step = sim.snapshot().demo_step;

        // 6 holds of 2 s at 50 ms per tick
        for n in 1..=240 {
            let snap = sim.tick();

            if n < 240 {
                assert!(sim.demo_running(), "Demo stopped early at tick {}", n);
            }

            if snap.demo_step.is_some() && snap.demo_step != last_step {
                activations.push(snap.active_preset.clone().unwrap());
            }
            last_step = snap.demo_step;
        }

        assert!(!sim.demo_running());
        assert_eq!(sim.snapshot().active_preset, None);
        assert_eq!(
            activations,
            DEMO_SEQUENCE.iter().map(|s| s.to_string()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_edits_rejected_during_demo() {
        let mut sim = JointSim::default();
        sim.start_demo();
        sim.tick();

        let before = sim.snapshot().target_positions;

        assert!(!sim.set_joint_target(0, 10.0));
        assert!(!sim.apply_preset("pick"));
        assert!(!sim.set_targets(&JointVector::zero()));
        assert_eq!(sim.snapshot().target_positions, before);

        // Run the demo to completion, then edits work again
        while sim.demo_running() {
            sim.tick();
        }
        assert!(sim.set_joint_target(0, 10.0));
        assert_eq!(sim.snapshot().target_positions[0], 10.0);
    }

    #[test]
    fn test_reset() {
        let mut sim = JointSim::default();
        sim.apply_preset("wave");
        for _ in 0..5 {
            sim.tick();
        }
        sim.start_demo();

        sim.reset();

        let snap = sim.snapshot();
        assert_eq!(snap.joint_positions, JointVector::zero());
        assert_eq!(snap.target_positions, JointVector::zero());
        assert_eq!(snap.active_preset, None);
        assert!(!sim.demo_running());
        assert!(!snap.is_moving);
    }

    #[test]
    fn test_unknown_preset() {
        let mut sim = JointSim::default();
        sim.set_joint_target(3, 12.0);

        assert!(!sim.apply_preset("dance"));
        assert_eq!(sim.snapshot().target_positions[3], 12.0);
    }

    #[test]
    fn test_halt() {
        let mut sim = JointSim::default();
        sim.set_joint_target(0, 100.0);
        sim.tick();

        sim.halt();
        let snap = sim.snapshot();
        assert_eq!(snap.target_positions, snap.joint_positions);

        let snap = sim.tick();
        assert!(!snap.is_moving);
    }
}
