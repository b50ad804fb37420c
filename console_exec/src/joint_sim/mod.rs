//! # Joint Motion Simulator
//!
//! A local kinematic stand-in for the arm. Each joint eases towards its target by a tenth of the
//! remaining distance per tick (scaled by the speed setting) and snaps onto the target once it is
//! within [`ARRIVAL_TOLERANCE_DEG`]. The simulator advances a virtual clock by one tick period per
//! tick, which drives the demo sequence, so the whole simulation is deterministic.
//!
//! [`JointSim`] is the plain state machine, [`SimRunner`] drives it from a real 20 Hz thread.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod params;
mod presets;
mod runner;
mod state;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use params::*;
pub use presets::*;
pub use runner::*;
pub use state::*;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Distance under which a joint is considered to have arrived at its target.
///
/// Units: degrees
pub const ARRIVAL_TOLERANCE_DEG: f64 = 0.1;

/// Lowest allowed speed setting
pub const MIN_SPEED_PERCENT: f64 = 10.0;

/// Highest allowed speed setting
pub const MAX_SPEED_PERCENT: f64 = 100.0;

/// Speed at which one tick covers exactly a tenth of the remaining distance
const NOMINAL_SPEED_PERCENT: f64 = 50.0;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Move a single joint one animated tick towards its target.
pub fn step(current: f64, target: f64, speed_percent: f64) -> f64 {
    let diff = target - current;

    if diff.abs() < ARRIVAL_TOLERANCE_DEG {
        target
    } else {
        current + (diff / 10.0) * (speed_percent / NOMINAL_SPEED_PERCENT)
    }
}

/// Whether a joint at `current` is still travelling to `target`.
pub fn is_travelling(current: f64, target: f64) -> bool {
    (current - target).abs() > ARRIVAL_TOLERANCE_DEG
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_step() {
        // A tenth of the way at nominal speed
        assert!((step(0.0, 10.0, 50.0) - 1.0).abs() < 1e-12);

        // Double the speed, double the step
        assert!((step(0.0, 10.0, 100.0) - 2.0).abs() < 1e-12);

        // Negative direction
        assert!((step(0.0, -10.0, 50.0) + 1.0).abs() < 1e-12);

        // Snap when close
        assert_eq!(step(9.95, 10.0, 50.0), 10.0);
        assert_eq!(step(10.0, 10.0, 50.0), 10.0);
    }

    #[test]
    fn test_travelling() {
        assert!(is_travelling(0.0, 0.2));
        assert!(!is_travelling(0.0, 0.1));
        assert!(!is_travelling(-3.0, -3.0));
    }
}
