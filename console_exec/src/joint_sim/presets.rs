//! Named poses and the demo sequence

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::robot::NUM_JOINTS;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Named poses the simulator can be sent to, in degrees.
pub const PRESETS: [(&str, [f64; NUM_JOINTS]); 5] = [
    ("home", [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    ("wave", [45.0, 30.0, -45.0, 0.0, 60.0, 0.0]),
    ("reach", [0.0, 60.0, -30.0, 0.0, 45.0, 0.0]),
    ("pick", [90.0, 45.0, -60.0, 0.0, 90.0, 0.0]),
    ("place", [-90.0, 45.0, -60.0, 0.0, 90.0, 180.0]),
];

/// Presets visited by the demo, in order.
pub const DEMO_SEQUENCE: [&str; 6] = ["home", "wave", "reach", "pick", "place", "home"];

/// How long the demo holds each preset.
///
/// Units: milliseconds
pub const DEMO_HOLD_MS: u64 = 2000;

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Look up a preset by name, ignoring case.
pub fn preset(name: &str) -> Option<[f64; NUM_JOINTS]> {
    PRESETS
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, p)| *p)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(preset("home"), Some([0.0; NUM_JOINTS]));
        assert_eq!(preset("Wave"), Some([45.0, 30.0, -45.0, 0.0, 60.0, 0.0]));
        assert_eq!(preset("dance"), None);

        for name in DEMO_SEQUENCE.iter() {
            assert!(preset(name).is_some(), "Demo preset {} missing", name);
        }
    }
}
