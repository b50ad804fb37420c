//! Reconnection backoff schedule

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the exponential reconnection backoff.
///
/// The delay before attempt `n` (counting from zero) is `min(base_delay_ms * 2^n, max_delay_ms)`,
/// and no attempt is made once `n` reaches `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ReconnectPolicy {
    /// Units: milliseconds
    pub base_delay_ms: u64,

    /// Units: milliseconds
    pub max_delay_ms: u64,

    pub max_attempts: u32,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ReconnectPolicy {
    /// Delay to wait before the given reconnection attempt, or `None` if the channel should give
    /// up instead of making this attempt.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        // Saturate rather than overflow for silly attempt counts
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);

        Some(Duration::from_millis(delay_ms))
    }

    /// The full schedule, one delay per attempt.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..).map_while(|a| self.delay(a)).collect()
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 4,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
