//! Simulated analysis progress
//!
//! The generation call reports no real progress, so the displayed value is
//! advanced by random steps: large while below [`SLOW_ZONE`], small above it,
//! and never past [`CEILING`] until the outcome is known.

use rand::Rng;

/// Highest value reachable before the result arrives
pub const CEILING: u8 = 95;

/// At or above this value, steps shrink
pub const SLOW_ZONE: u8 = 70;

/// Value shown once the result is in
pub const COMPLETE: u8 = 100;

/// Progress percentage in `[0, 100]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Progress(u8);

impl Progress {
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Advance by one random step, capped at [`CEILING`]
    ///
    /// Never decreases the value; a completed progress is left alone.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> u8 {
        if self.0 >= CEILING {
            return self.0;
        }

        let step: u8 = if self.0 < SLOW_ZONE {
            rng.gen_range(2..=12)
        } else {
            rng.gen_range(1..=4)
        };

        self.0 = self.0.saturating_add(step).min(CEILING);
        self.0
    }

    /// Snap to 100
    pub const fn complete(&mut self) {
        self.0 = COMPLETE;
    }

    pub const fn reset(&mut self) {
        self.0 = 0;
    }
}
