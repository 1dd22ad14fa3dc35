//! Step grid data.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Rows per pattern. Each row plays one scale degree.
pub const NUM_ROWS: usize = 8;
pub const STEPS_PER_PATTERN: usize = 16;
pub const MAX_RATCHETS: u8 = 8;

/// One cell of the grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub active: bool,
    pub velocity: f32,
    pub probability: f32,
    /// Number of evenly spaced re-triggers within the step.
    pub ratchets: u8,
    /// Timing offset as a fraction of half a step, -1..1.
    pub nudge: f32,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            active: false,
            velocity: 0.8,
            probability: 1.0,
            ratchets: 1,
            nudge: 0.0,
        }
    }
}

impl Step {
    /// Returns a copy with every field in range.
    pub fn clamped(self) -> Self {
        let unit = |x: f32, default: f32| if x.is_finite() { x.clamp(0.0, 1.0) } else { default };
        let clamped = Self {
            active: self.active,
            velocity: unit(self.velocity, 0.8),
            probability: unit(self.probability, 1.0),
            ratchets: self.ratchets.clamp(1, MAX_RATCHETS),
            nudge: if self.nudge.is_finite() { self.nudge.clamp(-1.0, 1.0) } else { 0.0 },
        };
        if clamped != self {
            log::warn!(target: "state", "step {self:?} coerced to {clamped:?}");
        }
        clamped
    }
}

/// Random spread applied by `Pattern::humanize`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HumanizeAmounts {
    pub velocity: f32,
    pub probability: f32,
    pub nudge: f32,
}

/// An 8x16 grid of steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern {
    pub rows: [[Step; STEPS_PER_PATTERN]; NUM_ROWS],
}

impl Default for Pattern {
    fn default() -> Self {
        Self {
            rows: [[Step::default(); STEPS_PER_PATTERN]; NUM_ROWS],
        }
    }
}

impl Pattern {
    pub fn step(&self, row: usize, col: usize) -> Option<&Step> {
        self.rows.get(row)?.get(col)
    }

    pub fn step_mut(&mut self, row: usize, col: usize) -> Option<&mut Step> {
        self.rows.get_mut(row)?.get_mut(col)
    }

    pub fn active_count(&self) -> usize {
        self.rows.iter().flatten().filter(|s| s.active).count()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Randomly perturb velocity, probability and nudge of active steps.
    /// Inactive steps are left alone.
    pub fn humanize(&mut self, amounts: HumanizeAmounts, rng: &mut impl Rng) {
        let mut spread = |x: f32, amount: f32, min: f32, max: f32| {
            let amount = amount.abs();
            (x + rng.gen_range(-amount..=amount)).clamp(min, max)
        };

        for step in self.rows.iter_mut().flatten().filter(|s| s.active) {
            step.velocity = spread(step.velocity, amounts.velocity, 0.0, 1.0);
            step.probability = spread(step.probability, amounts.probability, 0.0, 1.0);
            step.nudge = spread(step.nudge, amounts.nudge, -1.0, 1.0);
        }
    }
}
