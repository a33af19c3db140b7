//! Weighted task selection.

use crate::error::{SwarmError, SwarmResult};
use rand::Rng;

/// Picks task indices with probability proportional to their weights.
#[derive(Debug, Clone)]
pub struct TaskSelector {
    cumulative: Vec<u64>,
    total: u64,
}

impl TaskSelector {
    /// Build a selector from integer weights. Zero-weight entries are never chosen.
    pub fn new(weights: &[u32]) -> SwarmResult<Self> {
        if weights.is_empty() {
            return Err(SwarmError::config("at least one task must be defined"));
        }

        let mut cumulative = Vec::with_capacity(weights.len());
        let mut sum = 0u64;
        for &w in weights {
            sum += w as u64;
            cumulative.push(sum);
        }

        if sum == 0 {
            return Err(SwarmError::config(
                "at least one task must have a weight greater than zero",
            ));
        }

        Ok(Self {
            cumulative,
            total: sum,
        })
    }

    /// Number of entries, including zero-weight ones.
    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Select the next task index.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let r = rng.gen_range(0..self.total);
        // First entry whose cumulative weight exceeds r
        self.cumulative.partition_point(|&c| c <= r)
    }
}
