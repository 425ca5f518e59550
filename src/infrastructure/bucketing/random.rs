use rand::{Rng, RngCore};

use super::Candidate;

/// Uniform choice, ignoring weights and counters
#[derive(Debug, Clone, Copy, Default)]
pub struct Random;

impl Random {
    pub fn choose(&self, candidates: &[Candidate<'_>], rng: &mut dyn RngCore) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        Some(rng.gen_range(0..candidates.len()))
    }
}
