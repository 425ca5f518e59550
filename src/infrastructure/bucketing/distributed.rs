use rand::seq::SliceRandom;
use rand::RngCore;

use super::Candidate;

/// Fills the variants with the fewest participants first
#[derive(Debug, Clone, Copy, Default)]
pub struct Distributed;

impl Distributed {
    pub fn choose(&self, candidates: &[Candidate<'_>], rng: &mut dyn RngCore) -> Option<usize> {
        let fewest = candidates.iter().map(|c| c.participants).min()?;

        let least_filled: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.participants == fewest)
            .map(|(index, _)| index)
            .collect();

        least_filled.choose(rng).copied()
    }
}
