use rand::{Rng, RngCore};

use super::Candidate;

/// Picks variants with frequencies proportional to their weights
#[derive(Debug, Clone, Copy, Default)]
pub struct Weighted;

impl Weighted {
    pub fn choose(&self, candidates: &[Candidate<'_>], rng: &mut dyn RngCore) -> Option<usize> {
        let total: f64 = candidates.iter().map(|c| c.variant.weight()).sum();

        if candidates.is_empty() || total <= 0.0 {
            return None;
        }

        let mut remaining = rng.gen_range(0.0..total);

        for (index, candidate) in candidates.iter().enumerate() {
            let weight = candidate.variant.weight();
            if remaining <= weight {
                return Some(index);
            }
            remaining -= weight;
        }

        // Float rounding can leave a sliver past the last weight
        Some(candidates.len() - 1)
    }
}
