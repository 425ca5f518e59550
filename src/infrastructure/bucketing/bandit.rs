use rand::seq::SliceRandom;
use rand::RngCore;
use rand_distr::{Beta, Distribution};

use super::Candidate;

/// Pseudo-count added to both outcomes so new arms still get explored
pub const DEFAULT_FAIRNESS_CONSTANT: f64 = 7.0;

/// Thompson sampling over per-variant conversion rates
#[derive(Debug, Clone, Copy)]
pub struct Bandit {
    fairness_constant: f64,
}

impl Default for Bandit {
    fn default() -> Self {
        Self::new(DEFAULT_FAIRNESS_CONSTANT)
    }
}

impl Bandit {
    pub fn new(fairness_constant: f64) -> Self {
        Self { fairness_constant }
    }

    pub fn fairness_constant(&self) -> f64 {
        self.fairness_constant
    }

    /// Draw a conversion rate for one arm
    ///
    /// `Beta(converted + k, participants - converted + k)`: successes first, so
    /// the draw centres on the observed conversion rate.
    fn sample(&self, candidate: &Candidate<'_>, rng: &mut dyn RngCore) -> f64 {
        let k = self.fairness_constant;
        let successes = candidate.converted.min(candidate.participants) as f64;
        let failures = candidate.participants.saturating_sub(candidate.converted) as f64;

        match Beta::new(successes + k, failures + k) {
            Ok(distribution) => distribution.sample(rng),
            // Non-positive fairness constant on an empty arm
            Err(_) => 0.0,
        }
    }

    pub fn choose(&self, candidates: &[Candidate<'_>], rng: &mut dyn RngCore) -> Option<usize> {
        let mut best = f64::NEG_INFINITY;
        let mut leaders: Vec<usize> = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let draw = self.sample(candidate, rng);

            if draw > best {
                best = draw;
                leaders.clear();
                leaders.push(index);
            } else if draw == best {
                leaders.push(index);
            }
        }

        leaders.choose(rng).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::variants;
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_dominant_arm_wins() {
        let variants = variants(&[("small", 1.0), ("dominant", 1.0), ("tiny", 1.0)]);
        let candidates = vec![
            Candidate::new(&variants[0]).with_counts(100, 10),
            Candidate::new(&variants[1]).with_counts(800, 400),
            Candidate::new(&variants[2]).with_counts(40, 2),
        ];
        let bandit = Bandit::default();
        let mut rng = StdRng::seed_from_u64(99);

        let dominant = (0..10_000)
            .filter(|_| bandit.choose(&candidates, &mut rng) == Some(1))
            .count();

        assert!(dominant >= 9_900, "dominant picked {} times", dominant);
    }

    #[test]
    fn test_fresh_arms_are_explored() {
        let variants = variants(&[("a", 1.0), ("b", 1.0)]);
        let candidates: Vec<_> = variants.iter().map(Candidate::new).collect();
        let bandit = Bandit::default();
        let mut rng = StdRng::seed_from_u64(17);

        let picked_a = (0..4_000)
            .filter(|_| bandit.choose(&candidates, &mut rng) == Some(0))
            .count();

        assert!((1600..=2400).contains(&picked_a), "picked a {} times", picked_a);
    }

    #[test]
    fn test_inconsistent_counters_do_not_panic() {
        let variants = variants(&[("a", 1.0)]);
        let candidates = vec![Candidate::new(&variants[0]).with_counts(3, 10)];
        let mut rng = StdRng::seed_from_u64(1);

        assert_eq!(Bandit::default().choose(&candidates, &mut rng), Some(0));
    }
}
