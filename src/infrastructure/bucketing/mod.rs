//! Bucketing algorithms
//!
//! Every algorithm is a pure function of the candidate variants and their
//! counters (plus the request metadata for [`StaticMatch`]); none of them writes
//! to the store. They return the index of the chosen candidate.

mod bandit;
mod distributed;
mod random;
mod static_match;
mod weighted;

pub use bandit::{Bandit, DEFAULT_FAIRNESS_CONSTANT};
pub use distributed::Distributed;
pub use random::Random;
pub use static_match::{metadata_matches, StaticMatch};
pub use weighted::Weighted;

use rand::RngCore;

use crate::domain::experiment::{AlgorithmKind, Metadata, StaticMatcher, Variant};

/// A variant offered to an algorithm, with its current counters
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub variant: &'a Variant,
    pub participants: u64,
    pub converted: u64,
}

impl<'a> Candidate<'a> {
    pub fn new(variant: &'a Variant) -> Self {
        Self {
            variant,
            participants: 0,
            converted: 0,
        }
    }

    pub fn with_counts(mut self, participants: u64, converted: u64) -> Self {
        self.participants = participants;
        self.converted = converted;
        self
    }
}

/// Configured algorithm of one experiment
#[derive(Debug, Clone)]
pub enum Algorithm {
    Weighted(Weighted),
    Distributed(Distributed),
    Random(Random),
    Bandit(Bandit),
    Static(StaticMatch),
}

impl Algorithm {
    /// Build the algorithm for `kind`
    pub fn from_kind(
        kind: AlgorithmKind,
        fairness_constant: f64,
        matcher: Option<StaticMatcher>,
    ) -> Self {
        match kind {
            AlgorithmKind::Weighted => Self::Weighted(Weighted),
            AlgorithmKind::Distributed => Self::Distributed(Distributed),
            AlgorithmKind::Random => Self::Random(Random),
            AlgorithmKind::Bandit => Self::Bandit(Bandit::new(fairness_constant)),
            AlgorithmKind::Static => Self::Static(StaticMatch::new(matcher)),
        }
    }

    /// Whether candidates must carry store counters
    pub fn needs_counters(&self) -> bool {
        matches!(self, Self::Distributed(_) | Self::Bandit(_))
    }

    pub fn choose(
        &self,
        candidates: &[Candidate<'_>],
        metadata: &Metadata,
        rng: &mut dyn RngCore,
    ) -> Option<usize> {
        match self {
            Self::Weighted(algorithm) => algorithm.choose(candidates, rng),
            Self::Distributed(algorithm) => algorithm.choose(candidates, rng),
            Self::Random(algorithm) => algorithm.choose(candidates, rng),
            Self::Bandit(algorithm) => algorithm.choose(candidates, rng),
            Self::Static(algorithm) => algorithm.choose(candidates, metadata),
        }
    }
}
