//! Bayesian calculator
//!
//! Each variant's conversion rate is modelled as `Beta(x + 1, n - x + 1)`. The
//! probability that variant `i` is the best is
//! `∫ pdf_i(z) Π_{j≠i} cdf_j(z) dz`, integrated numerically with Simpson's rule.

use std::sync::Arc;

use statrs::distribution::{Beta, Continuous, ContinuousCDF};

use crate::domain::calculator::{
    base_index, best_index, AnalysisReport, BaseSelection, BetaDistribution, Calculator,
    CalculatorKind, VariantAnalysis, VariantCounts,
};
use crate::domain::DomainError;

use super::{relative_difference, DEFAULT_CONFIDENCE};

/// Subintervals of the Simpson integration; must be even
pub const DEFAULT_INTERVALS: usize = 1000;

/// Half-width of the integration window, in standard deviations of the posterior
const WINDOW_SIGMAS: f64 = 10.0;

/// Beta distribution backed by `statrs`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatrsBeta;

impl StatrsBeta {
    fn distribution(alpha: f64, beta: f64) -> Result<Beta, DomainError> {
        Beta::new(alpha, beta).map_err(|e| {
            DomainError::internal(format!(
                "Invalid beta distribution ({}, {}): {}",
                alpha, beta, e
            ))
        })
    }
}

impl BetaDistribution for StatrsBeta {
    fn pdf(&self, alpha: f64, beta: f64, x: f64) -> Result<f64, DomainError> {
        Ok(Self::distribution(alpha, beta)?.pdf(x))
    }

    fn cdf(&self, alpha: f64, beta: f64, x: f64) -> Result<f64, DomainError> {
        Ok(Self::distribution(alpha, beta)?.cdf(x))
    }
}

/// Posterior parameters of one variant
#[derive(Debug, Clone, Copy)]
struct Posterior {
    alpha: f64,
    beta: f64,
}

impl Posterior {
    fn from_counts(counts: &VariantCounts) -> Self {
        let converted = counts.converted.min(counts.participants);
        Self {
            alpha: converted as f64 + 1.0,
            beta: (counts.participants - converted) as f64 + 1.0,
        }
    }

    fn window(&self) -> (f64, f64) {
        let total = self.alpha + self.beta;
        let mean = self.alpha / total;
        let sd = (self.alpha * self.beta / (total * total * (total + 1.0))).sqrt();

        (
            (mean - WINDOW_SIGMAS * sd).max(0.0),
            (mean + WINDOW_SIGMAS * sd).min(1.0),
        )
    }
}

/// Probability-of-being-best calculator
#[derive(Debug, Clone)]
pub struct BayesianCalculator {
    confidence: f64,
    base: BaseSelection,
    intervals: usize,
    distribution: Arc<dyn BetaDistribution>,
}

impl Default for BayesianCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE, BaseSelection::default())
    }
}

impl BayesianCalculator {
    pub fn new(confidence: f64, base: BaseSelection) -> Self {
        Self {
            confidence,
            base,
            intervals: DEFAULT_INTERVALS,
            distribution: Arc::new(StatrsBeta),
        }
    }

    /// Replace the beta distribution implementation
    pub fn with_distribution(mut self, distribution: Arc<dyn BetaDistribution>) -> Self {
        self.distribution = distribution;
        self
    }

    /// Set the number of Simpson subintervals, rounded up to an even number
    pub fn with_intervals(mut self, intervals: usize) -> Self {
        self.intervals = (intervals.max(2) + 1) & !1;
        self
    }

    fn integrand(&self, posteriors: &[Posterior], target: usize, z: f64) -> Result<f64, DomainError> {
        let own = posteriors[target];
        let mut value = self.distribution.pdf(own.alpha, own.beta, z)?;

        for (index, other) in posteriors.iter().enumerate() {
            if index != target {
                value *= self.distribution.cdf(other.alpha, other.beta, z)?;
            }
        }

        Ok(if value.is_finite() { value } else { 0.0 })
    }

    /// P(variant `target` has the highest conversion rate)
    fn probability_best(&self, posteriors: &[Posterior], target: usize) -> Result<f64, DomainError> {
        let (low, high) = posteriors[target].window();
        if high <= low {
            return Ok(0.0);
        }

        let n = self.intervals;
        let h = (high - low) / n as f64;
        let mut sum = self.integrand(posteriors, target, low)? + self.integrand(posteriors, target, high)?;

        for step in 1..n {
            let weight = if step % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * self.integrand(posteriors, target, low + step as f64 * h)?;
        }

        Ok((sum * h / 3.0).clamp(0.0, 1.0))
    }
}

impl Calculator for BayesianCalculator {
    fn kind(&self) -> CalculatorKind {
        CalculatorKind::Bayesian
    }

    fn analyze(&self, counts: &[VariantCounts]) -> Result<AnalysisReport, DomainError> {
        let base = base_index(counts, self.base);
        let best = best_index(counts);
        let posteriors: Vec<Posterior> = counts.iter().map(Posterior::from_counts).collect();
        let mut variants: Vec<VariantAnalysis> = counts.iter().map(VariantAnalysis::from_counts).collect();

        for (index, analysis) in variants.iter_mut().enumerate() {
            if let Some(base) = base {
                analysis.difference =
                    relative_difference(counts[index].measure(), counts[base].measure());
            }
            analysis.probability = Some(self.probability_best(&posteriors, index)? * 100.0);
        }

        let choice = best
            .filter(|index| {
                variants[*index]
                    .probability
                    .is_some_and(|probability| probability >= self.confidence)
            })
            .map(|index| counts[index].variant.clone());

        Ok(AnalysisReport {
            calculator: CalculatorKind::Bayesian,
            goal: None,
            confidence: self.confidence,
            base: base.map(|index| counts[index].variant.clone()),
            best: best.map(|index| counts[index].variant.clone()),
            choice,
            variants,
        })
    }
}
