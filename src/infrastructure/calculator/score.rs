//! Z-score calculator
//!
//! Compares each variant's conversion rate with the base using the two
//! proportion z-test.

use crate::domain::calculator::{
    base_index, best_index, AnalysisReport, BaseSelection, Calculator, CalculatorKind,
    VariantAnalysis, VariantCounts,
};
use crate::domain::DomainError;

use super::normal_table::cumulative_probability;
use super::{relative_difference, DEFAULT_CONFIDENCE};

/// Two-proportion z-test against a base variant
#[derive(Debug, Clone)]
pub struct ScoreCalculator {
    confidence: f64,
    base: BaseSelection,
}

impl Default for ScoreCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE, BaseSelection::default())
    }
}

impl ScoreCalculator {
    pub fn new(confidence: f64, base: BaseSelection) -> Self {
        Self { confidence, base }
    }

    /// z-score of `variant` against `base`, when both sides have variance
    fn z_score(variant: &VariantCounts, base: &VariantCounts) -> Option<f64> {
        if variant.participants == 0 || base.participants == 0 {
            return None;
        }

        let p = variant.measure();
        let pb = base.measure();
        let variance =
            p * (1.0 - p) / variant.participants as f64 + pb * (1.0 - pb) / base.participants as f64;

        if variance <= 0.0 {
            return None;
        }

        Some((p - pb) / variance.sqrt())
    }
}

impl Calculator for ScoreCalculator {
    fn kind(&self) -> CalculatorKind {
        CalculatorKind::Score
    }

    fn analyze(&self, counts: &[VariantCounts]) -> Result<AnalysisReport, DomainError> {
        let base = base_index(counts, self.base);
        let best = best_index(counts);
        let mut variants: Vec<VariantAnalysis> = counts.iter().map(VariantAnalysis::from_counts).collect();

        if let Some(base) = base {
            let base_counts = &counts[base];

            for (index, (analysis, variant)) in variants.iter_mut().zip(counts).enumerate() {
                analysis.difference = relative_difference(variant.measure(), base_counts.measure());

                if index == base || variant.measure() <= 0.0 {
                    continue;
                }

                if let Some(z) = Self::z_score(variant, base_counts) {
                    let phi = cumulative_probability(z);
                    let sign = if z < 0.0 { -1.0 } else { 1.0 };

                    analysis.z_score = Some(z);
                    analysis.probability = Some(sign * phi * 100.0);
                    analysis.significance = Some(sign * (2.0 * phi - 1.0) * 100.0);
                }
            }
        }

        let choice = best
            .filter(|index| {
                variants[*index]
                    .probability
                    .is_some_and(|probability| probability >= self.confidence)
            })
            .map(|index| counts[index].variant.clone());

        Ok(AnalysisReport {
            calculator: CalculatorKind::Score,
            goal: None,
            confidence: self.confidence,
            base: base.map(|index| counts[index].variant.clone()),
            best: best.map(|index| counts[index].variant.clone()),
            choice,
            variants,
        })
    }
}
