//! Statistical calculators

mod bayesian;
pub mod normal_table;
mod score;

pub use bayesian::{BayesianCalculator, StatrsBeta, DEFAULT_INTERVALS};
pub use score::ScoreCalculator;

use crate::domain::calculator::{BaseSelection, Calculator, CalculatorKind};

/// Confidence level, in percent, used when none is configured
pub const DEFAULT_CONFIDENCE: f64 = 90.0;

/// Build the calculator for `kind`
pub fn create_calculator(
    kind: CalculatorKind,
    confidence: f64,
    base: BaseSelection,
) -> Box<dyn Calculator> {
    match kind {
        CalculatorKind::Score => Box::new(ScoreCalculator::new(confidence, base)),
        CalculatorKind::Bayesian => Box::new(BayesianCalculator::new(confidence, base)),
    }
}

/// `(p - p_base) / p_base` in percent; undefined against a zero base
pub(crate) fn relative_difference(measure: f64, base_measure: f64) -> Option<f64> {
    if base_measure > 0.0 {
        Some((measure - base_measure) / base_measure * 100.0)
    } else {
        None
    }
}
