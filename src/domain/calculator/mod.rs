//! Calculator domain - statistical comparison of variant counters

mod report;

pub use report::{
    base_index, best_index, AnalysisReport, BaseSelection, BetaDistribution, Calculator,
    CalculatorKind, VariantAnalysis, VariantCounts,
};
