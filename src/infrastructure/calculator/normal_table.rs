//! Precomputed standard normal cumulative distribution
//!
//! Z-scores are looked up at a resolution of 0.01 and capped at 3.5, beyond
//! which the probability is indistinguishable from 1 at percentile precision.

use once_cell::sync::Lazy;

/// Resolution of the table
pub const TABLE_STEP: f64 = 0.01;

/// Largest tabulated z-score
pub const TABLE_MAX: f64 = 3.5;

static NORMAL_TABLE: Lazy<Vec<f64>> = Lazy::new(|| {
    let entries = (TABLE_MAX / TABLE_STEP).round() as usize;
    (0..=entries)
        .map(|i| normal_cdf(i as f64 * TABLE_STEP))
        .collect()
});

/// Φ(|z|) read from the table
pub fn cumulative_probability(z: f64) -> f64 {
    if z.is_nan() {
        return 0.5;
    }

    let index = (z.abs().min(TABLE_MAX) / TABLE_STEP).round() as usize;
    let last = NORMAL_TABLE.len() - 1;

    NORMAL_TABLE[index.min(last)]
}

/// Standard normal cumulative distribution function
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Error function approximation
///
/// Uses Horner's method for the polynomial approximation.
/// Accurate to about 1.5e-7.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_size() {
        assert_eq!(NORMAL_TABLE.len(), 351);
    }

    #[test]
    fn test_known_values() {
        assert!((cumulative_probability(0.0) - 0.5).abs() < 1e-6);
        assert!((cumulative_probability(1.0) - 0.8413).abs() < 1e-3);
        assert!((cumulative_probability(1.96) - 0.9750).abs() < 1e-3);
        assert!((cumulative_probability(1.645) - 0.95).abs() < 2e-3);
    }

    #[test]
    fn test_symmetric_in_sign() {
        assert_eq!(cumulative_probability(-1.28), cumulative_probability(1.28));
    }

    #[test]
    fn test_capped_beyond_table() {
        assert_eq!(cumulative_probability(12.0), cumulative_probability(3.5));
        assert!(cumulative_probability(3.5) > 0.9997);
    }

    #[test]
    fn test_erf() {
        assert!(erf(0.0).abs() < 0.001);
        assert!(erf(3.0) > 0.999);
        assert!(erf(-3.0) < -0.999);
    }
}
