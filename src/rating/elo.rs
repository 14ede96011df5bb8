//! Elo rating arithmetic
//!
//! Standard logistic expectation on a 400-point scale:
//!
//! ```text
//! Ea  = 1 / (1 + 10^((Rb - Ra) / 400))
//! Ra' = Ra + K * (S - Ea)
//! Rb' = Rb + K * ((1 - S) - Eb)
//! ```

use crate::types::Outcome;

/// Ratings of both articles after one contest
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EloUpdate {
    pub rating_a: f64,
    pub rating_b: f64,
}

/// Probability that A beats B
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
}

/// Apply one outcome to a pair of ratings.
///
/// # Panics
///
/// If `k_factor` is not a positive finite number. The configuration layer
/// rejects such values before they reach this point.
pub fn update(rating_a: f64, rating_b: f64, outcome: Outcome, k_factor: f64) -> EloUpdate {
    assert!(
        k_factor.is_finite() && k_factor > 0.0,
        "K-factor must be positive and finite, got {}",
        k_factor
    );

    let score_a = outcome.score();
    let expected_a = expected_score(rating_a, rating_b);
    let expected_b = 1.0 - expected_a;

    EloUpdate {
        rating_a: rating_a + k_factor * (score_a - expected_a),
        rating_b: rating_b + k_factor * ((1.0 - score_a) - expected_b),
    }
}
