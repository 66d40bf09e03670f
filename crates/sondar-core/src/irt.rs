//! Three-parameter logistic (3PL) item response function.
//!
//! `P(theta) = c + (1 - c) / (1 + exp(-a * (theta - b)))`
//!
//! `a` is discrimination, `b` difficulty, `c` the guessing floor. For a > 0
//! the curve is monotonic increasing in theta, rising from `c` to 1.

use serde::{Deserialize, Serialize};

/// Floor applied to P(theta) when computing information, keeping the
/// quotient finite as P approaches the guessing asymptote.
const MIN_PROBABILITY: f64 = 1e-9;

/// Calibrated 3PL parameters for an item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IrtParams {
    /// Discrimination `a`, must be positive.
    pub discrimination: f64,
    /// Difficulty `b` on the theta scale.
    pub difficulty: f64,
    /// Guessing floor `c` in [0, 1).
    pub guessing: f64,
}

impl IrtParams {
    /// Validated constructor.
    pub fn new(discrimination: f64, difficulty: f64, guessing: f64) -> Result<Self, String> {
        if !discrimination.is_finite() || discrimination <= 0.0 {
            return Err(format!(
                "discrimination must be positive, got {discrimination}"
            ));
        }
        if !difficulty.is_finite() {
            return Err(format!("difficulty must be finite, got {difficulty}"));
        }
        if !guessing.is_finite() || !(0.0..1.0).contains(&guessing) {
            return Err(format!("guessing must be in [0, 1), got {guessing}"));
        }
        Ok(Self {
            discrimination,
            difficulty,
            guessing,
        })
    }

    /// Probability of endorsement at the given trait level.
    pub fn probability(&self, theta: f64) -> f64 {
        let exponent = -self.discrimination * (theta - self.difficulty);
        self.guessing + (1.0 - self.guessing) / (1.0 + exponent.exp())
    }

    /// Fisher information contributed by this item at the given trait level.
    ///
    /// `I(theta) = a^2 * (P - c)^2 * (1 - P) / ((1 - c)^2 * P)`
    pub fn information(&self, theta: f64) -> f64 {
        let p = self.probability(theta).max(MIN_PROBABILITY);
        let a = self.discrimination;
        let c = self.guessing;
        let numerator = a * a * (p - c).powi(2) * (1.0 - p);
        let denominator = (1.0 - c).powi(2) * p;
        numerator / denominator
    }
}
