//! Newton-Raphson maximum-likelihood estimation of the latent trait.
//!
//! The estimator is a pure function of the active response set: feeding it
//! the same responses always yields the same estimate, which is what makes
//! backward-navigation recalibration equivalent to a fresh estimation.

use serde::{Deserialize, Serialize};

use crate::irt::IrtParams;

/// Tuning knobs for the estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Convergence threshold on |delta theta|.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Iteration bound before falling back to the last stable estimate.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Lower clamp for theta.
    #[serde(default = "default_theta_min")]
    pub theta_min: f64,
    /// Upper clamp for theta.
    #[serde(default = "default_theta_max")]
    pub theta_max: f64,
    /// Factor applied to the standard error when iteration does not converge.
    #[serde(default = "default_penalty")]
    pub non_convergence_penalty: f64,
    /// Standard error reported when no information is available.
    #[serde(default = "default_max_se")]
    pub max_standard_error: f64,
}

fn default_epsilon() -> f64 {
    1e-4
}
fn default_max_iterations() -> u32 {
    50
}
fn default_theta_min() -> f64 {
    -4.0
}
fn default_theta_max() -> f64 {
    4.0
}
fn default_penalty() -> f64 {
    1.5
}
fn default_max_se() -> f64 {
    1.0
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            max_iterations: default_max_iterations(),
            theta_min: default_theta_min(),
            theta_max: default_theta_max(),
            non_convergence_penalty: default_penalty(),
            max_standard_error: default_max_se(),
        }
    }
}

/// One scored response: the item's calibration plus the normalized value,
/// treated as a pseudo-probability of endorsement.
#[derive(Debug, Clone, Copy)]
pub struct ScoredResponse {
    pub params: IrtParams,
    pub value: f64,
}

/// Point estimate of theta with its uncertainty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThetaEstimate {
    pub theta: f64,
    pub standard_error: f64,
    /// `clamp(1 - se / max_se, 0, 1)`.
    pub confidence: f64,
    /// False when the iteration bound was hit and the last stable estimate
    /// was reported with a widened standard error.
    pub converged: bool,
    pub iterations: u32,
    /// How many responses actually carried information.
    pub informative_responses: usize,
}

/// Newton-Raphson MLE over a set of scored responses.
#[derive(Debug, Clone, Default)]
pub struct ThetaEstimator {
    config: EstimatorConfig,
}

impl ThetaEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    /// Estimate theta and its standard error from the given responses.
    ///
    /// Responses to cold-start items must be filtered out by the caller;
    /// only calibrated responses belong here.
    pub fn estimate(&self, responses: &[ScoredResponse]) -> ThetaEstimate {
        let cfg = &self.config;

        if responses.is_empty() {
            return self.empty_estimate();
        }

        let mut theta = 0.0_f64;
        let mut last_stable = theta;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < cfg.max_iterations {
            iterations += 1;

            let mut numerator = 0.0;
            let mut denominator = 0.0;
            for r in responses {
                let p = r.params.probability(theta);
                let a = r.params.discrimination;
                numerator += a * (r.value - p);
                denominator += a * a * p * (1.0 - p);
            }

            if denominator.abs() < f64::EPSILON {
                // No curvature left to exploit; the current iterate is as
                // good as it gets.
                break;
            }

            let delta = numerator / denominator;
            last_stable = theta;
            theta = (theta + delta).clamp(cfg.theta_min, cfg.theta_max);

            if delta.abs() < cfg.epsilon {
                converged = true;
                break;
            }
        }

        if !converged && iterations >= cfg.max_iterations {
            tracing::warn!(
                iterations,
                theta,
                last_stable,
                "theta estimation did not converge, reporting last stable estimate"
            );
            theta = last_stable.clamp(cfg.theta_min, cfg.theta_max);
        }

        let information: f64 = responses.iter().map(|r| r.params.information(theta)).sum();

        let mut standard_error = if information > 0.0 {
            (1.0 / information.sqrt()).min(cfg.max_standard_error)
        } else {
            cfg.max_standard_error
        };
        if !converged && iterations >= cfg.max_iterations {
            standard_error *= cfg.non_convergence_penalty;
        }

        ThetaEstimate {
            theta,
            standard_error,
            confidence: self.confidence(standard_error),
            converged,
            iterations,
            informative_responses: responses.len(),
        }
    }

    /// The estimate reported when no informative responses exist: theta
    /// stays at zero and the standard error at its maximum.
    pub fn empty_estimate(&self) -> ThetaEstimate {
        ThetaEstimate {
            theta: 0.0,
            standard_error: self.config.max_standard_error,
            confidence: 0.0,
            converged: true,
            iterations: 0,
            informative_responses: 0,
        }
    }

    fn confidence(&self, standard_error: f64) -> f64 {
        (1.0 - standard_error / self.config.max_standard_error).clamp(0.0, 1.0)
    }
}
