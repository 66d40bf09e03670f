//! Session stopping rules.
//!
//! Evaluated after every committed response. A crisis-level alert overrides
//! everything; otherwise the session continues until it hits the response
//! ceiling, exhausts the pool, or reaches the precision target after the
//! minimum number of responses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::AlertLevel;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Crisis-level alert; early termination takes precedence over
    /// information-based continuation.
    Critical,
    /// Response ceiling reached.
    MaxReached,
    /// No eligible item remains; graceful termination with a partial result.
    PoolExhausted,
    /// Standard error at or below the target with the minimum met.
    PrecisionReached,
    /// A rule action forced termination.
    RuleTriggered,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Critical => write!(f, "critical"),
            StopReason::MaxReached => write!(f, "max reached"),
            StopReason::PoolExhausted => write!(f, "pool exhausted"),
            StopReason::PrecisionReached => write!(f, "precision reached"),
            StopReason::RuleTriggered => write!(f, "rule triggered"),
        }
    }
}

/// Continue, or stop for the stated reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopDecision {
    Continue,
    Stop(StopReason),
}

impl StopDecision {
    pub fn is_stop(&self) -> bool {
        matches!(self, StopDecision::Stop(_))
    }
}

/// Stopping thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoppingConfig {
    /// Responses required before precision can end the session.
    #[serde(default = "default_min_responses")]
    pub min_responses: usize,
    /// Hard ceiling on responses per session.
    #[serde(default = "default_max_responses")]
    pub max_responses: usize,
    /// Standard-error target.
    #[serde(default = "default_se_threshold")]
    pub se_threshold: f64,
}

fn default_min_responses() -> usize {
    5
}
fn default_max_responses() -> usize {
    30
}
fn default_se_threshold() -> f64 {
    0.3
}

impl Default for StoppingConfig {
    fn default() -> Self {
        Self {
            min_responses: default_min_responses(),
            max_responses: default_max_responses(),
            se_threshold: default_se_threshold(),
        }
    }
}

impl StoppingConfig {
    /// Decide whether the session continues.
    ///
    /// `responses` counts the active (non-retracted) set; `pool_available`
    /// reflects the live candidate pool, never the presented count.
    pub fn evaluate(
        &self,
        responses: usize,
        standard_error: f64,
        pool_available: bool,
        alert_level: AlertLevel,
    ) -> StopDecision {
        if alert_level >= AlertLevel::Vermelho {
            return StopDecision::Stop(StopReason::Critical);
        }
        if responses >= self.max_responses {
            return StopDecision::Stop(StopReason::MaxReached);
        }
        if !pool_available {
            return StopDecision::Stop(StopReason::PoolExhausted);
        }
        if responses < self.min_responses {
            return StopDecision::Continue;
        }
        if standard_error <= self.se_threshold {
            return StopDecision::Stop(StopReason::PrecisionReached);
        }
        StopDecision::Continue
    }
}
