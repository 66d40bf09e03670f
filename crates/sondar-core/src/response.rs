//! Response kinds and normalization.
//!
//! Every item declares a [`ResponseKind`]; a raw answer is validated against
//! that kind and mapped onto the [0,1] scale before anything else in the
//! pipeline sees it. Rejection happens here, before any session mutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The answer format an item accepts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseKind {
    /// Yes/no endorsement.
    SimNao,
    /// Integer intensity scale, inclusive on both ends (typically 1–5).
    EscalaIntensidade { min: i64, max: i64 },
    /// Likert scale with a fixed number of points, answered 1..=points.
    EscalaLikert { points: u8 },
    /// Percentage in 0–100.
    Percentual,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseKind::SimNao => write!(f, "sim_nao"),
            ResponseKind::EscalaIntensidade { min, max } => {
                write!(f, "escala_intensidade({min}..={max})")
            }
            ResponseKind::EscalaLikert { points } => write!(f, "escala_likert({points})"),
            ResponseKind::Percentual => write!(f, "percentual"),
        }
    }
}

/// A raw answer value, prior to validation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RawAnswer {
    Boolean(bool),
    Integer(i64),
    Number(f64),
}

impl RawAnswer {
    fn type_name(&self) -> &'static str {
        match self {
            RawAnswer::Boolean(_) => "boolean",
            RawAnswer::Integer(_) => "integer",
            RawAnswer::Number(_) => "number",
        }
    }
}

/// Why a raw answer was rejected.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResponseValidation {
    #[error("expected a {expected} answer for {kind}, got {got}")]
    TypeMismatch {
        kind: String,
        expected: &'static str,
        got: &'static str,
    },

    #[error("value {value} outside the declared range {min}..={max}")]
    OutOfRange { value: f64, min: f64, max: f64 },

    #[error("scale must span at least two points, got {0}")]
    DegenerateScale(String),
}

/// Validate a raw answer against an item's declared kind and map it onto [0,1].
pub fn normalize(kind: &ResponseKind, raw: &RawAnswer) -> Result<f64, ResponseValidation> {
    match (kind, raw) {
        (ResponseKind::SimNao, RawAnswer::Boolean(v)) => Ok(if *v { 1.0 } else { 0.0 }),

        (ResponseKind::EscalaIntensidade { min, max }, RawAnswer::Integer(v)) => {
            if max <= min {
                return Err(ResponseValidation::DegenerateScale(kind.to_string()));
            }
            if v < min || v > max {
                return Err(ResponseValidation::OutOfRange {
                    value: *v as f64,
                    min: *min as f64,
                    max: *max as f64,
                });
            }
            Ok((v - min) as f64 / (max - min) as f64)
        }

        (ResponseKind::EscalaLikert { points }, RawAnswer::Integer(v)) => {
            if *points < 2 {
                return Err(ResponseValidation::DegenerateScale(kind.to_string()));
            }
            let max = *points as i64;
            if *v < 1 || *v > max {
                return Err(ResponseValidation::OutOfRange {
                    value: *v as f64,
                    min: 1.0,
                    max: max as f64,
                });
            }
            Ok((*v - 1) as f64 / (max - 1) as f64)
        }

        (ResponseKind::Percentual, RawAnswer::Number(v)) => {
            if !v.is_finite() || *v < 0.0 || *v > 100.0 {
                return Err(ResponseValidation::OutOfRange {
                    value: *v,
                    min: 0.0,
                    max: 100.0,
                });
            }
            Ok(v / 100.0)
        }

        (kind, raw) => Err(ResponseValidation::TypeMismatch {
            kind: kind.to_string(),
            expected: match kind {
                ResponseKind::SimNao => "boolean",
                ResponseKind::EscalaIntensidade { .. } | ResponseKind::EscalaLikert { .. } => {
                    "integer"
                }
                ResponseKind::Percentual => "number",
            },
            got: raw.type_name(),
        }),
    }
}

/// Pass/fail signal derived from a normalized value.
pub fn endorsed(normalized: f64) -> bool {
    normalized >= 0.5
}
