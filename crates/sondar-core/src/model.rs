//! Core data model types for sondar.
//!
//! These are the fundamental types the whole engine operates on: items and
//! their calibration, committed responses, the session with its state
//! machine, and clinical alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::irt::IrtParams;
use crate::response::{RawAnswer, ResponseKind};
use crate::stopping::StopReason;

/// Valence/arousal quadrant of the circumplex model, used to interpret
/// normalized responses clinically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffectQuadrant {
    PositiveActivated,
    PositiveCalm,
    NegativeActivated,
    NegativeCalm,
}

impl fmt::Display for AffectQuadrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AffectQuadrant::PositiveActivated => write!(f, "positive_activated"),
            AffectQuadrant::PositiveCalm => write!(f, "positive_calm"),
            AffectQuadrant::NegativeActivated => write!(f, "negative_activated"),
            AffectQuadrant::NegativeCalm => write!(f, "negative_calm"),
        }
    }
}

/// A questionnaire item. Immutable once loaded into a session's candidate
/// pool for that session's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Unique identifier within the bank.
    pub id: String,
    /// The prompt shown to the respondent.
    pub text: String,
    /// Content category (e.g. "depressao", "ansiedade").
    pub category: String,
    /// Circumplex quadrant.
    pub domain: AffectQuadrant,
    /// Declared answer format.
    pub kind: ResponseKind,
    /// Inactive items never enter a candidate pool.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Crisis-flagged items feed the crisis pattern rules.
    #[serde(default)]
    pub crisis: bool,
    /// Calibrated 3PL parameters; absent for cold-start items.
    #[serde(default)]
    pub irt: Option<IrtParams>,
}

fn default_true() -> bool {
    true
}

impl Item {
    /// Whether this item can participate in information-based ranking.
    pub fn is_calibrated(&self) -> bool {
        self.irt.is_some()
    }
}

/// A committed answer. Append-only: retraction via backward navigation
/// flips `retracted`, it never deletes the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The answered item.
    pub item_id: String,
    /// The raw value as submitted.
    pub raw: RawAnswer,
    /// The value mapped onto [0,1].
    pub normalized: f64,
    /// Pass/fail signal (normalized >= 0.5).
    pub endorsed: bool,
    /// Time the respondent took, in milliseconds.
    pub response_time_ms: u64,
    /// Ordinal position in the session (1-based, over the full history).
    pub position: usize,
    /// When the response was committed.
    pub recorded_at: DateTime<Utc>,
    /// Removed from the active set by backward navigation.
    #[serde(default)]
    pub retracted: bool,
}

/// Session lifecycle. `Inicial` and the two terminal states are boundaries;
/// the only cycle allowed is `Pausada` <-> `EmAndamento`, and the only exit
/// from a terminal state is an explicit administrative reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Inicial,
    EmAndamento,
    Pausada,
    Finalizada,
    Cancelada,
}

impl SessionStatus {
    /// Whether a direct transition to `next` is permitted.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Inicial, EmAndamento)
                | (EmAndamento, Pausada)
                | (Pausada, EmAndamento)
                | (EmAndamento, Finalizada)
                | (Inicial, Cancelada)
                | (EmAndamento, Cancelada)
                | (Pausada, Cancelada)
        )
    }

    /// Terminal states admit no transition except administrative reset.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Finalizada | SessionStatus::Cancelada)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Inicial => write!(f, "INICIAL"),
            SessionStatus::EmAndamento => write!(f, "EM_ANDAMENTO"),
            SessionStatus::Pausada => write!(f, "PAUSADA"),
            SessionStatus::Finalizada => write!(f, "FINALIZADA"),
            SessionStatus::Cancelada => write!(f, "CANCELADA"),
        }
    }
}

/// Clinical alert level, ordered from unremarkable to critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    #[default]
    Verde,
    Amarelo,
    Laranja,
    Vermelho,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Verde => write!(f, "VERDE"),
            AlertLevel::Amarelo => write!(f, "AMARELO"),
            AlertLevel::Laranja => write!(f, "LARANJA"),
            AlertLevel::Vermelho => write!(f, "VERMELHO"),
        }
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "VERDE" => Ok(AlertLevel::Verde),
            "AMARELO" => Ok(AlertLevel::Amarelo),
            "LARANJA" => Ok(AlertLevel::Laranja),
            "VERMELHO" => Ok(AlertLevel::Vermelho),
            other => Err(format!("unknown alert level: {other}")),
        }
    }
}

/// Which clinical signature a pattern rule looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Crisis,
    CoOccurrence,
    Deviation,
}

/// A detected clinical signature with its supporting evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalPattern {
    pub kind: PatternKind,
    /// Strength of the signal in [0,1] terms of the triggering rule.
    pub severity: f64,
    /// Item ids of the responses that contributed.
    pub contributing: Vec<String>,
}

/// An explainable alert raised by the pattern detector or a flag action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    /// Identifier of the rule that fired.
    pub rule_id: String,
    pub pattern: ClinicalPattern,
}

/// A testing session: the state machine plus everything the per-response
/// transaction reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub questionnaire_id: String,
    pub status: SessionStatus,
    /// Item ids shown to the respondent, in order. Superset of the answered
    /// set; the difference is restricted to `skipped`.
    pub presented: Vec<String>,
    /// Items explicitly shown but skipped (rule-driven or retracted).
    #[serde(default)]
    pub skipped: Vec<String>,
    /// Full response history; the active set is the non-retracted subset.
    pub responses: Vec<Response>,
    /// Current trait estimate, clamped to [-4, 4].
    pub theta: f64,
    /// Uncertainty of the estimate.
    pub standard_error: f64,
    /// Derived from the standard error, in [0,1].
    pub confidence: f64,
    /// The item queued for presentation, if any.
    pub next_item: Option<String>,
    /// Maximum level among triggered alerts; never decreases without reset.
    #[serde(default)]
    pub alert_level: AlertLevel,
    /// Currently triggered alerts with evidence.
    #[serde(default)]
    pub alerts: Vec<Alert>,
    /// Categories excluded from selection by rule actions.
    #[serde(default)]
    pub skip_categories: Vec<String>,
    /// Sub-questionnaire requested by a branch action, if any.
    #[serde(default)]
    pub branched_to: Option<String>,
    /// Why the session stopped, once it has.
    #[serde(default)]
    pub outcome: Option<StopReason>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Seed for the selector's tie-break randomness.
    pub rng_seed: u64,
}

impl Session {
    pub fn new(questionnaire_id: impl Into<String>, rng_seed: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            questionnaire_id: questionnaire_id.into(),
            status: SessionStatus::Inicial,
            presented: Vec::new(),
            skipped: Vec::new(),
            responses: Vec::new(),
            theta: 0.0,
            standard_error: 1.0,
            confidence: 0.0,
            next_item: None,
            alert_level: AlertLevel::Verde,
            alerts: Vec::new(),
            skip_categories: Vec::new(),
            branched_to: None,
            outcome: None,
            started_at: Utc::now(),
            paused_at: None,
            finished_at: None,
            rng_seed,
        }
    }

    /// The non-retracted responses, in commit order.
    pub fn active_responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.iter().filter(|r| !r.retracted)
    }

    /// Item ids with an active (non-retracted) response.
    pub fn answered_ids(&self) -> Vec<&str> {
        self.active_responses().map(|r| r.item_id.as_str()).collect()
    }

    pub fn has_answered(&self, item_id: &str) -> bool {
        self.active_responses().any(|r| r.item_id == item_id)
    }

    pub fn was_presented(&self, item_id: &str) -> bool {
        self.presented.iter().any(|id| id == item_id)
    }

    /// Raise the session alert level; levels never decrease.
    pub fn raise_alert(&mut self, level: AlertLevel) {
        if level > self.alert_level {
            self.alert_level = level;
        }
    }

    /// Administrative reset: clears responses and estimates and returns the
    /// session to `Inicial`. The only permitted exit from a terminal state.
    pub fn reset(&mut self) {
        self.status = SessionStatus::Inicial;
        self.presented.clear();
        self.skipped.clear();
        self.responses.clear();
        self.theta = 0.0;
        self.standard_error = 1.0;
        self.confidence = 0.0;
        self.next_item = None;
        self.alert_level = AlertLevel::Verde;
        self.alerts.clear();
        self.skip_categories.clear();
        self.branched_to = None;
        self.outcome = None;
        self.paused_at = None;
        self.finished_at = None;
    }
}
