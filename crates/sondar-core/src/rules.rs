//! Generic forward-chaining rule evaluation.
//!
//! Decoupled from the clinical/psychometric specifics: behaviors like
//! skipping a category, branching to a sub-questionnaire, or forcing
//! termination are declared data-side as rules over session facts.
//! Conditions and actions are a closed set of tagged variants evaluated by
//! an explicit interpreter; evaluation is a pure function of the facts, so
//! the same facts always produce the same fired-rule sequence.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{AlertLevel, Item, Session};

/// Tolerance for equality comparisons over floating-point facts.
const EQ_EPSILON: f64 = 1e-9;

/// Numeric facts a condition can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactField {
    Theta,
    StandardError,
    Confidence,
    ResponseCount,
    LastNormalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl CompareOp {
    fn apply(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => (lhs - rhs).abs() < EQ_EPSILON,
        }
    }
}

/// The fact base assembled per evaluation from session state, the latest
/// response, current alerts, and the current estimate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facts {
    pub response_count: usize,
    pub theta: f64,
    pub standard_error: f64,
    pub confidence: f64,
    pub alert_level: AlertLevel,
    pub last_item_id: Option<String>,
    pub last_category: Option<String>,
    pub last_normalized: Option<f64>,
    /// Mean normalized value per category over the active responses.
    pub category_scores: HashMap<String, f64>,
}

impl Facts {
    /// Assemble the fact base from a session and its item bank.
    pub fn from_session(session: &Session, items: &HashMap<String, Item>) -> Self {
        let last = session.active_responses().last();

        let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
        for response in session.active_responses() {
            if let Some(item) = items.get(&response.item_id) {
                let entry = sums.entry(item.category.clone()).or_default();
                entry.0 += response.normalized;
                entry.1 += 1;
            }
        }
        let category_scores = sums
            .into_iter()
            .map(|(category, (sum, count))| (category, sum / count as f64))
            .collect();

        Self {
            response_count: session.active_responses().count(),
            theta: session.theta,
            standard_error: session.standard_error,
            confidence: session.confidence,
            alert_level: session.alert_level,
            last_item_id: last.map(|r| r.item_id.clone()),
            last_category: last
                .and_then(|r| items.get(&r.item_id))
                .map(|item| item.category.clone()),
            last_normalized: last.map(|r| r.normalized),
            category_scores,
        }
    }

    fn field(&self, field: FactField) -> Option<f64> {
        match field {
            FactField::Theta => Some(self.theta),
            FactField::StandardError => Some(self.standard_error),
            FactField::Confidence => Some(self.confidence),
            FactField::ResponseCount => Some(self.response_count as f64),
            FactField::LastNormalized => self.last_normalized,
        }
    }
}

/// Predicate over the fact base.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Compare {
        field: FactField,
        op: CompareOp,
        value: f64,
    },
    AlertAtLeast {
        level: AlertLevel,
    },
    LastItemCategory {
        category: String,
    },
    CategoryScoreAbove {
        category: String,
        threshold: f64,
    },
    All {
        conditions: Vec<Condition>,
    },
    Any {
        conditions: Vec<Condition>,
    },
    Not {
        condition: Box<Condition>,
    },
}

impl Condition {
    pub fn holds(&self, facts: &Facts) -> bool {
        match self {
            Condition::Compare { field, op, value } => facts
                .field(*field)
                .map(|lhs| op.apply(lhs, *value))
                .unwrap_or(false),
            Condition::AlertAtLeast { level } => facts.alert_level >= *level,
            Condition::LastItemCategory { category } => {
                facts.last_category.as_deref() == Some(category.as_str())
            }
            Condition::CategoryScoreAbove {
                category,
                threshold,
            } => facts
                .category_scores
                .get(category)
                .map(|score| score > threshold)
                .unwrap_or(false),
            Condition::All { conditions } => conditions.iter().all(|c| c.holds(facts)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.holds(facts)),
            Condition::Not { condition } => !condition.holds(facts),
        }
    }
}

/// What a fired rule asks the orchestrator to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    SkipCategory { category: String },
    Flag { level: AlertLevel, reason: String },
    Terminate { reason: String },
    Branch { questionnaire_id: String },
    Recalibrate,
}

/// A declared rule: a condition plus the actions it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    /// Higher priority evaluates first; declaration order breaks ties.
    #[serde(default)]
    pub priority: i32,
    pub condition: Condition,
    pub actions: Vec<RuleAction>,
}

/// A rule that fired during one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredRule {
    pub rule_id: String,
    pub actions: Vec<RuleAction>,
}

/// Forward-chaining evaluator. Rules are ordered once at construction by
/// (priority descending, then declaration order).
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new(mut rules: Vec<Rule>) -> Self {
        // Stable sort preserves declaration order within a priority.
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule against the facts, in order. Idempotent:
    /// re-running on unchanged facts produces the same sequence, and the
    /// orchestrator applies actions with set semantics.
    pub fn evaluate(&self, facts: &Facts) -> Vec<FiredRule> {
        self.rules
            .iter()
            .filter(|rule| rule.condition.holds(facts))
            .map(|rule| FiredRule {
                rule_id: rule.id.clone(),
                actions: rule.actions.clone(),
            })
            .collect()
    }
}
