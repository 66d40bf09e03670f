//! Repository contracts for the collaborator store.
//!
//! The engine consumes persistence through these async traits and never
//! touches storage directly; implementations live in `sondar-store`. Errors
//! come back as explicit [`StoreError`] values so the engine can classify
//! retryability without string matching.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Item, Response, Session};
use crate::patterns::PatternRule;
use crate::rules::Rule;
use crate::stopping::StopReason;

/// Failures at the store boundary.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store is unreachable or temporarily failing.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The stored data could not be decoded.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns `true` if retrying the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Filters for loading a candidate pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilter {
    pub questionnaire_id: String,
    /// Restrict to these categories when present.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl ItemFilter {
    pub fn for_questionnaire(questionnaire_id: impl Into<String>) -> Self {
        Self {
            questionnaire_id: questionnaire_id.into(),
            categories: None,
        }
    }
}

/// Read-only access to the item bank.
#[async_trait]
pub trait ItemBank: Send + Sync {
    /// Active items matching the filter only.
    async fn load_items(&self, filter: &ItemFilter) -> Result<Vec<Item>, StoreError>;

    /// Historical presentation rates per item id, when the store tracks
    /// them. The default is no statistics.
    async fn exposure_rates(&self) -> Result<HashMap<String, f64>, StoreError> {
        Ok(HashMap::new())
    }
}

/// Session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Session, StoreError>;
    async fn save(&self, session: &Session) -> Result<(), StoreError>;
}

/// Append-only response log, idempotent under retry keyed by item id.
#[async_trait]
pub trait ResponseLog: Send + Sync {
    async fn append(&self, session_id: Uuid, response: &Response) -> Result<(), StoreError>;
}

/// Read-only access to declared rules.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn load_active_rules(&self, questionnaire_id: &str) -> Result<Vec<Rule>, StoreError>;
    async fn load_pattern_rules(
        &self,
        questionnaire_id: &str,
    ) -> Result<Vec<PatternRule>, StoreError>;
}

/// Append-only audit trail. Best-effort: the engine logs failures here and
/// moves on; an audit write never aborts a transaction.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

/// One audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub session_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEntry {
    pub fn now(session_id: Uuid, event: AuditEvent) -> Self {
        Self {
            session_id,
            recorded_at: Utc::now(),
            event,
        }
    }
}

/// What happened, with enough detail to explain the engine's choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionStarted {
        questionnaire_id: String,
    },
    ResponseAccepted {
        item_id: String,
        normalized: f64,
        theta: f64,
        standard_error: f64,
    },
    ItemSelected {
        item_id: String,
        theta: f64,
        information: Option<f64>,
        reason: String,
    },
    RuleFired {
        rule_id: String,
    },
    Recalibrated {
        retracted_item_id: String,
        theta: f64,
        standard_error: f64,
    },
    Stopped {
        reason: StopReason,
    },
    StatusChanged {
        from: String,
        to: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_classification() {
        assert!(StoreError::Unavailable("timeout".into()).is_retryable());
        assert!(!StoreError::NotFound("x".into()).is_retryable());
        assert!(!StoreError::Corrupt("bad json".into()).is_retryable());
    }

    #[test]
    fn audit_entry_serde_roundtrip() {
        let entry = AuditEntry::now(
            Uuid::new_v4(),
            AuditEvent::ItemSelected {
                item_id: "dep-01".into(),
                theta: 0.4,
                information: Some(0.62),
                reason: "max_information".into(),
            },
        );
        let json = serde_json::to_string(&entry).unwrap();
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, entry.session_id);
        assert!(matches!(back.event, AuditEvent::ItemSelected { .. }));
    }
}
