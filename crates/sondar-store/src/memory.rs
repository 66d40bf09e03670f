//! In-memory store implementations.
//!
//! Used by the simulation CLI and by tests. The session store and response
//! log support failure injection so engine retry and rollback behavior can
//! be exercised without a real backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use sondar_core::model::{Item, Response, Session};
use sondar_core::patterns::PatternRule;
use sondar_core::rules::Rule;
use sondar_core::traits::{
    AuditEntry, AuditSink, ItemBank, ItemFilter, ResponseLog, RuleSource, SessionStore, StoreError,
};

/// A fixed item bank held in memory.
pub struct InMemoryItemBank {
    items: Vec<Item>,
    exposure: HashMap<String, f64>,
}

impl InMemoryItemBank {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            exposure: HashMap::new(),
        }
    }

    /// Attach historical exposure rates for exposure-control tests.
    pub fn with_exposure(mut self, exposure: HashMap<String, f64>) -> Self {
        self.exposure = exposure;
        self
    }
}

#[async_trait]
impl ItemBank for InMemoryItemBank {
    async fn load_items(&self, filter: &ItemFilter) -> Result<Vec<Item>, StoreError> {
        let items = self
            .items
            .iter()
            .filter(|item| item.active)
            .filter(|item| match &filter.categories {
                Some(categories) => categories.contains(&item.category),
                None => true,
            })
            .cloned()
            .collect();
        Ok(items)
    }

    async fn exposure_rates(&self) -> Result<HashMap<String, f64>, StoreError> {
        Ok(self.exposure.clone())
    }
}

/// In-memory session store with injectable save failures.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    save_count: AtomicU32,
    failing_saves: AtomicU32,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        self.sessions.lock().unwrap().insert(session.id, session);
    }

    /// Make the next `n` saves fail with `Unavailable`.
    pub fn fail_next_saves(&self, n: u32) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> u32 {
        self.save_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: Uuid) -> Result<Session, StoreError> {
        self.sessions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_saves.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_saves.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected save failure".into()));
        }
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }
}

/// In-memory response log, idempotent under retry keyed by
/// (item id, position).
#[derive(Default)]
pub struct InMemoryResponseLog {
    entries: Mutex<HashMap<Uuid, Vec<Response>>>,
    failing_appends: AtomicU32,
}

impl InMemoryResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_appends(&self, n: u32) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    pub fn responses_for(&self, session_id: Uuid) -> Vec<Response> {
        self.entries
            .lock()
            .unwrap()
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResponseLog for InMemoryResponseLog {
    async fn append(&self, session_id: Uuid, response: &Response) -> Result<(), StoreError> {
        let failing = self.failing_appends.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_appends.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("injected append failure".into()));
        }
        let mut entries = self.entries.lock().unwrap();
        let log = entries.entry(session_id).or_default();
        // Retried appends replace rather than duplicate.
        log.retain(|r| !(r.item_id == response.item_id && r.position == response.position));
        log.push(response.clone());
        Ok(())
    }
}

/// Fixed rule set served for every questionnaire.
#[derive(Default)]
pub struct InMemoryRuleSource {
    rules: Vec<Rule>,
    pattern_rules: Vec<PatternRule>,
}

impl InMemoryRuleSource {
    pub fn new(rules: Vec<Rule>, pattern_rules: Vec<PatternRule>) -> Self {
        Self {
            rules,
            pattern_rules,
        }
    }
}

#[async_trait]
impl RuleSource for InMemoryRuleSource {
    async fn load_active_rules(&self, _questionnaire_id: &str) -> Result<Vec<Rule>, StoreError> {
        Ok(self.rules.clone())
    }

    async fn load_pattern_rules(
        &self,
        _questionnaire_id: &str,
    ) -> Result<Vec<PatternRule>, StoreError> {
        Ok(self.pattern_rules.clone())
    }
}

/// Inspectable audit sink.
#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    fail_all: AtomicBool,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every append fail, for best-effort behavior tests.
    pub fn fail_all(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected audit failure".into()));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

/// Build an in-memory rule source plus bank from a parsed questionnaire.
pub fn from_questionnaire(
    bank: &sondar_core::bank::Questionnaire,
) -> (InMemoryItemBank, InMemoryRuleSource) {
    (
        InMemoryItemBank::new(bank.items.clone()),
        InMemoryRuleSource::new(bank.rules.clone(), bank.pattern_rules.clone()),
    )
}
