//! Session orchestration.
//!
//! `SessionEngine` owns the per-response transaction: validate, commit the
//! response, re-estimate theta, detect clinical patterns, evaluate rules,
//! decide continuation, select the next item, persist, audit. All session
//! state flows through the collaborator store traits; the engine itself
//! holds no session data beyond the per-session lock registry, so it can be
//! constructed per invocation or shared freely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as SessionMutex;
use uuid::Uuid;

use crate::error::EngineError;
use crate::estimator::{EstimatorConfig, ScoredResponse, ThetaEstimate, ThetaEstimator};
use crate::model::{Alert, Item, Response, Session, SessionStatus};
use crate::patterns::{aggregate_level, PatternDetector};
use crate::response::{endorsed, normalize, RawAnswer};
use crate::rules::{Facts, FiredRule, RuleAction, RuleEngine};
use crate::selector::{ChosenItem, ItemSelector, Selection, SelectorConfig};
use crate::stopping::{StopDecision, StopReason, StoppingConfig};
use crate::traits::{
    AuditEntry, AuditEvent, AuditSink, ItemBank, ItemFilter, ResponseLog, RuleSource, SessionStore,
    StoreError,
};

/// Ceiling for the doubling retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Configuration for the session engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub stopping: StoppingConfig,
    /// Retries on store failures (not caller faults).
    #[serde(default = "default_retries")]
    pub max_persistence_retries: u32,
    /// Initial delay between retries; doubles per attempt, capped at 5s.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            selector: SelectorConfig::default(),
            stopping: StoppingConfig::default(),
            max_persistence_retries: default_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Everything a caller learns from one committed response.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The session as persisted after the transaction.
    pub session: Session,
    pub estimate: ThetaEstimate,
    /// Alerts triggered by this evaluation pass.
    pub alerts: Vec<Alert>,
    pub fired_rules: Vec<FiredRule>,
    pub decision: StopDecision,
}

/// Result of a backward-navigation recalibration.
#[derive(Debug, Clone)]
pub struct RecalibrationOutcome {
    pub session: Session,
    pub estimate: ThetaEstimate,
}

/// Per-questionnaire context assembled for one transaction. Explicit and
/// short-lived: there is no process-wide engine state to get stale.
struct QuestionnaireContext {
    items: Vec<Item>,
    by_id: HashMap<String, Item>,
    detector: PatternDetector,
    rules: RuleEngine,
    exposure: HashMap<String, f64>,
}

/// The session orchestrator.
pub struct SessionEngine {
    item_bank: Arc<dyn ItemBank>,
    sessions: Arc<dyn SessionStore>,
    response_log: Arc<dyn ResponseLog>,
    rule_source: Arc<dyn RuleSource>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
    estimator: ThetaEstimator,
    selector: ItemSelector,
    locks: StdMutex<HashMap<Uuid, Arc<SessionMutex<()>>>>,
}

impl SessionEngine {
    pub fn new(
        item_bank: Arc<dyn ItemBank>,
        sessions: Arc<dyn SessionStore>,
        response_log: Arc<dyn ResponseLog>,
        rule_source: Arc<dyn RuleSource>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        let estimator = ThetaEstimator::new(config.estimator.clone());
        let selector = ItemSelector::new(config.selector.clone());
        Self {
            item_bank,
            sessions,
            response_log,
            rule_source,
            audit,
            config,
            estimator,
            selector,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Create a session, move it to `EM_ANDAMENTO`, and queue the first item.
    pub async fn start_session(
        &self,
        questionnaire_id: &str,
        rng_seed: Option<u64>,
    ) -> Result<Session, EngineError> {
        let ctx = self.load_context(questionnaire_id).await?;

        let seed = rng_seed.unwrap_or_else(rand::random);
        let mut session = Session::new(questionnaire_id, seed);
        transition(&mut session, SessionStatus::EmAndamento)?;

        let mut events = vec![AuditEvent::SessionStarted {
            questionnaire_id: questionnaire_id.to_string(),
        }];

        let mut rng = step_rng(&session);
        match self
            .selector
            .select(&ctx.items, &session, session.theta, &ctx.exposure, &mut rng)
        {
            Selection::Chosen(chosen) => {
                events.push(selected_event(&chosen, session.theta));
                session.presented.push(chosen.item_id.clone());
                session.next_item = Some(chosen.item_id);
            }
            Selection::Exhausted => {
                // Empty bank: finish immediately with a partial (empty) result.
                finalize(&mut session, StopReason::PoolExhausted)?;
                events.push(AuditEvent::Stopped {
                    reason: StopReason::PoolExhausted,
                });
            }
        }

        self.with_retry("save session", || self.sessions.save(&session))
            .await
            .map_err(persistence_err)?;
        self.audit_all(session.id, events).await;

        Ok(session)
    }

    /// The per-response transaction. At most one may be in flight per
    /// session: a concurrent call gets `ConcurrentModification` immediately.
    pub async fn submit_answer(
        &self,
        session_id: Uuid,
        item_id: &str,
        raw: RawAnswer,
        response_time_ms: u64,
    ) -> Result<SubmitOutcome, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock
            .try_lock_owned()
            .map_err(|_| EngineError::ConcurrentModification(session_id))?;

        let session = self.load_session(session_id).await?;
        require_in_progress(&session)?;

        let ctx = self.load_context(&session.questionnaire_id).await?;

        let item = ctx
            .by_id
            .get(item_id)
            .ok_or_else(|| EngineError::UnknownItem(item_id.to_string()))?;
        if session.has_answered(item_id) {
            return Err(EngineError::DuplicateAnswer(item_id.to_string()));
        }
        if !session.was_presented(item_id) {
            return Err(EngineError::InvalidInput(format!(
                "item {item_id} was not presented in this session"
            )));
        }

        // Validation happens before any mutation; an out-of-range value
        // leaves the session untouched.
        let normalized =
            normalize(&item.kind, &raw).map_err(|e| EngineError::InvalidInput(e.to_string()))?;

        // All mutation below happens on a staged copy; a persistence
        // failure discards it wholesale.
        let mut staged = session.clone();
        staged.skipped.retain(|id| id != item_id);
        if staged.next_item.as_deref() == Some(item_id) {
            staged.next_item = None;
        }

        let response = Response {
            item_id: item_id.to_string(),
            raw,
            normalized,
            endorsed: endorsed(normalized),
            response_time_ms,
            position: staged.responses.len() + 1,
            recorded_at: Utc::now(),
            retracted: false,
        };
        staged.responses.push(response.clone());

        let estimate = self.estimate_for(&ctx, &staged);
        staged.theta = estimate.theta;
        staged.standard_error = estimate.standard_error;
        staged.confidence = estimate.confidence;

        let alerts = ctx.detector.detect(&ctx.by_id, &staged.responses);
        staged.raise_alert(aggregate_level(&alerts));
        staged.alerts = alerts.clone();

        let facts = Facts::from_session(&staged, &ctx.by_id);
        let fired = ctx.rules.evaluate(&facts);
        let rule_terminated = self.apply_rule_actions(&ctx, &mut staged, &fired);

        let pool_available = !self.selector.eligible(&ctx.items, &staged).is_empty();
        let active_count = staged.active_responses().count();
        let evaluated = self.config.stopping.evaluate(
            active_count,
            staged.standard_error,
            pool_available,
            staged.alert_level,
        );
        // A critical stop outranks a rule-forced one.
        let mut decision = match evaluated {
            StopDecision::Stop(StopReason::Critical) => evaluated,
            _ if rule_terminated => StopDecision::Stop(StopReason::RuleTriggered),
            other => other,
        };

        let mut selection = None;
        if decision == StopDecision::Continue {
            let mut rng = step_rng(&staged);
            match self
                .selector
                .select(&ctx.items, &staged, staged.theta, &ctx.exposure, &mut rng)
            {
                Selection::Chosen(chosen) => {
                    staged.presented.push(chosen.item_id.clone());
                    staged.next_item = Some(chosen.item_id.clone());
                    selection = Some(chosen);
                }
                Selection::Exhausted => {
                    decision = StopDecision::Stop(StopReason::PoolExhausted);
                }
            }
        }

        if let StopDecision::Stop(reason) = decision {
            finalize(&mut staged, reason)?;
        }

        // Persist the response first (idempotent under retry by item id),
        // then the session. Either failing aborts the transaction; the
        // caller's view of the session never saw the staged mutation.
        self.with_retry("append response", || {
            self.response_log.append(session_id, &response)
        })
        .await
        .map_err(persistence_err)?;
        self.with_retry("save session", || self.sessions.save(&staged))
            .await
            .map_err(persistence_err)?;

        let mut events = vec![AuditEvent::ResponseAccepted {
            item_id: item_id.to_string(),
            normalized,
            theta: staged.theta,
            standard_error: staged.standard_error,
        }];
        for fr in &fired {
            events.push(AuditEvent::RuleFired {
                rule_id: fr.rule_id.clone(),
            });
        }
        if let Some(chosen) = &selection {
            events.push(selected_event(chosen, staged.theta));
        }
        if let StopDecision::Stop(reason) = decision {
            events.push(AuditEvent::Stopped { reason });
        }
        self.audit_all(session_id, events).await;

        Ok(SubmitOutcome {
            session: staged,
            estimate,
            alerts,
            fired_rules: fired,
            decision,
        })
    }

    /// Backward navigation: retract an answer from the active set (keeping
    /// it in history), re-queue the item, and recalibrate over exactly the
    /// remaining active responses. Serialized against `submit_answer` by
    /// the same per-session lock.
    pub async fn navigate_back(
        &self,
        session_id: Uuid,
        item_id: &str,
    ) -> Result<RecalibrationOutcome, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock
            .try_lock_owned()
            .map_err(|_| EngineError::ConcurrentModification(session_id))?;

        let session = self.load_session(session_id).await?;
        require_in_progress(&session)?;

        let mut staged = session.clone();
        let retracted = staged
            .responses
            .iter_mut()
            .rev()
            .find(|r| r.item_id == item_id && !r.retracted);
        match retracted {
            Some(response) => response.retracted = true,
            None => {
                return Err(EngineError::InvalidInput(format!(
                    "no active response for item {item_id}"
                )))
            }
        }

        // The item stays presented but is no longer answered; record it as
        // explicitly skipped until re-answered, and re-present it next.
        if !staged.skipped.iter().any(|id| id == item_id) {
            staged.skipped.push(item_id.to_string());
        }
        staged.next_item = Some(item_id.to_string());

        let ctx = self.load_context(&staged.questionnaire_id).await?;
        let estimate = self.estimate_for(&ctx, &staged);
        staged.theta = estimate.theta;
        staged.standard_error = estimate.standard_error;
        staged.confidence = estimate.confidence;

        self.with_retry("save session", || self.sessions.save(&staged))
            .await
            .map_err(persistence_err)?;
        self.audit_all(
            session_id,
            vec![AuditEvent::Recalibrated {
                retracted_item_id: item_id.to_string(),
                theta: staged.theta,
                standard_error: staged.standard_error,
            }],
        )
        .await;

        Ok(RecalibrationOutcome {
            session: staged,
            estimate,
        })
    }

    pub async fn pause(&self, session_id: Uuid) -> Result<Session, EngineError> {
        self.change_status(session_id, SessionStatus::Pausada, |session| {
            session.paused_at = Some(Utc::now());
        })
        .await
    }

    pub async fn resume(&self, session_id: Uuid) -> Result<Session, EngineError> {
        self.change_status(session_id, SessionStatus::EmAndamento, |session| {
            session.paused_at = None;
        })
        .await
    }

    /// Cancel aborts the session; staged state from any in-flight
    /// transaction is discarded because it was never persisted.
    pub async fn cancel(&self, session_id: Uuid) -> Result<Session, EngineError> {
        self.change_status(session_id, SessionStatus::Cancelada, |session| {
            session.finished_at = Some(Utc::now());
            session.next_item = None;
        })
        .await
    }

    /// Administrative reset: the only exit from a terminal state. Clears
    /// responses and estimates and returns the session to `INICIAL`.
    pub async fn reset(&self, session_id: Uuid) -> Result<Session, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock
            .try_lock_owned()
            .map_err(|_| EngineError::ConcurrentModification(session_id))?;

        let mut session = self.load_session(session_id).await?;
        if !session.status.is_terminal() {
            return Err(EngineError::SessionStateViolation {
                status: session.status,
            });
        }
        let from = session.status;
        session.reset();

        self.with_retry("save session", || self.sessions.save(&session))
            .await
            .map_err(persistence_err)?;
        self.audit_all(
            session_id,
            vec![AuditEvent::StatusChanged {
                from: from.to_string(),
                to: session.status.to_string(),
            }],
        )
        .await;
        Ok(session)
    }

    async fn change_status(
        &self,
        session_id: Uuid,
        to: SessionStatus,
        apply: impl FnOnce(&mut Session),
    ) -> Result<Session, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock
            .try_lock_owned()
            .map_err(|_| EngineError::ConcurrentModification(session_id))?;

        let mut session = self.load_session(session_id).await?;
        let from = session.status;
        transition(&mut session, to)?;
        apply(&mut session);

        self.with_retry("save session", || self.sessions.save(&session))
            .await
            .map_err(persistence_err)?;
        self.audit_all(
            session_id,
            vec![AuditEvent::StatusChanged {
                from: from.to_string(),
                to: to.to_string(),
            }],
        )
        .await;
        Ok(session)
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Session, EngineError> {
        self.with_retry("load session", || self.sessions.get(session_id))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => EngineError::SessionNotFound(session_id),
                other => persistence_err(other),
            })
    }

    async fn load_context(
        &self,
        questionnaire_id: &str,
    ) -> Result<QuestionnaireContext, EngineError> {
        let filter = ItemFilter::for_questionnaire(questionnaire_id);
        let items = self
            .with_retry("load item bank", || self.item_bank.load_items(&filter))
            .await
            .map_err(persistence_err)?;
        let rules = self
            .with_retry("load rules", || {
                self.rule_source.load_active_rules(questionnaire_id)
            })
            .await
            .map_err(persistence_err)?;
        let pattern_rules = self
            .with_retry("load pattern rules", || {
                self.rule_source.load_pattern_rules(questionnaire_id)
            })
            .await
            .map_err(persistence_err)?;

        // Exposure statistics are optional; a failing stats query must not
        // block a session.
        let exposure = match self.item_bank.exposure_rates().await {
            Ok(rates) => rates,
            Err(e) => {
                tracing::warn!(error = %e, "exposure statistics unavailable");
                HashMap::new()
            }
        };

        let by_id = items
            .iter()
            .map(|item| (item.id.clone(), item.clone()))
            .collect();

        Ok(QuestionnaireContext {
            items,
            by_id,
            detector: PatternDetector::new(pattern_rules),
            rules: RuleEngine::new(rules),
            exposure,
        })
    }

    /// Fresh estimation over the active responses whose items carry IRT
    /// parameters. Cold-start responses never feed the estimator.
    fn estimate_for(&self, ctx: &QuestionnaireContext, session: &Session) -> ThetaEstimate {
        let scored: Vec<ScoredResponse> = session
            .active_responses()
            .filter_map(|r| {
                ctx.by_id
                    .get(&r.item_id)
                    .and_then(|item| item.irt)
                    .map(|params| ScoredResponse {
                        params,
                        value: r.normalized,
                    })
            })
            .collect();
        self.estimator.estimate(&scored)
    }

    /// Apply fired actions with set semantics; returns whether a terminate
    /// action fired.
    fn apply_rule_actions(
        &self,
        ctx: &QuestionnaireContext,
        staged: &mut Session,
        fired: &[FiredRule],
    ) -> bool {
        let mut terminate = false;
        for fr in fired {
            for action in &fr.actions {
                match action {
                    RuleAction::SkipCategory { category } => {
                        if !staged.skip_categories.contains(category) {
                            staged.skip_categories.push(category.clone());
                        }
                    }
                    RuleAction::Flag { level, reason } => {
                        tracing::debug!(rule = %fr.rule_id, %level, reason = %reason, "session flagged");
                        staged.raise_alert(*level);
                    }
                    RuleAction::Terminate { reason } => {
                        tracing::debug!(rule = %fr.rule_id, reason = %reason, "rule forced termination");
                        terminate = true;
                    }
                    RuleAction::Branch { questionnaire_id } => {
                        staged.branched_to = Some(questionnaire_id.clone());
                    }
                    RuleAction::Recalibrate => {
                        let estimate = self.estimate_for(ctx, staged);
                        staged.theta = estimate.theta;
                        staged.standard_error = estimate.standard_error;
                        staged.confidence = estimate.confidence;
                    }
                }
            }
        }
        terminate
    }

    fn lock_for(&self, session_id: Uuid) -> Arc<SessionMutex<()>> {
        let mut locks = self.locks.lock().expect("session lock registry poisoned");
        locks.entry(session_id).or_default().clone()
    }

    async fn audit_all(&self, session_id: Uuid, events: Vec<AuditEvent>) {
        for event in events {
            let entry = AuditEntry::now(session_id, event);
            if let Err(e) = self.audit.append(&entry).await {
                tracing::warn!(error = %e, "audit append failed, continuing");
            }
        }
    }

    /// Retry a store operation with exponential backoff. Non-retryable
    /// errors surface immediately.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut last: Option<StoreError> = None;
        for attempt in 0..=self.config.max_persistence_retries {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, error = %e, "{} failed, will retry", what);
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or_else(|| StoreError::Unavailable("retry budget exhausted".into())))
    }
}

fn persistence_err(e: StoreError) -> EngineError {
    EngineError::PersistenceFailure(e.to_string())
}

fn require_in_progress(session: &Session) -> Result<(), EngineError> {
    if session.status != SessionStatus::EmAndamento {
        return Err(EngineError::SessionStateViolation {
            status: session.status,
        });
    }
    Ok(())
}

fn transition(session: &mut Session, to: SessionStatus) -> Result<(), EngineError> {
    if session.status.is_terminal() {
        return Err(EngineError::SessionStateViolation {
            status: session.status,
        });
    }
    if !session.status.can_transition_to(to) {
        return Err(EngineError::InvalidTransition {
            from: session.status,
            to,
        });
    }
    session.status = to;
    Ok(())
}

fn finalize(session: &mut Session, reason: StopReason) -> Result<(), EngineError> {
    transition(session, SessionStatus::Finalizada)?;
    session.outcome = Some(reason);
    session.next_item = None;
    session.finished_at = Some(Utc::now());
    Ok(())
}

/// Deterministic per-step RNG: the session seed mixed with how many items
/// have been presented, so replaying a session reproduces its choices.
fn step_rng(session: &Session) -> StdRng {
    let step = session.presented.len() as u64;
    StdRng::seed_from_u64(session.rng_seed ^ step.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

fn selected_event(chosen: &ChosenItem, theta: f64) -> AuditEvent {
    AuditEvent::ItemSelected {
        item_id: chosen.item_id.clone(),
        theta,
        information: chosen.information,
        reason: chosen.reason.to_string(),
    }
}
