//! End-to-end engine tests against the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use sondar_core::engine::{EngineConfig, SessionEngine};
use sondar_core::error::EngineError;
use sondar_core::estimator::{ScoredResponse, ThetaEstimator};
use sondar_core::irt::IrtParams;
use sondar_core::model::{AffectQuadrant, AlertLevel, Item, Session, SessionStatus};
use sondar_core::patterns::{Baseline, CategoryThreshold, PatternRule};
use sondar_core::response::{RawAnswer, ResponseKind};
use sondar_core::rules::{CompareOp, Condition, FactField, Rule, RuleAction};
use sondar_core::stopping::{StopDecision, StopReason, StoppingConfig};
use sondar_core::traits::{SessionStore, StoreError};
use sondar_store::memory::{
    InMemoryAuditSink, InMemoryItemBank, InMemoryResponseLog, InMemoryRuleSource,
    InMemorySessionStore,
};

fn scale_item(id: &str, category: &str, a: f64, b: f64) -> Item {
    Item {
        id: id.into(),
        text: format!("item {id}"),
        category: category.into(),
        domain: AffectQuadrant::NegativeCalm,
        kind: ResponseKind::EscalaIntensidade { min: 1, max: 5 },
        active: true,
        crisis: false,
        irt: Some(IrtParams::new(a, b, 0.1).unwrap()),
    }
}

fn crisis_item(id: &str, a: f64) -> Item {
    Item {
        id: id.into(),
        text: format!("item {id}"),
        category: "crise".into(),
        domain: AffectQuadrant::NegativeActivated,
        kind: ResponseKind::SimNao,
        active: true,
        crisis: true,
        irt: Some(IrtParams::new(a, 0.0, 0.0).unwrap()),
    }
}

fn screening_items() -> Vec<Item> {
    vec![
        scale_item("dep-1", "depressao", 1.4, -0.5),
        scale_item("dep-2", "depressao", 1.2, 0.3),
        scale_item("dep-3", "depressao", 1.0, 0.8),
        scale_item("ans-1", "ansiedade", 1.3, -0.2),
        scale_item("ans-2", "ansiedade", 1.1, 0.5),
        scale_item("ans-3", "ansiedade", 0.9, 1.1),
        scale_item("hum-1", "humor", 1.2, 0.0),
        scale_item("hum-2", "humor", 1.0, -0.8),
    ]
}

fn screening_patterns() -> Vec<PatternRule> {
    vec![
        PatternRule::Crisis {
            id: "crise-ideacao".into(),
            items: vec!["crise-1".into()],
            min_severity: 0.75,
        },
        PatternRule::CoOccurrence {
            id: "dep-ans".into(),
            categories: vec![
                CategoryThreshold {
                    category: "depressao".into(),
                    threshold: 0.6,
                },
                CategoryThreshold {
                    category: "ansiedade".into(),
                    threshold: 0.6,
                },
            ],
            level: AlertLevel::Laranja,
        },
        PatternRule::Deviation {
            id: "desvio-base".into(),
            baselines: HashMap::from([(
                "humor".to_string(),
                Baseline {
                    mean: 0.3,
                    std_dev: 0.1,
                },
            )]),
        },
    ]
}

struct Harness {
    engine: SessionEngine,
    sessions: Arc<InMemorySessionStore>,
    responses: Arc<InMemoryResponseLog>,
    audit: Arc<InMemoryAuditSink>,
    items: Vec<Item>,
}

fn harness(items: Vec<Item>, patterns: Vec<PatternRule>, rules: Vec<Rule>) -> Harness {
    harness_with_config(items, patterns, rules, fast_config())
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        retry_delay_ms: 1,
        ..EngineConfig::default()
    }
}

fn harness_with_config(
    items: Vec<Item>,
    patterns: Vec<PatternRule>,
    rules: Vec<Rule>,
    config: EngineConfig,
) -> Harness {
    let bank = Arc::new(InMemoryItemBank::new(items.clone()));
    let sessions = Arc::new(InMemorySessionStore::new());
    let responses = Arc::new(InMemoryResponseLog::new());
    let rule_source = Arc::new(InMemoryRuleSource::new(rules, patterns));
    let audit = Arc::new(InMemoryAuditSink::new());
    let engine = SessionEngine::new(
        bank,
        sessions.clone(),
        responses.clone(),
        rule_source,
        audit.clone(),
        config,
    );
    Harness {
        engine,
        sessions,
        responses,
        audit,
        items,
    }
}

impl Harness {
    /// Answer the queued item at the given intensity (1..=5 scale items,
    /// true for yes/no at intensity >= 3).
    async fn answer_next(
        &self,
        session: &Session,
        intensity: i64,
    ) -> Result<sondar_core::engine::SubmitOutcome, EngineError> {
        let item_id = session.next_item.clone().expect("an item is queued");
        let item = self
            .items
            .iter()
            .find(|i| i.id == item_id)
            .expect("queued item exists in bank");
        let raw = match item.kind {
            ResponseKind::SimNao => RawAnswer::Boolean(intensity >= 3),
            ResponseKind::EscalaIntensidade { .. } => RawAnswer::Integer(intensity),
            ResponseKind::EscalaLikert { .. } => RawAnswer::Integer(intensity),
            ResponseKind::Percentual => RawAnswer::Number(intensity as f64 * 20.0),
        };
        self.engine
            .submit_answer(session.id, &item_id, raw, 1000)
            .await
    }
}

#[tokio::test]
async fn full_session_runs_to_completion() {
    let h = harness(screening_items(), screening_patterns(), vec![]);
    let mut session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    assert_eq!(session.status, SessionStatus::EmAndamento);
    assert!(session.next_item.is_some());

    let mut steps = 0;
    loop {
        let outcome = h.answer_next(&session, 3).await.unwrap();
        session = outcome.session;
        steps += 1;
        assert!(steps <= 30, "session failed to halt");
        if outcome.decision.is_stop() {
            break;
        }
    }

    assert_eq!(session.status, SessionStatus::Finalizada);
    assert!(session.outcome.is_some());
    assert!(session.finished_at.is_some());
    assert!(session.next_item.is_none());

    // No item answered twice.
    let answered = session.answered_ids();
    let unique: std::collections::HashSet<_> = answered.iter().collect();
    assert_eq!(answered.len(), unique.len());

    // presented is a superset of answered, difference only in skipped.
    for id in &answered {
        assert!(session.presented.iter().any(|p| p == id));
    }
    for presented in &session.presented {
        let answered_it = answered.iter().any(|a| a == presented);
        let skipped_it = session.skipped.iter().any(|s| s == presented);
        assert!(answered_it || skipped_it, "{presented} presented but unaccounted");
    }

    // Mid-range answers, no flagged items: healthy profile stays VERDE.
    assert_eq!(session.alert_level, AlertLevel::Verde);

    // The persisted copy matches what the engine returned.
    let stored = h.sessions.get(session.id).await.unwrap();
    assert_eq!(stored.responses.len(), session.responses.len());
    assert_eq!(stored.status, SessionStatus::Finalizada);

    // The response log saw every commit.
    assert_eq!(h.responses.responses_for(session.id).len(), steps);
    assert!(!h.audit.entries().is_empty());
}

#[tokio::test]
async fn standard_error_non_increasing_over_informative_answers() {
    let h = harness(screening_items(), vec![], vec![]);
    let mut session = h.engine.start_session("triagem", Some(3)).await.unwrap();

    let mut previous_se = f64::INFINITY;
    for _ in 0..5 {
        let outcome = h.answer_next(&session, 3).await.unwrap();
        session = outcome.session;
        // Small tolerance: theta moves between steps, so the information
        // sum is not evaluated at a fixed point.
        assert!(
            session.standard_error <= previous_se + 0.05,
            "SE grew from {previous_se} to {}",
            session.standard_error
        );
        previous_se = session.standard_error;
        if outcome.decision.is_stop() {
            break;
        }
    }
}

#[tokio::test]
async fn out_of_range_value_rejected_without_mutation() {
    let h = harness(screening_items(), screening_patterns(), vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    let item_id = session.next_item.clone().unwrap();

    let err = h
        .engine
        .submit_answer(session.id, &item_id, RawAnswer::Integer(9), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
    assert!(err.is_caller_fault());

    // Session state unchanged: still in progress, nothing recorded.
    let stored = h.sessions.get(session.id).await.unwrap();
    assert_eq!(stored.status, SessionStatus::EmAndamento);
    assert!(stored.responses.is_empty());
    assert_eq!(stored.next_item.as_deref(), Some(item_id.as_str()));
    assert!(h.responses.responses_for(session.id).is_empty());
}

#[tokio::test]
async fn crisis_answer_stops_with_vermelho() {
    // The crisis item dominates information at theta 0, so it is queued
    // first; a maximum-severity endorsement must end the session.
    let mut items = screening_items();
    items.push(crisis_item("crise-1", 3.0));
    let h = harness(items, screening_patterns(), vec![]);

    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    assert_eq!(session.next_item.as_deref(), Some("crise-1"));

    let outcome = h.answer_next(&session, 5).await.unwrap();
    assert_eq!(outcome.decision, StopDecision::Stop(StopReason::Critical));
    assert_eq!(outcome.session.alert_level, AlertLevel::Vermelho);
    assert_eq!(outcome.session.status, SessionStatus::Finalizada);
    assert_eq!(outcome.session.outcome, Some(StopReason::Critical));

    let crisis_alert = outcome
        .alerts
        .iter()
        .find(|a| a.rule_id == "crise-ideacao")
        .expect("crisis alert raised");
    assert_eq!(crisis_alert.level, AlertLevel::Vermelho);
    assert_eq!(crisis_alert.pattern.contributing, vec!["crise-1".to_string()]);
}

#[tokio::test]
async fn co_occurring_categories_reach_laranja() {
    // Two items only, one per category; severe answers to both trip the
    // co-occurrence rule.
    let items = vec![
        scale_item("dep-1", "depressao", 1.4, 0.0),
        scale_item("ans-1", "ansiedade", 1.3, 0.1),
    ];
    let config = EngineConfig {
        stopping: StoppingConfig {
            min_responses: 1,
            max_responses: 10,
            se_threshold: 1e-6,
        },
        retry_delay_ms: 1,
        ..EngineConfig::default()
    };
    let h = harness_with_config(items, screening_patterns(), vec![], config);

    let session = h.engine.start_session("triagem", Some(5)).await.unwrap();
    let first = h.answer_next(&session, 5).await.unwrap();
    assert!(!first.decision.is_stop());
    let second = h.answer_next(&first.session, 5).await.unwrap();

    assert!(second.session.alert_level >= AlertLevel::Laranja);
    let co = second
        .alerts
        .iter()
        .find(|a| a.rule_id == "dep-ans")
        .expect("co-occurrence alert raised");
    assert!(co.level >= AlertLevel::Laranja);
}

#[tokio::test]
async fn single_deviation_reaches_amarelo() {
    // Humor baseline mean 0.3 sd 0.1: a maximum answer deviates by 7 sd.
    let items = vec![
        scale_item("hum-1", "humor", 1.4, 0.0),
        scale_item("dep-1", "depressao", 1.2, 0.2),
        scale_item("dep-2", "depressao", 1.1, -0.2),
    ];
    let h = harness(items, screening_patterns(), vec![]);

    let session = h.engine.start_session("triagem", Some(5)).await.unwrap();
    let mut session = session;
    let mut saw_amarelo = false;
    for _ in 0..3 {
        let intensity = if session.next_item.as_deref() == Some("hum-1") {
            5
        } else {
            2
        };
        let outcome = h.answer_next(&session, intensity).await.unwrap();
        session = outcome.session;
        if session.alert_level >= AlertLevel::Amarelo {
            saw_amarelo = true;
        }
        if outcome.decision.is_stop() {
            break;
        }
    }
    assert!(saw_amarelo, "deviation never raised the level");
}

#[tokio::test]
async fn duplicate_answer_rejected() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    let first_item = session.next_item.clone().unwrap();

    let outcome = h.answer_next(&session, 3).await.unwrap();
    let err = h
        .engine
        .submit_answer(session.id, &first_item, RawAnswer::Integer(3), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateAnswer(_)));

    // The rejected resubmission changed nothing.
    let stored = h.sessions.get(session.id).await.unwrap();
    assert_eq!(stored.responses.len(), outcome.session.responses.len());
}

#[tokio::test]
async fn unpresented_item_rejected() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();

    // Pick an item that exists but was never presented.
    let unpresented = h
        .items
        .iter()
        .find(|i| Some(i.id.as_str()) != session.next_item.as_deref())
        .unwrap();
    let err = h
        .engine
        .submit_answer(session.id, &unpresented.id, RawAnswer::Integer(3), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));

    let err = h
        .engine
        .submit_answer(session.id, "inexistente", RawAnswer::Integer(3), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownItem(_)));
}

#[tokio::test]
async fn recalibration_matches_fresh_estimation() {
    let h = harness(screening_items(), vec![], vec![]);
    let mut session = h.engine.start_session("triagem", Some(11)).await.unwrap();

    for intensity in [4, 2, 5] {
        let outcome = h.answer_next(&session, intensity).await.unwrap();
        session = outcome.session;
    }

    let retracted_id = session.responses[1].item_id.clone();
    let recal = h.engine.navigate_back(session.id, &retracted_id).await.unwrap();

    // Independent fresh estimation over exactly the remaining active set.
    let estimator = ThetaEstimator::default();
    let scored: Vec<ScoredResponse> = recal
        .session
        .active_responses()
        .map(|r| ScoredResponse {
            params: h
                .items
                .iter()
                .find(|i| i.id == r.item_id)
                .and_then(|i| i.irt)
                .unwrap(),
            value: r.normalized,
        })
        .collect();
    let fresh = estimator.estimate(&scored);

    assert!((recal.estimate.theta - fresh.theta).abs() < 1e-12);
    assert!((recal.estimate.standard_error - fresh.standard_error).abs() < 1e-12);

    // The retracted item is re-queued and the history is intact.
    assert_eq!(recal.session.next_item.as_deref(), Some(retracted_id.as_str()));
    assert_eq!(recal.session.responses.len(), 3);
    assert!(!recal.session.has_answered(&retracted_id));
    assert!(recal.session.skipped.iter().any(|s| s == &retracted_id));

    // Re-answering the retracted item is accepted again.
    let outcome = h.answer_next(&recal.session, 1).await.unwrap();
    assert!(outcome.session.has_answered(&retracted_id));
    assert!(!outcome.session.skipped.iter().any(|s| s == &retracted_id));
}

#[tokio::test]
async fn pool_exhaustion_finalizes_gracefully() {
    let items = vec![
        scale_item("dep-1", "depressao", 1.4, 0.0),
        scale_item("ans-1", "ansiedade", 1.3, 0.1),
    ];
    let config = EngineConfig {
        stopping: StoppingConfig {
            min_responses: 10,
            max_responses: 30,
            se_threshold: 0.01,
        },
        retry_delay_ms: 1,
        ..EngineConfig::default()
    };
    let h = harness_with_config(items, vec![], vec![], config);

    let session = h.engine.start_session("triagem", Some(5)).await.unwrap();
    let first = h.answer_next(&session, 3).await.unwrap();
    assert!(!first.decision.is_stop());
    let second = h.answer_next(&first.session, 3).await.unwrap();

    assert_eq!(second.decision, StopDecision::Stop(StopReason::PoolExhausted));
    assert_eq!(second.session.status, SessionStatus::Finalizada);
    assert_eq!(second.session.outcome, Some(StopReason::PoolExhausted));
}

#[tokio::test]
async fn skip_category_rule_prunes_the_pool() {
    let rules = vec![Rule {
        id: "pular-humor".into(),
        priority: 0,
        condition: Condition::Compare {
            field: FactField::ResponseCount,
            op: CompareOp::Ge,
            value: 1.0,
        },
        actions: vec![RuleAction::SkipCategory {
            category: "humor".into(),
        }],
    }];
    let h = harness(screening_items(), vec![], rules);

    let mut session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    loop {
        let outcome = h.answer_next(&session, 3).await.unwrap();
        session = outcome.session;
        if outcome.decision.is_stop() {
            break;
        }
    }

    assert!(session.skip_categories.contains(&"humor".to_string()));
    // After the first answer, no humor item may be presented.
    for presented in session.presented.iter().skip(2) {
        let item = h.items.iter().find(|i| &i.id == presented).unwrap();
        assert_ne!(item.category, "humor", "humor item presented after skip");
    }
}

#[tokio::test]
async fn terminate_rule_stops_the_session() {
    let rules = vec![Rule {
        id: "encerrar-alta-carga".into(),
        priority: 10,
        condition: Condition::Compare {
            field: FactField::LastNormalized,
            op: CompareOp::Ge,
            value: 0.99,
        },
        actions: vec![
            RuleAction::Branch {
                questionnaire_id: "protocolo-aprofundado".into(),
            },
            RuleAction::Terminate {
                reason: "carga maxima".into(),
            },
        ],
    }];
    let h = harness(screening_items(), vec![], rules);

    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    let outcome = h.answer_next(&session, 5).await.unwrap();

    assert_eq!(outcome.decision, StopDecision::Stop(StopReason::RuleTriggered));
    assert_eq!(outcome.session.outcome, Some(StopReason::RuleTriggered));
    assert!(outcome.fired_rules.iter().any(|f| f.rule_id == "encerrar-alta-carga"));
    assert_eq!(
        outcome.session.branched_to.as_deref(),
        Some("protocolo-aprofundado")
    );
}

#[tokio::test]
async fn terminal_session_rejects_everything() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    let item_id = session.next_item.clone().unwrap();

    h.engine.cancel(session.id).await.unwrap();

    let err = h
        .engine
        .submit_answer(session.id, &item_id, RawAnswer::Integer(3), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionStateViolation { .. }));

    let err = h.engine.pause(session.id).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionStateViolation { .. }));

    let err = h.engine.navigate_back(session.id, &item_id).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionStateViolation { .. }));
}

#[tokio::test]
async fn pause_resume_cycle() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();

    let paused = h.engine.pause(session.id).await.unwrap();
    assert_eq!(paused.status, SessionStatus::Pausada);
    assert!(paused.paused_at.is_some());

    let item_id = session.next_item.clone().unwrap();
    let err = h
        .engine
        .submit_answer(session.id, &item_id, RawAnswer::Integer(3), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SessionStateViolation { .. }));

    let resumed = h.engine.resume(session.id).await.unwrap();
    assert_eq!(resumed.status, SessionStatus::EmAndamento);
    assert!(resumed.paused_at.is_none());

    h.answer_next(&resumed, 3).await.unwrap();
}

#[tokio::test]
async fn administrative_reset_clears_terminal_session() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();

    // Reset is terminal-only.
    let err = h.engine.reset(session.id).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionStateViolation { .. }));

    h.answer_next(&session, 3).await.unwrap();
    h.engine.cancel(session.id).await.unwrap();

    let reset = h.engine.reset(session.id).await.unwrap();
    assert_eq!(reset.status, SessionStatus::Inicial);
    assert!(reset.responses.is_empty());
    assert!(reset.presented.is_empty());
    assert_eq!(reset.alert_level, AlertLevel::Verde);
}

#[tokio::test]
async fn persistence_failure_discards_staged_progress() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    let item_id = session.next_item.clone().unwrap();

    // More failures than the retry budget (3 retries = 4 attempts).
    h.sessions.fail_next_saves(10);
    let err = h
        .engine
        .submit_answer(session.id, &item_id, RawAnswer::Integer(4), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PersistenceFailure(_)));
    assert!(err.is_retryable());

    h.sessions.fail_next_saves(0);
    let stored = h.sessions.get(session.id).await.unwrap();
    assert!(stored.responses.is_empty(), "staged progress leaked");
    assert_eq!(stored.next_item.as_deref(), Some(item_id.as_str()));

    // The caller can retry the same submission successfully.
    let outcome = h
        .engine
        .submit_answer(session.id, &item_id, RawAnswer::Integer(4), 500)
        .await
        .unwrap();
    assert_eq!(outcome.session.responses.len(), 1);
}

#[tokio::test]
async fn transient_persistence_failure_is_retried() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    let item_id = session.next_item.clone().unwrap();

    // Two failures fit inside the retry budget.
    h.sessions.fail_next_saves(2);
    let outcome = h
        .engine
        .submit_answer(session.id, &item_id, RawAnswer::Integer(4), 500)
        .await
        .unwrap();
    assert_eq!(outcome.session.responses.len(), 1);
}

#[tokio::test]
async fn response_log_failure_aborts_before_session_save() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    let item_id = session.next_item.clone().unwrap();
    let saves_before = h.sessions.save_count();

    h.responses.fail_next_appends(10);
    let err = h
        .engine
        .submit_answer(session.id, &item_id, RawAnswer::Integer(4), 500)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PersistenceFailure(_)));
    assert_eq!(h.sessions.save_count(), saves_before, "session saved despite abort");
}

#[tokio::test]
async fn audit_failures_never_abort_the_transaction() {
    let h = harness(screening_items(), vec![], vec![]);
    let session = h.engine.start_session("triagem", Some(7)).await.unwrap();
    h.audit.fail_all();

    let outcome = h.answer_next(&session, 3).await.unwrap();
    assert_eq!(outcome.session.responses.len(), 1);
}

/// Session store wrapper whose reads yield, so two submissions can
/// genuinely overlap on the same session.
struct SlowSessionStore {
    inner: Arc<InMemorySessionStore>,
}

#[async_trait]
impl SessionStore for SlowSessionStore {
    async fn get(&self, id: Uuid) -> Result<Session, StoreError> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        self.inner.get(id).await
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.inner.save(session).await
    }
}

#[tokio::test]
async fn concurrent_submissions_conflict() {
    let inner = Arc::new(InMemorySessionStore::new());
    let bank = Arc::new(InMemoryItemBank::new(screening_items()));
    let engine = Arc::new(SessionEngine::new(
        bank,
        Arc::new(SlowSessionStore {
            inner: inner.clone(),
        }),
        Arc::new(InMemoryResponseLog::new()),
        Arc::new(InMemoryRuleSource::default()),
        Arc::new(InMemoryAuditSink::new()),
        fast_config(),
    ));

    let session = engine.start_session("triagem", Some(7)).await.unwrap();
    let item_id = session.next_item.clone().unwrap();

    let first = engine.submit_answer(session.id, &item_id, RawAnswer::Integer(3), 500);
    let second = engine.submit_answer(session.id, &item_id, RawAnswer::Integer(3), 500);
    let (a, b) = tokio::join!(first, second);

    let conflicts = [&a, &b]
        .iter()
        .filter(|r| matches!(r, Err(EngineError::ConcurrentModification(_))))
        .count();
    assert_eq!(conflicts, 1, "exactly one submission must be rejected");
    assert_eq!(
        [&a, &b].iter().filter(|r| r.is_ok()).count(),
        1,
        "the other submission must commit"
    );

    // Transactions for different sessions proceed independently.
    let other = engine.start_session("triagem", Some(8)).await.unwrap();
    let other_item = other.next_item.clone().unwrap();
    let busy = engine.submit_answer(session.id, "dep-2", RawAnswer::Integer(3), 500);
    let free = engine.submit_answer(other.id, &other_item, RawAnswer::Integer(3), 500);
    let (_, free_result) = tokio::join!(busy, free);
    assert!(free_result.is_ok(), "independent session was blocked");
}
