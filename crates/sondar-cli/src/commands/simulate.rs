//! The `sondar simulate` command.
//!
//! Drives full adaptive sessions against a synthetic respondent whose
//! endorsement probability follows the 3PL at a given true theta, printing
//! a per-step trace and the final outcome.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::Table;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sondar_core::bank::{self, Questionnaire};
use sondar_core::engine::{EngineConfig, SessionEngine};
use sondar_core::model::Item;
use sondar_core::response::{RawAnswer, ResponseKind};
use sondar_store::memory::{
    InMemoryAuditSink, InMemoryItemBank, InMemoryResponseLog, InMemoryRuleSource,
    InMemorySessionStore,
};

pub async fn execute(
    bank_path: PathBuf,
    true_theta: f64,
    seed: u64,
    sessions: usize,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let bank = bank::parse_bank(&bank_path)?;

    let warnings = bank::validate_bank(&bank);
    for w in &warnings {
        tracing::warn!("bank warning: {}", w.message);
    }

    let config = load_config(&bank, config_path.as_deref())?;
    let engine = build_engine(&bank, config);

    for run in 0..sessions {
        let run_seed = seed.wrapping_add(run as u64);
        simulate_one(&engine, &bank, true_theta, run_seed).await?;
    }

    Ok(())
}

fn load_config(bank: &Questionnaire, path: Option<&std::path::Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse config: {}", p.display()))?
        }
        None => EngineConfig::default(),
    };

    // Bank-level overrides win over the base config.
    if let Some(stopping) = bank.stopping {
        config.stopping = stopping;
    }
    if let Some(selector) = &bank.selector {
        config.selector = selector.clone();
    }
    Ok(config)
}

fn build_engine(bank: &Questionnaire, config: EngineConfig) -> SessionEngine {
    SessionEngine::new(
        Arc::new(InMemoryItemBank::new(bank.items.clone())),
        Arc::new(InMemorySessionStore::new()),
        Arc::new(InMemoryResponseLog::new()),
        Arc::new(InMemoryRuleSource::new(
            bank.rules.clone(),
            bank.pattern_rules.clone(),
        )),
        Arc::new(InMemoryAuditSink::new()),
        config,
    )
}

async fn simulate_one(
    engine: &SessionEngine,
    bank: &Questionnaire,
    true_theta: f64,
    seed: u64,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut session = engine.start_session(&bank.id, Some(seed)).await?;

    let mut table = Table::new();
    table.set_header(vec![
        "#", "item", "categoria", "resposta", "theta", "SE", "alerta",
    ]);

    let mut step = 0usize;
    while let Some(item_id) = session.next_item.clone() {
        let item = bank
            .items
            .iter()
            .find(|i| i.id == item_id)
            .with_context(|| format!("queued item {item_id} missing from bank"))?;

        let raw = synthetic_answer(item, true_theta, &mut rng);
        let outcome = engine
            .submit_answer(session.id, &item_id, raw, rng.gen_range(400..3000))
            .await?;
        session = outcome.session;
        step += 1;

        let response = session.responses.last().expect("response just committed");
        table.add_row(vec![
            step.to_string(),
            item_id.clone(),
            item.category.clone(),
            format!("{:.2}", response.normalized),
            format!("{:+.3}", session.theta),
            format!("{:.3}", session.standard_error),
            session.alert_level.to_string(),
        ]);

        if outcome.decision.is_stop() {
            break;
        }
    }

    println!("{table}");
    println!(
        "Session {}: {} after {} responses | theta {:+.3} (SE {:.3}, confidence {:.0}%) | alert {}",
        session.id,
        session
            .outcome
            .map(|r| r.to_string())
            .unwrap_or_else(|| "incomplete".into()),
        step,
        session.theta,
        session.standard_error,
        session.confidence * 100.0,
        session.alert_level,
    );
    for alert in &session.alerts {
        println!(
            "  alert {} [{}] items: {}",
            alert.level,
            alert.rule_id,
            alert.pattern.contributing.join(", ")
        );
    }

    Ok(())
}

/// Draw an answer from the 3PL at the true theta. Cold-start items fall
/// back to an even coin.
fn synthetic_answer(item: &Item, true_theta: f64, rng: &mut StdRng) -> RawAnswer {
    let p = item
        .irt
        .map(|params| params.probability(true_theta))
        .unwrap_or(0.5);
    let endorse = rng.gen_bool(p.clamp(0.0, 1.0));

    match item.kind {
        ResponseKind::SimNao => RawAnswer::Boolean(endorse),
        ResponseKind::EscalaIntensidade { min, max } => {
            let mid = (min + max) / 2;
            let value = if endorse {
                rng.gen_range((mid + 1).max(min)..=max)
            } else {
                rng.gen_range(min..=mid)
            };
            RawAnswer::Integer(value)
        }
        ResponseKind::EscalaLikert { points } => {
            let max = points as i64;
            let mid = (1 + max) / 2;
            let value = if endorse {
                rng.gen_range((mid + 1).min(max)..=max)
            } else {
                rng.gen_range(1..=mid)
            };
            RawAnswer::Integer(value)
        }
        ResponseKind::Percentual => {
            let value = if endorse {
                rng.gen_range(50.0..=100.0)
            } else {
                rng.gen_range(0.0..50.0)
            };
            RawAnswer::Number(value)
        }
    }
}
