//! TOML questionnaire bank parser.
//!
//! Loads questionnaires (items, pattern rules, engine rules, config
//! overrides) from TOML files and directories, and validates them.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::irt::IrtParams;
use crate::model::Item;
use crate::patterns::PatternRule;
use crate::response::ResponseKind;
use crate::rules::Rule;
use crate::selector::SelectorConfig;
use crate::stopping::StoppingConfig;

/// A parsed questionnaire: the candidate pool plus its declared rules and
/// optional engine overrides.
#[derive(Debug, Clone)]
pub struct Questionnaire {
    pub id: String,
    pub name: String,
    pub description: String,
    pub stopping: Option<StoppingConfig>,
    pub selector: Option<SelectorConfig>,
    pub items: Vec<Item>,
    pub pattern_rules: Vec<PatternRule>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct BankFile {
    questionnaire: BankHeader,
    #[serde(default)]
    items: Vec<Item>,
    #[serde(default)]
    pattern_rules: Vec<PatternRule>,
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
struct BankHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    stopping: Option<StoppingConfig>,
    #[serde(default)]
    selector: Option<SelectorConfig>,
}

/// Parse a single TOML file into a `Questionnaire`.
pub fn parse_bank(path: &Path) -> Result<Questionnaire> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bank file: {}", path.display()))?;
    parse_bank_str(&content, path)
}

/// Parse a TOML string into a `Questionnaire` (useful for testing).
pub fn parse_bank_str(content: &str, source_path: &Path) -> Result<Questionnaire> {
    let parsed: BankFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    Ok(Questionnaire {
        id: parsed.questionnaire.id,
        name: parsed.questionnaire.name,
        description: parsed.questionnaire.description,
        stopping: parsed.questionnaire.stopping,
        selector: parsed.questionnaire.selector,
        items: parsed.items,
        pattern_rules: parsed.pattern_rules,
        rules: parsed.rules,
    })
}

/// Recursively load all `.toml` bank files from a directory. Unparseable
/// files are skipped with a warning.
pub fn load_bank_directory(dir: &Path) -> Result<Vec<Questionnaire>> {
    let mut banks = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            banks.extend(load_bank_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_bank(&path) {
                Ok(bank) => banks.push(bank),
                Err(e) => {
                    tracing::warn!("skipping {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(banks)
}

/// A warning from bank validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The item or rule id the warning concerns (if applicable).
    pub subject: Option<String>,
    pub message: String,
}

fn warn_on(warnings: &mut Vec<ValidationWarning>, subject: Option<&str>, message: impl Into<String>) {
    warnings.push(ValidationWarning {
        subject: subject.map(String::from),
        message: message.into(),
    });
}

/// Validate a questionnaire for common issues.
pub fn validate_bank(bank: &Questionnaire) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    // Duplicate item ids
    let mut seen_ids = std::collections::HashSet::new();
    for item in &bank.items {
        if !seen_ids.insert(&item.id) {
            warn_on(
                &mut warnings,
                Some(item.id.as_str()),
                format!("duplicate item id: {}", item.id),
            );
        }
    }

    // IRT parameter sanity (the serde path does not re-run the validated
    // constructor)
    for item in &bank.items {
        if let Some(irt) = &item.irt {
            if let Err(e) = IrtParams::new(irt.discrimination, irt.difficulty, irt.guessing) {
                warn_on(&mut warnings, Some(item.id.as_str()), e);
            }
        }
    }

    // Degenerate scales
    for item in &bank.items {
        match item.kind {
            ResponseKind::EscalaIntensidade { min, max } if max <= min => {
                warn_on(
                    &mut warnings,
                    Some(item.id.as_str()),
                    format!("degenerate intensity scale {min}..={max}"),
                );
            }
            ResponseKind::EscalaLikert { points } if points < 2 => {
                warn_on(
                    &mut warnings,
                    Some(item.id.as_str()),
                    format!("likert scale needs at least 2 points, got {points}"),
                );
            }
            _ => {}
        }
    }

    if !bank.items.iter().any(|item| item.active) {
        warn_on(&mut warnings, None, "no active items in bank");
    }

    // Pattern rules referencing unknown items / weak declarations
    let known: std::collections::HashSet<&str> =
        bank.items.iter().map(|item| item.id.as_str()).collect();
    for rule in &bank.pattern_rules {
        match rule {
            PatternRule::Crisis {
                id,
                items,
                min_severity,
            } => {
                for item_id in items {
                    if !known.contains(item_id.as_str()) {
                        warn_on(
                            &mut warnings,
                            Some(id.as_str()),
                            format!("crisis rule references unknown item: {item_id}"),
                        );
                    }
                }
                if !(0.0..=1.0).contains(min_severity) {
                    warn_on(
                        &mut warnings,
                        Some(id.as_str()),
                        format!("crisis min_severity outside [0,1]: {min_severity}"),
                    );
                }
            }
            PatternRule::CoOccurrence { id, categories, .. } => {
                if categories.len() < 2 {
                    warn_on(
                        &mut warnings,
                        Some(id.as_str()),
                        "co-occurrence rule needs at least two categories",
                    );
                }
            }
            PatternRule::Deviation { id, baselines } => {
                for (category, baseline) in baselines {
                    if baseline.std_dev <= 0.0 {
                        warn_on(
                            &mut warnings,
                            Some(id.as_str()),
                            format!("baseline for '{category}' has non-positive std_dev"),
                        );
                    }
                }
            }
        }
    }

    for rule in &bank.rules {
        if rule.actions.is_empty() {
            warn_on(
                &mut warnings,
                Some(rule.id.as_str()),
                format!("rule {} declares no actions", rule.id),
            );
        }
    }

    warnings
}
