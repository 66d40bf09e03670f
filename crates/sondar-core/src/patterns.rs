//! Clinical pattern detection.
//!
//! Scans the full response history (retracted responses included) for
//! predefined clinical signatures and raises explainable alerts. This runs
//! independently of the theta pipeline: a retracted answer no longer moves
//! the estimate, but what the respondent disclosed stays clinically
//! relevant.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{Alert, AlertLevel, ClinicalPattern, Item, PatternKind, Response};

/// Z threshold for the statistical deviation rule.
const DEVIATION_Z: f64 = 2.0;

/// Population/category baseline used by deviation rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
}

/// Per-category severity threshold for co-occurrence rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryThreshold {
    pub category: String,
    pub threshold: f64,
}

/// A clinical signature to watch for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternRule {
    /// Any listed item endorsed at or above `min_severity` is an immediate
    /// critical alert, independent of every other signal.
    Crisis {
        id: String,
        items: Vec<String>,
        min_severity: f64,
    },
    /// Every listed category's score above its threshold within the same
    /// session.
    CoOccurrence {
        id: String,
        categories: Vec<CategoryThreshold>,
        #[serde(default = "default_co_occurrence_level")]
        level: AlertLevel,
    },
    /// A response further than 2 standard deviations above its category
    /// baseline; a second corroborating deviation escalates.
    Deviation {
        id: String,
        baselines: HashMap<String, Baseline>,
    },
}

fn default_co_occurrence_level() -> AlertLevel {
    AlertLevel::Laranja
}

impl PatternRule {
    pub fn id(&self) -> &str {
        match self {
            PatternRule::Crisis { id, .. } => id,
            PatternRule::CoOccurrence { id, .. } => id,
            PatternRule::Deviation { id, .. } => id,
        }
    }
}

/// Evaluates pattern rules against a session's response stream.
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    rules: Vec<PatternRule>,
}

impl PatternDetector {
    pub fn new(rules: Vec<PatternRule>) -> Self {
        Self { rules }
    }

    /// Scan the full history and return every triggered alert.
    ///
    /// The session's reported level is the maximum across the returned
    /// alerts; [`aggregate_level`] computes it.
    pub fn detect(&self, items: &HashMap<String, Item>, responses: &[Response]) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for rule in &self.rules {
            match rule {
                PatternRule::Crisis {
                    id,
                    items: flagged,
                    min_severity,
                } => {
                    if let Some(alert) = detect_crisis(id, flagged, *min_severity, responses) {
                        alerts.push(alert);
                    }
                }
                PatternRule::CoOccurrence {
                    id,
                    categories,
                    level,
                } => {
                    if let Some(alert) = detect_co_occurrence(id, categories, *level, items, responses)
                    {
                        alerts.push(alert);
                    }
                }
                PatternRule::Deviation { id, baselines } => {
                    if let Some(alert) = detect_deviation(id, baselines, items, responses) {
                        alerts.push(alert);
                    }
                }
            }
        }
        alerts
    }
}

/// The maximum level among triggered alerts; `Verde` when none fired.
pub fn aggregate_level(alerts: &[Alert]) -> AlertLevel {
    alerts
        .iter()
        .map(|a| a.level)
        .max()
        .unwrap_or(AlertLevel::Verde)
}

fn detect_crisis(
    rule_id: &str,
    flagged: &[String],
    min_severity: f64,
    responses: &[Response],
) -> Option<Alert> {
    let contributing: Vec<&Response> = responses
        .iter()
        .filter(|r| flagged.contains(&r.item_id) && r.normalized >= min_severity)
        .collect();
    if contributing.is_empty() {
        return None;
    }
    let severity = contributing
        .iter()
        .map(|r| r.normalized)
        .fold(f64::NEG_INFINITY, f64::max);
    Some(Alert {
        level: AlertLevel::Vermelho,
        rule_id: rule_id.to_string(),
        pattern: ClinicalPattern {
            kind: PatternKind::Crisis,
            severity,
            contributing: contributing.iter().map(|r| r.item_id.clone()).collect(),
        },
    })
}

fn detect_co_occurrence(
    rule_id: &str,
    categories: &[CategoryThreshold],
    level: AlertLevel,
    items: &HashMap<String, Item>,
    responses: &[Response],
) -> Option<Alert> {
    if categories.is_empty() {
        return None;
    }

    let scores = category_scores(items, responses);
    let mut contributing = Vec::new();
    let mut min_margin = f64::INFINITY;

    for ct in categories {
        let score = match scores.get(ct.category.as_str()) {
            Some(&(score, _)) => score,
            None => return None,
        };
        if score <= ct.threshold {
            return None;
        }
        min_margin = min_margin.min(score - ct.threshold);
        if let Some((_, ids)) = scores.get(ct.category.as_str()) {
            contributing.extend(ids.iter().cloned());
        }
    }

    Some(Alert {
        // Co-occurrence yields at least LARANJA regardless of declared level.
        level: level.max(AlertLevel::Laranja),
        rule_id: rule_id.to_string(),
        pattern: ClinicalPattern {
            kind: PatternKind::CoOccurrence,
            severity: min_margin.clamp(0.0, 1.0),
            contributing,
        },
    })
}

fn detect_deviation(
    rule_id: &str,
    baselines: &HashMap<String, Baseline>,
    items: &HashMap<String, Item>,
    responses: &[Response],
) -> Option<Alert> {
    let mut deviations = Vec::new();
    let mut max_z = 0.0_f64;

    for response in responses {
        let Some(item) = items.get(&response.item_id) else {
            continue;
        };
        let Some(baseline) = baselines.get(&item.category) else {
            continue;
        };
        if baseline.std_dev <= 0.0 {
            continue;
        }
        let z = (response.normalized - baseline.mean) / baseline.std_dev;
        if z > DEVIATION_Z {
            deviations.push(response.item_id.clone());
            max_z = max_z.max(z);
        }
    }

    if deviations.is_empty() {
        return None;
    }

    // A single deviation is AMARELO; a corroborating second one escalates.
    let level = if deviations.len() >= 2 {
        AlertLevel::Laranja
    } else {
        AlertLevel::Amarelo
    };

    Some(Alert {
        level,
        rule_id: rule_id.to_string(),
        pattern: ClinicalPattern {
            kind: PatternKind::Deviation,
            severity: (max_z / (2.0 * DEVIATION_Z)).clamp(0.0, 1.0),
            contributing: deviations,
        },
    })
}

/// Mean normalized value per category over the full history, with the
/// contributing item ids.
fn category_scores<'a>(
    items: &'a HashMap<String, Item>,
    responses: &[Response],
) -> HashMap<&'a str, (f64, Vec<String>)> {
    let mut sums: HashMap<&str, (f64, Vec<String>)> = HashMap::new();
    for response in responses {
        if let Some(item) = items.get(&response.item_id) {
            let entry = sums.entry(item.category.as_str()).or_default();
            entry.0 += response.normalized;
            entry.1.push(response.item_id.clone());
        }
    }
    sums.into_iter()
        .map(|(category, (sum, ids))| {
            let mean = sum / ids.len() as f64;
            (category, (mean, ids))
        })
        .collect()
}
