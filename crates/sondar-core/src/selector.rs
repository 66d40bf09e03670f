//! Next-item selection.
//!
//! Greedy maximum-information choice over the candidate pool, constrained by
//! content balancing and exposure control, with a uniform random tie-break
//! inside the information tolerance band so sessions don't leak item content
//! through deterministic ordering.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::model::{Item, Session};

/// Selector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Maximum share of presented items a single category may take, unless
    /// no alternative remains.
    #[serde(default = "default_max_category_share")]
    pub max_category_share: f64,
    /// Candidates whose historical exposure rate exceeds this are
    /// deprioritized, unless that empties the pool.
    #[serde(default = "default_max_exposure_rate")]
    pub max_exposure_rate: f64,
    /// Candidates within this much information of the maximum are treated
    /// as tied and drawn uniformly.
    #[serde(default = "default_info_tolerance")]
    pub info_tolerance: f64,
    /// Latency budget for ranking; beyond it the selector falls back to a
    /// random eligible item to preserve interactive responsiveness.
    #[serde(default = "default_selection_budget_ms")]
    pub selection_budget_ms: u64,
}

fn default_max_category_share() -> f64 {
    0.4
}
fn default_max_exposure_rate() -> f64 {
    0.25
}
fn default_info_tolerance() -> f64 {
    0.05
}
fn default_selection_budget_ms() -> u64 {
    50
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_category_share: default_max_category_share(),
            max_exposure_rate: default_max_exposure_rate(),
            info_tolerance: default_info_tolerance(),
            selection_budget_ms: default_selection_budget_ms(),
        }
    }
}

/// How the selected item was chosen, for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    MaxInformation,
    ColdStart,
    LatencyFallback,
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionReason::MaxInformation => write!(f, "max_information"),
            SelectionReason::ColdStart => write!(f, "cold_start"),
            SelectionReason::LatencyFallback => write!(f, "latency_fallback"),
        }
    }
}

/// A chosen item with the evidence behind the choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChosenItem {
    pub item_id: String,
    /// Fisher information at the selection theta; absent for cold-start and
    /// latency fallbacks.
    pub information: Option<f64>,
    pub reason: SelectionReason,
}

/// Selection outcome: an item, or the terminal no-item-available signal.
#[derive(Debug, Clone)]
pub enum Selection {
    Chosen(ChosenItem),
    Exhausted,
}

/// Greedy-optimal item selector.
#[derive(Debug, Clone, Default)]
pub struct ItemSelector {
    config: SelectorConfig,
}

impl ItemSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// The candidate pool: active items not yet presented, outside the
    /// session's skipped categories.
    pub fn eligible<'a>(&self, pool: &'a [Item], session: &Session) -> Vec<&'a Item> {
        pool.iter()
            .filter(|item| item.active)
            .filter(|item| !session.was_presented(&item.id))
            .filter(|item| !session.skip_categories.contains(&item.category))
            .collect()
    }

    /// Pick the next item for the session at the given theta.
    ///
    /// `exposure` maps item ids to historical presentation rates; pass an
    /// empty map when the collaborator store has no statistics.
    pub fn select(
        &self,
        pool: &[Item],
        session: &Session,
        theta: f64,
        exposure: &HashMap<String, f64>,
        rng: &mut StdRng,
    ) -> Selection {
        let started = Instant::now();
        let budget = Duration::from_millis(self.config.selection_budget_ms);

        let eligible = self.eligible(pool, session);
        if eligible.is_empty() {
            return Selection::Exhausted;
        }

        let balanced = self.apply_content_balancing(&eligible, pool, session);

        let calibrated: Vec<&Item> = balanced
            .iter()
            .copied()
            .filter(|item| item.is_calibrated())
            .collect();

        if calibrated.is_empty() {
            // Cold-start pool: uniform random, content balancing only.
            let chosen = balanced
                .choose(rng)
                .expect("balanced pool is non-empty when eligible is");
            return Selection::Chosen(ChosenItem {
                item_id: chosen.id.clone(),
                information: None,
                reason: SelectionReason::ColdStart,
            });
        }

        let mut ranked: Vec<(&Item, f64)> = Vec::with_capacity(calibrated.len());
        for &item in &calibrated {
            if started.elapsed() > budget {
                tracing::debug!(
                    pool_size = calibrated.len(),
                    ranked = ranked.len(),
                    "selection budget exceeded, falling back to random eligible item"
                );
                let idx = rng.gen_range(0..eligible.len());
                return Selection::Chosen(ChosenItem {
                    item_id: eligible[idx].id.clone(),
                    information: None,
                    reason: SelectionReason::LatencyFallback,
                });
            }
            let params = item.irt.as_ref().expect("calibrated item has params");
            ranked.push((item, params.information(theta)));
        }

        let max_info = ranked
            .iter()
            .map(|(_, info)| *info)
            .fold(f64::NEG_INFINITY, f64::max);

        // Exposure control: drop over-exposed candidates from the tie band
        // unless that would empty it.
        let band: Vec<(&Item, f64)> = ranked
            .iter()
            .copied()
            .filter(|(_, info)| max_info - info <= self.config.info_tolerance)
            .collect();
        let fresh: Vec<(&Item, f64)> = band
            .iter()
            .copied()
            .filter(|(item, _)| {
                exposure
                    .get(&item.id)
                    .map(|rate| *rate <= self.config.max_exposure_rate)
                    .unwrap_or(true)
            })
            .collect();

        let (item, information) = if fresh.is_empty() {
            *band.choose(rng).expect("tie band contains the maximum")
        } else {
            *fresh.choose(rng).expect("fresh band is non-empty")
        };

        Selection::Chosen(ChosenItem {
            item_id: item.id.clone(),
            information: Some(information),
            reason: SelectionReason::MaxInformation,
        })
    }

    /// Exclude candidates whose category would exceed its configured share
    /// of presented items, unless no alternative remains.
    fn apply_content_balancing<'a>(
        &self,
        eligible: &[&'a Item],
        pool: &[Item],
        session: &Session,
    ) -> Vec<&'a Item> {
        let presented_total = session.presented.len();
        if presented_total == 0 {
            return eligible.to_vec();
        }

        let category_of: HashMap<&str, &str> = pool
            .iter()
            .map(|item| (item.id.as_str(), item.category.as_str()))
            .collect();
        let mut presented_per_category: HashMap<&str, usize> = HashMap::new();
        for id in &session.presented {
            if let Some(category) = category_of.get(id.as_str()) {
                *presented_per_category.entry(*category).or_default() += 1;
            }
        }

        let balanced: Vec<&Item> = eligible
            .iter()
            .copied()
            .filter(|item| {
                let count = presented_per_category
                    .get(item.category.as_str())
                    .copied()
                    .unwrap_or(0);
                let share = (count + 1) as f64 / (presented_total + 1) as f64;
                share <= self.config.max_category_share
            })
            .collect();

        if balanced.is_empty() {
            eligible.to_vec()
        } else {
            balanced
        }
    }
}
