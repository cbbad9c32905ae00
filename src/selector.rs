//! Item selection against a target difficulty
//!
//! Given the policy's chosen action and the user's weakest concepts, finds
//! the live bank item closest to the target difficulty. Anchor items are
//! reserved for calibration metrics and are never served here.

use crate::error::{DokimiError, Result};
use crate::storage::Store;
use crate::types::{Action, FeatureSnapshot, Item};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Number of weakest concepts targeted per selection
const FOCUS_CONCEPTS: usize = 2;

/// Number of concepts sampled when the mastery map is empty
const FALLBACK_CONCEPTS: usize = 3;

/// Item selector over the live question bank
pub struct ItemSelector {
    store: Arc<dyn Store>,
}

impl ItemSelector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Pick one item for the chosen action
    ///
    /// Falls back to an arbitrary non-anchor item when no candidate matches
    /// the focus concepts; only an empty bank fails the request.
    pub async fn select(&self, snapshot: &FeatureSnapshot, action: &Action) -> Result<Item> {
        let concepts = self.focus_concepts(snapshot).await?;
        let target = target_difficulty(snapshot, action);

        let strategy = action.required_strategy.as_deref();
        let candidates = self
            .store
            .live_items_by_concepts(&concepts, strategy)
            .await?;

        let chosen = closest_non_anchor(&candidates, target);
        if let Some(item) = chosen {
            debug!(
                "Selected item {} (difficulty {:.2}, target {:.2})",
                item.id, item.difficulty, target
            );
            return Ok(item);
        }

        // No candidate for the focus concepts: serve anything live rather
        // than failing the request.
        warn!(
            "No candidate item for concepts {:?} (strategy {:?}), falling back to full bank",
            concepts, strategy
        );
        let bank = self.store.all_live_items().await?;
        closest_non_anchor(&bank, target)
            .ok_or_else(|| DokimiError::NotFound("no servable item in the bank".to_string()))
    }

    /// The user's weakest concepts, ascending by mastery
    ///
    /// Ties break on concept name so selection stays deterministic. An empty
    /// mastery map falls back to a few concepts drawn from the bank itself.
    async fn focus_concepts(&self, snapshot: &FeatureSnapshot) -> Result<Vec<String>> {
        if !snapshot.mastery.is_empty() {
            let mut ranked: Vec<(&String, &f64)> = snapshot.mastery.iter().collect();
            ranked.sort_by(|a, b| {
                a.1.partial_cmp(b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(b.0))
            });
            return Ok(ranked
                .into_iter()
                .take(FOCUS_CONCEPTS)
                .map(|(concept, _)| concept.clone())
                .collect());
        }

        let bank = self.store.all_live_items().await?;
        let concepts: BTreeSet<String> = bank
            .iter()
            .flat_map(|item| item.concept_tags.iter().cloned())
            .collect();
        Ok(concepts.into_iter().take(FALLBACK_CONCEPTS).collect())
    }
}

/// Target difficulty tracks the user's error rate, nudged by the action's step
pub fn target_difficulty(snapshot: &FeatureSnapshot, action: &Action) -> f64 {
    (1.0 - snapshot.accuracy_short + 0.1 * action.difficulty_step.value() as f64).clamp(0.1, 0.9)
}

/// Closest-to-target non-anchor item; ties break on lowest item id
fn closest_non_anchor(items: &[Item], target: f64) -> Option<Item> {
    items
        .iter()
        .filter(|item| !item.is_anchor)
        .min_by(|a, b| {
            let da = (a.difficulty - target).abs();
            let db = (b.difficulty - target).abs();
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        })
        .cloned()
}
