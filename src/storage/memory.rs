//! In-memory storage backend
//!
//! Reference implementation of [`Store`] over `tokio::sync::RwLock` maps.
//! Used by the test suite and by embedded deployments where the external
//! relational store is not wired up. The conditional-update operations
//! (justification claim, reward attachment) take the write lock for the
//! whole read-check-write sequence, which gives them the same at-most-once
//! semantics a relational backend provides via conditional UPDATE.

use crate::error::{DokimiError, Result};
use crate::storage::Store;
use crate::types::{
    Adjudication, Attempt, AttemptId, BanditState, DecisionId, DecisionLog, FeatureSnapshot, Item,
    ItemId, Justification, JustificationId, JustificationState, Rating, UserId,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Tables {
    attempts: HashMap<AttemptId, Attempt>,
    snapshots: HashMap<(UserId, NaiveDate), FeatureSnapshot>,
    items: HashMap<ItemId, Item>,
    item_hashes: HashMap<String, ItemId>,
    bandit: HashMap<(UserId, String), BanditState>,
    decisions: Vec<DecisionLog>,
    justifications: HashMap<JustificationId, Justification>,
    queue: VecDeque<JustificationId>,
    ratings: HashMap<JustificationId, Vec<Rating>>,
    adjudications: HashMap<JustificationId, Adjudication>,
    progress: HashMap<UserId, f64>,
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<Attempt> {
        let tables = self.tables.read().await;
        tables
            .attempts
            .get(&id)
            .cloned()
            .ok_or_else(|| DokimiError::NotFound(format!("attempt {}", id)))
    }

    async fn recent_attempts(&self, user: UserId, limit: usize) -> Result<Vec<Attempt>> {
        let tables = self.tables.read().await;
        let mut attempts: Vec<Attempt> = tables
            .attempts
            .values()
            .filter(|a| a.user == user)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        attempts.truncate(limit);
        Ok(attempts)
    }

    async fn recent_attempts_for_item(&self, item: ItemId, limit: usize) -> Result<Vec<Attempt>> {
        let tables = self.tables.read().await;
        let mut attempts: Vec<Attempt> = tables
            .attempts
            .values()
            .filter(|a| a.item == item)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        attempts.truncate(limit);
        Ok(attempts)
    }

    async fn upsert_snapshot(&self, snapshot: &FeatureSnapshot) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .snapshots
            .insert((snapshot.user, snapshot.day), snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(&self, user: UserId, day: NaiveDate) -> Result<Option<FeatureSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables.snapshots.get(&(user, day)).cloned())
    }

    async fn insert_item(&self, item: &Item) -> Result<()> {
        let mut tables = self.tables.write().await;
        let hash = item.content_hash();
        if let Some(existing) = tables.item_hashes.get(&hash) {
            return Err(DokimiError::Duplicate(format!(
                "content hash {} already used by item {}",
                &hash[..12],
                existing
            )));
        }
        tables.item_hashes.insert(hash, item.id);
        tables.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_item(&self, item: &Item) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.items.contains_key(&item.id) {
            return Err(DokimiError::NotFound(format!("item {}", item.id)));
        }
        tables.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_item(&self, id: ItemId) -> Result<Item> {
        let tables = self.tables.read().await;
        tables
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| DokimiError::NotFound(format!("item {}", id)))
    }

    async fn live_items_by_concepts(
        &self,
        concepts: &[String],
        strategy: Option<&str>,
    ) -> Result<Vec<Item>> {
        let tables = self.tables.read().await;
        Ok(tables
            .items
            .values()
            .filter(|item| item.status == crate::types::ItemStatus::Live)
            .filter(|item| item.concept_tags.iter().any(|tag| concepts.contains(tag)))
            .filter(|item| match strategy {
                Some(s) => item.required_strategy.as_deref() == Some(s),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn all_live_items(&self) -> Result<Vec<Item>> {
        let tables = self.tables.read().await;
        Ok(tables
            .items
            .values()
            .filter(|item| item.status == crate::types::ItemStatus::Live)
            .cloned()
            .collect())
    }

    async fn get_bandit_state(
        &self,
        user: UserId,
        action_key: &str,
    ) -> Result<Option<BanditState>> {
        let tables = self.tables.read().await;
        Ok(tables.bandit.get(&(user, action_key.to_string())).cloned())
    }

    async fn put_bandit_state(
        &self,
        user: UserId,
        action_key: &str,
        state: &BanditState,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .bandit
            .insert((user, action_key.to_string()), state.clone());
        Ok(())
    }

    async fn append_decision(&self, decision: &DecisionLog) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.decisions.push(decision.clone());
        Ok(())
    }

    async fn latest_decision_for_user(&self, user: UserId) -> Result<Option<DecisionLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .decisions
            .iter()
            .filter(|d| d.user == user)
            .max_by_key(|d| d.decided_at)
            .cloned())
    }

    async fn attach_reward(
        &self,
        decision: DecisionId,
        attempt: AttemptId,
        reward: f64,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let entry = tables
            .decisions
            .iter_mut()
            .find(|d| d.id == decision)
            .ok_or_else(|| DokimiError::NotFound(format!("decision {}", decision)))?;

        if entry.rewarded_attempt.is_some() {
            debug!("Reward already attached to decision {}, skipping", decision);
            return Ok(false);
        }

        entry.reward = Some(reward);
        entry.rewarded_attempt = Some(attempt);
        Ok(true)
    }

    async fn decision_rewarded_by(&self, attempt: AttemptId) -> Result<Option<DecisionLog>> {
        let tables = self.tables.read().await;
        Ok(tables
            .decisions
            .iter()
            .find(|d| d.rewarded_attempt == Some(attempt))
            .cloned())
    }

    async fn upsert_justification(&self, justification: &Justification) -> Result<()> {
        let mut tables = self.tables.write().await;

        // Latest submission per (user, item) wins: retire any previous one
        let previous: Vec<JustificationId> = tables
            .justifications
            .values()
            .filter(|j| {
                j.user == justification.user
                    && j.item == justification.item
                    && j.id != justification.id
            })
            .map(|j| j.id)
            .collect();
        for id in previous {
            tables.justifications.remove(&id);
            tables.queue.retain(|queued| *queued != id);
        }

        tables
            .justifications
            .insert(justification.id, justification.clone());
        if justification.state == JustificationState::Queued {
            tables.queue.push_back(justification.id);
        }
        Ok(())
    }

    async fn get_justification(&self, id: JustificationId) -> Result<Justification> {
        let tables = self.tables.read().await;
        tables
            .justifications
            .get(&id)
            .cloned()
            .ok_or_else(|| DokimiError::NotFound(format!("justification {}", id)))
    }

    async fn claim_justification(&self, id: JustificationId) -> Result<bool> {
        // Single write lock across check and update: the CAS that guarantees
        // at-most-one worker processes a given queue entry.
        let mut tables = self.tables.write().await;
        let justification = tables
            .justifications
            .get_mut(&id)
            .ok_or_else(|| DokimiError::NotFound(format!("justification {}", id)))?;

        if justification.state != JustificationState::Queued {
            return Ok(false);
        }
        justification.state = JustificationState::Processing;
        tables.queue.retain(|queued| *queued != id);
        Ok(true)
    }

    async fn set_justification_state(
        &self,
        id: JustificationId,
        next: JustificationState,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let justification = tables
            .justifications
            .get_mut(&id)
            .ok_or_else(|| DokimiError::NotFound(format!("justification {}", id)))?;

        if !justification.state.can_transition(&next) {
            return Err(DokimiError::InvalidOperation(format!(
                "illegal justification transition {:?} -> {:?}",
                justification.state, next
            )));
        }
        let enqueue = next == JustificationState::Queued;
        justification.state = next;
        if enqueue {
            tables.queue.push_back(id);
        }
        Ok(())
    }

    async fn next_queued_justification(&self) -> Result<Option<JustificationId>> {
        let tables = self.tables.read().await;
        Ok(tables.queue.front().copied())
    }

    async fn insert_rating(&self, rating: &Rating) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .ratings
            .entry(rating.justification)
            .or_default()
            .push(rating.clone());
        Ok(())
    }

    async fn ratings_for(&self, justification: JustificationId) -> Result<Vec<Rating>> {
        let tables = self.tables.read().await;
        Ok(tables
            .ratings
            .get(&justification)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_adjudication(&self, adjudication: &Adjudication) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.adjudications.contains_key(&adjudication.justification) {
            return Err(DokimiError::InvalidOperation(format!(
                "adjudication for {} already exists",
                adjudication.justification
            )));
        }
        tables
            .adjudications
            .insert(adjudication.justification, adjudication.clone());
        Ok(())
    }

    async fn get_adjudication(
        &self,
        justification: JustificationId,
    ) -> Result<Option<Adjudication>> {
        let tables = self.tables.read().await;
        Ok(tables.adjudications.get(&justification).cloned())
    }

    async fn add_calibration_progress(&self, user: UserId, delta: f64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let progress = tables.progress.entry(user).or_insert(0.0);
        *progress = (*progress + delta).clamp(0.0, 1.0);
        Ok(())
    }

    async fn calibration_progress(&self, user: UserId) -> Result<f64> {
        let tables = self.tables.read().await;
        Ok(tables.progress.get(&user).copied().unwrap_or(0.0))
    }
}
