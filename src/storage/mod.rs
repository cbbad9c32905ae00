//! Storage layer for the Dokimi practice engine
//!
//! The persistence layer itself is an external collaborator; this module
//! defines the opaque read/upsert/insert/conditional-update surface the
//! engine requires over it, plus an in-memory reference implementation used
//! in tests and embedded deployments.

pub mod memory;

use crate::error::Result;
use crate::types::{
    Adjudication, Attempt, AttemptId, BanditState, DecisionId, DecisionLog, FeatureSnapshot, Item,
    ItemId, Justification, JustificationId, Rating, UserId,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Storage backend trait defining all required operations
#[async_trait]
pub trait Store: Send + Sync {
    // === Attempts ===

    /// Record a completed attempt
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<()>;

    /// Fetch an attempt by id
    async fn get_attempt(&self, id: AttemptId) -> Result<Attempt>;

    /// Most recent attempts for a user, newest first
    async fn recent_attempts(&self, user: UserId, limit: usize) -> Result<Vec<Attempt>>;

    /// Most recent attempts against an item, newest first
    async fn recent_attempts_for_item(&self, item: ItemId, limit: usize) -> Result<Vec<Attempt>>;

    // === Feature snapshots ===

    /// Upsert the snapshot keyed by (user, day); idempotent
    async fn upsert_snapshot(&self, snapshot: &FeatureSnapshot) -> Result<()>;

    /// Fetch the snapshot for (user, day)
    async fn get_snapshot(&self, user: UserId, day: NaiveDate) -> Result<Option<FeatureSnapshot>>;

    // === Item bank ===

    /// Insert a new item; a content-hash collision yields
    /// [`DokimiError::Duplicate`](crate::error::DokimiError::Duplicate)
    async fn insert_item(&self, item: &Item) -> Result<()>;

    /// Overwrite an existing item
    async fn update_item(&self, item: &Item) -> Result<()>;

    /// Fetch an item by id
    async fn get_item(&self, id: ItemId) -> Result<Item>;

    /// Live items tagged with any of the given concepts, optionally filtered
    /// to a required strategy; anchor items are included and filtered by the
    /// caller
    async fn live_items_by_concepts(
        &self,
        concepts: &[String],
        strategy: Option<&str>,
    ) -> Result<Vec<Item>>;

    /// Every live item in the bank
    async fn all_live_items(&self) -> Result<Vec<Item>>;

    // === Bandit parameters ===

    /// Fetch the bandit state for (user, action key), if any
    async fn get_bandit_state(&self, user: UserId, action_key: &str)
        -> Result<Option<BanditState>>;

    /// Write back the bandit state for (user, action key)
    ///
    /// Read-modify-write: concurrent updates to the same arm are
    /// last-write-wins (documented race, see the rewards module docs).
    async fn put_bandit_state(
        &self,
        user: UserId,
        action_key: &str,
        state: &BanditState,
    ) -> Result<()>;

    // === Decision log ===

    /// Append-only write of a policy decision
    async fn append_decision(&self, decision: &DecisionLog) -> Result<()>;

    /// The most recent decision for a user, if any
    async fn latest_decision_for_user(&self, user: UserId) -> Result<Option<DecisionLog>>;

    /// Attach the realized reward to a decision, keyed by the source attempt
    ///
    /// Conditional update: succeeds (returning `true`) only when no reward
    /// has been attached yet. Re-processing the same attempt is a no-op
    /// returning `false`.
    async fn attach_reward(
        &self,
        decision: DecisionId,
        attempt: AttemptId,
        reward: f64,
    ) -> Result<bool>;

    /// The decision an attempt's reward was already attached to, if any
    ///
    /// Lets the reward step dedupe on the attempt id itself: a replayed
    /// attempt must not attribute to whatever decision happens to be latest
    /// by the time the replay arrives.
    async fn decision_rewarded_by(&self, attempt: AttemptId) -> Result<Option<DecisionLog>>;

    // === Justifications and adjudication ===

    /// Upsert a justification (latest submission per (user, item) wins)
    async fn upsert_justification(&self, justification: &Justification) -> Result<()>;

    /// Fetch a justification by id
    async fn get_justification(&self, id: JustificationId) -> Result<Justification>;

    /// Move a queued justification into the processing state
    ///
    /// Atomic compare-and-swap: exactly one of any number of concurrent
    /// claimants observes `true`.
    async fn claim_justification(&self, id: JustificationId) -> Result<bool>;

    /// Record a terminal or intermediate state transition
    ///
    /// Rejects transitions not allowed by
    /// [`JustificationState::can_transition`](crate::types::JustificationState::can_transition).
    async fn set_justification_state(
        &self,
        id: JustificationId,
        next: crate::types::JustificationState,
    ) -> Result<()>;

    /// Pop the oldest queued justification id, if any
    async fn next_queued_justification(&self) -> Result<Option<JustificationId>>;

    /// Record one evaluator's rating; immutable once written
    async fn insert_rating(&self, rating: &Rating) -> Result<()>;

    /// All ratings recorded for a justification
    async fn ratings_for(&self, justification: JustificationId) -> Result<Vec<Rating>>;

    /// Record the reconciled adjudication; one per justification
    async fn insert_adjudication(&self, adjudication: &Adjudication) -> Result<()>;

    /// Fetch the adjudication for a justification, if created
    async fn get_adjudication(&self, justification: JustificationId)
        -> Result<Option<Adjudication>>;

    // === Calibration progress ===

    /// Increment a user's calibration progress, clamped to [0, 1]
    async fn add_calibration_progress(&self, user: UserId, delta: f64) -> Result<()>;

    /// Current calibration progress for a user
    async fn calibration_progress(&self, user: UserId) -> Result<f64>;
}
