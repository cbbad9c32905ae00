//! Practice engine facade
//!
//! Owns the adaptive loop end to end: feature aggregation, bandit policy,
//! item selection, decision logging, and the reward step. Callers hold one
//! [`PracticeEngine`] behind an `Arc` and drive it from whatever surface
//! they expose (HTTP handlers, a REPL, tests).

use crate::config::EngineConfig;
use crate::error::{DokimiError, Result};
use crate::features::FeatureAggregator;
use crate::policy::BanditPolicy;
use crate::rewards::RewardEstimator;
use crate::selector::ItemSelector;
use crate::storage::Store;
use crate::types::{
    Action, AttemptId, BanditState, DecisionId, DecisionLog, ItemId, Justification,
    JustificationId, JustificationState, NextItem, PracticeMode, UserId, CONTEXT_DIM,
    MIN_JUSTIFICATION_LEN,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Facade over the adaptive selection and learning loop
pub struct PracticeEngine {
    store: Arc<dyn Store>,
    aggregator: FeatureAggregator,
    policy: BanditPolicy,
    selector: ItemSelector,
    rewards: RewardEstimator,
    history_window: usize,
}

impl PracticeEngine {
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let history_window = config.features.history_window;
        Self {
            aggregator: FeatureAggregator::new(config.features),
            policy: BanditPolicy::new(config.policy),
            selector: ItemSelector::new(store.clone()),
            rewards: RewardEstimator::new(store.clone(), config.reward),
            store,
            history_window,
        }
    }

    /// Serve the next item for a user
    ///
    /// Aggregates the user's features from recent attempts, scores every
    /// bandit arm against the context, picks an item matching the winning
    /// action, and appends a decision-log entry carrying the logging
    /// propensity. A user with no history gets the neutral snapshot and an
    /// untrained policy, so the first item lands mid-band.
    ///
    /// In drill mode the bandit still picks difficulty/style/timebox, but
    /// the strategy requirement rotates round-robin over the configured
    /// list, continuing from the last logged decision.
    pub async fn select_next(&self, user: UserId, mode: PracticeMode) -> Result<NextItem> {
        let attempts = self.store.recent_attempts(user, self.history_window).await?;
        let progress = self.store.calibration_progress(user).await?;
        let snapshot =
            self.aggregator
                .aggregate(user, Utc::now().date_naive(), &attempts, progress);
        self.store.upsert_snapshot(&snapshot).await?;

        let context = snapshot.context_vector();
        let mut arms = Vec::with_capacity(27);
        for action in Action::space() {
            let state = self
                .store
                .get_bandit_state(user, &action.key())
                .await?
                .unwrap_or_else(|| BanditState::new(CONTEXT_DIM));
            arms.push((action, state));
        }

        let decision = self.policy.select(&context, &arms);
        let mut action = decision.action;

        if mode == PracticeMode::Drill {
            let last_strategy = self
                .store
                .latest_decision_for_user(user)
                .await?
                .and_then(|d| d.action.required_strategy);
            action.required_strategy =
                Some(self.policy.next_drill_strategy(last_strategy.as_deref()));
        }

        let item = self.selector.select(&snapshot, &action).await?;

        let log = DecisionLog {
            id: DecisionId::new(),
            user,
            context,
            action: action.clone(),
            chosen_item: item.id,
            propensity: decision.propensity,
            decided_at: Utc::now(),
            reward: None,
            rewarded_attempt: None,
        };
        self.store.append_decision(&log).await?;

        debug!(
            "Serving item {} to {} (arm {}, propensity {:.3})",
            item.id,
            user,
            action.key(),
            decision.propensity
        );
        Ok(NextItem {
            item,
            style: action.style,
            timebox: action.timebox,
        })
    }

    /// Run the reward step for a recorded attempt
    ///
    /// Returns the reward applied to the user's latest decision, or `None`
    /// when the user has no decision log (outcomes from non-adaptive paths
    /// are skipped silently, not failed).
    pub async fn record_outcome(&self, attempt_id: AttemptId) -> Result<Option<f64>> {
        let attempt = self.store.get_attempt(attempt_id).await?;

        match self.rewards.process_outcome(&attempt).await {
            Ok(reward) => Ok(Some(reward)),
            Err(DokimiError::NotFound(_)) => {
                debug!(
                    "No decision log for user {}, skipping reward for attempt {}",
                    attempt.user, attempt_id
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fire-and-forget variant of [`record_outcome`](Self::record_outcome)
    ///
    /// The reward step sits off the answer-submission critical path; errors
    /// are logged, never surfaced to the submitter.
    pub fn record_outcome_detached(self: &Arc<Self>, attempt_id: AttemptId) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.record_outcome(attempt_id).await {
                warn!("Detached reward step failed for attempt {}: {}", attempt_id, e);
            }
        });
    }

    /// Accept a free-text justification and queue it for adjudication
    ///
    /// Texts under the minimum length are rejected up front and never
    /// enqueued. A resubmission for the same (user, item) supersedes the
    /// previous one.
    pub async fn submit_justification(
        &self,
        user: UserId,
        item: ItemId,
        text: String,
        strategy_tags: Vec<String>,
    ) -> Result<JustificationId> {
        let justification = Justification {
            id: JustificationId::new(),
            user,
            item,
            text,
            strategy_tags,
            state: JustificationState::Queued,
            submitted_at: Utc::now(),
        };

        if !justification.is_eligible() {
            return Err(DokimiError::Validation(format!(
                "justification must be at least {} characters, got {}",
                MIN_JUSTIFICATION_LEN,
                justification.text.chars().count()
            )));
        }

        self.store.upsert_justification(&justification).await?;
        info!(
            "Queued justification {} for user {} on item {}",
            justification.id, user, item
        );
        Ok(justification.id)
    }
}
