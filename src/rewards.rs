//! Reward estimation and online bandit updates
//!
//! Turns a completed attempt into a scalar reward and applies one online
//! gradient step to the chosen arm's linear weights. Runs best-effort off
//! the submit path: a missing decision log is an error here that callers
//! skip silently.
//!
//! Known race: the per-(user, action) bandit row is read-modify-write, so
//! concurrent submissions racing on the same arm can lose an update
//! (last write wins). The decision-log readback is likewise not atomic with
//! the prior request's append; under out-of-order arrival an outcome may
//! attribute to a newer decision than the one that served it.

use crate::config::RewardConfig;
use crate::error::{DokimiError, Result};
use crate::storage::Store;
use crate::types::{Attempt, BanditState, CONTEXT_DIM};
use std::sync::Arc;
use tracing::{debug, info};

/// Reward estimator and bandit parameter updater
pub struct RewardEstimator {
    store: Arc<dyn Store>,
    config: RewardConfig,
}

impl RewardEstimator {
    pub fn new(store: Arc<dyn Store>, config: RewardConfig) -> Self {
        Self { store, config }
    }

    /// Scalar reward for an observed outcome
    ///
    /// Rewards correctness, penalizes slow responses sub-linearly
    /// (log10 of elapsed seconds), and grants a small bonus for stated
    /// confidence. Deliberately not reducible to bare correctness.
    pub fn compute_reward(&self, correct: bool, time_seconds: f64, confidence: Option<f64>) -> f64 {
        let correctness = if correct { 1.0 } else { 0.0 };
        let time_penalty =
            (1.0 + time_seconds.max(0.1)).log10() / self.config.time_penalty_divisor;
        let confidence_bonus =
            self.config.confidence_bonus * confidence.unwrap_or(0.0).clamp(0.0, 1.0);

        correctness - time_penalty + confidence_bonus
    }

    /// Attribute an attempt's outcome to the most recent decision and update
    /// the chosen arm
    ///
    /// Idempotent per attempt: an attempt that already rewarded some
    /// decision is never consumed again, even if newer decisions have been
    /// logged since (at-least-once delivery can replay an outcome after the
    /// user's next request). The reward attachment itself is a conditional
    /// update, so a decision that already carries a reward is also left
    /// untouched (no double gradient step either way).
    ///
    /// Returns the computed reward, or [`DokimiError::NotFound`] when no
    /// decision log exists for the user.
    pub async fn process_outcome(&self, attempt: &Attempt) -> Result<f64> {
        let reward = self.compute_reward(
            attempt.correct,
            attempt.time_taken_seconds,
            attempt.confidence,
        );

        if let Some(consumed) = self.store.decision_rewarded_by(attempt.id).await? {
            debug!(
                "Attempt {} already rewarded decision {}, skipping replay",
                attempt.id, consumed.id
            );
            return Ok(consumed.reward.unwrap_or(reward));
        }

        let decision = self
            .store
            .latest_decision_for_user(attempt.user)
            .await?
            .ok_or_else(|| {
                DokimiError::NotFound(format!("no decision log for user {}", attempt.user))
            })?;

        let applied = self
            .store
            .attach_reward(decision.id, attempt.id, reward)
            .await?;
        if !applied {
            debug!(
                "Decision {} already rewarded, skipping update for attempt {}",
                decision.id, attempt.id
            );
            return Ok(decision.reward.unwrap_or(reward));
        }

        let action_key = decision.action.key();
        let mut state = self
            .store
            .get_bandit_state(attempt.user, &action_key)
            .await?
            .unwrap_or_else(|| BanditState::new(CONTEXT_DIM));

        self.update_arm(&mut state, &decision.context, reward);
        self.store
            .put_bandit_state(attempt.user, &action_key, &state)
            .await?;

        info!(
            "Reward {:.3} applied to arm {} for user {} (n={})",
            reward, action_key, attempt.user, state.update_count
        );
        Ok(reward)
    }

    /// One online linear-regression step on the arm's weights
    fn update_arm(&self, state: &mut BanditState, context: &[f64], reward: f64) {
        let predicted = state.predict(context);
        let error = reward - predicted;
        for (weight, x) in state.theta.iter_mut().zip(context.iter()) {
            *weight += self.config.learning_rate * error * x;
        }
        state.update_count += 1;
    }
}
