//! Contextual bandit policy
//!
//! Scores the finite action space against a user's context vector with a
//! linear value model plus a UCB exploration bonus, serves the arg-max
//! action, and logs a softmax-derived propensity for later off-policy
//! correction. The greedy-serving / stochastic-propensity mismatch is
//! intentional product behavior: the live experience stays deterministic
//! while the decision log still supports off-policy evaluation.

use crate::config::PolicyConfig;
use crate::types::{Action, BanditState};
use tracing::debug;

/// Outcome of one policy evaluation
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// Arg-max action under score = theta . context + exploration bonus
    pub action: Action,

    /// Softmax mass of the served action over the score vector, in (0, 1]
    pub propensity: f64,
}

/// Contextual bandit policy
pub struct BanditPolicy {
    config: PolicyConfig,
}

impl BanditPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Select the next action given the context and the per-arm states
    ///
    /// `arms` pairs each action with its persisted bandit state (callers
    /// substitute a fresh [`BanditState`] for arms with no persisted row).
    /// Ties on the score break toward the earlier arm, keeping serving
    /// deterministic.
    pub fn select(&self, context: &[f64], arms: &[(Action, BanditState)]) -> PolicyDecision {
        assert!(!arms.is_empty(), "action space must not be empty");

        // Monotone visit counter over all arms; never wall-clock time, so
        // the bonus decays predictably as experience accumulates.
        let total_visits: u64 = arms.iter().map(|(_, state)| state.update_count).sum();

        let scores: Vec<f64> = arms
            .iter()
            .map(|(_, state)| {
                state.predict(context) + self.exploration_bonus(total_visits, state.update_count)
            })
            .collect();

        let mut best = 0;
        for (i, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[best] {
                best = i;
            }
        }

        let propensities = softmax(&scores, self.config.softmax_temperature);
        let propensity = propensities[best].max(f64::MIN_POSITIVE);

        debug!(
            "Policy served arm {} (score {:.4}, propensity {:.4}, t={})",
            arms[best].0.key(),
            scores[best],
            propensity,
            total_visits
        );

        PolicyDecision {
            action: arms[best].0.clone(),
            propensity,
        }
    }

    /// UCB-style exploration bonus: `w * sqrt(2 ln t / n)`
    ///
    /// Strictly positive for every arm with n >= 1 and strictly decreasing
    /// in n for fixed t. `t` is floored at 2 so the log term stays positive
    /// even before any real observations arrive.
    pub fn exploration_bonus(&self, total_visits: u64, arm_visits: u64) -> f64 {
        let t = (total_visits.max(2)) as f64;
        let n = (arm_visits.max(1)) as f64;
        self.config.exploration_weight * (2.0 * t.ln() / n).sqrt()
    }

    /// Next strategy in the drill rotation, cycling from the last logged one
    ///
    /// Unknown or absent `last` restarts the rotation at the first strategy.
    pub fn next_drill_strategy(&self, last: Option<&str>) -> String {
        let strategies = &self.config.drill_strategies;
        let next_index = last
            .and_then(|l| strategies.iter().position(|s| s == l))
            .map(|i| (i + 1) % strategies.len())
            .unwrap_or(0);
        strategies[next_index].clone()
    }
}

/// Numerically stable softmax over `scores / temperature`
fn softmax(scores: &[f64], temperature: f64) -> Vec<f64> {
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores
        .iter()
        .map(|s| ((s - max) / temperature).exp())
        .collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CONTEXT_DIM;
    use proptest::prelude::*;

    fn policy() -> BanditPolicy {
        BanditPolicy::new(PolicyConfig::default())
    }

    fn fresh_arms() -> Vec<(Action, BanditState)> {
        Action::space()
            .into_iter()
            .map(|a| (a, BanditState::new(CONTEXT_DIM)))
            .collect()
    }

    #[test]
    fn test_served_action_is_argmax() {
        let mut arms = fresh_arms();
        // Push one arm's weights up so it dominates both value and softmax
        arms[5].1.theta = vec![5.0, 5.0, 5.0];
        arms[5].1.update_count = 3;

        let decision = policy().select(&[0.6, 0.8, 0.9], &arms);
        assert_eq!(decision.action.key(), arms[5].0.key());
    }

    #[test]
    fn test_fresh_arms_tie_break_deterministic() {
        let arms = fresh_arms();
        let a = policy().select(&[0.5, 0.5, 0.5], &arms);
        let b = policy().select(&[0.5, 0.5, 0.5], &arms);
        assert_eq!(a.action.key(), b.action.key());
        assert_eq!(a.action.key(), arms[0].0.key());
    }

    #[test]
    fn test_exploration_bonus_positive_and_decreasing() {
        let policy = policy();
        // Strictly decreasing in n, strictly positive for all n >= 1
        let mut previous = f64::INFINITY;
        for n in 1..200u64 {
            let bonus = policy.exploration_bonus(500, n);
            assert!(bonus > 0.0, "bonus must stay positive at n={}", n);
            assert!(bonus < previous, "bonus must decrease at n={}", n);
            previous = bonus;
        }
    }

    #[test]
    fn test_exploration_bonus_finite_for_unseen_arm() {
        let bonus = policy().exploration_bonus(1, 1);
        assert!(bonus.is_finite());
        assert!(bonus > 0.0);
    }

    #[test]
    fn test_drill_rotation_cycles() {
        let policy = policy();
        let strategies = PolicyConfig::default().drill_strategies;

        assert_eq!(policy.next_drill_strategy(None), strategies[0]);
        assert_eq!(
            policy.next_drill_strategy(Some(&strategies[0])),
            strategies[1]
        );
        // Wraps around at the end of the list
        assert_eq!(
            policy.next_drill_strategy(Some(strategies.last().unwrap())),
            strategies[0]
        );
        // Unknown strategy restarts the rotation
        assert_eq!(policy.next_drill_strategy(Some("nonsense")), strategies[0]);
    }

    proptest! {
        // Propensities form a distribution and the served action is the
        // score arg-max (which need not be the highest-propensity arm once
        // temperatures or ties come into play).
        #[test]
        fn prop_propensities_sum_to_one(
            context in prop::collection::vec(0.0f64..=1.0, CONTEXT_DIM),
            weights in prop::collection::vec(-2.0f64..=2.0, 27 * CONTEXT_DIM),
            counts in prop::collection::vec(1u64..500, 27),
        ) {
            let mut arms = fresh_arms();
            for (i, (_, state)) in arms.iter_mut().enumerate() {
                state.theta = weights[i * CONTEXT_DIM..(i + 1) * CONTEXT_DIM].to_vec();
                state.update_count = counts[i];
            }

            let policy = policy();
            let total: u64 = arms.iter().map(|(_, s)| s.update_count).sum();
            let scores: Vec<f64> = arms
                .iter()
                .map(|(_, s)| s.predict(&context) + policy.exploration_bonus(total, s.update_count))
                .collect();
            let propensities = super::softmax(&scores, 1.0);

            let sum: f64 = propensities.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-9);

            let decision = policy.select(&context, &arms);
            prop_assert!(decision.propensity > 0.0 && decision.propensity <= 1.0);

            let mut best = 0;
            for (i, score) in scores.iter().enumerate().skip(1) {
                if *score > scores[best] {
                    best = i;
                }
            }
            prop_assert_eq!(decision.action.key(), arms[best].0.key());
        }
    }
}
