//! Justification adjudication
//!
//! Reconciles the committee's independent ratings of a justification into a
//! single judgment: majority vote on categorical labels, arithmetic mean on
//! continuous ones, and an inter-rater agreement score that gates
//! calibration-progress increments.

pub mod committee;
pub mod worker;

pub use committee::Committee;
pub use worker::AdjudicationWorker;

use crate::config::AdjudicationConfig;
use crate::error::{DokimiError, Result};
use crate::types::{Adjudication, Rating, RatingLabels};
use chrono::Utc;
use tracing::debug;

/// Reconciler for committee ratings
pub struct Adjudicator {
    config: AdjudicationConfig,
}

impl Adjudicator {
    pub fn new(config: AdjudicationConfig) -> Self {
        Self { config }
    }

    /// Reconcile ratings into one adjudication
    ///
    /// Requires at least `min_ratings` (reference: 2). Categorical fields
    /// take the majority value with ties broken by first-seen order;
    /// coherence and jqs are averaged, step count is the rounded mean.
    ///
    /// The agreement score is the mean, across the three categorical fields
    /// (strategy, reasoning style, error class), of the fraction of raters
    /// matching the majority value. The calibration gate passes iff
    /// agreement >= min_agreement AND jqs >= min_jqs — both thresholds
    /// inclusive.
    pub fn reconcile(&self, ratings: &[Rating]) -> Result<Adjudication> {
        if ratings.len() < self.config.min_ratings {
            return Err(DokimiError::InvalidOperation(format!(
                "need at least {} ratings to adjudicate, got {}",
                self.config.min_ratings,
                ratings.len()
            )));
        }

        let justification = ratings[0].justification;

        let (strategy_primary, strategy_agreement) =
            majority(ratings.iter().map(|r| r.labels.strategy_primary.clone()));
        let (reasoning_style, style_agreement) =
            majority(ratings.iter().map(|r| r.labels.reasoning_style));
        let (error_class, error_agreement) =
            majority(ratings.iter().map(|r| r.labels.error_class));

        let agreement_score =
            (strategy_agreement + style_agreement + error_agreement) / 3.0;

        let n = ratings.len() as f64;
        let coherence = ratings.iter().map(|r| r.labels.coherence).sum::<f64>() / n;
        let jqs = ratings.iter().map(|r| r.jqs).sum::<f64>() / n;
        let step_count = (ratings.iter().map(|r| r.labels.step_count).sum::<u32>() as f64 / n)
            .round() as u32;

        let passed_gate =
            agreement_score >= self.config.min_agreement && jqs >= self.config.min_jqs;

        debug!(
            "Adjudicated {}: agreement {:.3}, jqs {:.3}, gate {}",
            justification, agreement_score, jqs, passed_gate
        );

        Ok(Adjudication {
            justification,
            labels: RatingLabels {
                strategy_primary,
                reasoning_style,
                step_count,
                coherence,
                error_class,
            },
            agreement_score,
            jqs,
            passed_gate,
            needs_review: !passed_gate,
            created_at: Utc::now(),
        })
    }

    /// Calibration-progress increment granted on a passed gate
    pub fn progress_increment(&self) -> f64 {
        self.config.progress_increment
    }
}

/// Majority value and the fraction of voters matching it
///
/// Ties break toward the value seen first in iteration order, which keeps
/// reconciliation deterministic for a fixed rating order.
fn majority<T: PartialEq + Clone>(values: impl Iterator<Item = T>) -> (T, f64) {
    let values: Vec<T> = values.collect();
    assert!(!values.is_empty(), "majority requires at least one value");

    let mut best_index = 0;
    let mut best_count = 0;
    for (i, candidate) in values.iter().enumerate() {
        let count = values.iter().filter(|v| *v == candidate).count();
        if count > best_count {
            best_count = count;
            best_index = i;
        }
    }

    (
        values[best_index].clone(),
        best_count as f64 / values.len() as f64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorClass, JustificationId, ReasoningStyle};

    fn rating(
        justification: JustificationId,
        strategy: &str,
        style: ReasoningStyle,
        error: ErrorClass,
        jqs: f64,
    ) -> Rating {
        Rating {
            justification,
            template_id: "test".to_string(),
            labels: RatingLabels {
                strategy_primary: strategy.to_string(),
                reasoning_style: style,
                step_count: 3,
                coherence: 0.7,
                error_class: error,
            },
            jqs,
            confidence: 0.8,
            created_at: Utc::now(),
        }
    }

    fn adjudicator() -> Adjudicator {
        Adjudicator::new(AdjudicationConfig::default())
    }

    #[test]
    fn test_majority_vote_two_against_one() {
        // Strategies [a, a, b] -> majority a, field agreement 2/3
        let id = JustificationId::new();
        let ratings = vec![
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.8),
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.8),
            rating(id, "b", ReasoningStyle::Deductive, ErrorClass::None, 0.8),
        ];

        let adjudication = adjudicator().reconcile(&ratings).unwrap();
        assert_eq!(adjudication.labels.strategy_primary, "a");
        // strategy 2/3, style 3/3, error 3/3 -> mean 8/9
        assert!((adjudication.agreement_score - 8.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_tie_breaks_first_seen() {
        let id = JustificationId::new();
        let ratings = vec![
            rating(id, "b", ReasoningStyle::Inductive, ErrorClass::None, 0.5),
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.5),
        ];

        let adjudication = adjudicator().reconcile(&ratings).unwrap();
        assert_eq!(adjudication.labels.strategy_primary, "b");
        assert_eq!(adjudication.labels.reasoning_style, ReasoningStyle::Inductive);
    }

    #[test]
    fn test_gate_boundary_semantics() {
        // agreement 0.5 AND jqs 0.35 passes (inclusive thresholds)
        let id = JustificationId::new();
        let adjudicator = adjudicator();

        // Two raters disagreeing on every categorical field -> agreement 0.5
        let split = vec![
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.35),
            rating(id, "b", ReasoningStyle::Inductive, ErrorClass::Conceptual, 0.35),
        ];
        let adjudication = adjudicator.reconcile(&split).unwrap();
        assert!((adjudication.agreement_score - 0.5).abs() < 1e-9);
        assert!((adjudication.jqs - 0.35).abs() < 1e-9);
        assert!(adjudication.passed_gate);
        assert!(!adjudication.needs_review);
    }

    #[test]
    fn test_gate_requires_both_thresholds() {
        let id = JustificationId::new();
        let adjudicator = adjudicator();

        // High jqs but low agreement: three-way categorical split on all
        // fields gives agreement 1/3 < 0.5
        let discord = vec![
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.9),
            rating(id, "b", ReasoningStyle::Inductive, ErrorClass::Conceptual, 0.9),
            rating(id, "c", ReasoningStyle::Guess, ErrorClass::Misread, 0.9),
        ];
        let adjudication = adjudicator.reconcile(&discord).unwrap();
        assert!(adjudication.agreement_score < 0.5);
        assert!(!adjudication.passed_gate);
        assert!(adjudication.needs_review);

        // Full agreement but low jqs
        let weak = vec![
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.2),
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.2),
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.2),
        ];
        let adjudication = adjudicator.reconcile(&weak).unwrap();
        assert!((adjudication.agreement_score - 1.0).abs() < 1e-9);
        assert!(!adjudication.passed_gate);
    }

    #[test]
    fn test_agreement_monotone_in_consensus() {
        let id = JustificationId::new();
        let adjudicator = adjudicator();

        let unanimous = vec![
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.5),
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.5),
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.5),
        ];
        let partial = vec![
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.5),
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.5),
            rating(id, "b", ReasoningStyle::Inductive, ErrorClass::Misread, 0.5),
        ];

        let full = adjudicator.reconcile(&unanimous).unwrap().agreement_score;
        let split = adjudicator.reconcile(&partial).unwrap().agreement_score;
        assert!(full > split);
        assert!((full - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_continuous_fields_averaged() {
        let id = JustificationId::new();
        let mut ratings = vec![
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.4),
            rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.8),
        ];
        ratings[0].labels.step_count = 2;
        ratings[1].labels.step_count = 5;

        let adjudication = adjudicator().reconcile(&ratings).unwrap();
        assert!((adjudication.jqs - 0.6).abs() < 1e-9);
        // (2 + 5) / 2 = 3.5 rounds to 4
        assert_eq!(adjudication.labels.step_count, 4);
    }

    #[test]
    fn test_single_rating_rejected() {
        let id = JustificationId::new();
        let lone = vec![rating(id, "a", ReasoningStyle::Deductive, ErrorClass::None, 0.9)];
        assert!(adjudicator().reconcile(&lone).is_err());
    }
}
