//! Feature aggregation over attempt history
//!
//! Computes the rolling per-user [`FeatureSnapshot`] consumed by the policy:
//! accuracy and latency EMAs on two horizons, a miscalibration gap, a fatigue
//! index, and per-concept mastery ratios. Pure computation over a bounded
//! history window; the engine persists the result as a (user, day) upsert.

use crate::config::FeatureConfig;
use crate::types::{Attempt, FeatureSnapshot, UserId};
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::debug;

/// Feature aggregator
pub struct FeatureAggregator {
    config: FeatureConfig,
}

impl FeatureAggregator {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    /// Compute a snapshot from a user's attempt history
    ///
    /// `attempts` is expected newest-first (the storage read order); the EMAs
    /// are folded oldest-to-newest so recency carries the most weight.
    /// `calibration_progress` is passed through from the progress counter.
    ///
    /// Zero attempts yields the neutral default snapshot rather than an
    /// error: accuracy 0.5, seeded latency, empty mastery.
    pub fn aggregate(
        &self,
        user: UserId,
        day: NaiveDate,
        attempts: &[Attempt],
        calibration_progress: f64,
    ) -> FeatureSnapshot {
        if attempts.is_empty() {
            debug!("No attempt history for {}, emitting neutral snapshot", user);
            return self.neutral_snapshot(user, day, calibration_progress);
        }

        let window: Vec<&Attempt> = attempts.iter().take(self.config.history_window).collect();

        // Fold EMAs oldest -> newest from neutral seeds
        let mut accuracy_short = 0.5;
        let mut accuracy_long = 0.5;
        let mut latency_short = self.config.latency_seed;
        let mut latency_long = self.config.latency_seed;

        for attempt in window.iter().rev() {
            let correctness = if attempt.correct { 1.0 } else { 0.0 };
            accuracy_short = ema(self.config.alpha_short, correctness, accuracy_short);
            accuracy_long = ema(self.config.alpha_long, correctness, accuracy_long);
            latency_short = ema(
                self.config.alpha_short,
                attempt.time_taken_seconds,
                latency_short,
            );
            latency_long = ema(
                self.config.alpha_long,
                attempt.time_taken_seconds,
                latency_long,
            );
        }

        let miscalibration = self.miscalibration(&window);
        let fatigue = self.fatigue(&window);
        let mastery = self.mastery(&window);

        FeatureSnapshot {
            user,
            day,
            accuracy_short: accuracy_short.clamp(0.0, 1.0),
            accuracy_long: accuracy_long.clamp(0.0, 1.0),
            latency_short,
            latency_long,
            miscalibration,
            fatigue,
            mastery,
            calibration_progress: calibration_progress.clamp(0.0, 1.0),
        }
    }

    /// Defaulted snapshot for users with no history
    pub fn neutral_snapshot(
        &self,
        user: UserId,
        day: NaiveDate,
        calibration_progress: f64,
    ) -> FeatureSnapshot {
        FeatureSnapshot {
            user,
            day,
            accuracy_short: 0.5,
            accuracy_long: 0.5,
            latency_short: self.config.latency_seed,
            latency_long: self.config.latency_seed,
            miscalibration: 0.5,
            fatigue: 0.0,
            mastery: HashMap::new(),
            calibration_progress: calibration_progress.clamp(0.0, 1.0),
        }
    }

    /// Mean |confidence - correctness| over the trailing window
    ///
    /// Attempts without a stated confidence are skipped; a window with no
    /// confidence data falls back to the neutral 0.5.
    fn miscalibration(&self, window: &[&Attempt]) -> f64 {
        let gaps: Vec<f64> = window
            .iter()
            .take(self.config.miscalibration_window)
            .filter_map(|attempt| {
                attempt.confidence.map(|confidence| {
                    let correctness = if attempt.correct { 1.0 } else { 0.0 };
                    (confidence.clamp(0.0, 1.0) - correctness).abs()
                })
            })
            .collect();

        if gaps.is_empty() {
            0.5
        } else {
            (gaps.iter().sum::<f64>() / gaps.len() as f64).clamp(0.0, 1.0)
        }
    }

    /// Normalized variance of recent response times, clamped to [0, 1]
    ///
    /// Higher latency variance means higher fatigue; the divisor sets how
    /// much variance saturates the index.
    fn fatigue(&self, window: &[&Attempt]) -> f64 {
        let times: Vec<f64> = window
            .iter()
            .take(self.config.fatigue_window)
            .map(|attempt| attempt.time_taken_seconds)
            .collect();

        if times.len() < 2 {
            return 0.0;
        }

        let mean = times.iter().sum::<f64>() / times.len() as f64;
        let variance =
            times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / times.len() as f64;

        (variance / self.config.fatigue_divisor).min(1.0)
    }

    /// Per-concept correct/total ratios over the window
    fn mastery(&self, window: &[&Attempt]) -> HashMap<String, f64> {
        let mut totals: HashMap<String, (u32, u32)> = HashMap::new();
        for attempt in window {
            for concept in &attempt.concept_ids {
                let entry = totals.entry(concept.clone()).or_insert((0, 0));
                entry.1 += 1;
                if attempt.correct {
                    entry.0 += 1;
                }
            }
        }

        totals
            .into_iter()
            .map(|(concept, (correct, total))| (concept, correct as f64 / total as f64))
            .collect()
    }
}

/// Exponential moving average step: `alpha * x + (1 - alpha) * prev`
fn ema(alpha: f64, x: f64, prev: f64) -> f64 {
    alpha * x + (1.0 - alpha) * prev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptId, ItemId};
    use chrono::Utc;
    use proptest::prelude::*;

    fn attempt(correct: bool, time: f64, confidence: Option<f64>, concepts: &[&str]) -> Attempt {
        Attempt {
            id: AttemptId::new(),
            user: UserId::new(),
            item: ItemId::new(),
            correct,
            time_taken_seconds: time,
            confidence,
            concept_ids: concepts.iter().map(|s| s.to_string()).collect(),
            submitted_at: Utc::now(),
        }
    }

    fn aggregator() -> FeatureAggregator {
        FeatureAggregator::new(FeatureConfig::default())
    }

    #[test]
    fn test_empty_history_yields_neutral_snapshot() {
        let snapshot = aggregator().aggregate(UserId::new(), Utc::now().date_naive(), &[], 0.0);
        assert!((snapshot.accuracy_short - 0.5).abs() < 1e-9);
        assert!((snapshot.accuracy_long - 0.5).abs() < 1e-9);
        assert!(snapshot.mastery.is_empty());
        assert_eq!(snapshot.fatigue, 0.0);
    }

    #[test]
    fn test_all_correct_raises_accuracy() {
        let attempts: Vec<Attempt> = (0..10)
            .map(|_| attempt(true, 30.0, Some(0.8), &["algebra"]))
            .collect();
        let snapshot =
            aggregator().aggregate(UserId::new(), Utc::now().date_naive(), &attempts, 0.0);

        assert!(snapshot.accuracy_short > 0.9);
        assert!(snapshot.accuracy_long > 0.5);
        assert_eq!(snapshot.mastery.get("algebra"), Some(&1.0));
    }

    #[test]
    fn test_short_horizon_reacts_faster() {
        // Long run of failures followed by recent successes: the short EMA
        // should recover further than the long one.
        let mut attempts: Vec<Attempt> =
            (0..5).map(|_| attempt(true, 30.0, None, &[])).collect();
        attempts.extend((0..20).map(|_| attempt(false, 30.0, None, &[])));

        let snapshot =
            aggregator().aggregate(UserId::new(), Utc::now().date_naive(), &attempts, 0.0);
        assert!(snapshot.accuracy_short > snapshot.accuracy_long);
    }

    #[test]
    fn test_miscalibration_overconfident_wrong() {
        let attempts: Vec<Attempt> = (0..10)
            .map(|_| attempt(false, 30.0, Some(0.95), &[]))
            .collect();
        let snapshot =
            aggregator().aggregate(UserId::new(), Utc::now().date_naive(), &attempts, 0.0);
        assert!(snapshot.miscalibration > 0.9);
    }

    #[test]
    fn test_fatigue_grows_with_latency_variance() {
        let steady: Vec<Attempt> = (0..10).map(|_| attempt(true, 30.0, None, &[])).collect();
        let erratic: Vec<Attempt> = (0..10)
            .map(|i| attempt(true, if i % 2 == 0 { 5.0 } else { 120.0 }, None, &[]))
            .collect();

        let agg = aggregator();
        let calm = agg.aggregate(UserId::new(), Utc::now().date_naive(), &steady, 0.0);
        let tired = agg.aggregate(UserId::new(), Utc::now().date_naive(), &erratic, 0.0);

        assert_eq!(calm.fatigue, 0.0);
        assert!(tired.fatigue > calm.fatigue);
        assert!(tired.fatigue <= 1.0);
    }

    #[test]
    fn test_mastery_partial_ratio() {
        let attempts = vec![
            attempt(true, 30.0, None, &["geometry"]),
            attempt(false, 30.0, None, &["geometry"]),
            attempt(true, 30.0, None, &["geometry", "algebra"]),
        ];
        let snapshot =
            aggregator().aggregate(UserId::new(), Utc::now().date_naive(), &attempts, 0.0);

        let geometry = snapshot.mastery.get("geometry").copied().unwrap();
        assert!((geometry - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.mastery.get("algebra"), Some(&1.0));
    }

    proptest! {
        // Every ratio the aggregator emits stays in [0, 1] for any history
        #[test]
        fn prop_ratios_bounded(
            history in prop::collection::vec(
                (any::<bool>(), 0.0f64..600.0, prop::option::of(0.0f64..=1.0)),
                0..120,
            )
        ) {
            let attempts: Vec<Attempt> = history
                .into_iter()
                .map(|(correct, time, confidence)| attempt(correct, time, confidence, &["c"]))
                .collect();

            let snapshot = aggregator().aggregate(
                UserId::new(),
                Utc::now().date_naive(),
                &attempts,
                0.3,
            );

            prop_assert!((0.0..=1.0).contains(&snapshot.accuracy_short));
            prop_assert!((0.0..=1.0).contains(&snapshot.accuracy_long));
            prop_assert!((0.0..=1.0).contains(&snapshot.miscalibration));
            prop_assert!((0.0..=1.0).contains(&snapshot.fatigue));
            prop_assert!((0.0..=1.0).contains(&snapshot.calibration_progress));
            for mastery in snapshot.mastery.values() {
                prop_assert!((0.0..=1.0).contains(mastery));
            }
        }
    }
}
