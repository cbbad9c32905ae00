//! Integration tests for the justification adjudication pipeline
//!
//! Submission through the engine, queue processing through the worker, and
//! the calibration-progress gate at the end.

use async_trait::async_trait;
use dokimi::{
    AdjudicationWorker, ChatProvider, DokimiError, EngineConfig, ItemId, JustificationState,
    MemoryStore, PracticeEngine, Result, Store, UserId,
};
use std::sync::{Arc, Mutex};

mod common;

/// Replays scripted responses; shared across workers in the race test
struct ScriptedProvider {
    responses: Mutex<Vec<Result<String>>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
        })
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(DokimiError::LlmApi("script exhausted".to_string()));
        }
        responses.remove(0)
    }
}

fn rater_json(strategy: &str, jqs: f64) -> String {
    format!(
        r#"{{"strategy_primary": "{}", "reasoning_style": "elimination",
            "step_count": 3, "coherence": 0.8, "error_class": "none",
            "jqs": {}, "confidence": 0.9}}"#,
        strategy, jqs
    )
}

fn long_text() -> String {
    "I ruled out the two options with inconsistent units first, then compared the \
     remaining pair by substituting the boundary value given in the stem. Only one \
     of them satisfied the constraint, so I chose it and double-checked the sign."
        .to_string()
}

#[tokio::test]
async fn test_submission_to_done_with_progress() {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = PracticeEngine::new(store.clone(), EngineConfig::default());
    let user = UserId::new();

    let id = engine
        .submit_justification(user, ItemId::new(), long_text(), vec!["elimination".to_string()])
        .await
        .unwrap();

    let provider = ScriptedProvider::new(vec![
        Ok(rater_json("elimination", 0.8)),
        Ok(rater_json("elimination", 0.7)),
        Ok(rater_json("substitution", 0.75)),
    ]);
    let worker = AdjudicationWorker::new(
        store.clone(),
        provider,
        EngineConfig::default().adjudication,
    );

    assert_eq!(worker.process_next().await.unwrap(), Some(id));

    let justification = store.get_justification(id).await.unwrap();
    assert_eq!(justification.state, JustificationState::Done);

    let adjudication = store.get_adjudication(id).await.unwrap().unwrap();
    assert_eq!(adjudication.labels.strategy_primary, "elimination");
    // strategy 2/3 agreement, style and error unanimous
    assert!(adjudication.agreement_score > 0.5);
    assert!(adjudication.passed_gate);

    assert!(store.calibration_progress(user).await.unwrap() > 0.0);
}

#[tokio::test]
async fn test_discordant_committee_flags_review_without_progress() {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = PracticeEngine::new(store.clone(), EngineConfig::default());
    let user = UserId::new();

    let id = engine
        .submit_justification(user, ItemId::new(), long_text(), vec![])
        .await
        .unwrap();

    // Three raters, three different stories
    let provider = ScriptedProvider::new(vec![
        Ok(r#"{"strategy_primary": "elimination", "reasoning_style": "elimination",
               "step_count": 3, "coherence": 0.8, "error_class": "none",
               "jqs": 0.8, "confidence": 0.9}"#
            .to_string()),
        Ok(r#"{"strategy_primary": "substitution", "reasoning_style": "deductive",
               "step_count": 5, "coherence": 0.6, "error_class": "incomplete",
               "jqs": 0.7, "confidence": 0.8}"#
            .to_string()),
        Ok(r#"{"strategy_primary": "recall", "reasoning_style": "guess",
               "step_count": 1, "coherence": 0.3, "error_class": "conceptual",
               "jqs": 0.6, "confidence": 0.7}"#
            .to_string()),
    ]);
    let worker = AdjudicationWorker::new(
        store.clone(),
        provider,
        EngineConfig::default().adjudication,
    );
    worker.process_next().await.unwrap();

    let adjudication = store.get_adjudication(id).await.unwrap().unwrap();
    assert!(adjudication.agreement_score < 0.5);
    assert!(!adjudication.passed_gate);
    assert!(adjudication.needs_review);
    assert_eq!(store.calibration_progress(user).await.unwrap(), 0.0);

    // The job still terminated cleanly
    let justification = store.get_justification(id).await.unwrap();
    assert_eq!(justification.state, JustificationState::Done);
}

#[tokio::test]
async fn test_concurrent_workers_process_a_job_once() {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = PracticeEngine::new(store.clone(), EngineConfig::default());
    let user = UserId::new();

    let id = engine
        .submit_justification(user, ItemId::new(), long_text(), vec![])
        .await
        .unwrap();

    // Both workers share one script with exactly one committee's worth of
    // responses; if the loser processed too, it would exhaust the script.
    let provider = ScriptedProvider::new(vec![
        Ok(rater_json("elimination", 0.8)),
        Ok(rater_json("elimination", 0.8)),
        Ok(rater_json("elimination", 0.8)),
    ]);
    let worker_a = {
        let w = AdjudicationWorker::new(
            store.clone(),
            provider.clone(),
            EngineConfig::default().adjudication,
        );
        tokio::spawn(async move { w.process_next().await.unwrap() })
    };
    let worker_b = {
        let w = AdjudicationWorker::new(
            store.clone(),
            provider,
            EngineConfig::default().adjudication,
        );
        tokio::spawn(async move { w.process_next().await.unwrap() })
    };

    let (a, b) = (worker_a.await.unwrap(), worker_b.await.unwrap());
    assert!(
        (a == Some(id)) ^ (b == Some(id)),
        "exactly one worker must win the claim, got {:?} and {:?}",
        a,
        b
    );

    let ratings = store.ratings_for(id).await.unwrap();
    assert_eq!(ratings.len(), 3);
    let justification = store.get_justification(id).await.unwrap();
    assert_eq!(justification.state, JustificationState::Done);
}

#[tokio::test]
async fn test_resubmission_supersedes_previous_justification() {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    let engine = PracticeEngine::new(store.clone(), EngineConfig::default());
    let user = UserId::new();
    let item = ItemId::new();

    let first = engine
        .submit_justification(user, item, long_text(), vec![])
        .await
        .unwrap();
    let second = engine
        .submit_justification(user, item, long_text() + " Revised.", vec![])
        .await
        .unwrap();

    assert_ne!(first, second);
    assert!(store.get_justification(first).await.is_err());
    assert_eq!(store.next_queued_justification().await.unwrap(), Some(second));
}
