//! Dokimi - Adaptive Exam-Practice Engine
//!
//! The learning core of an exam-preparation platform:
//! - Contextual-bandit selection of the next question's difficulty, style,
//!   and timebox, with UCB exploration and logged propensities
//! - EMA-based feature aggregation over attempt history (accuracy, latency,
//!   miscalibration, fatigue, per-concept mastery)
//! - Online reward learning from observed outcomes (correctness, latency,
//!   confidence)
//! - Multi-rater LLM adjudication of free-text justifications, with
//!   majority-vote reconciliation and inter-rater agreement gating
//! - LLM-backed item generation behind a rubric quality gate
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Core data structures (Attempt, Item, DecisionLog, etc.)
//! - **Storage**: The opaque store trait plus an in-memory implementation
//! - **Engine**: The facade wiring features, policy, selection, and rewards
//! - **Adjudication**: Committee, reconciler, and queue worker
//! - **Services**: LLM integration
//!
//! # Example
//!
//! ```ignore
//! use dokimi::{EngineConfig, MemoryStore, PracticeEngine, PracticeMode};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> dokimi::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let engine = PracticeEngine::new(store.clone(), EngineConfig::default());
//!
//!     // Serve the next question
//!     let next = engine.select_next(user_id, PracticeMode::Adaptive).await?;
//!
//!     // ... record the attempt, then run the reward step
//!     let reward = engine.record_outcome(attempt_id).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod adjudication;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod generation;
pub mod policy;
pub mod rewards;
pub mod selector;
pub mod services;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use adjudication::{Adjudicator, AdjudicationWorker, Committee};
pub use config::EngineConfig;
pub use engine::PracticeEngine;
pub use error::{DokimiError, Result};
pub use features::FeatureAggregator;
pub use generation::{GenerationReport, GenerationRequest, ItemGenerator};
pub use policy::BanditPolicy;
pub use rewards::RewardEstimator;
pub use selector::ItemSelector;
pub use services::{AnthropicProvider, ChatProvider, LlmConfig};
pub use storage::{memory::MemoryStore, Store};
pub use types::{
    Action, Adjudication, Attempt, AttemptId, BanditState, DecisionId, DecisionLog,
    DifficultyStep, FeatureSnapshot, Item, ItemId, ItemStatus, Justification, JustificationId,
    JustificationState, NextItem, PracticeMode, Rating, Style, Timebox, UserId,
};
