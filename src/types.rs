//! Core data types for the Dokimi practice engine
//!
//! This module defines the fundamental data structures used throughout dokimi,
//! including attempts, feature snapshots, the bandit action space, decision
//! logs, items, and the justification/rating/adjudication family. These types
//! form the foundation of the adaptive selection and calibration pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Dimensionality of the policy context vector
/// ([accuracy_short, 1 - miscalibration, 1 - fatigue]).
pub const CONTEXT_DIM: usize = 3;

/// Minimum justification length eligible for adjudication.
pub const MIN_JUSTIFICATION_LEN: usize = 180;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an id from a string
            pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for users
    UserId
);
uuid_id!(
    /// Unique identifier for bank items (questions)
    ItemId
);
uuid_id!(
    /// Unique identifier for answer attempts
    AttemptId
);
uuid_id!(
    /// Unique identifier for free-text justifications
    JustificationId
);
uuid_id!(
    /// Unique identifier for decision log rows
    DecisionId
);

/// A single answered question, the raw input to feature aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: AttemptId,
    pub user: UserId,
    pub item: ItemId,

    /// Whether the chosen option was correct
    pub correct: bool,

    /// Wall-clock response time in seconds
    pub time_taken_seconds: f64,

    /// Stated confidence in [0, 1], if the user provided one
    pub confidence: Option<f64>,

    /// Concept tags of the answered item
    pub concept_ids: Vec<String>,

    pub submitted_at: DateTime<Utc>,
}

/// Rolling per-user state computed from attempt history
///
/// One snapshot per (user, day); upserted on every aggregation run and
/// superseded daily. All ratio fields are maintained in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub user: UserId,
    pub day: NaiveDate,

    /// Accuracy EMA, short horizon (alpha ~0.3)
    pub accuracy_short: f64,

    /// Accuracy EMA, long horizon (alpha ~0.1)
    pub accuracy_long: f64,

    /// Response latency EMA in seconds, short horizon
    pub latency_short: f64,

    /// Response latency EMA in seconds, long horizon
    pub latency_long: f64,

    /// Mean |confidence - correctness| over the trailing window
    pub miscalibration: f64,

    /// Normalized variance of recent response times, clamped to [0, 1]
    pub fatigue: f64,

    /// Per-concept accuracy ratio (concept id -> correct / total)
    pub mastery: HashMap<String, f64>,

    /// Progress through the calibration block, in [0, 1]
    pub calibration_progress: f64,
}

impl FeatureSnapshot {
    /// Build the fixed-length context vector consumed by the policy
    pub fn context_vector(&self) -> Vec<f64> {
        vec![
            self.accuracy_short,
            1.0 - self.miscalibration,
            1.0 - self.fatigue,
        ]
    }
}

/// Relative difficulty adjustment selected by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyStep {
    Easier,
    Hold,
    Harder,
}

impl DifficultyStep {
    /// Signed step value in {-1, 0, +1}
    pub fn value(&self) -> i8 {
        match self {
            DifficultyStep::Easier => -1,
            DifficultyStep::Hold => 0,
            DifficultyStep::Harder => 1,
        }
    }

    pub const ALL: [DifficultyStep; 3] = [
        DifficultyStep::Easier,
        DifficultyStep::Hold,
        DifficultyStep::Harder,
    ];
}

/// Presentation style of the next question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Conceptual,
    Applied,
    Mixed,
}

impl Style {
    pub const ALL: [Style; 3] = [Style::Conceptual, Style::Applied, Style::Mixed];
}

impl std::fmt::Display for Style {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Style::Conceptual => write!(f, "conceptual"),
            Style::Applied => write!(f, "applied"),
            Style::Mixed => write!(f, "mixed"),
        }
    }
}

/// Time budget granted for the next question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timebox {
    Relaxed,
    Standard,
    Sprint,
}

impl Timebox {
    pub const ALL: [Timebox; 3] = [Timebox::Relaxed, Timebox::Standard, Timebox::Sprint];

    /// Budget in seconds communicated to the UI layer
    pub fn seconds(&self) -> u32 {
        match self {
            Timebox::Relaxed => 180,
            Timebox::Standard => 90,
            Timebox::Sprint => 45,
        }
    }
}

impl std::fmt::Display for Timebox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timebox::Relaxed => write!(f, "relaxed"),
            Timebox::Standard => write!(f, "standard"),
            Timebox::Sprint => write!(f, "sprint"),
        }
    }
}

/// One element of the finite bandit action space
///
/// `required_strategy` is only populated in drill mode, where the style
/// rotation pins the next question to a specific solution strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub difficulty_step: DifficultyStep,
    pub style: Style,
    pub timebox: Timebox,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_strategy: Option<String>,
}

impl Action {
    /// Stable key identifying this action's bandit arm
    ///
    /// The strategy tag is intentionally excluded: drill overrides reuse the
    /// underlying arm's learned weights.
    pub fn key(&self) -> String {
        format!(
            "d{}:{}:{}",
            self.difficulty_step.value(),
            self.style,
            self.timebox
        )
    }

    /// Enumerate the full discrete action space (3 x 3 x 3 = 27 arms)
    pub fn space() -> Vec<Action> {
        let mut actions = Vec::with_capacity(27);
        for step in DifficultyStep::ALL {
            for style in Style::ALL {
                for timebox in Timebox::ALL {
                    actions.push(Action {
                        difficulty_step: step,
                        style,
                        timebox,
                        required_strategy: None,
                    });
                }
            }
        }
        actions
    }
}

/// Per-(user, action) linear value model owned by the reward estimator
///
/// `update_count` is monotonically increasing and starts at 1 so the
/// exploration bonus stays finite for unseen arms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanditState {
    /// Linear weight vector, one entry per context dimension
    pub theta: Vec<f64>,

    /// Number of observations applied to this arm (>= 1)
    pub update_count: u64,
}

impl BanditState {
    /// Fresh arm: zero weights, count seeded at 1
    pub fn new(dim: usize) -> Self {
        Self {
            theta: vec![0.0; dim],
            update_count: 1,
        }
    }

    /// Predicted value for a context under the current weights
    pub fn predict(&self, context: &[f64]) -> f64 {
        self.theta
            .iter()
            .zip(context.iter())
            .map(|(w, x)| w * x)
            .sum()
    }
}

impl Default for BanditState {
    fn default() -> Self {
        Self::new(CONTEXT_DIM)
    }
}

/// Immutable record of one policy decision
///
/// Appended once per selection call. The only permitted mutation is the
/// one-shot attachment of the realized reward by the reward estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLog {
    pub id: DecisionId,
    pub user: UserId,

    /// Context vector the policy scored against
    pub context: Vec<f64>,

    /// Action served (including drill strategy override, when applied)
    pub action: Action,

    pub chosen_item: ItemId,

    /// Softmax mass of the served action under the logging policy, in (0, 1]
    pub propensity: f64,

    pub decided_at: DateTime<Utc>,

    /// Realized reward, attached once the outcome is known
    pub reward: Option<f64>,

    /// Attempt the reward was derived from; dedupes repeated processing
    pub rewarded_attempt: Option<AttemptId>,
}

/// Lifecycle of a generated item through the quality gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Freshly generated, not yet validated
    Candidate,

    /// Passed rubric validation
    Validated,

    /// Validated and above the quality threshold, promoted to the live bank
    Live,

    /// Failed validation or quality gate
    Rejected,
}

/// A bank question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,

    /// Question stem
    pub stem: String,

    /// Answer options
    pub options: Vec<String>,

    /// Index of the correct option
    pub correct_index: usize,

    /// Empirical difficulty in [0, 1] (1 = hardest)
    pub difficulty: f64,

    /// Concept tags used for focus-concept matching
    pub concept_tags: Vec<String>,

    /// Solution strategy this item exercises, if any
    pub required_strategy: Option<String>,

    /// Anchor items are reserved for calibration metrics and are never
    /// served by the adaptive path
    pub is_anchor: bool,

    pub status: ItemStatus,

    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Content hash over stem + correct option + all options
    ///
    /// Used as the uniqueness key for duplicate detection on insert.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.stem.as_bytes());
        if let Some(correct) = self.options.get(self.correct_index) {
            hasher.update(correct.as_bytes());
        }
        for option in &self.options {
            hasher.update(option.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Lifecycle of a justification through the adjudication queue
///
/// Transitions are enforced exclusively through [`JustificationState::can_transition`];
/// `Done` and `Failed` are terminal (no auto-retry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum JustificationState {
    Unsubmitted,
    Queued,
    Processing,
    Done,
    Failed { reason: String },
}

impl JustificationState {
    /// Whether a transition from `self` to `next` is legal
    pub fn can_transition(&self, next: &JustificationState) -> bool {
        use JustificationState::*;
        matches!(
            (self, next),
            (Unsubmitted, Queued) | (Queued, Processing) | (Processing, Done) | (Processing, Failed { .. })
        )
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JustificationState::Done | JustificationState::Failed { .. }
        )
    }
}

/// Free-text answer explanation for a calibration-block item
///
/// Upsert semantics per (user, item): the latest submission wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Justification {
    pub id: JustificationId,
    pub user: UserId,
    pub item: ItemId,
    pub text: String,
    pub strategy_tags: Vec<String>,
    pub state: JustificationState,
    pub submitted_at: DateTime<Utc>,
}

impl Justification {
    /// Whether the text meets the minimum length for adjudication
    pub fn is_eligible(&self) -> bool {
        self.text.chars().count() >= MIN_JUSTIFICATION_LEN
    }
}

/// Reasoning style identified by an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStyle {
    Deductive,
    Inductive,
    Elimination,
    Recall,
    Guess,
}

/// Error class identified by an evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    None,
    Conceptual,
    Computational,
    Misread,
    Incomplete,
}

/// Structured labels produced by one evaluator over a justification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingLabels {
    /// Dominant solution strategy named by the rater
    pub strategy_primary: String,

    pub reasoning_style: ReasoningStyle,

    /// Number of discernible reasoning steps
    pub step_count: u32,

    /// Coherence of the argument, in [0, 1]
    pub coherence: f64,

    pub error_class: ErrorClass,
}

/// One evaluator's judgment of a justification; immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub justification: JustificationId,

    /// Which committee template produced this rating
    pub template_id: String,

    pub labels: RatingLabels,

    /// Justification quality score in [0, 1]
    pub jqs: f64,

    /// Rater self-confidence in [0, 1]; lowered when the response had to be
    /// defaulted at the parse boundary
    pub confidence: f64,

    pub created_at: DateTime<Utc>,
}

/// Reconciled judgment derived from a justification's ratings
///
/// Created once at least two ratings exist; immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjudication {
    pub justification: JustificationId,

    /// Majority-voted categorical labels, averaged continuous labels
    pub labels: RatingLabels,

    /// Mean fraction of raters agreeing with the majority across the
    /// categorical fields, in [0, 1]
    pub agreement_score: f64,

    /// Averaged justification quality score in [0, 1]
    pub jqs: f64,

    /// Whether the calibration-progress gate passed
    /// (agreement >= 0.5 AND jqs >= 0.35)
    pub passed_gate: bool,

    /// Flagged for human review when the gate fails
    pub needs_review: bool,

    pub created_at: DateTime<Utc>,
}

/// Serving mode requested by the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeMode {
    /// Bandit-driven style selection
    Adaptive,

    /// Round-robin strategy rotation overriding the bandit's style choice
    Drill,
}

/// Result of a `select_next` call, handed to the UI layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextItem {
    pub item: Item,
    pub style: Style,
    pub timebox: Timebox,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_space_size() {
        let space = Action::space();
        assert_eq!(space.len(), 27);

        // Keys must be unique per arm
        let keys: std::collections::HashSet<_> = space.iter().map(|a| a.key()).collect();
        assert_eq!(keys.len(), 27);
    }

    #[test]
    fn test_action_key_ignores_strategy() {
        let mut a = Action {
            difficulty_step: DifficultyStep::Hold,
            style: Style::Applied,
            timebox: Timebox::Standard,
            required_strategy: None,
        };
        let base = a.key();
        a.required_strategy = Some("elimination".to_string());
        assert_eq!(a.key(), base);
    }

    #[test]
    fn test_bandit_state_seeded_count() {
        let state = BanditState::new(CONTEXT_DIM);
        assert_eq!(state.update_count, 1);
        assert_eq!(state.theta.len(), CONTEXT_DIM);
        assert_eq!(state.predict(&[1.0, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_justification_state_transitions() {
        use JustificationState::*;

        assert!(Unsubmitted.can_transition(&Queued));
        assert!(Queued.can_transition(&Processing));
        assert!(Processing.can_transition(&Done));
        assert!(Processing.can_transition(&Failed {
            reason: "x".to_string()
        }));

        // Illegal jumps
        assert!(!Unsubmitted.can_transition(&Processing));
        assert!(!Queued.can_transition(&Done));
        assert!(!Done.can_transition(&Queued));
        assert!(!Failed {
            reason: "x".to_string()
        }
        .can_transition(&Queued));
    }

    #[test]
    fn test_justification_eligibility_boundary() {
        let mut j = Justification {
            id: JustificationId::new(),
            user: UserId::new(),
            item: ItemId::new(),
            text: "a".repeat(MIN_JUSTIFICATION_LEN),
            strategy_tags: vec![],
            state: JustificationState::Unsubmitted,
            submitted_at: Utc::now(),
        };
        assert!(j.is_eligible());

        j.text = "a".repeat(MIN_JUSTIFICATION_LEN - 1);
        assert!(!j.is_eligible());
    }

    #[test]
    fn test_content_hash_sensitive_to_answer() {
        let base = Item {
            id: ItemId::new(),
            stem: "What is 2+2?".to_string(),
            options: vec!["3".to_string(), "4".to_string()],
            correct_index: 1,
            difficulty: 0.2,
            concept_tags: vec!["arithmetic".to_string()],
            required_strategy: None,
            is_anchor: false,
            status: ItemStatus::Live,
            created_at: Utc::now(),
        };

        let mut other = base.clone();
        other.id = ItemId::new();
        assert_eq!(base.content_hash(), other.content_hash());

        other.correct_index = 0;
        assert_ne!(base.content_hash(), other.content_hash());
    }

    #[test]
    fn test_context_vector_shape() {
        let snapshot = FeatureSnapshot {
            user: UserId::new(),
            day: Utc::now().date_naive(),
            accuracy_short: 0.6,
            accuracy_long: 0.55,
            latency_short: 30.0,
            latency_long: 28.0,
            miscalibration: 0.2,
            fatigue: 0.1,
            mastery: HashMap::new(),
            calibration_progress: 0.0,
        };

        let ctx = snapshot.context_vector();
        assert_eq!(ctx.len(), CONTEXT_DIM);
        assert!((ctx[0] - 0.6).abs() < 1e-9);
        assert!((ctx[1] - 0.8).abs() < 1e-9);
        assert!((ctx[2] - 0.9).abs() < 1e-9);
    }
}
