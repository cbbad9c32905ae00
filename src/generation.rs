//! Item generation and quality gate
//!
//! Generates candidate questions with an LLM, validates each one against a
//! rubric evaluator, and promotes only validated items above the caller's
//! quality threshold into the live bank. Both generation and retuning are
//! admin-only and check authorization before any write.

use crate::config::GenerationConfig;
use crate::error::{DokimiError, Result};
use crate::services::ChatProvider;
use crate::storage::Store;
use crate::types::{Item, ItemId, ItemStatus};
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts examined per item when retuning difficulty
const RETUNE_ATTEMPT_WINDOW: usize = 50;

/// A batch generation request
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Concept every generated item must cover
    pub concept: String,

    /// Target difficulty band center, in [0, 1]
    pub difficulty: f64,

    /// Number of candidates to generate
    pub count: usize,

    /// Strategies eligible for the probabilistic required-strategy tag
    pub strategy_pool: Vec<String>,

    /// Minimum rubric quality score for promotion into the live bank
    pub min_quality: f64,
}

/// Outcome of one batch run
///
/// Content-hash collisions are counted under `duplicates`, never `errors`:
/// a regenerated question is an expected outcome, not a failure.
#[derive(Debug, Default)]
pub struct GenerationReport {
    /// Items promoted into the live bank
    pub promoted: Vec<ItemId>,

    /// Items that passed the rubric but fell below the quality threshold
    pub validated: Vec<ItemId>,

    /// Items the rubric rejected outright
    pub rejected: Vec<ItemId>,

    /// Candidates dropped because their content hash already exists
    pub duplicates: usize,

    /// Generation or validation failures, with reasons
    pub errors: Vec<String>,
}

/// Candidate item as the generator LLM emits it
#[derive(Debug, Deserialize)]
struct CandidateDraft {
    stem: String,
    options: Vec<String>,
    correct_index: usize,
}

/// Rubric evaluator verdict
#[derive(Debug, Deserialize)]
struct RubricVerdict {
    is_valid: bool,
    quality_score: f64,
    #[serde(default)]
    issues: Vec<String>,
}

/// LLM-backed item generator with rubric gating
pub struct ItemGenerator {
    store: Arc<dyn Store>,
    provider: Arc<dyn ChatProvider>,
    config: GenerationConfig,
}

impl ItemGenerator {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn ChatProvider>,
        config: GenerationConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Generate, validate, and gate a batch of candidate items
    ///
    /// Each candidate independently rolls for a required-strategy tag at
    /// `strategy_tag_fraction`. Per-candidate failures are collected in the
    /// report rather than aborting the batch.
    pub async fn generate_batch(
        &self,
        is_admin: bool,
        request: &GenerationRequest,
    ) -> Result<GenerationReport> {
        if !is_admin {
            return Err(DokimiError::Unauthorized(
                "item generation is admin-only".to_string(),
            ));
        }

        let mut report = GenerationReport::default();
        let mut rng = rand::thread_rng();

        for _ in 0..request.count {
            let required_strategy = if !request.strategy_pool.is_empty()
                && rng.gen::<f64>() < self.config.strategy_tag_fraction
            {
                let pick = rng.gen_range(0..request.strategy_pool.len());
                Some(request.strategy_pool[pick].clone())
            } else {
                None
            };

            match self
                .generate_one(request, required_strategy.as_deref())
                .await
            {
                Ok(item) => self.gate_and_insert(item, request.min_quality, &mut report).await,
                Err(e) => {
                    warn!("Candidate generation failed: {}", e);
                    report.errors.push(e.to_string());
                }
            }
        }

        info!(
            "Generation batch for '{}': {} promoted, {} validated, {} rejected, {} duplicates, {} errors",
            request.concept,
            report.promoted.len(),
            report.validated.len(),
            report.rejected.len(),
            report.duplicates,
            report.errors.len()
        );
        Ok(report)
    }

    /// Re-fit live item difficulties to observed accuracy
    ///
    /// Blends the stored difficulty with the empirical one
    /// (`1 - observed accuracy`) at the configured ratio, committing only
    /// when the change is significant and the item has enough recent
    /// attempts. Returns the number of items retuned.
    pub async fn retune_difficulties(&self, is_admin: bool) -> Result<usize> {
        if !is_admin {
            return Err(DokimiError::Unauthorized(
                "difficulty retuning is admin-only".to_string(),
            ));
        }

        let mut retuned = 0;
        for mut item in self.store.all_live_items().await? {
            let attempts = self
                .store
                .recent_attempts_for_item(item.id, RETUNE_ATTEMPT_WINDOW)
                .await?;
            if attempts.len() < self.config.retune_min_attempts {
                continue;
            }

            let accuracy = attempts.iter().filter(|a| a.correct).count() as f64
                / attempts.len() as f64;
            let empirical = 1.0 - accuracy;
            let blended = (self.config.retune_blend * item.difficulty
                + (1.0 - self.config.retune_blend) * empirical)
                .clamp(0.0, 1.0);

            if (blended - item.difficulty).abs() <= self.config.retune_min_delta {
                continue;
            }

            debug!(
                "Retuning item {} difficulty {:.3} -> {:.3} ({} attempts)",
                item.id,
                item.difficulty,
                blended,
                attempts.len()
            );
            item.difficulty = blended;
            self.store.update_item(&item).await?;
            retuned += 1;
        }

        Ok(retuned)
    }

    async fn generate_one(
        &self,
        request: &GenerationRequest,
        required_strategy: Option<&str>,
    ) -> Result<Item> {
        let draft = self.draft_candidate(request, required_strategy).await?;

        if draft.options.len() < 2 || draft.correct_index >= draft.options.len() {
            return Err(DokimiError::Validation(
                "generated candidate has malformed options".to_string(),
            ));
        }

        Ok(Item {
            id: ItemId::new(),
            stem: draft.stem,
            options: draft.options,
            correct_index: draft.correct_index,
            difficulty: request.difficulty.clamp(0.0, 1.0),
            concept_tags: vec![request.concept.clone()],
            required_strategy: required_strategy.map(str::to_string),
            is_anchor: false,
            status: ItemStatus::Candidate,
            created_at: Utc::now(),
        })
    }

    /// Validate the candidate, assign its status, and insert it
    ///
    /// Duplicate content hashes are counted, not treated as errors.
    async fn gate_and_insert(
        &self,
        mut item: Item,
        min_quality: f64,
        report: &mut GenerationReport,
    ) {
        let verdict = match self.validate(&item).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Rubric validation failed for candidate: {}", e);
                report.errors.push(e.to_string());
                return;
            }
        };

        item.status = if !verdict.is_valid {
            debug!(
                "Candidate rejected by rubric: {}",
                verdict.issues.join("; ")
            );
            ItemStatus::Rejected
        } else if verdict.quality_score >= min_quality {
            ItemStatus::Live
        } else {
            ItemStatus::Validated
        };

        match self.store.insert_item(&item).await {
            Ok(()) => match item.status {
                ItemStatus::Live => report.promoted.push(item.id),
                ItemStatus::Validated => report.validated.push(item.id),
                _ => report.rejected.push(item.id),
            },
            Err(DokimiError::Duplicate(_)) => {
                debug!("Dropping duplicate candidate ({})", item.content_hash());
                report.duplicates += 1;
            }
            Err(e) => report.errors.push(e.to_string()),
        }
    }

    async fn draft_candidate(
        &self,
        request: &GenerationRequest,
        required_strategy: Option<&str>,
    ) -> Result<CandidateDraft> {
        let strategy_clause = match required_strategy {
            Some(s) => format!(
                "The question must be best solved with the '{}' strategy.",
                s
            ),
            None => String::new(),
        };
        let user_content = format!(
            r#"Write one multiple-choice exam question on the concept "{}" at
difficulty {:.2} on a 0-1 scale. {}

Respond with a single JSON object:
{{
  "stem": "<question text>",
  "options": ["<option>", "<option>", "<option>", "<option>"],
  "correct_index": <index of the correct option>
}}"#,
            request.concept, request.difficulty, strategy_clause
        );

        let text = self
            .provider
            .complete(
                "You write rigorous multiple-choice exam questions. Respond with JSON only.",
                &user_content,
            )
            .await?;

        parse_json_object(&text)
            .ok_or_else(|| DokimiError::LlmApi("unparseable candidate draft".to_string()))
    }

    async fn validate(&self, item: &Item) -> Result<RubricVerdict> {
        let user_content = format!(
            r#"Assess this multiple-choice question against the rubric: the stem is
unambiguous, exactly one option is correct, distractors are plausible, and
the difficulty matches the content.

Stem: {}
Options: {}
Correct option: {}

Respond with a single JSON object:
{{"is_valid": <bool>, "quality_score": <0.0-1.0>, "issues": ["<issue>", ...]}}"#,
            item.stem,
            item.options.join(" | "),
            item.options
                .get(item.correct_index)
                .map(String::as_str)
                .unwrap_or(""),
        );

        let text = self
            .provider
            .complete(
                "You are a question-bank reviewer. Respond with JSON only.",
                &user_content,
            )
            .await?;

        let mut verdict: RubricVerdict = parse_json_object(&text)
            .ok_or_else(|| DokimiError::LlmApi("unparseable rubric verdict".to_string()))?;
        verdict.quality_score = verdict.quality_score.clamp(0.0, 1.0);
        Ok(verdict)
    }
}

/// Extract and parse the outermost JSON object from possibly-wrapped text
fn parse_json_object<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
