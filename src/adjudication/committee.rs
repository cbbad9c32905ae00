//! Evaluator committee
//!
//! Runs a fixed set of independently-prompted evaluators over the same
//! justification text. Each evaluator is one LLM call expected to return a
//! JSON object; a failed call drops that rater, and an unparseable response
//! degrades to a conservative default labeling with lowered confidence
//! rather than failing the job.

use crate::error::Result;
use crate::services::ChatProvider;
use crate::types::{ErrorClass, Justification, Rating, RatingLabels, ReasoningStyle};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Confidence assigned to defaulted ratings after a parse failure
const DEGRADED_CONFIDENCE: f64 = 0.2;

/// One evaluator's prompt template
struct EvaluatorTemplate {
    id: &'static str,
    system: &'static str,
}

/// The three committee perspectives. Each template frames the same labeling
/// task differently so the raters fail independently.
const TEMPLATES: [EvaluatorTemplate; 3] = [
    EvaluatorTemplate {
        id: "structure",
        system: "You grade exam-answer justifications by their logical structure. \
                 Identify the primary solution strategy, the reasoning style, and \
                 count the discernible reasoning steps. Respond with JSON only.",
    },
    EvaluatorTemplate {
        id: "rigor",
        system: "You are a strict examiner assessing whether a written justification \
                 actually supports the chosen answer. Penalize hand-waving and \
                 unstated assumptions in the quality score. Respond with JSON only.",
    },
    EvaluatorTemplate {
        id: "didactic",
        system: "You are a tutor judging whether this justification shows real \
                 understanding a student could learn from, or surface pattern \
                 matching. Respond with JSON only.",
    },
];

/// JSON schema every evaluator is asked to produce
#[derive(Debug, Deserialize)]
struct RaterResponse {
    strategy_primary: Option<String>,
    reasoning_style: Option<String>,
    step_count: Option<u32>,
    coherence: Option<f64>,
    error_class: Option<String>,
    jqs: Option<f64>,
    confidence: Option<f64>,
}

/// Fixed committee of independently-prompted evaluators
pub struct Committee {
    provider: Arc<dyn ChatProvider>,
    size: usize,
}

impl Committee {
    /// Create a committee of the first `size` templates (reference size 3)
    pub fn new(provider: Arc<dyn ChatProvider>, size: usize) -> Self {
        Self {
            provider,
            size: size.min(TEMPLATES.len()),
        }
    }

    /// Rate a justification with every committee member
    ///
    /// Provider failures are tolerated per rater; the returned vector may be
    /// shorter than the committee size. The caller decides whether enough
    /// ratings survived.
    pub async fn rate(&self, justification: &Justification) -> Result<Vec<Rating>> {
        let user_content = Self::user_prompt(justification);
        let mut ratings = Vec::with_capacity(self.size);

        for template in TEMPLATES.iter().take(self.size) {
            match self.provider.complete(template.system, &user_content).await {
                Ok(text) => {
                    ratings.push(parse_rating(justification, template.id, &text));
                }
                Err(e) => {
                    warn!(
                        "Evaluator {} failed for justification {}: {}",
                        template.id, justification.id, e
                    );
                }
            }
        }

        debug!(
            "Committee produced {}/{} ratings for justification {}",
            ratings.len(),
            self.size,
            justification.id
        );
        Ok(ratings)
    }

    fn user_prompt(justification: &Justification) -> String {
        format!(
            r#"Evaluate the following answer justification.

Justification:
{}

Declared strategy tags: {}

Respond with a single JSON object:
{{
  "strategy_primary": "<dominant solution strategy, one short phrase>",
  "reasoning_style": "<deductive|inductive|elimination|recall|guess>",
  "step_count": <number of discernible reasoning steps>,
  "coherence": <0.0-1.0>,
  "error_class": "<none|conceptual|computational|misread|incomplete>",
  "jqs": <overall justification quality, 0.0-1.0>,
  "confidence": <your confidence in this assessment, 0.0-1.0>
}}"#,
            justification.text,
            justification.strategy_tags.join(", "),
        )
    }
}

/// Parse one evaluator response, degrading to a conservative default
///
/// The response is expected to be a JSON object, possibly wrapped in prose;
/// the outermost braces are extracted before parsing. Anything that still
/// fails to parse becomes the default labeling with
/// [`DEGRADED_CONFIDENCE`].
fn parse_rating(justification: &Justification, template_id: &str, text: &str) -> Rating {
    let parsed: Option<RaterResponse> = extract_json(text)
        .and_then(|json| serde_json::from_str(&json).ok());

    let (labels, jqs, confidence) = match parsed {
        Some(response) => {
            let labels = RatingLabels {
                strategy_primary: response
                    .strategy_primary
                    .unwrap_or_else(|| "unspecified".to_string())
                    .to_lowercase(),
                reasoning_style: response
                    .reasoning_style
                    .as_deref()
                    .map(parse_reasoning_style)
                    .unwrap_or(ReasoningStyle::Recall),
                step_count: response.step_count.unwrap_or(1),
                coherence: response.coherence.unwrap_or(0.5).clamp(0.0, 1.0),
                error_class: response
                    .error_class
                    .as_deref()
                    .map(parse_error_class)
                    .unwrap_or(ErrorClass::None),
            };
            let jqs = response.jqs.unwrap_or(0.3).clamp(0.0, 1.0);
            let confidence = response.confidence.unwrap_or(0.5).clamp(0.0, 1.0);
            (labels, jqs, confidence)
        }
        None => {
            warn!(
                "Evaluator {} returned unparseable content for {}, using defaults",
                template_id, justification.id
            );
            (
                RatingLabels {
                    strategy_primary: "unspecified".to_string(),
                    reasoning_style: ReasoningStyle::Recall,
                    step_count: 1,
                    coherence: 0.3,
                    error_class: ErrorClass::Incomplete,
                },
                0.3,
                DEGRADED_CONFIDENCE,
            )
        }
    };

    Rating {
        justification: justification.id,
        template_id: template_id.to_string(),
        labels,
        jqs,
        confidence,
        created_at: Utc::now(),
    }
}

/// Slice out the outermost JSON object from possibly-wrapped text
fn extract_json(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

fn parse_reasoning_style(s: &str) -> ReasoningStyle {
    match s.trim().to_lowercase().as_str() {
        "deductive" => ReasoningStyle::Deductive,
        "inductive" => ReasoningStyle::Inductive,
        "elimination" => ReasoningStyle::Elimination,
        "guess" => ReasoningStyle::Guess,
        _ => ReasoningStyle::Recall,
    }
}

fn parse_error_class(s: &str) -> ErrorClass {
    match s.trim().to_lowercase().as_str() {
        "conceptual" => ErrorClass::Conceptual,
        "computational" => ErrorClass::Computational,
        "misread" => ErrorClass::Misread,
        "incomplete" => ErrorClass::Incomplete,
        _ => ErrorClass::None,
    }
}
