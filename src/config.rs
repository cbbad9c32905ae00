//! Engine configuration
//!
//! Defines the tunable parameters of the adaptive loop: EMA horizons,
//! exploration and learning rates, reward shaping constants, adjudication
//! thresholds, and the generation quality gate. Defaults match the shipped
//! product behavior; deployments may override via a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub features: FeatureConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub reward: RewardConfig,

    #[serde(default)]
    pub adjudication: AdjudicationConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Feature aggregation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Short-horizon EMA smoothing factor
    pub alpha_short: f64,

    /// Long-horizon EMA smoothing factor
    pub alpha_long: f64,

    /// Trailing window for the miscalibration mean
    pub miscalibration_window: usize,

    /// Trailing window for the fatigue variance
    pub fatigue_window: usize,

    /// Variance divisor before the fatigue clamp
    pub fatigue_divisor: f64,

    /// Latency EMA seed used when a user has no history, in seconds
    pub latency_seed: f64,

    /// Maximum attempts considered per aggregation run
    pub history_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            alpha_short: 0.3,
            alpha_long: 0.1,
            miscalibration_window: 20,
            fatigue_window: 10,
            fatigue_divisor: 100.0,
            latency_seed: 45.0,
            history_window: 100,
        }
    }
}

/// Contextual bandit parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Multiplier on the UCB exploration bonus
    pub exploration_weight: f64,

    /// Softmax temperature for the logging propensity
    pub softmax_temperature: f64,

    /// Ordered strategy list cycled through in drill mode
    pub drill_strategies: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            exploration_weight: 1.0,
            softmax_temperature: 1.0,
            drill_strategies: vec![
                "elimination".to_string(),
                "estimation".to_string(),
                "first_principles".to_string(),
                "pattern_matching".to_string(),
            ],
        }
    }
}

/// Reward shaping and update parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Divisor on the log-time penalty
    pub time_penalty_divisor: f64,

    /// Weight on the stated-confidence bonus
    pub confidence_bonus: f64,

    /// Step size of the online linear update
    pub learning_rate: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            time_penalty_divisor: 5.0,
            confidence_bonus: 0.2,
            learning_rate: 0.1,
        }
    }
}

/// Adjudication committee and gating parameters
///
/// The gate thresholds are policy invariants (agreement >= 0.5 AND
/// jqs >= 0.35 increments calibration progress); they are surfaced here for
/// visibility but changing them changes product behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjudicationConfig {
    /// Number of independently-prompted evaluators per justification
    pub committee_size: usize,

    /// Minimum successful ratings required to adjudicate
    pub min_ratings: usize,

    /// Inter-rater agreement threshold for the progress gate
    pub min_agreement: f64,

    /// Quality-score threshold for the progress gate
    pub min_jqs: f64,

    /// Calibration-progress increment granted when the gate passes
    pub progress_increment: f64,
}

impl Default for AdjudicationConfig {
    fn default() -> Self {
        Self {
            committee_size: 3,
            min_ratings: 2,
            min_agreement: 0.5,
            min_jqs: 0.35,
            progress_increment: 0.1,
        }
    }
}

/// Item generation and difficulty-retune parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Fraction of generated candidates carrying a required-strategy tag
    pub strategy_tag_fraction: f64,

    /// Weight of the stored difficulty in the retune blend
    pub retune_blend: f64,

    /// Minimum |delta| before a retuned difficulty is committed
    pub retune_min_delta: f64,

    /// Minimum recent attempts before an item is retuned
    pub retune_min_attempts: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            strategy_tag_fraction: 0.4,
            retune_blend: 0.8,
            retune_min_delta: 0.05,
            retune_min_attempts: 10,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate parameter ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, alpha) in [
            ("features.alpha_short", self.features.alpha_short),
            ("features.alpha_long", self.features.alpha_long),
        ] {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be in [0, 1], got {}",
                    name, alpha
                )));
            }
        }

        if self.features.fatigue_divisor <= 0.0 {
            return Err(ConfigError::ValidationError(
                "features.fatigue_divisor must be positive".to_string(),
            ));
        }

        if self.policy.exploration_weight < 0.0 {
            return Err(ConfigError::ValidationError(
                "policy.exploration_weight must be non-negative".to_string(),
            ));
        }

        if self.policy.softmax_temperature <= 0.0 {
            return Err(ConfigError::ValidationError(
                "policy.softmax_temperature must be positive".to_string(),
            ));
        }

        if self.policy.drill_strategies.is_empty() {
            return Err(ConfigError::ValidationError(
                "policy.drill_strategies must not be empty".to_string(),
            ));
        }

        if self.reward.learning_rate <= 0.0 || self.reward.learning_rate > 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "reward.learning_rate must be in (0, 1], got {}",
                self.reward.learning_rate
            )));
        }

        if self.adjudication.committee_size < self.adjudication.min_ratings {
            return Err(ConfigError::ValidationError(
                "adjudication.committee_size must be >= min_ratings".to_string(),
            ));
        }

        if self.adjudication.min_ratings < 2 {
            return Err(ConfigError::ValidationError(
                "adjudication.min_ratings must be at least 2".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.generation.strategy_tag_fraction) {
            return Err(ConfigError::ValidationError(
                "generation.strategy_tag_fraction must be in [0, 1]".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.generation.retune_blend) {
            return Err(ConfigError::ValidationError(
                "generation.retune_blend must be in [0, 1]".to_string(),
            ));
        }

        Ok(())
    }
}
