use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Scoring weights, clarification thresholds and persona settings.
///
/// Every field has a default, so a partial YAML document only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub exact_weight: f32,
    pub keyword_weight: f32,
    pub fuzzy_weight: f32,
    /// Top score below this asks for clarification instead of answering.
    pub confidence_threshold: f32,
    /// Candidates within this distance of the top score count as a near-tie.
    pub tie_delta: f32,
    /// Top score below this is reported as no answer at all.
    pub min_relevance: f32,
    pub category_boost: f32,
    pub default_limit: usize,
    pub max_clarification_options: usize,
    pub clarification_ttl_secs: i64,
    pub persona_name: String,
    pub handoff_contact: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            exact_weight: 0.5,
            keyword_weight: 0.3,
            fuzzy_weight: 0.2,
            confidence_threshold: 0.5,
            tie_delta: 0.08,
            min_relevance: 0.2,
            category_boost: 0.1,
            default_limit: 5,
            max_clarification_options: 3,
            clarification_ttl_secs: 1800,
            persona_name: "텔리젠".to_string(),
            handoff_contact: None,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// Returns [`EngineError::Config`] when a weight or threshold is out of range.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, weight) in [
            ("exact_weight", self.exact_weight),
            ("keyword_weight", self.keyword_weight),
            ("fuzzy_weight", self.fuzzy_weight),
            ("category_boost", self.category_boost),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::Config(format!("{name} MUST be a finite value >= 0")));
            }
        }
        if self.weight_total() <= 0.0 {
            return Err(EngineError::Config(
                "at least one of exact_weight, keyword_weight, fuzzy_weight MUST be > 0"
                    .to_string(),
            ));
        }
        for (name, threshold) in [
            ("confidence_threshold", self.confidence_threshold),
            ("tie_delta", self.tie_delta),
            ("min_relevance", self.min_relevance),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(EngineError::Config(format!("{name} MUST be in [0.0, 1.0]")));
            }
        }
        if self.min_relevance > self.confidence_threshold {
            return Err(EngineError::Config(
                "min_relevance MUST NOT exceed confidence_threshold".to_string(),
            ));
        }
        if self.default_limit == 0 {
            return Err(EngineError::Config("default_limit MUST be >= 1".to_string()));
        }
        if self.max_clarification_options < 2 {
            return Err(EngineError::Config(
                "max_clarification_options MUST be >= 2".to_string(),
            ));
        }
        if self.clarification_ttl_secs <= 0 {
            return Err(EngineError::Config("clarification_ttl_secs MUST be > 0".to_string()));
        }
        if self.persona_name.trim().is_empty() {
            return Err(EngineError::Config("persona_name MUST be non-empty".to_string()));
        }
        Ok(())
    }

    pub(crate) fn weight_total(&self) -> f32 {
        self.exact_weight + self.keyword_weight + self.fuzzy_weight
    }
}
