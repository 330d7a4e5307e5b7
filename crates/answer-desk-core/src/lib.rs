//! Answer retrieval and disambiguation engine for point-of-sale support questions.
//!
//! The pipeline is: [`InputClassifier`] filters non-actionable input, [`resolve_context`]
//! derives an optional topic hint from registered [`ContextPattern`]s, [`SearchService`]
//! ranks [`KnowledgeItem`]s and decides between answering and asking for clarification,
//! and [`format_answer`] normalizes the chosen answer. [`AnswerEngine::handle_turn`] ties
//! these together per conversation turn.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

mod classifier;
mod config;
mod context;
mod engine;
mod format;
mod search;
pub mod seed;
mod store;
#[cfg(test)]
mod test_support;
mod text;
mod vague;

pub use classifier::{template_for, InputClassification, InputClassifier, InputType};
pub use config::EngineConfig;
pub use context::{resolve_context, ContextMatch};
pub use engine::{AnswerEngine, ClarificationOption, ClarificationState, TurnOutcome};
pub use format::format_answer;
pub use search::{
    clarification_prompt, decide, default_tie_breakers, BestAnswer, MatchType, SearchDecision,
    SearchResult, SearchService, SubScores,
};
pub use store::{KnowledgeField, KnowledgeStore, MemoryStore, PatternStore};
pub use vague::{detect_vague_input, VagueInput, VagueTopic};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("validation error: {0}")]
pub struct ValidationError(pub String);

/// Failures reported by [`KnowledgeStore`] and [`PatternStore`] implementations.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<ValidationError> for StoreError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.0)
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum EngineError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the caller may retry the same request later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(message) => Self::StoreUnavailable(message),
            StoreError::Validation(message) => Self::Validation(message),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct KnowledgeId(pub Ulid);

impl KnowledgeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for KnowledgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for KnowledgeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PatternId(pub Ulid);

impl PatternId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PatternId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PatternId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stored question/answer record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnowledgeItem {
    pub id: KnowledgeId,
    pub question: String,
    pub answer: String,
    pub keywords: Vec<String>,
    pub category: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl KnowledgeItem {
    /// Validate a stored record, e.g. one read back from a snapshot.
    ///
    /// # Errors
    /// Returns [`ValidationError`] when question, answer, keywords, or category are unusable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_knowledge_fields(&self.question, &self.answer, &self.keywords, &self.category)?;
        if normalize_keywords(&self.keywords) != self.keywords {
            return Err(ValidationError(
                "keywords MUST be trimmed, lower-cased and free of duplicates".to_string(),
            ));
        }
        if self.category.trim().to_lowercase() != self.category {
            return Err(ValidationError("category MUST be trimmed and lower-cased".to_string()));
        }
        Ok(())
    }
}

/// Administrator input for a knowledge item; the store assigns identity and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewKnowledgeItem {
    pub question: String,
    pub answer: String,
    pub keywords: Vec<String>,
    pub category: String,
}

impl NewKnowledgeItem {
    /// Validate and normalize into a stored record.
    ///
    /// # Errors
    /// Returns [`ValidationError`] when question, answer, keywords, or category are unusable.
    pub fn into_item(
        self,
        id: KnowledgeId,
        now: OffsetDateTime,
    ) -> Result<KnowledgeItem, ValidationError> {
        let keywords = normalize_keywords(&self.keywords);
        let category = self.category.trim().to_lowercase();
        validate_knowledge_fields(&self.question, &self.answer, &keywords, &category)?;
        Ok(KnowledgeItem {
            id,
            question: self.question.trim().to_string(),
            answer: self.answer,
            keywords,
            category,
            created_at: now,
            updated_at: now,
        })
    }
}

fn validate_knowledge_fields(
    question: &str,
    answer: &str,
    keywords: &[String],
    category: &str,
) -> Result<(), ValidationError> {
    if question.trim().is_empty() {
        return Err(ValidationError("question MUST be non-empty".to_string()));
    }
    if text::NormalizedText::new(question).is_empty() {
        return Err(ValidationError(
            "question MUST contain at least one searchable term".to_string(),
        ));
    }
    if answer.trim().is_empty() {
        return Err(ValidationError("answer MUST be non-empty".to_string()));
    }
    if keywords.iter().all(|keyword| keyword.trim().is_empty()) {
        return Err(ValidationError("keywords MUST contain at least one entry".to_string()));
    }
    if category.trim().is_empty() {
        return Err(ValidationError("category MUST be non-empty".to_string()));
    }
    Ok(())
}

/// Trim, lower-case and deduplicate keywords, keeping first-occurrence order.
#[must_use]
pub fn normalize_keywords(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut keywords = Vec::new();
    for keyword in raw {
        let normalized = keyword.trim().to_lowercase();
        if normalized.is_empty() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            keywords.push(normalized);
        }
    }
    keywords
}

/// A phrase that maps matching input to a topic label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextPattern {
    pub id: PatternId,
    pub pattern: String,
    pub context: String,
    pub description: String,
    pub priority: u32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

fn default_active() -> bool {
    true
}

impl ContextPattern {
    /// Build a new active pattern.
    ///
    /// # Errors
    /// Returns [`ValidationError`] when the pattern or context is blank.
    pub fn new(
        pattern: &str,
        context: &str,
        description: &str,
        priority: u32,
        now: OffsetDateTime,
    ) -> Result<Self, ValidationError> {
        let pattern = Self {
            id: PatternId::new(),
            pattern: pattern.trim().to_string(),
            context: context.trim().to_lowercase(),
            description: description.trim().to_string(),
            priority,
            active: true,
            created_at: now,
            updated_at: now,
        };
        pattern.validate()?;
        Ok(pattern)
    }

    /// # Errors
    /// Returns [`ValidationError`] when the pattern or context is blank.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pattern.trim().is_empty() {
            return Err(ValidationError("pattern MUST be non-empty".to_string()));
        }
        if self.context.trim().is_empty() {
            return Err(ValidationError("context MUST be non-empty".to_string()));
        }
        Ok(())
    }

    /// Key used for `(context, pattern)` uniqueness.
    #[must_use]
    pub fn unique_key(&self) -> (String, String) {
        (self.context.trim().to_lowercase(), text::pattern_key(&self.pattern))
    }
}
