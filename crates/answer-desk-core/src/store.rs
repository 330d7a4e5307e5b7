use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    ContextPattern, KnowledgeId, KnowledgeItem, NewKnowledgeItem, PatternId, StoreError,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeField {
    Question,
    Answer,
    Keywords,
    Category,
}

impl KnowledgeField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Answer => "answer",
            Self::Keywords => "keywords",
            Self::Category => "category",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "question" => Some(Self::Question),
            "answer" => Some(Self::Answer),
            "keywords" => Some(Self::Keywords),
            "category" => Some(Self::Category),
            _ => None,
        }
    }

    /// Case-insensitive substring test of `needle` (already lower-cased) against `item`.
    #[must_use]
    pub fn matches(self, item: &KnowledgeItem, needle: &str) -> bool {
        match self {
            Self::Question => item.question.to_lowercase().contains(needle),
            Self::Answer => item.answer.to_lowercase().contains(needle),
            Self::Keywords => item.keywords.iter().any(|keyword| keyword.contains(needle)),
            Self::Category => item.category.contains(needle),
        }
    }
}

/// Keyed store of knowledge items.
///
/// Implementations iterate in insertion order and make each record visible atomically:
/// concurrent readers see a record either fully written or not at all.
pub trait KnowledgeStore: Send + Sync {
    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be read.
    fn find_by_substring(
        &self,
        field: KnowledgeField,
        pattern: &str,
    ) -> Result<Vec<KnowledgeItem>, StoreError>;

    /// All items, or those whose category equals `category`, in insertion order.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be read.
    fn find_all(&self, category: Option<&str>) -> Result<Vec<KnowledgeItem>, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be read.
    fn get(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>, StoreError>;

    /// Validate and store a new item, assigning its identity.
    ///
    /// # Errors
    /// Returns [`StoreError::Validation`] for invalid input and other variants for backend
    /// failures.
    fn insert(&self, item: NewKnowledgeItem) -> Result<KnowledgeItem, StoreError>;

    /// Returns whether a record was removed.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be written.
    fn delete_by_id(&self, id: KnowledgeId) -> Result<bool, StoreError>;
}

/// Store of context patterns, listed in insertion order.
pub trait PatternStore: Send + Sync {
    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be read.
    fn list_patterns(&self) -> Result<Vec<ContextPattern>, StoreError>;

    /// # Errors
    /// Returns [`StoreError::Conflict`] when `(context, pattern)` already exists and
    /// [`StoreError::Validation`] for blank input.
    fn insert_pattern(
        &self,
        pattern: &str,
        context: &str,
        description: &str,
        priority: u32,
    ) -> Result<ContextPattern, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be written.
    fn delete_pattern(&self, id: PatternId) -> Result<bool, StoreError>;

    /// Enable or disable a pattern without deleting it. Returns whether it exists.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backend cannot be written.
    fn set_pattern_active(&self, id: PatternId, active: bool) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    items: Vec<KnowledgeItem>,
    patterns: Vec<ContextPattern>,
}

/// In-process store backing both traits, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KnowledgeStore for MemoryStore {
    fn find_by_substring(
        &self,
        field: KnowledgeField,
        pattern: &str,
    ) -> Result<Vec<KnowledgeItem>, StoreError> {
        let needle = pattern.trim().to_lowercase();
        let state = self.state.read();
        Ok(state.items.iter().filter(|item| field.matches(item, &needle)).cloned().collect())
    }

    fn find_all(&self, category: Option<&str>) -> Result<Vec<KnowledgeItem>, StoreError> {
        let category = category.map(|value| value.trim().to_lowercase());
        let state = self.state.read();
        Ok(state
            .items
            .iter()
            .filter(|item| match &category {
                Some(wanted) => &item.category == wanted,
                None => true,
            })
            .cloned()
            .collect())
    }

    fn get(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>, StoreError> {
        Ok(self.state.read().items.iter().find(|item| item.id == id).cloned())
    }

    fn insert(&self, item: NewKnowledgeItem) -> Result<KnowledgeItem, StoreError> {
        let item = item.into_item(KnowledgeId::new(), OffsetDateTime::now_utc())?;
        self.state.write().items.push(item.clone());
        Ok(item)
    }

    fn delete_by_id(&self, id: KnowledgeId) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        let before = state.items.len();
        state.items.retain(|item| item.id != id);
        Ok(state.items.len() != before)
    }
}

impl PatternStore for MemoryStore {
    fn list_patterns(&self) -> Result<Vec<ContextPattern>, StoreError> {
        Ok(self.state.read().patterns.clone())
    }

    fn insert_pattern(
        &self,
        pattern: &str,
        context: &str,
        description: &str,
        priority: u32,
    ) -> Result<ContextPattern, StoreError> {
        let now = OffsetDateTime::now_utc();
        let created = ContextPattern::new(pattern, context, description, priority, now)?;
        let key = created.unique_key();
        let mut state = self.state.write();
        if state.patterns.iter().any(|existing| existing.unique_key() == key) {
            return Err(StoreError::Conflict(format!(
                "pattern `{}` already registered for context `{}`",
                created.pattern, created.context
            )));
        }
        state.patterns.push(created.clone());
        Ok(created)
    }

    fn delete_pattern(&self, id: PatternId) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        let before = state.patterns.len();
        state.patterns.retain(|pattern| pattern.id != id);
        Ok(state.patterns.len() != before)
    }

    fn set_pattern_active(&self, id: PatternId, active: bool) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        let Some(pattern) = state.patterns.iter_mut().find(|pattern| pattern.id == id) else {
            return Ok(false);
        };
        pattern.active = active;
        pattern.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }
}
