//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use time::{Duration, OffsetDateTime};

use crate::{
    seed, ContextPattern, KnowledgeField, KnowledgeId, KnowledgeItem, KnowledgeStore,
    MemoryStore, NewKnowledgeItem, PatternId, PatternStore, StoreError,
};

pub(crate) fn fixture_time() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
}

pub(crate) fn seeded_memory_store() -> MemoryStore {
    let store = MemoryStore::new();
    for item in seed::default_knowledge_items() {
        if let Err(err) = store.insert(item) {
            panic!("seed item rejected: {err}");
        }
    }
    store
}

pub(crate) fn seed_patterns(store: &dyn PatternStore) {
    for pattern in seed::default_context_patterns() {
        let description = seed::describe(&pattern);
        if let Err(err) =
            store.insert_pattern(pattern.pattern, pattern.context, &description, pattern.priority)
        {
            panic!("seed pattern rejected: {err}");
        }
    }
}

pub(crate) fn kiosk_error_item() -> NewKnowledgeItem {
    NewKnowledgeItem {
        question: "키오스크 오류 코드 안내".to_string(),
        answer: "키오스크 화면에 표시된 오류 코드를 확인한 뒤 전원을 재시작해 주세요.".to_string(),
        keywords: vec!["키오스크".to_string(), "오류".to_string(), "코드".to_string()],
        category: "technical".to_string(),
    }
}

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub(crate) fn seeded_permutation<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut out = items.to_vec();
    let mut state = seed;
    for idx in (1..out.len()).rev() {
        let Ok(bound) = u64::try_from(idx + 1) else {
            break;
        };
        let Ok(swap_idx) = usize::try_from(splitmix64(&mut state) % bound) else {
            continue;
        };
        out.swap(idx, swap_idx);
    }
    out
}

/// Wraps a [`MemoryStore`] and counts every read.
#[derive(Debug, Default)]
pub(crate) struct CountingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
}

impl CountingStore {
    pub(crate) fn new(inner: MemoryStore) -> Self {
        Self { inner, reads: AtomicUsize::new(0) }
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

impl KnowledgeStore for CountingStore {
    fn find_by_substring(
        &self,
        field: KnowledgeField,
        pattern: &str,
    ) -> Result<Vec<KnowledgeItem>, StoreError> {
        self.touch();
        self.inner.find_by_substring(field, pattern)
    }

    fn find_all(&self, category: Option<&str>) -> Result<Vec<KnowledgeItem>, StoreError> {
        self.touch();
        self.inner.find_all(category)
    }

    fn get(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>, StoreError> {
        self.touch();
        self.inner.get(id)
    }

    fn insert(&self, item: NewKnowledgeItem) -> Result<KnowledgeItem, StoreError> {
        self.inner.insert(item)
    }

    fn delete_by_id(&self, id: KnowledgeId) -> Result<bool, StoreError> {
        self.inner.delete_by_id(id)
    }
}

impl PatternStore for CountingStore {
    fn list_patterns(&self) -> Result<Vec<ContextPattern>, StoreError> {
        self.touch();
        self.inner.list_patterns()
    }

    fn insert_pattern(
        &self,
        pattern: &str,
        context: &str,
        description: &str,
        priority: u32,
    ) -> Result<ContextPattern, StoreError> {
        self.inner.insert_pattern(pattern, context, description, priority)
    }

    fn delete_pattern(&self, id: PatternId) -> Result<bool, StoreError> {
        self.inner.delete_pattern(id)
    }

    fn set_pattern_active(&self, id: PatternId, active: bool) -> Result<bool, StoreError> {
        self.inner.set_pattern_active(id, active)
    }
}

/// Store whose every call fails as if the database were locked.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct UnavailableStore;

fn unavailable<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("database is locked".to_string()))
}

impl KnowledgeStore for UnavailableStore {
    fn find_by_substring(
        &self,
        _field: KnowledgeField,
        _pattern: &str,
    ) -> Result<Vec<KnowledgeItem>, StoreError> {
        unavailable()
    }

    fn find_all(&self, _category: Option<&str>) -> Result<Vec<KnowledgeItem>, StoreError> {
        unavailable()
    }

    fn get(&self, _id: KnowledgeId) -> Result<Option<KnowledgeItem>, StoreError> {
        unavailable()
    }

    fn insert(&self, _item: NewKnowledgeItem) -> Result<KnowledgeItem, StoreError> {
        unavailable()
    }

    fn delete_by_id(&self, _id: KnowledgeId) -> Result<bool, StoreError> {
        unavailable()
    }
}

impl PatternStore for UnavailableStore {
    fn list_patterns(&self) -> Result<Vec<ContextPattern>, StoreError> {
        unavailable()
    }

    fn insert_pattern(
        &self,
        _pattern: &str,
        _context: &str,
        _description: &str,
        _priority: u32,
    ) -> Result<ContextPattern, StoreError> {
        unavailable()
    }

    fn delete_pattern(&self, _id: PatternId) -> Result<bool, StoreError> {
        unavailable()
    }

    fn set_pattern_active(&self, _id: PatternId, _active: bool) -> Result<bool, StoreError> {
        unavailable()
    }
}
