//! Text normalization shared by the classifier, the context matcher and the scorer.

use std::collections::BTreeSet;

// Longest first so "에서" wins over "에".
const PARTICLES: [&str; 18] = [
    "에서", "으로", "에게", "까지", "부터", "이나", "을", "를", "은", "는", "이", "가", "의", "에",
    "로", "와", "과", "도",
];

const STOPWORDS: [&str; 34] = [
    "어떻게",
    "어떡해",
    "해요",
    "돼요",
    "있어요",
    "있나요",
    "하나요",
    "했어요",
    "안돼요",
    "해주세요",
    "주세요",
    "알려주세요",
    "알려줘",
    "알려",
    "문의",
    "문의드립니다",
    "문의합니다",
    "문의드려요",
    "궁금합니다",
    "궁금해요",
    "요청",
    "요청드립니다",
    "도움",
    "부탁드립니다",
    "그리고",
    "그런데",
    "그럼",
    "그래서",
    "혹시",
    "please",
    "how",
    "what",
    "the",
    "can",
];

/// Query or question text reduced to searchable tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NormalizedText {
    pub(crate) tokens: Vec<String>,
    pub(crate) compact: String,
}

impl NormalizedText {
    pub(crate) fn new(raw: &str) -> Self {
        let tokens = fold(raw)
            .split_whitespace()
            .filter_map(normalize_token)
            .collect::<Vec<_>>();
        let compact = tokens.concat();
        Self { tokens, compact }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Lower-case and turn every non-alphanumeric character into a space.
pub(crate) fn fold(raw: &str) -> String {
    raw.chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect()
}

fn normalize_token(token: &str) -> Option<String> {
    if is_stopword(token) {
        return None;
    }
    let stem = strip_particle(token);
    if is_stopword(stem) || stem.chars().count() < 2 {
        return None;
    }
    Some(stem.to_string())
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

pub(crate) fn strip_particle(token: &str) -> &str {
    for particle in PARTICLES {
        if let Some(stem) = token.strip_suffix(particle) {
            if stem.chars().count() >= 2 {
                return stem;
            }
        }
    }
    token
}

/// Lower-cased text with whitespace runs collapsed to one space.
pub(crate) fn spaced_lower(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lower-cased text with all whitespace removed.
pub(crate) fn compact_lower(raw: &str) -> String {
    raw.chars().filter(|ch| !ch.is_whitespace()).flat_map(char::to_lowercase).collect()
}

pub(crate) fn pattern_key(raw: &str) -> String {
    compact_lower(raw)
}

fn bigrams(value: &str) -> BTreeSet<(char, char)> {
    let chars = value.chars().collect::<Vec<_>>();
    chars.windows(2).map(|pair| (pair[0], pair[1])).collect()
}

/// Dice coefficient over character bigrams, in `[0, 1]`.
pub(crate) fn dice_similarity(lhs: &str, rhs: &str) -> f32 {
    let lhs = bigrams(lhs);
    let rhs = bigrams(rhs);
    if lhs.is_empty() || rhs.is_empty() {
        return 0.0;
    }
    let shared = lhs.intersection(&rhs).count();
    ratio(2 * shared, lhs.len() + rhs.len())
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn ratio(numerator: usize, denominator: usize) -> f32 {
    if denominator == 0 {
        return 0.0;
    }
    numerator as f32 / denominator as f32
}
