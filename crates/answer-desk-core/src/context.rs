use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::text::{compact_lower, spaced_lower};
use crate::{ContextPattern, PatternId};

/// The pattern that decided the context hint for one input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextMatch {
    pub context: String,
    pub pattern_id: PatternId,
    pub pattern: String,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy)]
struct PatternCandidate<'a> {
    pattern: &'a ContextPattern,
    length: usize,
    ordinal: usize,
}

impl PatternCandidate<'_> {
    fn cmp(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.pattern
            .priority
            .cmp(&lhs.pattern.priority)
            .then_with(|| rhs.length.cmp(&lhs.length))
            .then_with(|| lhs.ordinal.cmp(&rhs.ordinal))
    }
}

/// Pick the context hint for `text` from `patterns`, given in store insertion order.
///
/// A pattern matches when its case-folded phrase occurs in the case-folded input, either
/// as-is or with all whitespace removed on both sides. Inactive patterns are ignored. The
/// winner has the highest priority, then the longest phrase, then the earliest insertion.
#[must_use]
pub fn resolve_context(text: &str, patterns: &[ContextPattern]) -> Option<ContextMatch> {
    let spaced = spaced_lower(text);
    let compact = compact_lower(text);
    if compact.is_empty() {
        return None;
    }

    patterns
        .iter()
        .enumerate()
        .filter(|(_, pattern)| pattern.active)
        .filter_map(|(ordinal, pattern)| {
            let phrase = spaced_lower(&pattern.pattern);
            let phrase_compact = compact_lower(&pattern.pattern);
            if phrase_compact.is_empty() {
                return None;
            }
            let matched = spaced.contains(&phrase) || compact.contains(&phrase_compact);
            matched.then(|| PatternCandidate {
                pattern,
                length: phrase_compact.chars().count(),
                ordinal,
            })
        })
        .min_by(PatternCandidate::cmp)
        .map(|candidate| ContextMatch {
            context: candidate.pattern.context.clone(),
            pattern_id: candidate.pattern.id,
            pattern: candidate.pattern.pattern.clone(),
            priority: candidate.pattern.priority,
        })
}
