use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::text::{compact_lower, dice_similarity, fold, ratio, NormalizedText};
use crate::{EngineConfig, EngineError, KnowledgeId, KnowledgeItem, KnowledgeStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Keyword,
    Fuzzy,
    Category,
}

impl MatchType {
    /// Tie-break rank: exact > keyword > fuzzy > category.
    #[must_use]
    pub fn specificity(self) -> u8 {
        match self {
            Self::Exact => 4,
            Self::Keyword => 3,
            Self::Fuzzy => 2,
            Self::Category => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Keyword => "keyword",
            Self::Fuzzy => "fuzzy",
            Self::Category => "category",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(Self::Exact),
            "keyword" => Some(Self::Keyword),
            "fuzzy" => Some(Self::Fuzzy),
            "category" => Some(Self::Category),
            _ => None,
        }
    }
}

/// Raw per-family signals behind one score, each in `[0, 1]` before weighting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SubScores {
    pub exact: f32,
    pub keyword: f32,
    pub fuzzy: f32,
    pub category_boost: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub item_id: KnowledgeId,
    pub content: String,
    pub question: String,
    pub category: String,
    pub score: f32,
    pub match_type: MatchType,
    pub sub_scores: SubScores,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SearchDecision {
    Answer { result: SearchResult },
    Clarify { candidates: Vec<SearchResult> },
    NoMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BestAnswer {
    Answer { content: String },
    Clarify { prompt: String },
    NoAnswer,
}

#[derive(Debug, Clone)]
struct Candidate {
    result: SearchResult,
    ordinal: usize,
}

impl Candidate {
    fn cmp(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.result
            .score
            .total_cmp(&lhs.result.score)
            .then_with(|| {
                rhs.result.match_type.specificity().cmp(&lhs.result.match_type.specificity())
            })
            .then_with(|| lhs.ordinal.cmp(&rhs.ordinal))
    }
}

#[must_use]
pub fn default_tie_breakers() -> Vec<String> {
    vec![
        "score desc".to_string(),
        "match_type_specificity desc".to_string(),
        "insertion_order asc".to_string(),
    ]
}

struct Scored {
    score: f32,
    match_type: MatchType,
    sub_scores: SubScores,
}

fn exact_signal(query: &NormalizedText, question: &NormalizedText) -> f32 {
    if query.compact == question.compact {
        return 1.0;
    }
    let query_len = query.compact.chars().count();
    let question_len = question.compact.chars().count();
    if query_len < 2 || question_len < 2 {
        return 0.0;
    }
    if question.compact.contains(&query.compact) || query.compact.contains(&question.compact) {
        0.6 + 0.4 * ratio(query_len.min(question_len), query_len.max(question_len))
    } else {
        0.0
    }
}

fn keyword_signal(query: &NormalizedText, keywords: &[String]) -> f32 {
    let keywords = keywords
        .iter()
        .map(|keyword| compact_lower(&fold(keyword)))
        .filter(|keyword| !keyword.is_empty())
        .collect::<Vec<_>>();
    let matched = query
        .tokens
        .iter()
        .filter(|token| {
            keywords.iter().any(|keyword| {
                keyword == *token
                    || keyword.contains(token.as_str())
                    || (keyword.chars().count() >= 2 && token.contains(keyword.as_str()))
            })
        })
        .count();
    ratio(matched, query.tokens.len())
}

fn score_item(
    query: &NormalizedText,
    item: &KnowledgeItem,
    context_hint: Option<&str>,
    config: &EngineConfig,
) -> Scored {
    let question = NormalizedText::new(&item.question);
    let mut sub_scores = SubScores {
        exact: exact_signal(query, &question),
        keyword: keyword_signal(query, &item.keywords),
        fuzzy: dice_similarity(&query.compact, &question.compact),
        category_boost: 0.0,
    };

    let total = config.weight_total();
    let exact_part = config.exact_weight * sub_scores.exact / total;
    let keyword_part = config.keyword_weight * sub_scores.keyword / total;
    let fuzzy_part = config.fuzzy_weight * sub_scores.fuzzy / total;

    let full_match = sub_scores.exact >= 1.0;
    let mut score = base_score(&sub_scores, config);

    let mut match_type = MatchType::Exact;
    let mut dominant = exact_part;
    if !full_match {
        if keyword_part > dominant {
            match_type = MatchType::Keyword;
            dominant = keyword_part;
        }
        if fuzzy_part > dominant {
            match_type = MatchType::Fuzzy;
            dominant = fuzzy_part;
        }
    }

    let hinted = context_hint
        .map(|hint| hint.trim().to_lowercase())
        .is_some_and(|hint| !hint.is_empty() && hint == item.category.trim().to_lowercase());
    if hinted && score > 0.0 && config.category_boost > 0.0 {
        sub_scores.category_boost = config.category_boost;
        score = (score + config.category_boost).min(1.0);
        if !full_match && config.category_boost > dominant {
            match_type = MatchType::Category;
        }
    }

    Scored { score, match_type, sub_scores }
}

/// Weighted score before any context boost; a full question match is always 1.0.
fn base_score(sub_scores: &SubScores, config: &EngineConfig) -> f32 {
    if sub_scores.exact >= 1.0 {
        return 1.0;
    }
    let weighted = config.exact_weight * sub_scores.exact
        + config.keyword_weight * sub_scores.keyword
        + config.fuzzy_weight * sub_scores.fuzzy;
    (weighted / config.weight_total()).clamp(0.0, 1.0)
}

// Boost added without the 1.0 cap, so a boost shared by two candidates keeps their gap.
fn tie_score(result: &SearchResult, config: &EngineConfig) -> f32 {
    base_score(&result.sub_scores, config) + result.sub_scores.category_boost
}

fn rank(mut candidates: Vec<Candidate>, limit: usize) -> Vec<SearchResult> {
    candidates.sort_by(Candidate::cmp);
    candidates.truncate(limit);
    candidates.into_iter().map(|candidate| candidate.result).collect()
}

/// Choose between answering, asking for clarification, and reporting no match.
///
/// `results` must already be ranked, as returned by [`SearchService::search`]. A query
/// equal to exactly one stored question is answered outright. Near-ties are measured on
/// the uncapped boosted score, so a context hint shared by every candidate cannot pull a
/// runner-up into the `tie_delta` window.
#[must_use]
pub fn decide(results: &[SearchResult], config: &EngineConfig) -> SearchDecision {
    let Some(top) = results.first() else {
        return SearchDecision::NoMatch;
    };
    if top.score < config.min_relevance {
        return SearchDecision::NoMatch;
    }

    let mut full_matches = results.iter().filter(|result| result.sub_scores.exact >= 1.0);
    if let (Some(full), None) = (full_matches.next(), full_matches.next()) {
        return SearchDecision::Answer { result: full.clone() };
    }

    let limit = config.max_clarification_options;
    if top.score < config.confidence_threshold {
        let candidates = results
            .iter()
            .filter(|result| result.score >= config.min_relevance)
            .take(limit)
            .cloned()
            .collect();
        return SearchDecision::Clarify { candidates };
    }

    let best = results
        .iter()
        .map(|result| tie_score(result, config))
        .fold(f32::NEG_INFINITY, f32::max);
    let mut near_ties = results
        .iter()
        .filter(|result| result.score >= config.min_relevance)
        .filter(|result| best - tie_score(result, config) <= config.tie_delta)
        .take(limit)
        .cloned()
        .collect::<Vec<_>>();
    if near_ties.len() >= 2 {
        return SearchDecision::Clarify { candidates: near_ties };
    }

    match near_ties.pop() {
        Some(result) => SearchDecision::Answer { result },
        None => SearchDecision::Answer { result: top.clone() },
    }
}

/// User-facing prompt listing candidate questions as a numbered list.
#[must_use]
pub fn clarification_prompt(questions: &[String]) -> String {
    let heading = if questions.len() == 1 {
        "혹시 아래 내용을 찾으시나요?"
    } else {
        "문의하신 내용과 관련된 항목이 여러 개 있습니다. 어떤 내용을 찾으시나요?"
    };
    let options = questions
        .iter()
        .enumerate()
        .map(|(index, question)| format!("{}. {question}", index + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{heading}\n\n{options}\n\n번호 또는 질문을 그대로 입력해 주세요.")
}

/// Scores knowledge items against a query and applies the clarification policy.
#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn KnowledgeStore>,
    config: EngineConfig,
}

impl SearchService {
    #[must_use]
    pub fn new(store: Arc<dyn KnowledgeStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Rank knowledge items for `query`, best first.
    ///
    /// Only items with a positive score are returned. A query with no searchable terms
    /// returns an empty list without reading the store.
    ///
    /// # Errors
    /// Returns [`EngineError::StoreUnavailable`] when the store cannot be reached, and
    /// [`EngineError::Store`] for other store failures.
    pub fn search(
        &self,
        query: &str,
        context_hint: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, EngineError> {
        let normalized = NormalizedText::new(query);
        if normalized.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let items = self.store.find_all(None).map_err(|err| {
            tracing::warn!(error = %err, "knowledge store read failed");
            EngineError::from(err)
        })?;

        let candidates = items
            .into_iter()
            .enumerate()
            .filter_map(|(ordinal, item)| {
                let scored = score_item(&normalized, &item, context_hint, &self.config);
                (scored.score > 0.0).then(|| Candidate {
                    result: SearchResult {
                        item_id: item.id,
                        content: item.answer,
                        question: item.question,
                        category: item.category,
                        score: scored.score,
                        match_type: scored.match_type,
                        sub_scores: scored.sub_scores,
                    },
                    ordinal,
                })
            })
            .collect::<Vec<_>>();

        let results = rank(candidates, limit);
        tracing::debug!(
            query,
            context_hint,
            results = results.len(),
            top_score = results.first().map(|result| result.score),
            "ranked knowledge items"
        );
        Ok(results)
    }

    #[must_use]
    pub fn decide(&self, results: &[SearchResult]) -> SearchDecision {
        decide(results, &self.config)
    }

    /// Top answer content when confident, a clarification prompt when ambiguous, or
    /// [`BestAnswer::NoAnswer`] when nothing clears the relevance floor.
    ///
    /// # Errors
    /// Propagates store failures from [`SearchService::search`].
    pub fn get_best_answer(&self, query: &str) -> Result<BestAnswer, EngineError> {
        self.best_answer_with_hint(query, None)
    }

    /// [`SearchService::get_best_answer`] with a context hint applied to ranking.
    ///
    /// # Errors
    /// Propagates store failures from [`SearchService::search`].
    pub fn best_answer_with_hint(
        &self,
        query: &str,
        context_hint: Option<&str>,
    ) -> Result<BestAnswer, EngineError> {
        let results = self.search(query, context_hint, self.search_limit())?;
        Ok(match self.decide(&results) {
            SearchDecision::Answer { result } => BestAnswer::Answer { content: result.content },
            SearchDecision::Clarify { candidates } => {
                let questions =
                    candidates.into_iter().map(|candidate| candidate.question).collect::<Vec<_>>();
                BestAnswer::Clarify { prompt: clarification_prompt(&questions) }
            }
            SearchDecision::NoMatch => BestAnswer::NoAnswer,
        })
    }

    pub(crate) fn search_limit(&self) -> usize {
        self.config.default_limit.max(self.config.max_clarification_options)
    }
}
