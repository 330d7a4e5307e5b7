use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::search::{
    clarification_prompt, BestAnswer, SearchDecision, SearchResult, SearchService,
};
use crate::text::compact_lower;
use crate::{
    detect_vague_input, format_answer, template_for, ContextMatch, EngineConfig, EngineError,
    InputClassification, InputClassifier, InputType, KnowledgeId, KnowledgeStore, PatternStore,
    VagueTopic,
};

const NEED_MORE_INPUT: &str = "문의하실 내용을 입력해 주세요.";
const TRANSIENT_FAILURE: &str =
    "일시적으로 답변을 불러오지 못했습니다. 잠시 후 다시 시도해 주세요.";
const NOT_FOUND: &str = "죄송합니다. 문의하신 내용에 대한 답변을 찾지 못했습니다. 전문 상담사분들께 전달해서 연락 드리도록 하겠습니다.\n상담사 연결을 원하시면 '상담사 연결'이라고 입력해 주세요.";

// Replies that confirm a single offered option.
const AFFIRMATIVE_REPLIES: [&str; 14] = [
    "네", "넵", "예", "응", "어", "맞아", "맞아요", "맞습니다", "그래요", "네맞아요", "yes", "y",
    "ok", "okay",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClarificationOption {
    pub item_id: KnowledgeId,
    pub question: String,
}

/// Candidates offered to one session, waiting for the user's pick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClarificationState {
    pub original_query: String,
    pub options: Vec<ClarificationOption>,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
}

impl ClarificationState {
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime, ttl_secs: i64) -> bool {
        now - self.issued_at >= Duration::seconds(ttl_secs)
    }

    /// Match a reply against the offered options: the question text, its number
    /// (`2`, `2번`), a phrase found in exactly one option, or a yes when only one
    /// option was offered.
    #[must_use]
    pub fn select(&self, reply: &str) -> Option<&ClarificationOption> {
        let reply = reply.trim();
        let compact = compact_lower(reply);
        if compact.is_empty() {
            return None;
        }

        if let Some(option) = self
            .options
            .iter()
            .find(|option| option.question == reply || compact_lower(&option.question) == compact)
        {
            return Some(option);
        }

        let number = compact.trim_end_matches(|ch| ch == '번' || ch == '.');
        if let Ok(number) = number.parse::<usize>() {
            return number.checked_sub(1).and_then(|index| self.options.get(index));
        }

        if self.options.len() == 1 {
            let answer = compact.trim_end_matches(|ch: char| !ch.is_alphanumeric());
            if AFFIRMATIVE_REPLIES.contains(&answer) {
                return self.options.first();
            }
        }

        if compact.chars().count() < 2 {
            return None;
        }
        let mut hits = self.options.iter().filter(|option| {
            let question = compact_lower(&option.question);
            question.contains(&compact) || compact.contains(&question)
        });
        match (hits.next(), hits.next()) {
            (Some(option), None) => Some(option),
            _ => None,
        }
    }
}

/// Result of one conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered {
        item_id: KnowledgeId,
        question: String,
        answer: String,
        via_clarification: bool,
    },
    Clarification {
        prompt: String,
        options: Vec<ClarificationOption>,
    },
    NotFound {
        message: String,
    },
    Canned {
        input_type: InputType,
        message: String,
    },
    NeedMoreInput {
        message: String,
    },
    /// The request names no subject; `examples` suggest how to narrow it.
    NeedsDetail {
        topic: VagueTopic,
        message: String,
        examples: Vec<String>,
    },
    /// A store could not be reached; the same turn may be retried.
    TransientFailure {
        message: String,
    },
}

impl TurnOutcome {
    /// Text to show the user for this turn.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Answered { answer, .. } => answer,
            Self::Clarification { prompt, .. } => prompt,
            Self::NotFound { message }
            | Self::Canned { message, .. }
            | Self::NeedMoreInput { message }
            | Self::NeedsDetail { message, .. }
            | Self::TransientFailure { message } => message,
        }
    }
}

/// Conversation-level entry point over the classifier, context matcher and search.
///
/// Shared by handle across request handlers; clarification state is kept per session.
pub struct AnswerEngine {
    knowledge: Arc<dyn KnowledgeStore>,
    patterns: Arc<dyn PatternStore>,
    classifier: InputClassifier,
    search: SearchService,
    config: EngineConfig,
    pending: Mutex<HashMap<String, ClarificationState>>,
}

impl AnswerEngine {
    /// # Errors
    /// Returns [`EngineError::Config`] when `config` fails validation.
    pub fn new(
        knowledge: Arc<dyn KnowledgeStore>,
        patterns: Arc<dyn PatternStore>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            search: SearchService::new(Arc::clone(&knowledge), config.clone()),
            knowledge,
            patterns,
            classifier: InputClassifier::new(),
            config,
            pending: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn classify(&self, text: &str) -> InputClassification {
        self.classifier.classify(text)
    }

    /// Context label of the best matching registered pattern, if any.
    ///
    /// # Errors
    /// Propagates pattern store failures.
    pub fn resolve_context(&self, text: &str) -> Result<Option<String>, EngineError> {
        Ok(self.resolve_context_match(text)?.map(|found| found.context))
    }

    /// # Errors
    /// Propagates pattern store failures.
    pub fn resolve_context_match(&self, text: &str) -> Result<Option<ContextMatch>, EngineError> {
        let patterns = self.patterns.list_patterns().map_err(|err| {
            tracing::warn!(error = %err, "pattern store read failed");
            EngineError::from(err)
        })?;
        Ok(crate::resolve_context(text, &patterns))
    }

    /// # Errors
    /// Propagates knowledge store failures.
    pub fn search(
        &self,
        query: &str,
        context_hint: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchResult>, EngineError> {
        self.search.search(query, context_hint, limit)
    }

    /// Best answer for a standalone query, with the context hint applied and the answer
    /// formatted for display.
    ///
    /// # Errors
    /// Propagates store failures.
    pub fn get_best_answer(&self, query: &str) -> Result<BestAnswer, EngineError> {
        let hint = self.resolve_context(query)?;
        self.best_answer_with_context(query, hint.as_deref())
    }

    /// [`AnswerEngine::get_best_answer`] for a caller that already resolved the context.
    ///
    /// # Errors
    /// Propagates knowledge store failures.
    pub fn best_answer_with_context(
        &self,
        query: &str,
        context_hint: Option<&str>,
    ) -> Result<BestAnswer, EngineError> {
        Ok(match self.search.best_answer_with_hint(query, context_hint)? {
            BestAnswer::Answer { content } => {
                BestAnswer::Answer { content: format_answer(&content) }
            }
            other => other,
        })
    }

    /// Run one conversation turn.
    ///
    /// A store that cannot be reached yields [`TurnOutcome::TransientFailure`]. When that
    /// happens while reading a selected option, the clarification stays pending.
    ///
    /// # Errors
    /// Returns [`EngineError::Store`] and other variants for permanent store failures.
    /// Ambiguity and misses are outcomes, not errors.
    pub fn handle_turn(&self, session_id: &str, text: &str) -> Result<TurnOutcome, EngineError> {
        self.handle_turn_at(session_id, text, OffsetDateTime::now_utc())
    }

    /// [`AnswerEngine::handle_turn`] with an explicit clock, for replay and tests.
    ///
    /// # Errors
    /// See [`AnswerEngine::handle_turn`].
    pub fn handle_turn_at(
        &self,
        session_id: &str,
        text: &str,
        now: OffsetDateTime,
    ) -> Result<TurnOutcome, EngineError> {
        match self.run_turn(session_id, text, now) {
            Err(err) if err.is_transient() => {
                tracing::warn!(session_id, error = %err, "turn deferred: store unavailable");
                Ok(TurnOutcome::TransientFailure { message: TRANSIENT_FAILURE.to_string() })
            }
            result => result,
        }
    }

    fn run_turn(
        &self,
        session_id: &str,
        text: &str,
        now: OffsetDateTime,
    ) -> Result<TurnOutcome, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::NeedMoreInput { message: NEED_MORE_INPUT.to_string() });
        }

        let pending = {
            let mut pending = self.pending.lock();
            let purged = purge_locked(&mut pending, now, self.config.clarification_ttl_secs);
            if purged > 0 {
                tracing::debug!(purged, "dropped expired clarifications");
            }
            pending.remove(session_id)
        };
        if let Some(state) = pending {
            if let Some(outcome) = self.resolve_pending(session_id, state, text)? {
                return Ok(outcome);
            }
        }

        let classification = self.classifier.classify(text);
        if let Some(message) = template_for(classification.input_type, &self.config.persona_name)
        {
            tracing::info!(
                session_id,
                input_type = classification.input_type.as_str(),
                matched = ?classification.matched_words,
                "canned reply"
            );
            let message = match (classification.input_type, &self.config.handoff_contact) {
                (InputType::HandoffRequest, Some(contact)) => {
                    format!("{message}\n상담 전화: {contact}")
                }
                _ => message,
            };
            return Ok(TurnOutcome::Canned { input_type: classification.input_type, message });
        }

        if let Some(vague) = detect_vague_input(text) {
            tracing::info!(
                session_id,
                topic = vague.topic.as_str(),
                matched = ?vague.matched_words,
                "asked for more detail"
            );
            return Ok(TurnOutcome::NeedsDetail {
                topic: vague.topic,
                message: vague.topic.prompt(),
                examples: vague.topic.examples().iter().map(ToString::to_string).collect(),
            });
        }

        let context = self.resolve_context_match(text)?;
        let hint = context.as_ref().map(|found| found.context.as_str());
        let results = self.search.search(text, hint, self.search.search_limit())?;

        Ok(match self.search.decide(&results) {
            SearchDecision::Answer { result } => TurnOutcome::Answered {
                item_id: result.item_id,
                question: result.question,
                answer: format_answer(&result.content),
                via_clarification: false,
            },
            SearchDecision::Clarify { candidates } => {
                let options = candidates
                    .into_iter()
                    .map(|candidate| ClarificationOption {
                        item_id: candidate.item_id,
                        question: candidate.question,
                    })
                    .collect::<Vec<_>>();
                let questions =
                    options.iter().map(|option| option.question.clone()).collect::<Vec<_>>();
                tracing::info!(session_id, options = options.len(), "clarification issued");
                self.pending.lock().insert(
                    session_id.to_string(),
                    ClarificationState {
                        original_query: text.to_string(),
                        options: options.clone(),
                        issued_at: now,
                    },
                );
                TurnOutcome::Clarification { prompt: clarification_prompt(&questions), options }
            }
            SearchDecision::NoMatch => TurnOutcome::NotFound { message: self.not_found_message() },
        })
    }

    // `Ok(None)` means the reply is handled as a fresh query. Expired states are
    // purged before this runs.
    fn resolve_pending(
        &self,
        session_id: &str,
        state: ClarificationState,
        text: &str,
    ) -> Result<Option<TurnOutcome>, EngineError> {
        let Some(option) = state.select(text).cloned() else {
            tracing::info!(session_id, "clarification reply did not select an option");
            return Ok(None);
        };

        let item = match self.knowledge.get(option.item_id) {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(session_id, error = %err, "knowledge store read failed");
                self.pending.lock().insert(session_id.to_string(), state);
                return Err(err.into());
            }
        };
        let Some(item) = item else {
            tracing::warn!(session_id, item_id = %option.item_id, "selected item no longer exists");
            return Ok(None);
        };

        tracing::info!(session_id, item_id = %item.id, "clarification resolved");
        Ok(Some(TurnOutcome::Answered {
            item_id: item.id,
            question: item.question,
            answer: format_answer(&item.answer),
            via_clarification: true,
        }))
    }

    fn not_found_message(&self) -> String {
        match &self.config.handoff_contact {
            Some(contact) => format!("{NOT_FOUND}\n상담 전화: {contact}"),
            None => NOT_FOUND.to_string(),
        }
    }

    #[must_use]
    pub fn pending_clarification(&self, session_id: &str) -> Option<ClarificationState> {
        self.pending.lock().get(session_id).cloned()
    }

    /// Forget any pending clarification for the session. Returns whether one existed.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.pending.lock().remove(session_id).is_some()
    }

    /// Drop clarification states older than the configured TTL. Returns how many were removed.
    pub fn purge_expired(&self, now: OffsetDateTime) -> usize {
        purge_locked(&mut self.pending.lock(), now, self.config.clarification_ttl_secs)
    }

    /// Number of sessions waiting on a clarification reply.
    #[must_use]
    pub fn pending_sessions(&self) -> usize {
        self.pending.lock().len()
    }
}

fn purge_locked(
    pending: &mut HashMap<String, ClarificationState>,
    now: OffsetDateTime,
    ttl_secs: i64,
) -> usize {
    let before = pending.len();
    pending.retain(|_, state| !state.is_expired(now, ttl_secs));
    before - pending.len()
}
