use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use answer_desk_core::{
    format_answer, AnswerEngine, BestAnswer, ContextMatch, ContextPattern, EngineConfig,
    InputClassification, KnowledgeField, KnowledgeId, KnowledgeItem, NewKnowledgeItem,
    PatternId, SearchResult, TurnOutcome,
};
use answer_desk_store_sqlite::{
    ExportManifest, ImportSummary, IntegrityReport, SchemaStatus, SeedSummary, SqliteStore,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub const API_CONTRACT_VERSION: &str = "answer-desk.api.v1";

const DEFAULT_PATTERN_PRIORITY: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindKnowledgeRequest {
    pub field: KnowledgeField,
    pub needle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddPatternRequest {
    pub pattern: String,
    pub context: String,
    pub description: Option<String>,
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    /// Explicit context hint; when absent the registered patterns decide it.
    pub context: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub query: String,
    pub context: Option<String>,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AskResponse {
    pub query: String,
    pub context: Option<String>,
    pub answer: BestAnswer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextResponse {
    pub text: String,
    pub context_match: Option<ContextMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatResponse {
    pub raw: String,
    pub formatted: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TurnRequest {
    pub session_id: String,
    pub text: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnResponse {
    pub session_id: String,
    pub outcome: TurnOutcome,
}

/// Load engine tunables from an optional YAML file; absent fields keep their defaults.
///
/// # Errors
/// Returns an error when the file cannot be read, does not parse, or fails validation.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = if raw.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str::<EngineConfig>(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?
    };
    config.validate().with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}

/// # Errors
/// Returns an error when `raw` is not a ULID.
pub fn parse_knowledge_id(raw: &str) -> Result<KnowledgeId> {
    Ulid::from_string(raw.trim())
        .map(KnowledgeId)
        .with_context(|| format!("invalid knowledge item id: {raw}"))
}

/// # Errors
/// Returns an error when `raw` is not a ULID.
pub fn parse_pattern_id(raw: &str) -> Result<PatternId> {
    Ulid::from_string(raw.trim())
        .map(PatternId)
        .with_context(|| format!("invalid context pattern id: {raw}"))
}

/// Facade over one `SQLite` database and the engine wired to it.
///
/// Clarification state lives in the engine, so one instance should serve a whole
/// conversation.
pub struct AnswerDeskApi {
    store: Arc<SqliteStore>,
    engine: AnswerEngine,
}

impl AnswerDeskApi {
    /// Open the database and wire the engine. Migrations run lazily on first use.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or `config` is invalid.
    pub fn open(db_path: &Path, config: EngineConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(db_path)?);
        let engine = AnswerEngine::new(store.clone(), store.clone(), config)?;
        Ok(Self { store, engine })
    }

    #[must_use]
    pub fn engine(&self) -> &AnswerEngine {
        &self.engine
    }

    fn ready(&self) -> Result<&SqliteStore> {
        self.store.migrate()?;
        Ok(&self.store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let before = self.store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        self.store.migrate()?;
        let after = self.store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: before.pending_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when seeding fails.
    pub fn seed_defaults(&self) -> Result<SeedSummary> {
        self.ready()?.seed_defaults()
    }

    /// # Errors
    /// Returns an error when the export cannot be written.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        self.ready()?.export_snapshot(out_dir)
    }

    /// # Errors
    /// Returns an error when the snapshot is rejected or cannot be written.
    pub fn import_snapshot(&self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        self.store.import_snapshot(in_dir, skip_existing)
    }

    /// # Errors
    /// Returns an error when the backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        self.store.backup_database(out_file)
    }

    /// # Errors
    /// Returns an error when the restore or the follow-up migration fails.
    pub fn restore_database(&self, in_file: &Path) -> Result<()> {
        self.store.restore_database(in_file)
    }

    /// # Errors
    /// Returns an error when an integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.store.integrity_check()
    }

    /// Add one knowledge item.
    ///
    /// # Errors
    /// Returns an error when validation or persistence fails.
    pub fn kb_add(&self, input: NewKnowledgeItem) -> Result<KnowledgeItem> {
        let item = self.ready()?.insert_item(input)?;
        tracing::info!(item_id = %item.id, category = %item.category, "added knowledge item");
        Ok(item)
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn kb_list(&self, category: Option<&str>) -> Result<Vec<KnowledgeItem>> {
        self.ready()?.list_items(category)
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn kb_find(&self, input: &FindKnowledgeRequest) -> Result<Vec<KnowledgeItem>> {
        self.ready()?.find_items(input.field, &input.needle)
    }

    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn kb_get(&self, id: KnowledgeId) -> Result<KnowledgeItem> {
        self.ready()?.get_item(id)?.ok_or_else(|| anyhow!("knowledge item not found: {id}"))
    }

    /// Returns whether an item was removed.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn kb_delete(&self, id: KnowledgeId) -> Result<bool> {
        self.ready()?.delete_item(id)
    }

    /// Register a context pattern; description defaults to "<pattern> 관련 질문".
    ///
    /// # Errors
    /// Returns an error when the pattern is blank, already registered, or cannot be stored.
    pub fn pattern_add(&self, input: AddPatternRequest) -> Result<ContextPattern> {
        let description = match input.description {
            Some(description) if !description.trim().is_empty() => description,
            _ => format!("{} 관련 질문", input.pattern.trim()),
        };
        let pattern = self.ready()?.add_pattern(
            &input.pattern,
            &input.context,
            &description,
            input.priority.unwrap_or(DEFAULT_PATTERN_PRIORITY),
        )?;
        tracing::info!(
            pattern_id = %pattern.id,
            context = %pattern.context,
            "added context pattern"
        );
        Ok(pattern)
    }

    /// Patterns in registration order, optionally limited to one context label.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn pattern_list(&self, context: Option<&str>) -> Result<Vec<ContextPattern>> {
        let patterns = self.ready()?.list_context_patterns()?;
        let Some(context) = context.map(|value| value.trim().to_lowercase()) else {
            return Ok(patterns);
        };
        Ok(patterns.into_iter().filter(|pattern| pattern.context == context).collect())
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn pattern_delete(&self, id: PatternId) -> Result<bool> {
        self.ready()?.remove_pattern(id)
    }

    /// # Errors
    /// Returns an error when the update fails.
    pub fn pattern_set_active(&self, id: PatternId, active: bool) -> Result<bool> {
        self.ready()?.update_pattern_active(id, active)
    }

    #[must_use]
    pub fn classify(&self, text: &str) -> InputClassification {
        self.engine.classify(text)
    }

    /// # Errors
    /// Returns an error when the pattern store cannot be read.
    pub fn context(&self, text: &str) -> Result<ContextResponse> {
        self.ready()?;
        Ok(ContextResponse {
            text: text.to_string(),
            context_match: self.engine.resolve_context_match(text)?,
        })
    }

    /// Ranked candidates for `query`.
    ///
    /// # Errors
    /// Returns an error when a store cannot be read.
    pub fn search(&self, input: &SearchRequest) -> Result<SearchResponse> {
        self.ready()?;
        let context = match &input.context {
            Some(context) => Some(context.trim().to_lowercase()),
            None => self.engine.resolve_context(&input.query)?,
        };
        let limit = input.limit.unwrap_or(self.engine.config().default_limit);
        let results = self.engine.search(&input.query, context.as_deref(), limit)?;
        Ok(SearchResponse { query: input.query.clone(), context, results })
    }

    /// Single-shot answer for `query` without conversation state.
    ///
    /// # Errors
    /// Returns an error when a store cannot be read.
    pub fn ask(&self, query: &str) -> Result<AskResponse> {
        self.ready()?;
        let context = self.engine.resolve_context(query)?;
        let answer = self.engine.best_answer_with_context(query, context.as_deref())?;
        Ok(AskResponse { query: query.to_string(), context, answer })
    }

    #[must_use]
    pub fn format(&self, raw: &str) -> FormatResponse {
        FormatResponse { raw: raw.to_string(), formatted: format_answer(raw) }
    }

    /// Run one conversation turn.
    ///
    /// A store that is temporarily unreachable is reported as
    /// [`TurnOutcome::TransientFailure`], so a chat front end can keep the session alive.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be prepared or a store fails permanently.
    pub fn handle_turn(&self, input: &TurnRequest) -> Result<TurnResponse> {
        self.ready()?;
        let outcome = match input.at {
            Some(at) => self.engine.handle_turn_at(&input.session_id, &input.text, at)?,
            None => self.engine.handle_turn(&input.session_id, &input.text)?,
        };
        Ok(TurnResponse { session_id: input.session_id.clone(), outcome })
    }

    /// Forget any pending clarification for `session_id`.
    #[must_use]
    pub fn end_session(&self, session_id: &str) -> bool {
        self.engine.clear_session(session_id)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn unique_temp_path(extension: &str) -> PathBuf {
        std::env::temp_dir().join(format!("answerdesk-api-{}.{extension}", Ulid::new()))
    }

    fn remove_db_files(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn turn(session_id: &str, text: &str) -> TurnRequest {
        TurnRequest { session_id: session_id.to_string(), text: text.to_string(), at: None }
    }

    // Test IDs: TAPI-001
    #[test]
    fn api_migrate_dry_run_then_apply() -> Result<()> {
        let db_path = unique_temp_path("sqlite3");
        let api = AnswerDeskApi::open(&db_path, EngineConfig::default())?;

        let planned = api.migrate(true)?;
        assert!(planned.dry_run);
        assert_eq!(planned.would_apply_versions, vec![1, 2]);
        assert_eq!(api.schema_status()?.current_version, 0);

        let applied = api.migrate(false)?;
        assert_eq!(applied.after_version, Some(2));
        assert_eq!(applied.up_to_date, Some(true));

        drop(api);
        remove_db_files(&db_path)
    }

    // Test IDs: TAPI-002
    #[test]
    fn api_clarifies_then_answers_selected_option() -> Result<()> {
        let db_path = unique_temp_path("sqlite3");
        let api = AnswerDeskApi::open(&db_path, EngineConfig::default())?;
        api.seed_defaults()?;
        api.kb_add(NewKnowledgeItem {
            question: "키오스크 오류 코드 안내".to_string(),
            answer: "키오스크 화면에 표시된 오류 코드를 확인한 뒤 전원을 재시작해 주세요."
                .to_string(),
            keywords: vec!["키오스크".to_string(), "오류".to_string(), "코드".to_string()],
            category: "technical".to_string(),
        })?;

        let first = api.handle_turn(&turn("s-1", "오류"))?;
        let TurnOutcome::Clarification { options, .. } = first.outcome else {
            return Err(anyhow!("expected clarification, got {:?}", first.outcome));
        };
        assert_eq!(options.len(), 2);
        assert_eq!(options[1].question, "키오스크 오류 코드 안내");

        let second = api.handle_turn(&turn("s-1", "2번"))?;
        match second.outcome {
            TurnOutcome::Answered { question, via_clarification, .. } => {
                assert_eq!(question, "키오스크 오류 코드 안내");
                assert!(via_clarification);
            }
            other => return Err(anyhow!("expected answer, got {other:?}")),
        }
        assert!(api.engine().pending_clarification("s-1").is_none());

        drop(api);
        remove_db_files(&db_path)
    }

    // Test IDs: TAPI-003
    #[test]
    fn api_pattern_admin_controls_context_resolution() -> Result<()> {
        let db_path = unique_temp_path("sqlite3");
        let api = AnswerDeskApi::open(&db_path, EngineConfig::default())?;

        let pattern = api.pattern_add(AddPatternRequest {
            pattern: "포스 설치".to_string(),
            context: "Technical".to_string(),
            description: None,
            priority: None,
        })?;
        assert_eq!(pattern.description, "포스 설치 관련 질문");
        api.pattern_add(AddPatternRequest {
            pattern: "환불".to_string(),
            context: "billing".to_string(),
            description: Some("환불 문의".to_string()),
            priority: Some(2),
        })?;

        assert_eq!(api.pattern_list(Some("technical"))?.len(), 1);
        assert_eq!(api.pattern_list(None)?.len(), 2);

        let resolved = api.context("포스 설치 문의드립니다")?;
        assert_eq!(resolved.context_match.map(|found| found.context).as_deref(), Some("technical"));

        assert!(api.pattern_set_active(pattern.id, false)?);
        assert_eq!(api.context("포스 설치 문의드립니다")?.context_match, None);

        assert!(api.pattern_delete(pattern.id)?);
        assert!(!api.pattern_delete(pattern.id)?);

        drop(api);
        remove_db_files(&db_path)
    }

    // Test IDs: TAPI-004
    #[test]
    fn api_knowledge_admin_and_single_shot_queries() -> Result<()> {
        let db_path = unique_temp_path("sqlite3");
        let api = AnswerDeskApi::open(&db_path, EngineConfig::default())?;
        api.seed_defaults()?;

        assert_eq!(api.kb_list(Some("technical"))?.len(), 3);
        let found = api.kb_find(&FindKnowledgeRequest {
            field: KnowledgeField::Keywords,
            needle: "SMART.arumnet".to_string(),
        })?;
        assert_eq!(found.len(), 1);
        assert_eq!(api.kb_get(found[0].id)?.question, "포스 설치 방법");

        let asked = api.ask("포스 설치")?;
        let BestAnswer::Answer { content } = asked.answer else {
            return Err(anyhow!("expected an answer, got {:?}", asked.answer));
        };
        assert!(content.contains("smart.arumnet.com"));

        let searched = api.search(&SearchRequest {
            query: "포스 설치".to_string(),
            context: None,
            limit: Some(1),
        })?;
        assert_eq!(searched.context.as_deref(), Some("technical"));
        assert_eq!(searched.results.len(), 1);
        assert_eq!(searched.results[0].question, "포스 설치 방법");

        assert!(api.kb_delete(found[0].id)?);
        assert!(api.kb_get(found[0].id).is_err());

        let formatted = api.format("점검 순서 1. 전원 확인 2. 재시작");
        assert_eq!(formatted.formatted, "점검 순서\n1. 전원 확인\n2. 재시작");

        drop(api);
        remove_db_files(&db_path)
    }

    // Test IDs: TAPI-005
    #[test]
    fn load_config_reads_partial_yaml_and_rejects_invalid_values() -> Result<()> {
        assert_eq!(load_config(None)?, EngineConfig::default());

        let config_path = unique_temp_path("yaml");
        fs::write(&config_path, "tie_delta: 0.05\nhandoff_contact: \"1588-0000\"\n")?;
        let config = load_config(Some(&config_path))?;
        assert_eq!(config.handoff_contact.as_deref(), Some("1588-0000"));
        assert_eq!(config.default_limit, 5);

        fs::write(&config_path, "exact_weight: -1.0\n")?;
        let Err(err) = load_config(Some(&config_path)) else {
            return Err(anyhow!("negative weight should be rejected"));
        };
        assert!(format!("{err:#}").contains("exact_weight MUST be"));

        fs::write(&config_path, "unknown_knob: 3\n")?;
        assert!(load_config(Some(&config_path)).is_err());

        fs::remove_file(&config_path)
            .with_context(|| format!("failed to cleanup {}", config_path.display()))?;
        Ok(())
    }

    // Test IDs: TAPI-006
    #[test]
    fn turn_response_serializes_with_outcome_tag() -> Result<()> {
        let db_path = unique_temp_path("sqlite3");
        let api = AnswerDeskApi::open(&db_path, EngineConfig::default())?;

        let response = api.handle_turn(&turn("s-2", "안녕하세요"))?;
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["outcome"]["outcome"], "canned");
        assert!(parse_knowledge_id("not-a-ulid").is_err());

        let deferred = TurnResponse {
            session_id: "s-2".to_string(),
            outcome: TurnOutcome::TransientFailure { message: "잠시 후 다시 시도".to_string() },
        };
        let value = serde_json::to_value(&deferred)?;
        assert_eq!(value["outcome"]["outcome"], "transient_failure");
        assert_eq!(serde_json::from_value::<TurnResponse>(value)?, deferred);

        drop(api);
        remove_db_files(&db_path)
    }

    // Test IDs: TAPI-007
    #[test]
    fn api_vague_turn_asks_for_detail_and_ask_reports_context() -> Result<()> {
        let db_path = unique_temp_path("sqlite3");
        let api = AnswerDeskApi::open(&db_path, EngineConfig::default())?;
        api.seed_defaults()?;

        let response = api.handle_turn(&turn("s-3", "설치하고 싶어요"))?;
        let TurnOutcome::NeedsDetail { topic, examples, .. } = response.outcome else {
            return Err(anyhow!("expected a request for detail, got {:?}", response.outcome));
        };
        assert_eq!(topic.as_str(), "install");
        assert_eq!(examples.len(), 3);

        let asked = api.ask("포스 설치 문의드립니다")?;
        assert_eq!(asked.context.as_deref(), Some("technical"));
        assert!(matches!(asked.answer, BestAnswer::Answer { .. }));

        drop(api);
        remove_db_files(&db_path)
    }
}
