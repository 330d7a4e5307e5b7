use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use answer_desk_core::{
    seed, ContextPattern, KnowledgeField, KnowledgeId, KnowledgeItem, KnowledgeStore,
    NewKnowledgeItem, PatternId, PatternStore, StoreError, ValidationError,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, DatabaseName, ErrorCode, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const KNOWLEDGE_ITEMS_FILE: &str = "knowledge_items.ndjson";
const CONTEXT_PATTERNS_FILE: &str = "context_patterns.ndjson";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS knowledge_items (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  item_id TEXT NOT NULL UNIQUE,
  question TEXT NOT NULL CHECK (length(trim(question)) > 0),
  answer TEXT NOT NULL CHECK (length(trim(answer)) > 0),
  keywords_json TEXT NOT NULL,
  category TEXT NOT NULL CHECK (length(trim(category)) > 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS context_patterns (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  pattern_id TEXT NOT NULL UNIQUE,
  pattern TEXT NOT NULL CHECK (length(trim(pattern)) > 0),
  pattern_key TEXT NOT NULL,
  context TEXT NOT NULL CHECK (length(trim(context)) > 0),
  description TEXT NOT NULL DEFAULT '',
  priority INTEGER NOT NULL CHECK (priority >= 0),
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  UNIQUE (context, pattern_key)
);

CREATE INDEX IF NOT EXISTS idx_knowledge_items_category ON knowledge_items(category);
CREATE INDEX IF NOT EXISTS idx_context_patterns_context ON context_patterns(context);
";

const MIGRATION_002_SQL: &str = r"
ALTER TABLE context_patterns ADD COLUMN active INTEGER NOT NULL DEFAULT 1;
";

const ITEM_COLUMNS: &str =
    "item_id, question, answer, keywords_json, category, created_at, updated_at";
const PATTERN_COLUMNS: &str =
    "pattern_id, pattern, context, description, priority, active, created_at, updated_at";

/// SQLite-backed knowledge base and context pattern store.
///
/// The connection is serialized behind a mutex so one store can be shared across threads;
/// every write runs in its own statement or transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub imported_items: usize,
    pub skipped_existing_items: usize,
    pub imported_patterns: usize,
    pub skipped_existing_patterns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SeedSummary {
    pub inserted_items: usize,
    pub skipped_items: usize,
    pub inserted_patterns: usize,
    pub skipped_patterns: usize,
}

/// A stored knowledge row that cannot be loaded back as a valid item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvalidItemRow {
    pub item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub invalid_item_rows: Vec<InvalidItemRow>,
    pub knowledge_items: usize,
    pub context_patterns: usize,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a database file (or `:memory:`) and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let conn = self.conn.lock();
        conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when the database is newer than this build or a migration fails.
    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            tracing::info!(version = 1, "applied schema migration");
        }

        if version < 2 {
            let tx = conn.transaction().context("failed to start migration v2 transaction")?;
            if !table_has_column(&tx, "context_patterns", "active")? {
                tx.execute_batch(MIGRATION_002_SQL).context("failed to apply migration v2")?;
            }
            record_schema_version(&tx, 2)?;
            tx.commit().context("failed to commit migration v2")?;
            tracing::info!(version = 2, "applied schema migration");
        }

        Ok(())
    }

    /// Knowledge items in insertion order, optionally restricted to one category.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_items(&self, category: Option<&str>) -> Result<Vec<KnowledgeItem>> {
        let conn = self.conn.lock();
        match category {
            Some(category) => query_items(
                &conn,
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM knowledge_items WHERE category = ?1 ORDER BY seq ASC"
                ),
                params![category.trim().to_lowercase()],
            ),
            None => query_items(
                &conn,
                &format!("SELECT {ITEM_COLUMNS} FROM knowledge_items ORDER BY seq ASC"),
                [],
            ),
        }
    }

    /// Case-insensitive substring lookup on one field.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn find_items(&self, field: KnowledgeField, needle: &str) -> Result<Vec<KnowledgeItem>> {
        let needle = needle.trim().to_lowercase();
        Ok(self
            .list_items(None)?
            .into_iter()
            .filter(|item| field.matches(item, &needle))
            .collect())
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_item(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>> {
        let conn = self.conn.lock();
        let mut items = query_items(
            &conn,
            &format!("SELECT {ITEM_COLUMNS} FROM knowledge_items WHERE item_id = ?1"),
            params![id.to_string()],
        )?;
        Ok(items.pop())
    }

    /// Validate and persist a new knowledge item.
    ///
    /// # Errors
    /// Returns an error wrapping [`ValidationError`] for invalid input, or a write failure.
    pub fn insert_item(&self, input: NewKnowledgeItem) -> Result<KnowledgeItem> {
        let item = input.into_item(KnowledgeId::new(), OffsetDateTime::now_utc())?;
        let conn = self.conn.lock();
        insert_item_row(&conn, &item)?;
        Ok(item)
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_item(&self, id: KnowledgeId) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute("DELETE FROM knowledge_items WHERE item_id = ?1", params![id.to_string()])
            .with_context(|| format!("failed to delete knowledge item {id}"))?;
        Ok(changed > 0)
    }

    /// Context patterns in insertion order, active or not.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_context_patterns(&self) -> Result<Vec<ContextPattern>> {
        let conn = self.conn.lock();
        query_patterns(&conn)
    }

    /// # Errors
    /// Returns an error wrapping [`StoreError::Conflict`] when `(context, pattern)` is already
    /// registered, [`ValidationError`] for blank input, or a write failure.
    pub fn add_pattern(
        &self,
        pattern: &str,
        context: &str,
        description: &str,
        priority: u32,
    ) -> Result<ContextPattern> {
        let now = OffsetDateTime::now_utc();
        let created = ContextPattern::new(pattern, context, description, priority, now)?;
        let (context_key, pattern_key) = created.unique_key();

        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to start pattern insert transaction")?;
        if pattern_key_exists(&tx, &context_key, &pattern_key)? {
            return Err(StoreError::Conflict(format!(
                "pattern `{}` already registered for context `{}`",
                created.pattern, created.context
            ))
            .into());
        }
        insert_pattern_row(&tx, &created)?;
        tx.commit().context("failed to commit pattern insert")?;
        Ok(created)
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn remove_pattern(&self, id: PatternId) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn
            .execute("DELETE FROM context_patterns WHERE pattern_id = ?1", params![id.to_string()])
            .with_context(|| format!("failed to delete context pattern {id}"))?;
        Ok(changed > 0)
    }

    /// # Errors
    /// Returns an error when the update fails.
    pub fn update_pattern_active(&self, id: PatternId, active: bool) -> Result<bool> {
        let now = now_rfc3339()?;
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE context_patterns SET active = ?1, updated_at = ?2 WHERE pattern_id = ?3",
                params![active, now, id.to_string()],
            )
            .with_context(|| format!("failed to update context pattern {id}"))?;
        Ok(changed > 0)
    }

    /// Insert the bootstrap knowledge items and context patterns that are not present yet.
    ///
    /// Items are matched by question text and patterns by `(context, pattern)`, so running
    /// this twice changes nothing.
    ///
    /// # Errors
    /// Returns an error when any read or write in the transaction fails.
    pub fn seed_defaults(&self) -> Result<SeedSummary> {
        let now = OffsetDateTime::now_utc();
        let mut summary = SeedSummary::default();

        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to start seed transaction")?;

        for input in seed::default_knowledge_items() {
            if question_exists(&tx, input.question.trim())? {
                summary.skipped_items += 1;
                continue;
            }
            let item = input.into_item(KnowledgeId::new(), now)?;
            insert_item_row(&tx, &item)?;
            summary.inserted_items += 1;
        }

        for entry in seed::default_context_patterns() {
            let pattern = ContextPattern::new(
                entry.pattern,
                entry.context,
                &seed::describe(&entry),
                entry.priority,
                now,
            )?;
            let (context_key, pattern_key) = pattern.unique_key();
            if pattern_key_exists(&tx, &context_key, &pattern_key)? {
                summary.skipped_patterns += 1;
                continue;
            }
            insert_pattern_row(&tx, &pattern)?;
            summary.inserted_patterns += 1;
        }

        tx.commit().context("failed to commit seed transaction")?;
        tracing::info!(
            inserted_items = summary.inserted_items,
            inserted_patterns = summary.inserted_patterns,
            "seeded default knowledge"
        );
        Ok(summary)
    }

    /// Export knowledge items and context patterns as deterministic NDJSON plus manifest.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let (items, patterns) = {
            let conn = self.conn.lock();
            let items = query_items(
                &conn,
                &format!("SELECT {ITEM_COLUMNS} FROM knowledge_items ORDER BY seq ASC"),
                [],
            )?;
            (items, query_patterns(&conn)?)
        };

        let item_digest = write_ndjson_file(&out_dir.join(KNOWLEDGE_ITEMS_FILE), &items)?;
        let pattern_digest = write_ndjson_file(&out_dir.join(CONTEXT_PATTERNS_FILE), &patterns)?;

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files: vec![
                ExportFileDigest {
                    path: KNOWLEDGE_ITEMS_FILE.to_string(),
                    sha256: item_digest.0,
                    records: item_digest.1,
                },
                ExportFileDigest {
                    path: CONTEXT_PATTERNS_FILE.to_string(),
                    sha256: pattern_digest.0,
                    records: pattern_digest.1,
                },
            ],
        };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write export manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    /// Import an exported snapshot directory in one transaction, keeping ids and timestamps.
    ///
    /// # Errors
    /// Returns an error when the manifest does not match the files, a row fails validation,
    /// a duplicate is found with `skip_existing == false`, or a write fails.
    pub fn import_snapshot(&self, in_dir: &Path, skip_existing: bool) -> Result<ImportSummary> {
        self.migrate()?;
        let manifest = read_export_manifest(&in_dir.join("manifest.json"))?;
        validate_import_manifest(in_dir, &manifest)?;

        let items = read_ndjson_file::<KnowledgeItem>(&in_dir.join(KNOWLEDGE_ITEMS_FILE))?;
        let patterns = read_ndjson_file::<ContextPattern>(&in_dir.join(CONTEXT_PATTERNS_FILE))?;
        let mut summary = ImportSummary::default();

        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to start import transaction")?;

        for item in items {
            item.validate()
                .with_context(|| format!("knowledge item {} failed validation", item.id))?;
            if item_exists(&tx, item.id)? {
                if skip_existing {
                    summary.skipped_existing_items += 1;
                    continue;
                }
                return Err(anyhow!("knowledge item already exists: {}", item.id));
            }
            insert_item_row(&tx, &item)?;
            summary.imported_items += 1;
        }

        for pattern in patterns {
            pattern
                .validate()
                .with_context(|| format!("context pattern {} failed validation", pattern.id))?;
            let (context_key, pattern_key) = pattern.unique_key();
            if pattern_exists(&tx, pattern.id)?
                || pattern_key_exists(&tx, &context_key, &pattern_key)?
            {
                if skip_existing {
                    summary.skipped_existing_patterns += 1;
                    continue;
                }
                return Err(anyhow!(
                    "context pattern already exists: {} ({} / {})",
                    pattern.id,
                    pattern.context,
                    pattern.pattern
                ));
            }
            insert_pattern_row(&tx, &pattern)?;
            summary.imported_patterns += 1;
        }

        tx.commit().context("failed to commit import transaction")?;
        Ok(summary)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .lock()
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Restore this database from a `SQLite` backup file, then migrate to latest.
    ///
    /// # Errors
    /// Returns an error when the backup file is missing, restore fails, or migrations fail.
    pub fn restore_database(&self, in_file: &Path) -> Result<()> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }

        self.conn
            .lock()
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| {
                format!("failed to restore sqlite backup from {}", in_file.display())
            })?;

        self.migrate()
    }

    /// Run quick-check, row validity, row count and schema status checks.
    ///
    /// # Errors
    /// Returns an error when any integrity query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let (quick_check_message, invalid_item_rows, knowledge_items, context_patterns) = {
            let conn = self.conn.lock();
            let quick_check_message: String = conn
                .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
                .context("failed to run PRAGMA quick_check")?;

            (
                quick_check_message,
                invalid_item_rows(&conn)?,
                count_rows(&conn, "knowledge_items")?,
                count_rows(&conn, "context_patterns")?,
            )
        };

        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            invalid_item_rows,
            knowledge_items,
            context_patterns,
            schema_status: self.schema_status()?,
        })
    }
}

impl KnowledgeStore for SqliteStore {
    fn find_by_substring(
        &self,
        field: KnowledgeField,
        pattern: &str,
    ) -> Result<Vec<KnowledgeItem>, StoreError> {
        self.find_items(field, pattern).map_err(to_store_error)
    }

    fn find_all(&self, category: Option<&str>) -> Result<Vec<KnowledgeItem>, StoreError> {
        self.list_items(category).map_err(to_store_error)
    }

    fn get(&self, id: KnowledgeId) -> Result<Option<KnowledgeItem>, StoreError> {
        self.get_item(id).map_err(to_store_error)
    }

    fn insert(&self, item: NewKnowledgeItem) -> Result<KnowledgeItem, StoreError> {
        self.insert_item(item).map_err(to_store_error)
    }

    fn delete_by_id(&self, id: KnowledgeId) -> Result<bool, StoreError> {
        self.delete_item(id).map_err(to_store_error)
    }
}

impl PatternStore for SqliteStore {
    fn list_patterns(&self) -> Result<Vec<ContextPattern>, StoreError> {
        self.list_context_patterns().map_err(to_store_error)
    }

    fn insert_pattern(
        &self,
        pattern: &str,
        context: &str,
        description: &str,
        priority: u32,
    ) -> Result<ContextPattern, StoreError> {
        self.add_pattern(pattern, context, description, priority).map_err(to_store_error)
    }

    fn delete_pattern(&self, id: PatternId) -> Result<bool, StoreError> {
        self.remove_pattern(id).map_err(to_store_error)
    }

    fn set_pattern_active(&self, id: PatternId, active: bool) -> Result<bool, StoreError> {
        self.update_pattern_active(id, active).map_err(to_store_error)
    }
}

// Busy, locked and unopenable databases are retryable; everything else is permanent.
fn to_store_error(err: anyhow::Error) -> StoreError {
    if let Some(store_err) = err.downcast_ref::<StoreError>() {
        return store_err.clone();
    }
    if let Some(validation) = err.downcast_ref::<ValidationError>() {
        return StoreError::Validation(validation.0.clone());
    }

    let message = format!("{err:#}");
    for cause in err.chain() {
        if let Some(rusqlite::Error::SqliteFailure(failure, _)) =
            cause.downcast_ref::<rusqlite::Error>()
        {
            return match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen => {
                    StoreError::Unavailable(message)
                }
                ErrorCode::ConstraintViolation => StoreError::Conflict(message),
                _ => StoreError::Backend(message),
            };
        }
    }
    StoreError::Backend(message)
}

struct ItemRow {
    item_id: String,
    question: String,
    answer: String,
    keywords_json: String,
    category: String,
    created_at: String,
    updated_at: String,
}

impl ItemRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            item_id: row.get(0)?,
            question: row.get(1)?,
            answer: row.get(2)?,
            keywords_json: row.get(3)?,
            category: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_item(self) -> Result<KnowledgeItem> {
        let keywords = serde_json::from_str(&self.keywords_json).with_context(|| {
            format!("invalid keywords_json for knowledge item {}", self.item_id)
        })?;
        Ok(KnowledgeItem {
            id: KnowledgeId(parse_ulid(&self.item_id)?),
            question: self.question,
            answer: self.answer,
            keywords,
            category: self.category,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

struct PatternRow {
    pattern_id: String,
    pattern: String,
    context: String,
    description: String,
    priority: u32,
    active: bool,
    created_at: String,
    updated_at: String,
}

impl PatternRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            pattern_id: row.get(0)?,
            pattern: row.get(1)?,
            context: row.get(2)?,
            description: row.get(3)?,
            priority: row.get(4)?,
            active: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_pattern(self) -> Result<ContextPattern> {
        Ok(ContextPattern {
            id: PatternId(parse_ulid(&self.pattern_id)?),
            pattern: self.pattern,
            context: self.context,
            description: self.description,
            priority: self.priority,
            active: self.active,
            created_at: parse_rfc3339(&self.created_at)?,
            updated_at: parse_rfc3339(&self.updated_at)?,
        })
    }
}

fn query_items<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<KnowledgeItem>> {
    let mut stmt = conn.prepare(sql).context("failed to prepare knowledge item query")?;
    let rows = stmt.query_map(params, ItemRow::read)?;
    let mut items = Vec::new();
    for row in rows {
        items.push(row?.into_item()?);
    }
    Ok(items)
}

fn query_patterns(conn: &Connection) -> Result<Vec<ContextPattern>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {PATTERN_COLUMNS} FROM context_patterns ORDER BY seq ASC"))
        .context("failed to prepare context pattern query")?;
    let rows = stmt.query_map([], PatternRow::read)?;
    let mut patterns = Vec::new();
    for row in rows {
        patterns.push(row?.into_pattern()?);
    }
    Ok(patterns)
}

fn insert_item_row(conn: &Connection, item: &KnowledgeItem) -> Result<()> {
    let keywords_json =
        serde_json::to_string(&item.keywords).context("failed to serialize keywords")?;
    conn.execute(
        "INSERT INTO knowledge_items(
            item_id, question, answer, keywords_json, category, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            item.id.to_string(),
            item.question,
            item.answer,
            keywords_json,
            item.category,
            rfc3339(item.created_at)?,
            rfc3339(item.updated_at)?,
        ],
    )
    .with_context(|| format!("failed to insert knowledge item {}", item.id))?;
    Ok(())
}

fn insert_pattern_row(conn: &Connection, pattern: &ContextPattern) -> Result<()> {
    let (context_key, pattern_key) = pattern.unique_key();
    conn.execute(
        "INSERT INTO context_patterns(
            pattern_id, pattern, pattern_key, context, description, priority, active,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            pattern.id.to_string(),
            pattern.pattern,
            pattern_key,
            context_key,
            pattern.description,
            pattern.priority,
            pattern.active,
            rfc3339(pattern.created_at)?,
            rfc3339(pattern.updated_at)?,
        ],
    )
    .with_context(|| format!("failed to insert context pattern {}", pattern.id))?;
    Ok(())
}

fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool> {
    let found = conn.query_row(sql, params, |row| row.get::<_, i64>(0))?;
    Ok(found == 1)
}

fn item_exists(conn: &Connection, id: KnowledgeId) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM knowledge_items WHERE item_id = ?1)",
        params![id.to_string()],
    )
    .with_context(|| format!("failed to check knowledge item {id}"))
}

fn question_exists(conn: &Connection, question: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM knowledge_items WHERE question = ?1)",
        params![question],
    )
    .context("failed to check knowledge item question")
}

fn pattern_exists(conn: &Connection, id: PatternId) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM context_patterns WHERE pattern_id = ?1)",
        params![id.to_string()],
    )
    .with_context(|| format!("failed to check context pattern {id}"))
}

fn pattern_key_exists(conn: &Connection, context: &str, pattern_key: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM context_patterns WHERE context = ?1 AND pattern_key = ?2)",
        params![context, pattern_key],
    )
    .context("failed to check context pattern uniqueness")
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    if !table_exists(conn, table)? {
        return Ok(0);
    }
    let count = conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
        .with_context(|| format!("failed to count rows in {table}"))?;
    usize::try_from(count).with_context(|| format!("invalid row count for {table}: {count}"))
}

fn invalid_item_rows(conn: &Connection) -> Result<Vec<InvalidItemRow>> {
    if !table_exists(conn, "knowledge_items")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn
        .prepare(&format!("SELECT {ITEM_COLUMNS} FROM knowledge_items ORDER BY seq ASC"))
        .context("failed to prepare knowledge item scan")?;
    let rows = stmt.query_map([], ItemRow::read)?;
    let mut invalid = Vec::new();
    for row in rows {
        let row = row?;
        let item_id = row.item_id.clone();
        let reason = match row.into_item() {
            Ok(item) => item.validate().err().map(|err| err.to_string()),
            Err(err) => Some(format!("{err:#}")),
        };
        if let Some(reason) = reason {
            invalid.push(InvalidItemRow { item_id, reason });
        }
    }
    Ok(invalid)
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    exists(
        conn,
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![table_name],
    )
    .with_context(|| format!("failed to check if table exists: {table_name}"))
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get::<_, i64>(0)
    })
    .context("failed to read current schema version")
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}

fn write_ndjson_file<T: Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((format!("{:x}", hasher.finalize()), values.len()))
}

fn read_ndjson_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let mut values = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value = serde_json::from_str(trimmed).with_context(|| {
            format!("failed to parse NDJSON row {} from {}", index + 1, path.display())
        })?;
        values.push(value);
    }

    Ok(values)
}

fn read_export_manifest(path: &Path) -> Result<ExportManifest> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read manifest file {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse manifest JSON {}", path.display()))
}

fn ndjson_digest_and_records(path: &Path) -> Result<(String, usize)> {
    let file = File::open(path)
        .with_context(|| format!("failed to open NDJSON file {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut records = 0_usize;

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
        if !line.trim().is_empty() {
            records += 1;
        }
    }

    Ok((format!("{:x}", hasher.finalize()), records))
}

fn validate_import_manifest(in_dir: &Path, manifest: &ExportManifest) -> Result<()> {
    if manifest.schema_version <= 0 || manifest.schema_version > LATEST_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported export schema version {}; supported range is 1..={}",
            manifest.schema_version,
            LATEST_SCHEMA_VERSION
        ));
    }

    let mut by_path: BTreeMap<&str, &ExportFileDigest> = BTreeMap::new();
    for file in &manifest.files {
        if by_path.insert(file.path.as_str(), file).is_some() {
            return Err(anyhow!("manifest contains duplicate file entry: {}", file.path));
        }
    }

    for required in [KNOWLEDGE_ITEMS_FILE, CONTEXT_PATTERNS_FILE] {
        let Some(expected) = by_path.get(required) else {
            return Err(anyhow!("manifest is missing required file entry: {required}"));
        };
        let file_path = in_dir.join(required);
        if !file_path.exists() {
            return Err(anyhow!("manifest references missing file {}", file_path.display()));
        }

        let (actual_sha256, actual_records) = ndjson_digest_and_records(&file_path)?;
        if actual_sha256 != expected.sha256 {
            return Err(anyhow!(
                "manifest digest mismatch for {required}: expected {}, got {actual_sha256}",
                expected.sha256
            ));
        }
        if actual_records != expected.records {
            return Err(anyhow!(
                "manifest record count mismatch for {required}: expected {}, got {actual_records}",
                expected.records
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;

    use answer_desk_core::{AnswerEngine, EngineConfig, TurnOutcome};

    use super::*;

    fn migrated_memory_store() -> Result<SqliteStore> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn mk_item(question: &str, keywords: &[&str], category: &str) -> NewKnowledgeItem {
        NewKnowledgeItem {
            question: question.to_string(),
            answer: format!("{question} 안내입니다."),
            keywords: keywords.iter().map(ToString::to_string).collect(),
            category: category.to_string(),
        }
    }

    fn temp_path(prefix: &str) -> PathBuf {
        std::env::temp_dir().join(format!("answerdesk-{prefix}-{}", Ulid::new()))
    }

    fn remove_sqlite_files(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let path = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup sqlite file {}", path.display()))?;
            }
        }
        Ok(())
    }

    // Test IDs: TDB-001
    #[test]
    fn migrate_brings_fresh_database_to_latest_version() -> Result<()> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 0);
        assert_eq!(status.pending_versions, vec![1, 2]);

        store.migrate()?;
        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 2);
        assert!(status.pending_versions.is_empty());
        Ok(())
    }

    // Test IDs: TDB-002
    #[test]
    fn version_one_database_gains_pattern_activation() -> Result<()> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        {
            let conn = store.conn.lock();
            conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)?;
            conn.execute_batch(MIGRATION_001_SQL)?;
            record_schema_version(&conn, 1)?;
            conn.execute(
                "INSERT INTO context_patterns(
                    pattern_id, pattern, pattern_key, context, description, priority,
                    created_at, updated_at
                ) VALUES (?1, '포스 설치', '포스설치', 'technical', '', 1, ?2, ?2)",
                params![PatternId::new().to_string(), now_rfc3339()?],
            )?;
        }
        assert_eq!(store.schema_status()?.pending_versions, vec![2]);

        store.migrate()?;
        let patterns = store.list_context_patterns()?;
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].active);
        Ok(())
    }

    // Test IDs: TDB-003
    #[test]
    fn knowledge_items_keep_insertion_order_and_filter_by_field() -> Result<()> {
        let store = migrated_memory_store()?;
        let install = store.insert_item(mk_item("포스 설치 방법", &["포스", "설치"], "Technical"))?;
        store.insert_item(mk_item("카드 결제 취소 방법", &["카드", "결제", "SMART"], "billing"))?;
        store.insert_item(mk_item("프린터 오류 해결", &["프린터", "오류"], "technical"))?;

        let questions = store
            .list_items(None)?
            .into_iter()
            .map(|item| item.question)
            .collect::<Vec<_>>();
        assert_eq!(questions, vec!["포스 설치 방법", "카드 결제 취소 방법", "프린터 오류 해결"]);
        assert_eq!(store.list_items(Some("TECHNICAL"))?.len(), 2);
        assert_eq!(store.find_items(KnowledgeField::Keywords, "smart")?.len(), 1);
        assert_eq!(store.find_items(KnowledgeField::Question, "방법")?.len(), 2);

        assert_eq!(store.get_item(install.id)?, Some(install.clone()));
        assert!(store.delete_item(install.id)?);
        assert!(!store.delete_item(install.id)?);
        assert_eq!(store.get_item(install.id)?, None);
        Ok(())
    }

    // Test IDs: TDB-004
    #[test]
    fn trait_errors_map_validation_and_conflict() -> Result<()> {
        let store = migrated_memory_store()?;

        let mut invalid = mk_item("포스 설치 방법", &["포스"], "technical");
        invalid.keywords.clear();
        assert!(matches!(store.insert(invalid), Err(StoreError::Validation(_))));

        let pattern = store.insert_pattern("포스 설치", "technical", "", 1)?;
        let duplicate = store.insert_pattern("포스설치", "Technical", "", 3);
        let Err(StoreError::Conflict(message)) = duplicate else {
            return Err(anyhow!("expected conflict, got {duplicate:?}"));
        };
        assert!(message.contains("already registered"));

        assert!(store.set_pattern_active(pattern.id, false)?);
        assert!(!store.list_patterns()?[0].active);
        assert!(store.delete_pattern(pattern.id)?);
        assert!(!store.set_pattern_active(pattern.id, true)?);
        Ok(())
    }

    // Test IDs: TDB-005
    #[test]
    fn busy_and_locked_failures_are_unavailable() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let err = to_store_error(anyhow::Error::new(busy).context("failed to list items"));
        assert!(matches!(err, StoreError::Unavailable(_)), "got {err:?}");

        let corrupt = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
            None,
        );
        assert!(matches!(to_store_error(corrupt.into()), StoreError::Backend(_)));
        assert!(matches!(
            to_store_error(anyhow!("invalid ULID: nope")),
            StoreError::Backend(message) if message.contains("invalid ULID")
        ));
    }

    // Test IDs: TDB-006
    #[test]
    fn seed_defaults_is_idempotent() -> Result<()> {
        let store = migrated_memory_store()?;

        let first = store.seed_defaults()?;
        assert_eq!(first.inserted_items, 3);
        assert_eq!(first.inserted_patterns, seed::default_context_patterns().len());

        let second = store.seed_defaults()?;
        assert_eq!(second.inserted_items, 0);
        assert_eq!(second.inserted_patterns, 0);
        assert_eq!(second.skipped_items, 3);
        assert_eq!(store.list_items(None)?.len(), 3);
        Ok(())
    }

    // Test IDs: TDB-007
    #[test]
    fn export_and_import_snapshot_round_trip() -> Result<()> {
        let source = migrated_memory_store()?;
        source.seed_defaults()?;
        let disabled = source.list_context_patterns()?[0].id;
        source.update_pattern_active(disabled, false)?;

        let export_dir = temp_path("export");
        let manifest = source.export_snapshot(&export_dir)?;
        assert_eq!(manifest.files.len(), 2);
        assert_eq!(manifest.files[0].records, 3);
        assert!(export_dir.join("manifest.json").exists());

        let target = SqliteStore::open(Path::new(":memory:"))?;
        let summary = target.import_snapshot(&export_dir, true)?;
        assert_eq!(summary.imported_items, 3);
        assert_eq!(summary.imported_patterns, seed::default_context_patterns().len());
        assert_eq!(target.list_items(None)?, source.list_items(None)?);
        assert_eq!(target.list_context_patterns()?, source.list_context_patterns()?);

        let again = target.import_snapshot(&export_dir, true)?;
        assert_eq!(again.imported_items, 0);
        assert_eq!(again.skipped_existing_items, 3);
        assert!(target.import_snapshot(&export_dir, false).is_err());

        fs::remove_dir_all(&export_dir).with_context(|| {
            format!("failed to cleanup temp export dir {}", export_dir.display())
        })?;
        Ok(())
    }

    // Test IDs: TDB-008
    #[test]
    fn import_rejects_manifest_digest_mismatch() -> Result<()> {
        let source = migrated_memory_store()?;
        source.seed_defaults()?;
        let export_dir = temp_path("export");
        source.export_snapshot(&export_dir)?;

        let items_path = export_dir.join(KNOWLEDGE_ITEMS_FILE);
        let mut tampered = fs::OpenOptions::new().append(true).open(&items_path)?;
        writeln!(tampered, "{{\"tampered\":true}}")?;

        let target = SqliteStore::open(Path::new(":memory:"))?;
        let Err(err) = target.import_snapshot(&export_dir, true) else {
            return Err(anyhow!("expected import failure for mismatched manifest digest"));
        };
        assert!(err.to_string().contains("manifest digest mismatch for knowledge_items.ndjson"));
        assert!(target.list_items(None)?.is_empty());

        fs::remove_dir_all(&export_dir).with_context(|| {
            format!("failed to cleanup temp export dir {}", export_dir.display())
        })?;
        Ok(())
    }

    // Test IDs: TDB-009
    #[test]
    fn backup_and_restore_database_round_trip() -> Result<()> {
        let source = migrated_memory_store()?;
        let item = source.insert_item(mk_item("영수증 재발행 방법", &["영수증"], "technical"))?;

        let backup_file = temp_path("backup").with_extension("sqlite3");
        source.backup_database(&backup_file)?;

        let target = SqliteStore::open(Path::new(":memory:"))?;
        target.restore_database(&backup_file)?;
        assert_eq!(target.list_items(None)?, vec![item]);

        fs::remove_file(&backup_file).with_context(|| {
            format!("failed to cleanup temp backup file {}", backup_file.display())
        })?;
        Ok(())
    }

    // Test IDs: TDB-010
    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let store = migrated_memory_store()?;
        store.seed_defaults()?;

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.invalid_item_rows.is_empty());
        assert_eq!(report.knowledge_items, 3);
        assert_eq!(report.schema_status.current_version, 2);
        Ok(())
    }

    fn insert_raw_item(store: &SqliteStore, item_id: &str, keywords_json: &str, category: &str) {
        let inserted = store.conn.lock().execute(
            "INSERT INTO knowledge_items(
                item_id, question, answer, keywords_json, category, created_at, updated_at
            ) VALUES (?1, '포스 설치 방법', '설치 안내', ?2, ?3,
                '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            params![item_id, keywords_json, category],
        );
        if let Err(err) = inserted {
            panic!("raw row insert failed: {err}");
        }
    }

    // Test IDs: TDB-012
    #[test]
    fn integrity_check_lists_rows_that_cannot_be_loaded() -> Result<()> {
        let store = migrated_memory_store()?;
        store.seed_defaults()?;
        let broken_json = Ulid::new().to_string();
        let upper_category = Ulid::new().to_string();
        insert_raw_item(&store, &broken_json, "포스, 설치", "technical");
        insert_raw_item(&store, &upper_category, "[\"포스\"]", "Technical");

        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert_eq!(report.knowledge_items, 5);
        let ids =
            report.invalid_item_rows.iter().map(|row| row.item_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec![broken_json.as_str(), upper_category.as_str()]);
        assert!(report.invalid_item_rows[0].reason.contains("invalid keywords_json"));
        assert!(report.invalid_item_rows[1].reason.contains("category MUST be"));
        Ok(())
    }

    fn write_snapshot(dir: &Path, items: &[KnowledgeItem]) -> Result<()> {
        fs::create_dir_all(dir)?;
        let item_digest = write_ndjson_file(&dir.join(KNOWLEDGE_ITEMS_FILE), items)?;
        let pattern_digest =
            write_ndjson_file::<ContextPattern>(&dir.join(CONTEXT_PATTERNS_FILE), &[])?;
        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files: vec![
                ExportFileDigest {
                    path: KNOWLEDGE_ITEMS_FILE.to_string(),
                    sha256: item_digest.0,
                    records: item_digest.1,
                },
                ExportFileDigest {
                    path: CONTEXT_PATTERNS_FILE.to_string(),
                    sha256: pattern_digest.0,
                    records: pattern_digest.1,
                },
            ],
        };
        fs::write(dir.join("manifest.json"), serde_json::to_vec_pretty(&manifest)?)?;
        Ok(())
    }

    // Test IDs: TDB-013
    #[test]
    fn import_rejects_item_with_upper_case_category() -> Result<()> {
        let source = migrated_memory_store()?;
        let mut item = source.insert_item(mk_item("영수증 재발행 방법", &["영수증"], "technical"))?;
        item.category = "Technical".to_string();

        let snapshot_dir = temp_path("snapshot");
        write_snapshot(&snapshot_dir, &[item])?;

        let target = migrated_memory_store()?;
        let Err(err) = target.import_snapshot(&snapshot_dir, true) else {
            return Err(anyhow!("expected import failure for upper-case category"));
        };
        assert!(format!("{err:#}").contains("category MUST be trimmed and lower-cased"));
        assert!(target.list_items(None)?.is_empty());

        fs::remove_dir_all(&snapshot_dir).with_context(|| {
            format!("failed to cleanup temp snapshot dir {}", snapshot_dir.display())
        })?;
        Ok(())
    }

    // Test IDs: TDB-011
    #[test]
    fn engine_answers_from_seeded_sqlite_store() -> Result<()> {
        let store = Arc::new(migrated_memory_store()?);
        store.seed_defaults()?;
        let engine = AnswerEngine::new(store.clone(), store, EngineConfig::default())?;

        match engine.handle_turn("s-1", "포스 설치 문의드립니다")? {
            TurnOutcome::Answered { question, .. } => assert_eq!(question, "포스 설치 방법"),
            other => return Err(anyhow!("expected an answer, got {other:?}")),
        }
        Ok(())
    }

    // Test IDs: TCONC-001
    #[test]
    fn concurrent_writes_and_reads_preserve_integrity() -> Result<()> {
        let db_path = temp_path("concurrency").with_extension("sqlite3");
        SqliteStore::open(&db_path)?.migrate()?;

        let writer_threads = 4;
        let writes_per_thread = 20;
        let shared = Arc::new(SqliteStore::open(&db_path)?);
        let mut handles = Vec::new();

        for writer in 0..writer_threads {
            let writer_path = db_path.clone();
            handles.push(thread::spawn(move || -> Result<()> {
                let store = SqliteStore::open(&writer_path)?;
                for index in 0..writes_per_thread {
                    store.insert_item(mk_item(
                        &format!("동시 쓰기 {writer}-{index}"),
                        &["동시", "쓰기"],
                        "technical",
                    ))?;
                }
                Ok(())
            }));
        }
        for _ in 0..2 {
            let reader = Arc::clone(&shared);
            handles.push(thread::spawn(move || -> Result<()> {
                for _ in 0..30 {
                    for item in reader.find_all(None)? {
                        assert!(!item.keywords.is_empty());
                    }
                }
                Ok(())
            }));
        }

        for handle in handles {
            let Ok(thread_result) = handle.join() else {
                return Err(anyhow!("concurrency thread panicked"));
            };
            thread_result?;
        }

        assert_eq!(shared.list_items(None)?.len(), writer_threads * writes_per_thread);
        let report = shared.integrity_check()?;
        assert!(report.quick_check_ok);
        drop(shared);

        remove_sqlite_files(&db_path)
    }
}
