use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use answer_desk_api::{
    load_config, parse_knowledge_id, parse_pattern_id, AddPatternRequest, AnswerDeskApi,
    FindKnowledgeRequest, SearchRequest, TurnRequest,
};
use answer_desk_core::{KnowledgeField, NewKnowledgeItem};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "adesk")]
#[command(about = "AnswerDesk support answer engine CLI")]
struct Cli {
    #[arg(long, default_value = "./answer_desk.sqlite3")]
    db: PathBuf,

    /// YAML file with engine tunables; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Kb {
        #[command(subcommand)]
        command: Box<KbCommand>,
    },
    Pattern {
        #[command(subcommand)]
        command: Box<PatternCommand>,
    },
    Classify(TextArgs),
    Context(TextArgs),
    Search(SearchArgs),
    Ask(TextArgs),
    Format(TextArgs),
    /// Read one user turn per stdin line and print one JSON outcome per line.
    Chat(ChatArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Seed,
    Export(DbExportArgs),
    Import(DbImportArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    skip_existing: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum KbCommand {
    Add(KbAddArgs),
    List(KbListArgs),
    Find(KbFindArgs),
    Show(IdArgs),
    Delete(IdArgs),
}

#[derive(Debug, Args)]
struct KbAddArgs {
    #[arg(long)]
    question: String,
    #[arg(long)]
    answer: String,
    #[arg(long = "keyword", required = true)]
    keywords: Vec<String>,
    #[arg(long, default_value = "technical")]
    category: String,
}

#[derive(Debug, Args)]
struct KbListArgs {
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Args)]
struct KbFindArgs {
    #[arg(long, value_enum)]
    field: FieldArg,
    #[arg(long)]
    needle: String,
}

#[derive(Debug, Args)]
struct IdArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Subcommand)]
enum PatternCommand {
    Add(PatternAddArgs),
    List(PatternListArgs),
    Delete(IdArgs),
    Enable(IdArgs),
    Disable(IdArgs),
}

#[derive(Debug, Args)]
struct PatternAddArgs {
    #[arg(long)]
    pattern: String,
    #[arg(long)]
    context: String,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    priority: Option<u32>,
}

#[derive(Debug, Args)]
struct PatternListArgs {
    #[arg(long)]
    context: Option<String>,
}

#[derive(Debug, Args)]
struct TextArgs {
    #[arg(long)]
    text: String,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    text: String,
    /// Overrides the context derived from registered patterns.
    #[arg(long)]
    context: Option<String>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[arg(long, default_value = "cli")]
    session: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FieldArg {
    Question,
    Answer,
    Keywords,
    Category,
}

impl From<FieldArg> for KnowledgeField {
    fn from(value: FieldArg) -> Self {
        match value {
            FieldArg::Question => Self::Question,
            FieldArg::Answer => Self::Answer,
            FieldArg::Keywords => Self::Keywords,
            FieldArg::Category => Self::Category,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(err) =
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).try_init()
    {
        eprintln!("failed to initialise logging: {err}");
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let api = AnswerDeskApi::open(&cli.db, config)?;

    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::Kb { command } => run_kb(*command, &api),
        Command::Pattern { command } => run_pattern(*command, &api),
        Command::Classify(args) => emit_json(
            serde_json::to_value(api.classify(&args.text))
                .context("failed to serialize classification")?,
        ),
        Command::Context(args) => emit_json(
            serde_json::to_value(api.context(&args.text)?)
                .context("failed to serialize context match")?,
        ),
        Command::Search(args) => {
            let response = api.search(&SearchRequest {
                query: args.text,
                context: args.context,
                limit: args.limit,
            })?;
            emit_json(serde_json::to_value(response).context("failed to serialize results")?)
        }
        Command::Ask(args) => emit_json(
            serde_json::to_value(api.ask(&args.text)?).context("failed to serialize answer")?,
        ),
        Command::Format(args) => emit_json(
            serde_json::to_value(api.format(&args.text))
                .context("failed to serialize formatted answer")?,
        ),
        Command::Chat(args) => run_chat(&args, &api),
    }
}

fn run_db(command: DbCommand, api: &AnswerDeskApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(
            serde_json::to_value(api.migrate(args.dry_run)?)
                .context("failed to serialize migration result")?,
        ),
        DbCommand::Seed => emit_json(serde_json::json!({ "summary": api.seed_defaults()? })),
        DbCommand::Export(args) => {
            let manifest = api.export_snapshot(&args.out)?;
            emit_json(serde_json::json!({
                "out_dir": args.out,
                "manifest": manifest
            }))
        }
        DbCommand::Import(args) => {
            let summary = api.import_snapshot(&args.input, args.skip_existing)?;
            emit_json(serde_json::json!({
                "in_dir": args.input,
                "skip_existing": args.skip_existing,
                "summary": summary
            }))
        }
        DbCommand::Backup(args) => {
            api.migrate(false)?;
            api.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::Restore(args) => {
            api.restore_database(&args.input)?;
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "restored_from": args.input,
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions
            }))
        }
        DbCommand::IntegrityCheck => emit_json(
            serde_json::to_value(api.integrity_check()?)
                .context("failed to serialize integrity report")?,
        ),
    }
}

fn run_kb(command: KbCommand, api: &AnswerDeskApi) -> Result<()> {
    match command {
        KbCommand::Add(args) => {
            let item = api.kb_add(NewKnowledgeItem {
                question: args.question,
                answer: args.answer,
                keywords: args.keywords,
                category: args.category,
            })?;
            emit_json(serde_json::to_value(&item).context("failed to serialize knowledge item")?)
        }
        KbCommand::List(args) => {
            let items = api.kb_list(args.category.as_deref())?;
            emit_json(serde_json::json!({ "items": items }))
        }
        KbCommand::Find(args) => {
            let items = api.kb_find(&FindKnowledgeRequest {
                field: args.field.into(),
                needle: args.needle,
            })?;
            emit_json(serde_json::json!({ "items": items }))
        }
        KbCommand::Show(args) => {
            let item = api.kb_get(parse_knowledge_id(&args.id)?)?;
            emit_json(serde_json::to_value(&item).context("failed to serialize knowledge item")?)
        }
        KbCommand::Delete(args) => {
            let id = parse_knowledge_id(&args.id)?;
            let deleted = api.kb_delete(id)?;
            emit_json(serde_json::json!({ "id": id.to_string(), "deleted": deleted }))
        }
    }
}

fn run_pattern(command: PatternCommand, api: &AnswerDeskApi) -> Result<()> {
    match command {
        PatternCommand::Add(args) => {
            let pattern = api.pattern_add(AddPatternRequest {
                pattern: args.pattern,
                context: args.context,
                description: args.description,
                priority: args.priority,
            })?;
            emit_json(serde_json::to_value(&pattern).context("failed to serialize pattern")?)
        }
        PatternCommand::List(args) => {
            let patterns = api.pattern_list(args.context.as_deref())?;
            emit_json(serde_json::json!({ "patterns": patterns }))
        }
        PatternCommand::Delete(args) => {
            let id = parse_pattern_id(&args.id)?;
            let deleted = api.pattern_delete(id)?;
            emit_json(serde_json::json!({ "id": id.to_string(), "deleted": deleted }))
        }
        PatternCommand::Enable(args) => set_pattern_active(api, &args.id, true),
        PatternCommand::Disable(args) => set_pattern_active(api, &args.id, false),
    }
}

fn set_pattern_active(api: &AnswerDeskApi, raw_id: &str, active: bool) -> Result<()> {
    let id = parse_pattern_id(raw_id)?;
    let found = api.pattern_set_active(id, active)?;
    emit_json(serde_json::json!({ "id": id.to_string(), "active": active, "found": found }))
}

fn run_chat(args: &ChatArgs, api: &AnswerDeskApi) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let text = line.context("failed to read chat input")?;
        let response = api.handle_turn(&TurnRequest {
            session_id: args.session.clone(),
            text,
            at: None,
        })?;
        let value = with_contract_version(
            serde_json::to_value(&response).context("failed to serialize turn")?,
        );
        writeln!(stdout, "{}", serde_json::to_string(&value)?)
            .and_then(|()| stdout.flush())
            .context("failed to write chat output")?;
    }

    if api.end_session(&args.session) {
        tracing::debug!(session_id = %args.session, "dropped unanswered clarification");
    }
    Ok(())
}
