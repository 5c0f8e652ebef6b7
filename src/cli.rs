//! CLI surface (§6.2). Thin argument parsing and dispatch: real behavior
//! lives in the library's public api modules (`ingest`, `retrieval`,
//! `doctor`, `backfill`, `sessions`, `storage`), never reimplemented here.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use sqlx::{Column, Row, SqlitePool};

use siftd::config::{self, Config};
use siftd::progress::ProgressMode;
use siftd::retrieval::{Mode, Role, SearchOutcome, SearchParams, TagFilter};
use siftd::storage::tags::TaggableEntity;
use siftd::{adapters, backfill, db, doctor, formatters, ingest, paths, retrieval, sessions, storage};

#[derive(Parser)]
#[command(name = "siftd", version, about = "Aggregates AI coding-assistant conversation logs into a single queryable corpus")]
pub struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit a structured JSON payload instead of human-readable text (read-only commands only).
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover and ingest new conversation logs
    Ingest {
        /// Restrict to one harness (default: all configured harnesses)
        #[arg(long)]
        adapter: Option<String>,
        /// Re-parse every discovered source regardless of content hash
        #[arg(long)]
        full: bool,
        /// Report what would be ingested without writing anything
        #[arg(long)]
        dry_run: bool,
        /// off | human | json (default: human on a tty, off otherwise)
        #[arg(long)]
        progress: Option<String>,
    },

    /// Summarize corpus size: conversations, harnesses, top workspaces/tools
    Status,

    /// Show one conversation in full, or run a named drop-in SQL query
    Query {
        /// Conversation id
        id: Option<String>,
        #[command(subcommand)]
        sql: Option<QueryAction>,
    },

    /// Hybrid full-text + semantic search
    Search(Box<SearchArgs>),

    /// Apply a tag to a conversation, or queue one against a live session
    Tag {
        /// Conversation id
        entity_id: String,
        tag_name: String,
        /// Queue the tag against a live session instead of applying it directly
        #[arg(long)]
        session: Option<String>,
        /// Exchange index, for a session-scoped exchange-level tag
        #[arg(long)]
        exchange: Option<i64>,
    },

    /// List known tags
    Tags,

    /// List tools by call count
    Tools {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Idempotent maintenance operations over already-ingested data
    Backfill {
        #[command(subcommand)]
        action: BackfillAction,
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply pending schema migrations to the main database
    Migrate,

    /// Run corpus health checks
    Doctor {
        #[command(subcommand)]
        action: Option<DoctorAction>,
        /// Run only fast checks
        #[arg(long)]
        fast: bool,
        /// Promote warnings to failures (nonzero exit)
        #[arg(long)]
        strict: bool,
    },

    /// Copy a drop-in adapter or query file into a destination directory
    Copy {
        #[command(subcommand)]
        what: CopyWhat,
    },

    /// List loaded adapters
    Adapters,

    /// Quick preview of a conversation
    Peek { id: Option<String> },

    /// Export conversations as JSON
    Export {
        /// Restrict to one conversation id (default: entire corpus)
        id: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Register a harness's in-progress session for live tagging
    Register {
        harness_session_id: String,
        adapter: String,
        workspace_path: String,
    },

    /// Print (or mint) the live-session id pointer for a workspace
    SessionId {
        #[arg(long, default_value = ".")]
        workspace: String,
    },

    /// Print an XDG base directory path
    Path {
        #[command(subcommand)]
        which: PathWhich,
    },

    /// Read or write configuration keys
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Configure the embedding backend
    Install {
        #[command(subcommand)]
        what: InstallWhat,
    },
}

#[derive(Subcommand)]
enum QueryAction {
    Sql { name: String },
}

#[derive(clap::Args)]
pub struct SearchArgs {
    query: Vec<String>,
    #[arg(long)]
    workspace: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    since: Option<String>,
    #[arg(long)]
    before: Option<String>,
    /// OR-matched tag filter, repeatable; a trailing `:` is a prefix match
    #[arg(short = 'l', long = "tag")]
    tag: Vec<String>,
    /// AND-matched tag filter, repeatable
    #[arg(long = "all-tags")]
    all_tags: Vec<String>,
    /// Excluded tag filter, repeatable
    #[arg(long = "no-tag")]
    no_tag: Vec<String>,
    #[arg(long)]
    role: Option<String>,
    /// Skip full-text recall; rank by embedding similarity only
    #[arg(long)]
    semantic: bool,
    /// Keep only the single earliest sufficiently-relevant match
    #[arg(long)]
    first: bool,
    /// Group results by conversation
    #[arg(long)]
    conversations: bool,
    #[arg(long = "no-diversity")]
    no_diversity: bool,
    #[arg(long)]
    lambda: Option<f64>,
    #[arg(long)]
    threshold: Option<f64>,
    #[arg(long)]
    limit: Option<i64>,
}

#[derive(Subcommand)]
enum BackfillAction {
    Models,
    Providers,
    #[command(name = "shell-tags")]
    ShellTags,
    #[command(name = "response-attributes")]
    ResponseAttributes,
    #[command(name = "binary-content")]
    BinaryContent,
    Derivative,
}

#[derive(Subcommand)]
enum DoctorAction {
    List,
    Run,
    Fix { check: String },
    Check { name: String },
}

#[derive(Subcommand)]
enum CopyWhat {
    Adapter { name: String, dest: PathBuf },
    Query { name: String, dest: PathBuf },
}

#[derive(Subcommand)]
enum PathWhich {
    Data,
    Config,
    State,
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Path,
}

#[derive(Subcommand)]
enum InstallWhat {
    Embed {
        #[arg(long, default_value = "http")]
        backend: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        dimension: usize,
        #[arg(long)]
        api_base: Option<String>,
        #[arg(long)]
        api_key_env: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(paths::default_config_path);
    let cfg = config::load_config(&config_path)?;

    match cli.command {
        Commands::Ingest { adapter, full, dry_run, progress } => run_ingest(&cfg, adapter, full, dry_run, progress).await,
        Commands::Status => run_status(&cfg, cli.json).await,
        Commands::Query { id, sql } => run_query(&cfg, id, sql, cli.json).await,
        Commands::Search(args) => run_search(&cfg, *args, cli.json).await,
        Commands::Tag { entity_id, tag_name, session, exchange } => run_tag(&cfg, entity_id, tag_name, session, exchange).await,
        Commands::Tags => run_tags(&cfg, cli.json).await,
        Commands::Tools { limit } => run_tools(&cfg, limit, cli.json).await,
        Commands::Backfill { action, dry_run } => run_backfill(&cfg, action, dry_run).await,
        Commands::Migrate => run_migrate(&cfg).await,
        Commands::Doctor { action, fast, strict } => run_doctor(&cfg, action, fast, strict, cli.json).await,
        Commands::Copy { what } => run_copy(what),
        Commands::Adapters => run_adapters(cli.json),
        Commands::Peek { id } => run_peek(&cfg, id, cli.json).await,
        Commands::Export { id, out } => run_export(&cfg, id, out).await,
        Commands::Register { harness_session_id, adapter, workspace_path } => run_register(&cfg, harness_session_id, adapter, workspace_path).await,
        Commands::SessionId { workspace } => run_session_id(workspace),
        Commands::Path { which } => run_path(which),
        Commands::Config { action } => run_config(&config_path, action),
        Commands::Install { what } => run_install(&config_path, what),
    }
}

async fn run_ingest(cfg: &Config, adapter: Option<String>, full: bool, dry_run: bool, progress: Option<String>) -> Result<()> {
    if dry_run {
        bail!("ingest --dry-run is not yet implemented; run without it, or inspect `siftd doctor ingest-pending` for a preview");
    }
    let main_pool = open_main(cfg).await?;
    let mode = match progress.as_deref() {
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("unknown --progress value '{other}' (expected off|human|json)"),
        None => ProgressMode::default_for_tty(),
    };
    let reporter = mode.reporter();
    let report = ingest::run_ingest(&main_pool, adapter.as_deref(), full, reporter.as_ref()).await?;
    for stats in &report {
        println!(
            "{}: {} scanned, {} ingested, {} updated, {} skipped, {} parse errors",
            stats.harness, stats.sources_scanned, stats.conversations_ingested, stats.conversations_updated, stats.conversations_skipped, stats.parse_errors
        );
    }
    Ok(())
}

async fn run_status(cfg: &Config, json: bool) -> Result<()> {
    let pool = open_main(cfg).await?;
    let conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations").fetch_one(&pool).await?;
    let harnesses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM harnesses").fetch_one(&pool).await?;
    let prompts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM prompts").fetch_one(&pool).await?;
    let tool_calls: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tool_calls").fetch_one(&pool).await?;
    let top_workspaces = storage::queries::fetch_top_workspaces(&pool, 5).await?;
    let top_tools = storage::queries::fetch_top_tools(&pool, 5).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "conversations": conversations,
                "harnesses": harnesses,
                "prompts": prompts,
                "tool_calls": tool_calls,
                "top_workspaces": top_workspaces.iter().map(|w| serde_json::json!({"path": w.path, "conversations": w.conversation_count})).collect::<Vec<_>>(),
                "top_tools": top_tools.iter().map(|t| serde_json::json!({"name": t.name, "calls": t.call_count})).collect::<Vec<_>>(),
            }))?
        );
        return Ok(());
    }

    println!("{conversations} conversations across {harnesses} harnesses ({prompts} prompts, {tool_calls} tool calls)");
    println!("top workspaces:");
    for w in &top_workspaces {
        println!("  {} ({})", w.path, w.conversation_count);
    }
    println!("top tools:");
    for t in &top_tools {
        println!("  {} ({})", t.name, t.call_count);
    }
    Ok(())
}

async fn run_query(cfg: &Config, id: Option<String>, sql: Option<QueryAction>, json: bool) -> Result<()> {
    let pool = open_main(cfg).await?;
    if let Some(QueryAction::Sql { name }) = sql {
        let path = paths::queries_dir().join(format!("{name}.sql"));
        let query_text = std::fs::read_to_string(&path).with_context(|| format!("reading query '{name}' at {}", path.display()))?;
        let rows = sqlx::query(&query_text).fetch_all(&pool).await?;
        let values: Vec<serde_json::Value> = rows.iter().map(row_to_json).collect();
        println!("{}", serde_json::to_string_pretty(&values)?);
        return Ok(());
    }

    let Some(id) = id else { bail!("query requires a conversation id or `sql <name>`") };
    print_conversation(&pool, &id, json).await
}

async fn print_conversation(pool: &SqlitePool, conversation_id: &str, json: bool) -> Result<()> {
    let exchanges = storage::queries::fetch_exchanges(pool, Some(conversation_id), None).await?;
    if exchanges.is_empty() {
        bail!("no conversation found with id '{conversation_id}'");
    }
    if json {
        let payload: Vec<serde_json::Value> = exchanges
            .iter()
            .map(|e| serde_json::json!({"prompt_id": e.prompt_id, "timestamp": e.prompt_timestamp, "prompt": e.prompt_text, "response": e.response_text}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    for exchange in &exchanges {
        println!("--- {} ---", exchange.prompt_timestamp);
        println!("> {}", exchange.prompt_text);
        println!("{}", exchange.response_text);
        println!();
    }
    Ok(())
}

fn row_to_json(row: &sqlx::sqlite::SqliteRow) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    for column in row.columns() {
        let name = column.name();
        let value = row
            .try_get::<i64, _>(name)
            .map(serde_json::Value::from)
            .or_else(|_| row.try_get::<f64, _>(name).map(serde_json::Value::from))
            .or_else(|_| row.try_get::<String, _>(name).map(serde_json::Value::from))
            .unwrap_or(serde_json::Value::Null);
        obj.insert(name.to_string(), value);
    }
    serde_json::Value::Object(obj)
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("valid time")))
}

async fn run_search(cfg: &Config, args: SearchArgs, json: bool) -> Result<()> {
    let main_pool = open_main(cfg).await?;
    let embeddings_pool = db::connect_embeddings(cfg).await?;
    let backend = siftd::embeddings::backend::create_backend(&cfg.embedding)?;

    let mode = if args.first {
        Mode::First
    } else if args.conversations {
        Mode::Conversations
    } else {
        Mode::Default
    };
    let role = match args.role.as_deref() {
        Some("user") => Some(Role::User),
        Some("assistant") => Some(Role::Assistant),
        Some(other) => bail!("unknown --role value '{other}' (expected user|assistant)"),
        None => None,
    };

    let params = SearchParams {
        query: args.query.join(" "),
        workspace: args.workspace,
        model: args.model,
        since: args.since.as_deref().map(parse_date).transpose()?,
        before: args.before.as_deref().map(parse_date).transpose()?,
        tags: TagFilter { any_of: args.tag, all_of: args.all_tags, none_of: args.no_tag },
        role,
        mode,
        semantic_only: args.semantic,
        diversity: !args.no_diversity,
        lambda: args.lambda.unwrap_or(cfg.search.lambda),
        threshold: args.threshold.map(|t| t as f32).or(cfg.search.threshold.map(|t| t as f32)),
        limit: args.limit.unwrap_or(cfg.search.limit),
        recall: cfg.search.recall,
        exclude_active: cfg.search.exclude_active,
        exclude_derivative: cfg.search.exclude_derivative,
    };

    let outcome = retrieval::search(&main_pool, &embeddings_pool, backend.as_ref(), &params).await?;

    let payload = match &outcome {
        SearchOutcome::Chunks(results) => serde_json::to_value(
            results
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "conversation_id": r.conversation_id,
                        "chunk_id": r.chunk_id,
                        "text": r.text,
                        "score": r.score,
                        "workspace_path": r.workspace_path,
                        "conversation_started_at": r.conversation_started_at,
                        "file_references": r.file_references,
                    })
                })
                .collect::<Vec<_>>(),
        )?,
        SearchOutcome::Conversations(groups) => serde_json::to_value(
            groups
                .iter()
                .map(|g| {
                    serde_json::json!({
                        "conversation_id": g.conversation_id,
                        "max_score": g.max_score,
                        "mean_score": g.mean_score,
                        "chunk_count": g.chunk_count,
                        "best_excerpt": g.best_excerpt,
                        "workspace_path": g.workspace_path,
                        "conversation_started_at": g.conversation_started_at,
                    })
                })
                .collect::<Vec<_>>(),
        )?,
    };

    let formatter_name = if json { "json" } else { &cfg.search.formatter };
    let formatter = formatters::resolve(formatter_name, &paths::formatters_dir())?;
    print!("{}", formatter.format(&payload)?);
    Ok(())
}

async fn run_tag(cfg: &Config, entity_id: String, tag_name: String, session: Option<String>, exchange: Option<i64>) -> Result<()> {
    let pool = open_main(cfg).await?;

    if let Some(session_id) = session {
        let entity_type = if exchange.is_some() { "exchange" } else { "conversation" };
        let queued = sessions::queue_tag(&pool, &session_id, &tag_name, entity_type, exchange).await?;
        match queued {
            Some(_) => println!("queued tag '{tag_name}' for session {session_id}"),
            None => println!("tag '{tag_name}' already queued for session {session_id}"),
        }
        return Ok(());
    }

    let applied = storage::tags::apply_tag_by_name(&pool, TaggableEntity::Conversation, &entity_id, &tag_name).await?;
    if applied {
        println!("tagged conversation {entity_id} with '{tag_name}'");
    } else {
        println!("conversation {entity_id} already tagged '{tag_name}'");
    }
    Ok(())
}

async fn run_tags(cfg: &Config, json: bool) -> Result<()> {
    let pool = open_main(cfg).await?;
    let rows = sqlx::query("SELECT name FROM tags ORDER BY name").fetch_all(&pool).await?;
    let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else {
        for name in names {
            println!("{name}");
        }
    }
    Ok(())
}

async fn run_tools(cfg: &Config, limit: i64, json: bool) -> Result<()> {
    let pool = open_main(cfg).await?;
    let tools = storage::queries::fetch_top_tools(&pool, limit).await?;
    if json {
        let payload: Vec<_> = tools.iter().map(|t| serde_json::json!({"name": t.name, "calls": t.call_count})).collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for tool in &tools {
            println!("{} ({})", tool.name, tool.call_count);
        }
    }
    Ok(())
}

async fn run_backfill(cfg: &Config, action: BackfillAction, dry_run: bool) -> Result<()> {
    let pool = open_main(cfg).await?;
    if dry_run {
        eprintln!("--dry-run is not yet honored by every backfill operation; destructive steps are skipped where noted below");
    }
    match action {
        BackfillAction::Models => {
            let n = backfill::backfill_models(&pool).await?;
            println!("backfilled {n} model(s)");
        }
        BackfillAction::Providers => {
            let n = backfill::backfill_providers(&pool).await?;
            println!("backfilled {n} response provider id(s)");
        }
        BackfillAction::ShellTags => {
            let counts = backfill::backfill_shell_tags(&pool).await?;
            for (category, n) in counts {
                println!("shell:{category}: {n}");
            }
        }
        BackfillAction::ResponseAttributes => {
            let n = backfill::backfill_response_attributes(&pool).await?;
            println!("backfilled {n} response attribute row(s)");
        }
        BackfillAction::Derivative => {
            let n = backfill::backfill_derivative_tags(&pool).await?;
            println!("tagged {n} derivative conversation(s)");
        }
        BackfillAction::BinaryContent => {
            let stats = backfill::backfill_filter_binary(&pool, dry_run).await?;
            println!("filtered {}, skipped {}, errors {}", stats.filtered, stats.skipped, stats.errors);
        }
    }
    Ok(())
}

async fn run_migrate(cfg: &Config) -> Result<()> {
    let pool = open_main(cfg).await?;
    storage::migrate::run_migrations(&pool).await?;
    println!("migrations applied");
    Ok(())
}

async fn run_doctor(cfg: &Config, action: Option<DoctorAction>, fast: bool, strict: bool, json: bool) -> Result<()> {
    let main_pool = open_main(cfg).await.ok();
    let embeddings_pool = if main_pool.is_some() { db::connect_embeddings(cfg).await.ok() } else { None };
    let ctx = doctor::CheckContext { main_pool: main_pool.as_ref(), embeddings_pool: embeddings_pool.as_ref() };

    let findings = match action {
        None | Some(DoctorAction::Run) => doctor::run_all(&ctx, fast).await?,
        Some(DoctorAction::List) => {
            for check in doctor::all_checks() {
                let info = check.info();
                println!("{:<20} {:?} {}", info.name, info.cost, info.description);
            }
            return Ok(());
        }
        Some(DoctorAction::Check { name }) => {
            let Some(check) = doctor::find_check(&name) else { bail!("unknown check '{name}'") };
            check.run(&ctx).await?
        }
        Some(DoctorAction::Fix { check }) => {
            let Some(check) = doctor::find_check(&check) else { bail!("unknown check '{check}'") };
            let findings = check.run(&ctx).await?;
            for finding in &findings {
                if let Some(cmd) = &finding.fix_command {
                    println!("suggested fix for {}: {cmd}", finding.check);
                }
            }
            println!("doctor never executes fixes automatically; run the suggested command yourself");
            return Ok(());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
    } else {
        for finding in &findings {
            println!("[{:?}] {}: {}", finding.severity, finding.check, finding.message);
        }
    }

    let has_failure = findings.iter().any(|f| f.severity == doctor::Severity::Error || (strict && f.severity == doctor::Severity::Warning));
    if has_failure {
        std::process::exit(1);
    }
    Ok(())
}

fn run_copy(what: CopyWhat) -> Result<()> {
    let (kind_dir, name, dest) = match what {
        CopyWhat::Adapter { name, dest } => (paths::adapters_dir(), name, dest),
        CopyWhat::Query { name, dest } => (paths::queries_dir(), name, dest),
    };
    let src = kind_dir.join(&name);
    if !src.exists() {
        bail!("'{name}' not found under {}", kind_dir.display());
    }
    if src.is_dir() {
        copy_dir_recursive(&src, &dest)?;
    } else {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&src, &dest)?;
    }
    println!("copied {} to {}", src.display(), dest.display());
    Ok(())
}

fn copy_dir_recursive(src: &std::path::Path, dest: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

fn run_adapters(json: bool) -> Result<()> {
    let loaded = adapters::registry::load_all_adapters(&paths::adapters_dir());
    if json {
        let payload: Vec<_> = loaded
            .iter()
            .map(|a| {
                serde_json::json!({
                    "name": a.name(),
                    "harness_source": a.harness_source(),
                    "harness_log_format": a.harness_log_format(),
                    "supports_live_registration": a.supports_live_registration(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for adapter in &loaded {
            println!("{} ({}, {})", adapter.name(), adapter.harness_source(), adapter.harness_log_format());
        }
    }
    Ok(())
}

async fn run_peek(cfg: &Config, id: Option<String>, json: bool) -> Result<()> {
    let pool = open_main(cfg).await?;
    let Some(id) = id else {
        let rows = sqlx::query("SELECT id FROM conversations ORDER BY started_at DESC LIMIT 10").fetch_all(&pool).await?;
        for row in rows {
            let conversation_id: String = row.get("id");
            println!("{conversation_id}");
        }
        return Ok(());
    };
    print_conversation(&pool, &id, json).await
}

async fn run_export(cfg: &Config, id: Option<String>, out: Option<PathBuf>) -> Result<()> {
    let pool = open_main(cfg).await?;
    let ids: Vec<String> = match id {
        Some(id) => vec![id],
        None => sqlx::query_scalar("SELECT id FROM conversations").fetch_all(&pool).await?,
    };

    let mut conversations = Vec::with_capacity(ids.len());
    for conversation_id in &ids {
        let exchanges = storage::queries::fetch_exchanges(&pool, Some(conversation_id), None).await?;
        conversations.push(serde_json::json!({
            "conversation_id": conversation_id,
            "exchanges": exchanges.iter().map(|e| serde_json::json!({
                "prompt_id": e.prompt_id,
                "timestamp": e.prompt_timestamp,
                "prompt": e.prompt_text,
                "response": e.response_text,
            })).collect::<Vec<_>>(),
        }));
    }

    let payload = serde_json::to_string_pretty(&conversations)?;
    match out {
        Some(path) => {
            std::fs::write(&path, payload)?;
            println!("exported {} conversation(s) to {}", conversations.len(), path.display());
        }
        None => println!("{payload}"),
    }
    Ok(())
}

async fn run_register(cfg: &Config, harness_session_id: String, adapter: String, workspace_path: String) -> Result<()> {
    let pool = open_main(cfg).await?;
    sessions::register_session(&pool, &harness_session_id, &adapter, Some(&workspace_path)).await?;
    println!("registered session {harness_session_id} ({adapter})");
    Ok(())
}

fn run_session_id(workspace: String) -> Result<()> {
    let path = paths::session_id_path(&workspace);
    if let Some(existing) = std::fs::read_to_string(&path).ok().filter(|s| !s.trim().is_empty()) {
        println!("{}", existing.trim());
        return Ok(());
    }
    let id = siftd::domain::new_id().to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, &id)?;
    println!("{id}");
    Ok(())
}

fn run_path(which: PathWhich) -> Result<()> {
    let path = match which {
        PathWhich::Data => paths::data_home(),
        PathWhich::Config => paths::config_home(),
        PathWhich::State => paths::state_home(),
    };
    println!("{}", path.display());
    Ok(())
}

fn run_config(config_path: &std::path::Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
        ConfigAction::Get { key } => {
            let raw = std::fs::read_to_string(config_path).unwrap_or_default();
            let doc: toml::Value = toml::from_str(&raw).unwrap_or(toml::Value::Table(Default::default()));
            let value = key.split('.').try_fold(&doc, |acc, part| acc.get(part));
            match value {
                Some(v) => println!("{v}"),
                None => println!("(unset, using default)"),
            }
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            let raw = std::fs::read_to_string(config_path).unwrap_or_default();
            let mut doc: toml::Value = toml::from_str(&raw).unwrap_or(toml::Value::Table(Default::default()));
            set_toml_path(&mut doc, &key, value)?;
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(config_path, toml::to_string_pretty(&doc)?)?;
            println!("set {key} in {}", config_path.display());
            Ok(())
        }
    }
}

fn set_toml_path(doc: &mut toml::Value, dotted_key: &str, value: String) -> Result<()> {
    let parts: Vec<&str> = dotted_key.split('.').collect();
    let Some((leaf, parents)) = parts.split_last() else { bail!("empty key") };

    let mut cursor = doc;
    for part in parents {
        if !cursor.is_table() {
            *cursor = toml::Value::Table(Default::default());
        }
        let table = cursor.as_table_mut().expect("just ensured table");
        cursor = table.entry(part.to_string()).or_insert_with(|| toml::Value::Table(Default::default()));
    }
    if !cursor.is_table() {
        *cursor = toml::Value::Table(Default::default());
    }
    let table = cursor.as_table_mut().expect("just ensured table");
    let parsed = toml::Value::try_from(&value).unwrap_or(toml::Value::String(value));
    table.insert(leaf.to_string(), parsed);
    Ok(())
}

fn run_install(config_path: &std::path::Path, what: InstallWhat) -> Result<()> {
    let InstallWhat::Embed { backend, model, dimension, api_base, api_key_env } = what;
    let raw = std::fs::read_to_string(config_path).unwrap_or_default();
    let mut doc: toml::Value = toml::from_str(&raw).unwrap_or(toml::Value::Table(Default::default()));

    set_toml_path(&mut doc, "embedding.backend", backend)?;
    set_toml_path(&mut doc, "embedding.model", model)?;
    set_toml_path(&mut doc, "embedding.dimension", dimension.to_string())?;
    if let Some(api_base) = api_base {
        set_toml_path(&mut doc, "embedding.api_base", api_base)?;
    }
    if let Some(api_key_env) = api_key_env {
        set_toml_path(&mut doc, "embedding.api_key_env", api_key_env)?;
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, toml::to_string_pretty(&doc)?)?;
    println!("embedding backend configured in {}", config_path.display());
    Ok(())
}

async fn open_main(cfg: &Config) -> Result<SqlitePool> {
    let pool = db::connect_main(cfg).await?;
    storage::migrate::run_migrations(&pool).await?;
    Ok(pool)
}
