//! Uniform check system (§4.10), ported from
//! `examples/original_source/src/siftd/doctor/checks.py`. Concrete check
//! behavior is cross-grounded against a sibling project's doctor test suite
//! since the reference `checks.py` only carries the `Check` protocol and
//! its dataclasses.
//!
//! Doctor only proposes fixes; `fix_command` is an advisory string, never
//! executed by this module.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::adapters::registry::load_all_adapters;
use crate::paths;
use crate::sessions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Cost {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub check: String,
    pub severity: Severity,
    pub message: String,
    pub fix_available: bool,
    pub fix_command: Option<String>,
    pub context: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
pub struct CheckInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub cost: Cost,
    pub requires_db: bool,
    pub requires_embed_db: bool,
    pub has_fix: bool,
}

/// Lazily-opened connections, mirroring the Python `CheckContext`'s
/// `_db_conn`/`_embed_conn` fields — here the pools are simply optional,
/// since callers open them up front rather than on first access.
pub struct CheckContext<'a> {
    pub main_pool: Option<&'a SqlitePool>,
    pub embeddings_pool: Option<&'a SqlitePool>,
}

impl<'a> CheckContext<'a> {
    fn require_main(&self, check: &str) -> Result<&'a SqlitePool> {
        self.main_pool.ok_or_else(|| anyhow::anyhow!("check '{check}' requires the main database"))
    }
}

#[async_trait]
pub trait Check: Send + Sync {
    fn info(&self) -> CheckInfo;
    async fn run(&self, ctx: &CheckContext<'_>) -> Result<Vec<Finding>>;
}

pub fn all_checks() -> Vec<Box<dyn Check>> {
    vec![
        Box::new(IngestPendingCheck),
        Box::new(EmbeddingsStaleCheck),
        Box::new(PricingGapsCheck),
        Box::new(DropInsValidCheck),
        Box::new(PendingTagsStaleCheck),
    ]
}

pub fn find_check(name: &str) -> Option<Box<dyn Check>> {
    all_checks().into_iter().find(|c| c.info().name == name)
}

/// Compares adapter-discovered sources against `ingested_files` and flags
/// harnesses with unparsed or never-seen source files.
pub struct IngestPendingCheck;

#[async_trait]
impl Check for IngestPendingCheck {
    fn info(&self) -> CheckInfo {
        CheckInfo {
            name: "ingest-pending",
            description: "checks for discoverable sources that have not yet been ingested",
            cost: Cost::Slow,
            requires_db: true,
            requires_embed_db: false,
            has_fix: true,
        }
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
        let pool = ctx.require_main("ingest-pending")?;
        let mut findings = Vec::new();

        let adapters = load_all_adapters(&paths::adapters_dir());
        for adapter in &adapters {
            let sources = adapter.discover(None).unwrap_or_default();
            let mut pending = 0u64;
            for source in &sources {
                if !adapter.can_handle(source) {
                    continue;
                }
                let path_str = source.path().to_string_lossy().to_string();
                let seen: Option<i64> = sqlx::query_scalar("SELECT 1 FROM ingested_files WHERE path = ?").bind(&path_str).fetch_optional(pool).await?;
                if seen.is_none() {
                    pending += 1;
                }
            }
            if pending > 0 {
                findings.push(Finding {
                    check: "ingest-pending".to_string(),
                    severity: Severity::Warning,
                    message: format!("{} has {pending} source file(s) not yet ingested", adapter.name()),
                    fix_available: true,
                    fix_command: Some(format!("siftd ingest --harness {}", adapter.name())),
                    context: serde_json::json!({"harness": adapter.name(), "pending": pending}),
                });
            }
        }

        let failed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingested_files WHERE error IS NOT NULL").fetch_one(pool).await?;
        if failed > 0 {
            findings.push(Finding {
                check: "ingest-pending".to_string(),
                severity: Severity::Error,
                message: format!("{failed} previously ingested file(s) failed to parse"),
                fix_available: false,
                fix_command: None,
                context: serde_json::json!({"failed": failed}),
            });
        }

        Ok(findings)
    }
}

/// Reports whether the embeddings database exists and, if so, how many
/// conversations have not yet been chunked into it.
pub struct EmbeddingsStaleCheck;

#[async_trait]
impl Check for EmbeddingsStaleCheck {
    fn info(&self) -> CheckInfo {
        CheckInfo {
            name: "embeddings-stale",
            description: "checks whether the embeddings index covers every ingested conversation",
            cost: Cost::Fast,
            requires_db: true,
            requires_embed_db: false,
            has_fix: true,
        }
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
        let pool = ctx.require_main("embeddings-stale")?;

        let Some(embed_pool) = ctx.embeddings_pool else {
            return Ok(vec![Finding {
                check: "embeddings-stale".to_string(),
                severity: Severity::Info,
                message: "embeddings database not found".to_string(),
                fix_available: true,
                fix_command: Some("siftd install embed".to_string()),
                context: serde_json::json!({}),
            }]);
        };

        let total_conversations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM conversations").fetch_one(pool).await?;
        let indexed_conversations: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT conversation_id) FROM chunks").fetch_one(embed_pool).await.unwrap_or(0);
        let stale = total_conversations - indexed_conversations;

        if stale <= 0 {
            return Ok(Vec::new());
        }

        Ok(vec![Finding {
            check: "embeddings-stale".to_string(),
            severity: Severity::Warning,
            message: format!("{stale} conversation(s) are not yet reflected in the embeddings index"),
            fix_available: true,
            fix_command: Some("re-run search once an embedding backend is configured to refresh the index".to_string()),
            context: serde_json::json!({"stale": stale, "total": total_conversations}),
        }])
    }
}

/// Flags models that appear in `responses` but have no row in `pricing`,
/// since cost reporting silently reads as zero for those models otherwise.
pub struct PricingGapsCheck;

#[async_trait]
impl Check for PricingGapsCheck {
    fn info(&self) -> CheckInfo {
        CheckInfo {
            name: "pricing-gaps",
            description: "checks for models used in responses that have no pricing row",
            cost: Cost::Fast,
            requires_db: true,
            requires_embed_db: false,
            has_fix: false,
        }
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
        let pool = ctx.require_main("pricing-gaps")?;

        let rows = sqlx::query(
            "SELECT DISTINCT m.id, m.raw_name FROM responses r
             JOIN models m ON m.id = r.model_id
             WHERE m.id NOT IN (SELECT model_id FROM pricing)
             ORDER BY m.raw_name",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let raw_name: String = row.get("raw_name");
                Finding {
                    check: "pricing-gaps".to_string(),
                    severity: Severity::Warning,
                    message: format!("model '{raw_name}' has no pricing data; cost reporting for it will read as zero"),
                    fix_available: false,
                    fix_command: None,
                    context: serde_json::json!({"model": raw_name}),
                }
            })
            .collect())
    }
}

/// Validates every drop-in adapter/formatter manifest and flags malformed
/// or empty drop-in query files. Files prefixed with `_` are scratch and
/// skipped, matching the drop-in loader's own convention.
pub struct DropInsValidCheck;

#[async_trait]
impl Check for DropInsValidCheck {
    fn info(&self) -> CheckInfo {
        CheckInfo {
            name: "drop-ins-valid",
            description: "validates drop-in adapter, formatter, and query files",
            cost: Cost::Fast,
            requires_db: false,
            requires_embed_db: false,
            has_fix: false,
        }
    }

    async fn run(&self, _ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
        let mut findings = Vec::new();

        for dir in [paths::adapters_dir(), paths::formatters_dir()] {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                if name.starts_with('_') {
                    continue;
                }
                let manifest_path = path.join("manifest.toml");
                if !manifest_path.exists() {
                    findings.push(Finding {
                        check: "drop-ins-valid".to_string(),
                        severity: Severity::Error,
                        message: format!("drop-in at {} has no manifest.toml", path.display()),
                        fix_available: false,
                        fix_command: None,
                        context: serde_json::json!({"path": path.to_string_lossy()}),
                    });
                    continue;
                }
                if let Err(err) = std::fs::read_to_string(&manifest_path).map_err(anyhow::Error::from).and_then(|raw| {
                    toml::from_str::<toml::Value>(&raw).map_err(anyhow::Error::from)
                }) {
                    findings.push(Finding {
                        check: "drop-ins-valid".to_string(),
                        severity: Severity::Error,
                        message: format!("{}: invalid manifest.toml: {err}", path.display()),
                        fix_available: false,
                        fix_command: None,
                        context: serde_json::json!({"path": path.to_string_lossy()}),
                    });
                }
            }
        }

        let queries_dir = paths::queries_dir();
        if let Ok(entries) = std::fs::read_dir(&queries_dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                    continue;
                }
                let name = path.file_stem().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
                if name.starts_with('_') {
                    continue;
                }
                match std::fs::read_to_string(&path) {
                    Ok(contents) if contents.trim().is_empty() => {
                        findings.push(Finding {
                            check: "drop-ins-valid".to_string(),
                            severity: Severity::Warning,
                            message: format!("query file {} is empty", path.display()),
                            fix_available: false,
                            fix_command: None,
                            context: serde_json::json!({"path": path.to_string_lossy()}),
                        });
                    }
                    Err(err) => {
                        findings.push(Finding {
                            check: "drop-ins-valid".to_string(),
                            severity: Severity::Error,
                            message: format!("{}: {err}", path.display()),
                            fix_available: false,
                            fix_command: None,
                            context: serde_json::json!({"path": path.to_string_lossy()}),
                        });
                    }
                    _ => {}
                }
            }
        }

        Ok(findings)
    }
}

/// Flags live sessions and orphaned pending tags that have gone stale,
/// meaning a harness registered a session but never ingested the matching
/// log (or the log never produced a matching conversation).
pub struct PendingTagsStaleCheck;

const STALE_SESSION_MAX_AGE_HOURS: i64 = 24;

#[async_trait]
impl Check for PendingTagsStaleCheck {
    fn info(&self) -> CheckInfo {
        CheckInfo {
            name: "pending-tags-stale",
            description: "checks for stale live sessions and orphaned pending tags",
            cost: Cost::Fast,
            requires_db: true,
            requires_embed_db: false,
            has_fix: true,
        }
    }

    async fn run(&self, ctx: &CheckContext<'_>) -> Result<Vec<Finding>> {
        let pool = ctx.require_main("pending-tags-stale")?;
        let mut findings = Vec::new();

        let stale_sessions = sessions::get_stale_sessions_count(pool, STALE_SESSION_MAX_AGE_HOURS).await?;
        if stale_sessions > 0 {
            findings.push(Finding {
                check: "pending-tags-stale".to_string(),
                severity: Severity::Warning,
                message: format!("{stale_sessions} live session(s) have not been seen in over {STALE_SESSION_MAX_AGE_HOURS}h"),
                fix_available: true,
                fix_command: Some("siftd doctor fix pending-tags-stale".to_string()),
                context: serde_json::json!({"stale_sessions": stale_sessions}),
            });
        }

        let orphaned_tags = sessions::get_orphaned_pending_tags_count(pool).await?;
        if orphaned_tags > 0 {
            findings.push(Finding {
                check: "pending-tags-stale".to_string(),
                severity: Severity::Warning,
                message: format!("{orphaned_tags} pending tag(s) reference a session that is no longer registered"),
                fix_available: true,
                fix_command: Some("siftd doctor fix pending-tags-stale".to_string()),
                context: serde_json::json!({"orphaned_tags": orphaned_tags}),
            });
        }

        Ok(findings)
    }
}

/// Runs every check whose prerequisites are satisfied by `ctx`, skipping
/// (not failing) a check that requires a database the caller didn't open.
pub async fn run_all(ctx: &CheckContext<'_>, fast_only: bool) -> Result<Vec<Finding>> {
    let mut findings = Vec::new();
    for check in all_checks() {
        let info = check.info();
        if fast_only && info.cost != Cost::Fast {
            continue;
        }
        if info.requires_db && ctx.main_pool.is_none() {
            continue;
        }
        if info.requires_embed_db && ctx.embeddings_pool.is_none() {
            continue;
        }
        findings.extend(check.run(ctx).await?);
    }
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::storage::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn pricing_gaps_empty_on_fresh_db() {
        let pool = memory_pool().await;
        let ctx = CheckContext { main_pool: Some(&pool), embeddings_pool: None };
        let findings = PricingGapsCheck.run(&ctx).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn embeddings_stale_reports_missing_db() {
        let pool = memory_pool().await;
        let ctx = CheckContext { main_pool: Some(&pool), embeddings_pool: None };
        let findings = EmbeddingsStaleCheck.run(&ctx).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn pending_tags_stale_clean_on_fresh_db() {
        let pool = memory_pool().await;
        let ctx = CheckContext { main_pool: Some(&pool), embeddings_pool: None };
        let findings = PendingTagsStaleCheck.run(&ctx).await.unwrap();
        assert!(findings.is_empty());
    }

    #[tokio::test]
    async fn run_all_skips_checks_missing_prerequisites() {
        let pool = memory_pool().await;
        let ctx = CheckContext { main_pool: Some(&pool), embeddings_pool: None };
        let findings = run_all(&ctx, false).await.unwrap();
        assert!(findings.iter().all(|f| f.check != "embeddings-stale" || f.severity == Severity::Info));
    }
}
