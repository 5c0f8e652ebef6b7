//! Live session tracking and pending tags, ported from
//! `examples/original_source/src/siftd/storage/sessions.py`.
//!
//! A harness that `supports_live_registration` (§4.1) can register its
//! in-progress session id before the corresponding log file is ever
//! ingested, then queue tags against it. Ingest later reconciles those
//! pending tags onto the stored conversation (or prompt, for exchange-level
//! tags) once the session's external id resolves to a real row.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::domain::new_id;

#[derive(Debug, Clone)]
pub struct PendingTag {
    pub tag_name: String,
    pub entity_type: String,
    pub exchange_index: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub harness_session_id: String,
    pub adapter_name: String,
    pub workspace_path: Option<String>,
    pub started_at: i64,
    pub last_seen_at: i64,
}

/// Upsert into `active_sessions`. On insert, `started_at` and `last_seen_at`
/// both become now; on update, only `last_seen_at` (and the denormalized
/// adapter/workspace fields) refresh — the original `started_at` is kept.
pub async fn register_session(pool: &SqlitePool, harness_session_id: &str, adapter_name: &str, workspace_path: Option<&str>) -> Result<String> {
    let now = Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO active_sessions (harness_session_id, adapter_name, workspace_path, started_at, last_seen_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(harness_session_id) DO UPDATE SET
            adapter_name = excluded.adapter_name,
            workspace_path = excluded.workspace_path,
            last_seen_at = excluded.last_seen_at",
    )
    .bind(harness_session_id)
    .bind(adapter_name)
    .bind(workspace_path)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(harness_session_id.to_string())
}

pub async fn unregister_session(pool: &SqlitePool, harness_session_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM active_sessions WHERE harness_session_id = ?").bind(harness_session_id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

/// Queue a tag for later application. Returns `None` if an identical pending
/// tag already exists for this session — SQLite's `UNIQUE` constraint treats
/// distinct `NULL`s as non-equal, so the duplicate check for
/// conversation-level tags (`exchange_index IS NULL`) is done explicitly
/// rather than relying on the constraint.
pub async fn queue_tag(pool: &SqlitePool, harness_session_id: &str, tag_name: &str, entity_type: &str, exchange_index: Option<i64>) -> Result<Option<String>> {
    let duplicate: Option<i64> = match exchange_index {
        None => {
            sqlx::query_scalar(
                "SELECT 1 FROM pending_tags WHERE harness_session_id = ? AND tag_name = ? AND entity_type = ? AND exchange_index IS NULL",
            )
            .bind(harness_session_id)
            .bind(tag_name)
            .bind(entity_type)
            .fetch_optional(pool)
            .await?
        }
        Some(index) => {
            sqlx::query_scalar(
                "SELECT 1 FROM pending_tags WHERE harness_session_id = ? AND tag_name = ? AND entity_type = ? AND exchange_index = ?",
            )
            .bind(harness_session_id)
            .bind(tag_name)
            .bind(entity_type)
            .bind(index)
            .fetch_optional(pool)
            .await?
        }
    };
    if duplicate.is_some() {
        return Ok(None);
    }

    let id = new_id().to_string();
    sqlx::query(
        "INSERT INTO pending_tags (id, harness_session_id, tag_name, entity_type, exchange_index, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(harness_session_id)
    .bind(tag_name)
    .bind(entity_type)
    .bind(exchange_index)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(Some(id))
}

pub async fn get_pending_tags(pool: &SqlitePool, harness_session_id: &str) -> Result<Vec<PendingTag>> {
    let rows = sqlx::query("SELECT tag_name, entity_type, exchange_index FROM pending_tags WHERE harness_session_id = ? ORDER BY created_at")
        .bind(harness_session_id)
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|r| PendingTag { tag_name: r.get("tag_name"), entity_type: r.get("entity_type"), exchange_index: r.get("exchange_index") })
        .collect())
}

/// Read and delete every pending tag for a session in one step, so a crash
/// between read and delete never double-applies a tag.
pub async fn consume_pending_tags(pool: &SqlitePool, harness_session_id: &str) -> Result<Vec<PendingTag>> {
    let tags = get_pending_tags(pool, harness_session_id).await?;
    sqlx::query("DELETE FROM pending_tags WHERE harness_session_id = ?").bind(harness_session_id).execute(pool).await?;
    Ok(tags)
}

pub async fn is_session_registered(pool: &SqlitePool, harness_session_id: &str) -> Result<bool> {
    let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM active_sessions WHERE harness_session_id = ?")
        .bind(harness_session_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

pub async fn get_session_info(pool: &SqlitePool, harness_session_id: &str) -> Result<Option<SessionInfo>> {
    let row = sqlx::query("SELECT harness_session_id, adapter_name, workspace_path, started_at, last_seen_at FROM active_sessions WHERE harness_session_id = ?")
        .bind(harness_session_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| SessionInfo {
        harness_session_id: r.get("harness_session_id"),
        adapter_name: r.get("adapter_name"),
        workspace_path: r.get("workspace_path"),
        started_at: r.get("started_at"),
        last_seen_at: r.get("last_seen_at"),
    }))
}

/// Delete sessions (and their pending tags) whose `last_seen_at` is older
/// than `max_age_hours`, plus any pending tags orphaned by a session that
/// was deleted or never registered. Returns `(sessions_deleted, tags_deleted)`.
pub async fn cleanup_stale_sessions(pool: &SqlitePool, max_age_hours: i64) -> Result<(u64, u64)> {
    let cutoff = Utc::now().timestamp() - max_age_hours * 3600;

    let stale_ids: Vec<String> =
        sqlx::query_scalar("SELECT harness_session_id FROM active_sessions WHERE COALESCE(last_seen_at, started_at) < ?").bind(cutoff).fetch_all(pool).await?;

    let mut tags_deleted = 0u64;
    let mut sessions_deleted = 0u64;

    if !stale_ids.is_empty() {
        let placeholders = stale_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");

        let delete_tags_sql = format!("DELETE FROM pending_tags WHERE harness_session_id IN ({placeholders})");
        let mut query = sqlx::query(&delete_tags_sql);
        for id in &stale_ids {
            query = query.bind(id);
        }
        tags_deleted += query.execute(pool).await?.rows_affected();

        let delete_sessions_sql = format!("DELETE FROM active_sessions WHERE harness_session_id IN ({placeholders})");
        let mut query = sqlx::query(&delete_sessions_sql);
        for id in &stale_ids {
            query = query.bind(id);
        }
        sessions_deleted += query.execute(pool).await?.rows_affected();
    }

    let orphaned = sqlx::query(
        "DELETE FROM pending_tags WHERE created_at < ? AND harness_session_id NOT IN (SELECT harness_session_id FROM active_sessions)",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    tags_deleted += orphaned.rows_affected();

    Ok((sessions_deleted, tags_deleted))
}

pub async fn get_orphaned_pending_tags_count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM pending_tags WHERE harness_session_id NOT IN (SELECT harness_session_id FROM active_sessions)")
        .fetch_one(pool)
        .await?)
}

pub async fn get_stale_sessions_count(pool: &SqlitePool, max_age_hours: i64) -> Result<i64> {
    let cutoff = Utc::now().timestamp() - max_age_hours * 3600;
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM active_sessions WHERE COALESCE(last_seen_at, started_at) < ?").bind(cutoff).fetch_one(pool).await?)
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
    async fn register_then_reregister_keeps_started_at() {
        let pool = memory_pool().await;
        register_session(&pool, "sess-1", "claude_code", Some("/repo")).await.unwrap();
        let first = get_session_info(&pool, "sess-1").await.unwrap().unwrap();
        register_session(&pool, "sess-1", "claude_code", Some("/repo")).await.unwrap();
        let second = get_session_info(&pool, "sess-1").await.unwrap().unwrap();
        assert_eq!(first.started_at, second.started_at);
    }

    #[tokio::test]
    async fn queue_tag_rejects_exact_duplicate() {
        let pool = memory_pool().await;
        register_session(&pool, "sess-1", "claude_code", None).await.unwrap();
        let first = queue_tag(&pool, "sess-1", "bug-fix", "conversation", None).await.unwrap();
        let second = queue_tag(&pool, "sess-1", "bug-fix", "conversation", None).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn consume_pending_tags_drains_and_deletes() {
        let pool = memory_pool().await;
        register_session(&pool, "sess-1", "claude_code", None).await.unwrap();
        queue_tag(&pool, "sess-1", "bug-fix", "conversation", None).await.unwrap();
        queue_tag(&pool, "sess-1", "reviewed", "exchange", Some(2)).await.unwrap();

        let tags = consume_pending_tags(&pool, "sess-1").await.unwrap();
        assert_eq!(tags.len(), 2);
        assert!(get_pending_tags(&pool, "sess-1").await.unwrap().is_empty());
    }
}
