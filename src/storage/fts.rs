//! Full-text recall over prompt/response content (§3.4, §4.4).

use anyhow::Result;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use std::collections::HashSet;

pub async fn insert_fts_content<'e, E>(
    executor: E,
    content_id: &str,
    side: &str,
    conversation_id: &str,
    text: &str,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("INSERT INTO content_fts (conversation_id, side, content_id, text) VALUES (?, ?, ?, ?)")
        .bind(conversation_id)
        .bind(side)
        .bind(content_id)
        .bind(text)
        .execute(executor)
        .await?;
    Ok(())
}

/// Repopulate `content_fts` from scratch by walking every text-bearing
/// prompt/response content block.
pub async fn rebuild_fts_index(pool: &SqlitePool) -> Result<u64> {
    sqlx::query("DELETE FROM content_fts").execute(pool).await?;

    let mut inserted = 0u64;

    let prompt_rows = sqlx::query(
        "SELECT pc.id, pc.text, p.conversation_id FROM prompt_content pc
         JOIN prompts p ON p.id = pc.prompt_id
         WHERE pc.text IS NOT NULL AND pc.text != ''",
    )
    .fetch_all(pool)
    .await?;
    for row in prompt_rows {
        let id: String = row.get("id");
        let text: String = row.get("text");
        let conversation_id: String = row.get("conversation_id");
        insert_fts_content(pool, &id, "prompt", &conversation_id, &text).await?;
        inserted += 1;
    }

    let response_rows = sqlx::query(
        "SELECT rc.id, rc.text, r.conversation_id FROM response_content rc
         JOIN responses r ON r.id = rc.response_id
         WHERE rc.text IS NOT NULL AND rc.text != ''",
    )
    .fetch_all(pool)
    .await?;
    for row in response_rows {
        let id: String = row.get("id");
        let text: String = row.get("text");
        let conversation_id: String = row.get("conversation_id");
        insert_fts_content(pool, &id, "response", &conversation_id, &text).await?;
        inserted += 1;
    }

    Ok(inserted)
}

fn tokenize(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn escape_fts_term(term: &str) -> String {
    format!("\"{}\"", term.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallMode {
    And,
    Or,
    None,
}

impl RecallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecallMode::And => "and",
            RecallMode::Or => "or",
            RecallMode::None => "none",
        }
    }
}

/// FTS recall with AND-first, OR-fallback semantics (§4.4).
pub async fn fts5_recall_conversations(pool: &SqlitePool, query: &str, limit: i64) -> Result<(HashSet<String>, RecallMode)> {
    let terms = tokenize(query);
    if terms.is_empty() {
        return Ok((HashSet::new(), RecallMode::None));
    }

    let and_query = terms.iter().map(|t| escape_fts_term(t)).collect::<Vec<_>>().join(" ");
    let and_hits = recall_with_match(pool, &and_query, limit).await?;
    if !and_hits.is_empty() {
        return Ok((and_hits, RecallMode::And));
    }

    let or_query = terms.iter().map(|t| escape_fts_term(t)).collect::<Vec<_>>().join(" OR ");
    let or_hits = recall_with_match(pool, &or_query, limit).await?;
    if !or_hits.is_empty() {
        return Ok((or_hits, RecallMode::Or));
    }

    Ok((HashSet::new(), RecallMode::None))
}

async fn recall_with_match(pool: &SqlitePool, match_expr: &str, limit: i64) -> Result<HashSet<String>> {
    let rows = sqlx::query(
        "SELECT DISTINCT conversation_id FROM content_fts WHERE content_fts MATCH ? LIMIT ?",
    )
    .bind(match_expr)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("conversation_id")).collect())
}

#[derive(Debug, Clone)]
pub struct ContentHit {
    pub conversation_id: String,
    pub side: String,
    pub snippet: String,
    pub rank: f64,
}

/// Ranked snippet search over `content_fts`, ordered by BM25 `rank`.
pub async fn search_content(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<ContentHit>> {
    let terms = tokenize(query);
    if terms.is_empty() {
        return Ok(Vec::new());
    }
    let match_expr = terms.iter().map(|t| escape_fts_term(t)).collect::<Vec<_>>().join(" OR ");

    let rows = sqlx::query(
        "SELECT conversation_id, side, snippet(content_fts, 3, '[', ']', '...', 10) AS snippet, rank
         FROM content_fts WHERE content_fts MATCH ? ORDER BY rank LIMIT ?",
    )
    .bind(&match_expr)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|r| ContentHit {
            conversation_id: r.get("conversation_id"),
            side: r.get("side"),
            snippet: r.get("snippet"),
            rank: r.get("rank"),
        })
        .collect())
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
    async fn and_mode_requires_all_terms() {
        let pool = memory_pool().await;
        insert_fts_content(&pool, "c1", "prompt", "conv-1", "redis cache strategy discussion").await.unwrap();
        insert_fts_content(&pool, "c2", "prompt", "conv-2", "unrelated note that mentions cache only").await.unwrap();

        let (hits, mode) = fts5_recall_conversations(&pool, "redis cache", 50).await.unwrap();
        assert_eq!(mode, RecallMode::And);
        assert!(hits.contains("conv-1"));
        assert!(!hits.contains("conv-2"));
    }

    #[tokio::test]
    async fn falls_back_to_or_when_and_yields_nothing() {
        let pool = memory_pool().await;
        insert_fts_content(&pool, "c1", "prompt", "conv-1", "redis notes").await.unwrap();
        insert_fts_content(&pool, "c2", "prompt", "conv-2", "cache notes").await.unwrap();

        let (hits, mode) = fts5_recall_conversations(&pool, "redis cache", 50).await.unwrap();
        assert_eq!(mode, RecallMode::Or);
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn no_matches_returns_none_mode() {
        let pool = memory_pool().await;
        let (hits, mode) = fts5_recall_conversations(&pool, "nonexistent", 50).await.unwrap();
        assert_eq!(mode, RecallMode::None);
        assert!(hits.is_empty());
    }
}
