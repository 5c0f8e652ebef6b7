//! Shared text-retrieval SQL primitives (§4.9), used by both the embeddings
//! chunker and the retrieval engine so exchange text is assembled exactly
//! the same way in both places.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

#[derive(Debug, Clone)]
pub struct Exchange {
    pub conversation_id: String,
    pub prompt_id: String,
    pub prompt_timestamp: i64,
    pub prompt_text: String,
    pub response_text: String,
}

/// Ordered `(prompt, joined-response)` exchanges for a conversation, or for
/// an explicit set of prompt ids. Returns immediately with no rows if both
/// filters are absent or empty — never an unbounded scan.
pub async fn fetch_exchanges(pool: &SqlitePool, conversation_id: Option<&str>, prompt_ids: Option<&[String]>) -> Result<Vec<Exchange>> {
    if conversation_id.is_none() && prompt_ids.map_or(true, |ids| ids.is_empty()) {
        return Ok(Vec::new());
    }

    let prompt_rows = if let Some(ids) = prompt_ids.filter(|ids| !ids.is_empty()) {
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("SELECT id, conversation_id, timestamp FROM prompts WHERE id IN ({placeholders}) ORDER BY conversation_id, prompt_index");
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.fetch_all(pool).await?
    } else {
        sqlx::query("SELECT id, conversation_id, timestamp FROM prompts WHERE conversation_id = ? ORDER BY prompt_index")
            .bind(conversation_id.unwrap())
            .fetch_all(pool)
            .await?
    };

    let mut exchanges = Vec::with_capacity(prompt_rows.len());
    for row in prompt_rows {
        let prompt_id: String = row.get("id");
        let conv_id: String = row.get("conversation_id");
        let timestamp: i64 = row.get("timestamp");

        let prompt_text = joined_text(pool, "prompt_content", "prompt_id", &prompt_id).await?;

        let response_rows = sqlx::query("SELECT id FROM responses WHERE prompt_id = ? ORDER BY timestamp")
            .bind(&prompt_id)
            .fetch_all(pool)
            .await?;
        let mut response_texts = Vec::with_capacity(response_rows.len());
        for r in &response_rows {
            let response_id: String = r.get("id");
            let text = joined_text(pool, "response_content", "response_id", &response_id).await?;
            if !text.is_empty() {
                response_texts.push(text);
            }
        }

        exchanges.push(Exchange {
            conversation_id: conv_id,
            prompt_id,
            prompt_timestamp: timestamp,
            prompt_text,
            response_text: response_texts.join("\n\n"),
        });
    }

    Ok(exchanges)
}

async fn joined_text(pool: &SqlitePool, table: &str, fk_column: &str, owner_id: &str) -> Result<String> {
    let sql = format!("SELECT text FROM {table} WHERE {fk_column} = ? AND text IS NOT NULL ORDER BY block_index");
    let rows = sqlx::query(&sql).bind(owner_id).fetch_all(pool).await?;
    let joined = rows.iter().map(|r| r.get::<String, _>("text")).collect::<Vec<_>>().join("\n");
    Ok(joined.trim().to_string())
}

#[derive(Debug, Clone)]
pub struct WorkspaceCount {
    pub path: String,
    pub conversation_count: i64,
}

pub async fn fetch_top_workspaces(pool: &SqlitePool, limit: i64) -> Result<Vec<WorkspaceCount>> {
    let rows = sqlx::query(
        "SELECT w.path AS path, COUNT(c.id) AS n FROM workspaces w
         JOIN conversations c ON c.workspace_id = w.id
         GROUP BY w.id HAVING n >= 1 ORDER BY n DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| WorkspaceCount { path: r.get("path"), conversation_count: r.get("n") }).collect())
}

#[derive(Debug, Clone)]
pub struct ToolCount {
    pub name: String,
    pub call_count: i64,
}

pub async fn fetch_top_tools(pool: &SqlitePool, limit: i64) -> Result<Vec<ToolCount>> {
    let rows = sqlx::query(
        "SELECT t.name AS name, COUNT(tc.id) AS n FROM tools t
         JOIN tool_calls tc ON tc.tool_id = t.id
         GROUP BY t.id HAVING n >= 1 ORDER BY n DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| ToolCount { name: r.get("name"), call_count: r.get("n") }).collect())
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
    async fn missing_filters_return_empty_immediately() {
        let pool = memory_pool().await;
        let exchanges = fetch_exchanges(&pool, None, None).await.unwrap();
        assert!(exchanges.is_empty());
    }

    #[tokio::test]
    async fn joins_multi_response_texts_with_blank_line() {
        let pool = memory_pool().await;
        sqlx::query("INSERT INTO harnesses (id, name, source, log_format, display_name) VALUES ('h1','claude_code','anthropic','jsonl','Claude Code')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO conversations (id, harness_id, external_id, started_at) VALUES ('c1','h1','ext-1',100)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO prompts (id, conversation_id, prompt_index, timestamp) VALUES ('p1','c1',0,100)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO prompt_content (id, prompt_id, block_index, block_type, text) VALUES ('pc1','p1',0,'text','what files changed?')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO responses (id, prompt_id, conversation_id, timestamp) VALUES ('r1','p1','c1',101)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO response_content (id, response_id, block_index, block_type, text) VALUES ('rc1','r1',0,'text','a.rs')").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO responses (id, prompt_id, conversation_id, timestamp) VALUES ('r2','p1','c1',102)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO response_content (id, response_id, block_index, block_type, text) VALUES ('rc2','r2',0,'text','b.rs')").execute(&pool).await.unwrap();

        let exchanges = fetch_exchanges(&pool, Some("c1"), None).await.unwrap();
        assert_eq!(exchanges.len(), 1);
        assert_eq!(exchanges[0].prompt_text, "what files changed?");
        assert_eq!(exchanges[0].response_text, "a.rs\n\nb.rs");
    }
}
