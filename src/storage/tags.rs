//! Tag identity and the four tag join tables (§3.1, §4.11).

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::domain::new_id;

pub const DERIVATIVE_TAG: &str = "siftd:derivative";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggableEntity {
    Conversation,
    Workspace,
    ToolCall,
    Prompt,
}

impl TaggableEntity {
    fn join_table(self) -> &'static str {
        match self {
            TaggableEntity::Conversation => "conversation_tags",
            TaggableEntity::Workspace => "workspace_tags",
            TaggableEntity::ToolCall => "tool_call_tags",
            TaggableEntity::Prompt => "prompt_tags",
        }
    }

    fn entity_column(self) -> &'static str {
        match self {
            TaggableEntity::Conversation => "conversation_id",
            TaggableEntity::Workspace => "workspace_id",
            TaggableEntity::ToolCall => "tool_call_id",
            TaggableEntity::Prompt => "prompt_id",
        }
    }
}

pub async fn get_or_create_tag(pool: &SqlitePool, name: &str) -> Result<String> {
    if let Some(id) = sqlx::query_scalar::<_, String>("SELECT id FROM tags WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }
    let id = new_id().to_string();
    sqlx::query("INSERT OR IGNORE INTO tags (id, name) VALUES (?, ?)").bind(&id).bind(name).execute(pool).await?;
    // Another writer may have raced us; re-read to be sure we return the stored id.
    let id = sqlx::query_scalar::<_, String>("SELECT id FROM tags WHERE name = ?").bind(name).fetch_one(pool).await?;
    Ok(id)
}

/// Apply a tag to an entity. Returns `false` (duplicate, benign per §7) if
/// already applied.
pub async fn apply_tag(pool: &SqlitePool, entity: TaggableEntity, entity_id: &str, tag_id: &str) -> Result<bool> {
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}, tag_id) VALUES (?, ?)",
        entity.join_table(),
        entity.entity_column()
    );
    let result = sqlx::query(&sql).bind(entity_id).bind(tag_id).execute(pool).await?;
    Ok(result.rows_affected() > 0)
}

pub async fn apply_tag_by_name(pool: &SqlitePool, entity: TaggableEntity, entity_id: &str, tag_name: &str) -> Result<bool> {
    let tag_id = get_or_create_tag(pool, tag_name).await?;
    apply_tag(pool, entity, entity_id, &tag_id).await
}

/// Conversation ids currently registered in `active_sessions` by
/// `external_id` match — excluded from search by default (§4.6 Stage A).
pub async fn active_conversation_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT c.id FROM conversations c
         JOIN active_sessions s ON s.harness_session_id = c.external_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

pub async fn conversation_ids_with_tag(pool: &SqlitePool, tag_name: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT ct.conversation_id FROM conversation_tags ct
         JOIN tags t ON t.id = ct.tag_id WHERE t.name = ?",
    )
    .bind(tag_name)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("conversation_id")).collect())
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
    async fn applying_same_tag_twice_is_a_benign_duplicate() {
        let pool = memory_pool().await;
        let tag_id = get_or_create_tag(&pool, "research:auth").await.unwrap();
        let first = apply_tag(&pool, TaggableEntity::Conversation, "conv-1", &tag_id).await.unwrap();
        let second = apply_tag(&pool, TaggableEntity::Conversation, "conv-1", &tag_id).await.unwrap();
        assert!(first);
        assert!(!second);
    }
}
