//! Embeddings database schema and chunk storage (§3.5).
//!
//! A derived artifact, separate from the main store: may be deleted and
//! rebuilt without losing any conversation data.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::vector::vec_to_blob;
use crate::domain::new_id;

pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            chunk_type TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            token_count INTEGER NOT NULL,
            source_ids TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_conversation ON chunks(conversation_id);

        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct IndexMeta {
    pub schema_version: u32,
    pub backend: String,
    pub model: String,
    pub dimension: usize,
    pub strategy: String,
    pub target_tokens: u32,
    pub max_tokens: u32,
    pub overlap_tokens: u32,
    pub built_at: i64,
}

const META_KEYS: &[&str] =
    &["schema_version", "backend", "model", "dimension", "strategy", "target_tokens", "max_tokens", "overlap_tokens", "built_at"];

pub async fn read_index_meta(pool: &SqlitePool) -> Result<Option<IndexMeta>> {
    let mut values = std::collections::HashMap::new();
    for key in META_KEYS {
        if let Some(v) = sqlx::query_scalar::<_, String>("SELECT value FROM index_meta WHERE key = ?").bind(key).fetch_optional(pool).await? {
            values.insert(*key, v);
        }
    }
    if values.len() != META_KEYS.len() {
        return Ok(None);
    }
    Ok(Some(IndexMeta {
        schema_version: values["schema_version"].parse()?,
        backend: values["backend"].clone(),
        model: values["model"].clone(),
        dimension: values["dimension"].parse()?,
        strategy: values["strategy"].clone(),
        target_tokens: values["target_tokens"].parse()?,
        max_tokens: values["max_tokens"].parse()?,
        overlap_tokens: values["overlap_tokens"].parse()?,
        built_at: values["built_at"].parse()?,
    }))
}

pub async fn write_index_meta(pool: &SqlitePool, meta: &IndexMeta) -> Result<()> {
    let pairs: [(&str, String); 9] = [
        ("schema_version", meta.schema_version.to_string()),
        ("backend", meta.backend.clone()),
        ("model", meta.model.clone()),
        ("dimension", meta.dimension.to_string()),
        ("strategy", meta.strategy.clone()),
        ("target_tokens", meta.target_tokens.to_string()),
        ("max_tokens", meta.max_tokens.to_string()),
        ("overlap_tokens", meta.overlap_tokens.to_string()),
        ("built_at", meta.built_at.to_string()),
    ];
    for (key, value) in pairs {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }
    Ok(())
}

pub async fn clear_all(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM chunks").execute(pool).await?;
    sqlx::query("DELETE FROM index_meta").execute(pool).await?;
    Ok(())
}

/// The set of conversation ids that already have at least one chunk.
pub async fn indexed_conversation_ids(pool: &SqlitePool) -> Result<std::collections::HashSet<String>> {
    let rows = sqlx::query("SELECT DISTINCT conversation_id FROM chunks").fetch_all(pool).await?;
    Ok(rows.iter().map(|r| r.get("conversation_id")).collect())
}

pub struct NewChunk {
    pub conversation_id: String,
    pub chunk_type: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub token_count: u32,
    pub source_ids: Vec<String>,
}

pub async fn insert_chunk(pool: &SqlitePool, chunk: &NewChunk) -> Result<String> {
    let id = new_id().to_string();
    sqlx::query(
        "INSERT INTO chunks (id, conversation_id, chunk_type, text, embedding, token_count, source_ids, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&chunk.conversation_id)
    .bind(&chunk.chunk_type)
    .bind(&chunk.text)
    .bind(vec_to_blob(&chunk.embedding))
    .bind(chunk.token_count)
    .bind(serde_json::to_string(&chunk.source_ids)?)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(id)
}

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub id: String,
    pub conversation_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub source_ids: Vec<String>,
}

pub async fn chunks_for_conversations(pool: &SqlitePool, conversation_ids: Option<&std::collections::HashSet<String>>) -> Result<Vec<StoredChunk>> {
    let rows = sqlx::query("SELECT id, conversation_id, text, embedding, source_ids FROM chunks").fetch_all(pool).await?;
    let mut chunks = Vec::new();
    for row in rows {
        let conversation_id: String = row.get("conversation_id");
        if let Some(filter) = conversation_ids {
            if !filter.contains(&conversation_id) {
                continue;
            }
        }
        let embedding_blob: Vec<u8> = row.get("embedding");
        let source_ids: String = row.get("source_ids");
        chunks.push(StoredChunk {
            id: row.get("id"),
            conversation_id,
            text: row.get("text"),
            embedding: super::vector::blob_to_vec(&embedding_blob),
            source_ids: serde_json::from_str(&source_ids).unwrap_or_default(),
        });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn round_trips_a_chunk() {
        let pool = memory_pool().await;
        let id = insert_chunk(
            &pool,
            &NewChunk {
                conversation_id: "conv-1".to_string(),
                chunk_type: "exchange".to_string(),
                text: "hello world".to_string(),
                embedding: vec![1.0, 2.0, 3.0],
                token_count: 3,
                source_ids: vec!["prompt-1".to_string()],
            },
        )
        .await
        .unwrap();

        let chunks = chunks_for_conversations(&pool, None).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, id);
        assert_eq!(chunks[0].embedding, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn index_meta_round_trips() {
        let pool = memory_pool().await;
        assert!(read_index_meta(&pool).await.unwrap().is_none());
        let meta = IndexMeta {
            schema_version: 1,
            backend: "http".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            strategy: "exchange-window".to_string(),
            target_tokens: 256,
            max_tokens: 512,
            overlap_tokens: 25,
            built_at: 100,
        };
        write_index_meta(&pool, &meta).await.unwrap();
        let read_back = read_index_meta(&pool).await.unwrap().unwrap();
        assert_eq!(read_back.model, "text-embedding-3-small");
        assert_eq!(read_back.dimension, 1536);
    }
}
