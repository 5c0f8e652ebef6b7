//! Indexer orchestration (§4.5 "Indexer").

use anyhow::Result;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::backend::EmbeddingBackend;
use super::chunk::{chunk_exchanges, ChunkParams};
use super::store::{self, IndexMeta, NewChunk};
use crate::config::IndexerConfig;
use crate::error::Error;
use crate::storage::queries::fetch_exchanges;

pub struct IndexReport {
    pub conversations_indexed: u64,
    pub chunks_written: u64,
    pub rebuilt: bool,
}

/// Build or incrementally extend the embeddings index.
///
/// `total_chunks == 0` is treated as full-rebuild-equivalent even when
/// `rebuild` is false and stale `index_meta` is present (Open Question
/// resolution, §9): an empty index has nothing for a compatibility
/// mismatch to actually conflict with, so we simply write fresh meta.
pub async fn build_index(
    main_pool: &SqlitePool,
    embeddings_pool: &SqlitePool,
    backend: &dyn EmbeddingBackend,
    config: &IndexerConfig,
    rebuild: bool,
) -> Result<IndexReport> {
    store::create_schema(embeddings_pool).await?;

    let existing_meta = store::read_index_meta(embeddings_pool).await?;
    let current_chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks").fetch_one(embeddings_pool).await?;
    let effectively_empty = current_chunk_count == 0;

    let mut did_rebuild = rebuild;

    if rebuild {
        store::clear_all(embeddings_pool).await?;
    } else if let Some(meta) = &existing_meta {
        if !effectively_empty && (meta.backend != backend.name() || meta.model != backend.model() || meta.dimension != backend.dimension()) {
            return Err(Error::SchemaIncompat {
                old_backend: meta.backend.clone(),
                old_model: meta.model.clone(),
                old_dim: meta.dimension as i64,
                new_backend: backend.name().to_string(),
                new_model: backend.model().to_string(),
                new_dim: backend.dimension() as i64,
                rebuild_command: "delete the embeddings database and re-run ingest".to_string(),
            }
            .into());
        }
        if effectively_empty {
            did_rebuild = true;
        }
    }

    let already_indexed = store::indexed_conversation_ids(embeddings_pool).await?;
    let pending_conversations: Vec<String> = sqlx::query_scalar("SELECT id FROM conversations")
        .fetch_all(main_pool)
        .await?
        .into_iter()
        .filter(|id: &String| !already_indexed.contains(id))
        .collect();

    let params = ChunkParams {
        target_tokens: config.target_tokens as u32,
        max_tokens: config.max_tokens as u32,
        overlap_tokens: config.overlap_tokens as u32,
    };

    let mut chunks_written = 0u64;
    let mut conversations_indexed = 0u64;

    for conversation_id in &pending_conversations {
        let exchanges = fetch_exchanges(main_pool, Some(conversation_id), None).await?;
        if exchanges.is_empty() {
            continue;
        }
        let pending_chunks = chunk_exchanges(conversation_id, &exchanges, &params);
        if pending_chunks.is_empty() {
            continue;
        }

        for batch in pending_chunks.chunks(config.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = backend.embed(&texts).await?;
            for (chunk, embedding) in batch.iter().zip(embeddings) {
                store::insert_chunk(
                    embeddings_pool,
                    &NewChunk {
                        conversation_id: chunk.conversation_id.clone(),
                        chunk_type: "exchange".to_string(),
                        text: chunk.text.clone(),
                        embedding,
                        token_count: chunk.token_count,
                        source_ids: chunk.source_ids.clone(),
                    },
                )
                .await?;
                chunks_written += 1;
            }
        }
        conversations_indexed += 1;
    }

    store::write_index_meta(
        embeddings_pool,
        &IndexMeta {
            schema_version: 1,
            backend: backend.name().to_string(),
            model: backend.model().to_string(),
            dimension: backend.dimension(),
            strategy: "exchange-window".to_string(),
            target_tokens: config.target_tokens as u32,
            max_tokens: config.max_tokens as u32,
            overlap_tokens: config.overlap_tokens as u32,
            built_at: Utc::now().timestamp(),
        },
    )
    .await?;

    Ok(IndexReport { conversations_indexed, chunks_written, rebuilt: did_rebuild })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::backend::NullBackend;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn empty_main_db_indexes_nothing() {
        let main = memory_pool().await;
        crate::storage::migrate::run_migrations(&main).await.unwrap();
        let embeddings = memory_pool().await;
        let backend = NullBackend;
        let config = IndexerConfig { target_tokens: 256, max_tokens: 512, overlap_tokens: 25, batch_size: 64 };

        let report = build_index(&main, &embeddings, &backend, &config, false).await.unwrap();
        assert_eq!(report.conversations_indexed, 0);
        assert_eq!(report.chunks_written, 0);
    }
}
