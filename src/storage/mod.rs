//! The main relational store: identity tables, event tables, content tables,
//! join tables, and the auxiliary tables listed in §4.3.
//!
//! This module may import `domain` and `git` but never `cli`, per the
//! import-layering rule (§6.5).

pub mod content;
pub mod fts;
pub mod migrate;
pub mod queries;
pub mod tags;
pub mod workspace;

use anyhow::Result;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::content_filters;
use crate::domain::*;

pub async fn get_or_create_harness(
    pool: &SqlitePool,
    name: &str,
    source: &str,
    log_format: &str,
    display_name: &str,
) -> Result<String> {
    if let Some(id) = sqlx::query_scalar::<_, String>("SELECT id FROM harnesses WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }
    let id = new_id().to_string();
    sqlx::query("INSERT INTO harnesses (id, name, source, log_format, display_name) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(source)
        .bind(log_format)
        .bind(display_name)
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn get_or_create_provider(pool: &SqlitePool, name: &str) -> Result<String> {
    if let Some(id) = sqlx::query_scalar::<_, String>("SELECT id FROM providers WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }
    let id = new_id().to_string();
    sqlx::query("INSERT INTO providers (id, name) VALUES (?, ?)").bind(&id).bind(name).execute(pool).await?;
    Ok(id)
}

pub async fn get_or_create_model(pool: &SqlitePool, raw_name: &str) -> Result<String> {
    if let Some(id) = sqlx::query_scalar::<_, String>("SELECT id FROM models WHERE raw_name = ?")
        .bind(raw_name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }
    let parsed = crate::model_names::parse_model_name(raw_name);
    let id = new_id().to_string();
    sqlx::query(
        "INSERT INTO models (id, raw_name, name, creator, family, version, variant, released)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(raw_name)
    .bind(&parsed.name)
    .bind(&parsed.creator)
    .bind(&parsed.family)
    .bind(&parsed.version)
    .bind(&parsed.variant)
    .bind(&parsed.released)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn get_or_create_tool(pool: &SqlitePool, name: &str) -> Result<String> {
    if let Some(id) = sqlx::query_scalar::<_, String>("SELECT id FROM tools WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }
    let id = new_id().to_string();
    sqlx::query("INSERT INTO tools (id, name) VALUES (?, ?)").bind(&id).bind(name).execute(pool).await?;
    Ok(id)
}

/// Canonicalize a raw adapter tool name to a `tools.id`, consulting
/// `tool_aliases` first and falling back to creating a tool row named after
/// the raw string.
pub async fn resolve_tool_id(pool: &SqlitePool, harness_id: &str, raw_name: &str) -> Result<String> {
    if let Some(tool_id) = sqlx::query_scalar::<_, String>(
        "SELECT tool_id FROM tool_aliases WHERE harness_id = ? AND raw_name = ?",
    )
    .bind(harness_id)
    .bind(raw_name)
    .fetch_optional(pool)
    .await?
    {
        return Ok(tool_id);
    }
    get_or_create_tool(pool, raw_name).await
}

pub async fn get_conversation_id(pool: &SqlitePool, harness_id: &str, external_id: &str) -> Result<Option<(String, Option<i64>)>> {
    let row = sqlx::query("SELECT id, ended_at FROM conversations WHERE harness_id = ? AND external_id = ?")
        .bind(harness_id)
        .bind(external_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| (r.get("id"), r.get("ended_at"))))
}

/// Delete a conversation and everything it owns, decrementing any content
/// blobs referenced by its tool calls and prompt/response content blocks
/// (§4.3 "Deletion").
pub async fn delete_conversation(pool: &SqlitePool, conversation_id: &str) -> Result<()> {
    let mut tx = pool.begin().await?;

    let blob_hashes: Vec<String> = sqlx::query(
        "SELECT tc.result_hash AS hash FROM tool_calls tc
         JOIN responses r ON r.id = tc.response_id
         WHERE r.conversation_id = ? AND tc.result_hash IS NOT NULL
         UNION
         SELECT pc.blob_hash AS hash FROM prompt_content pc
         JOIN prompts p ON p.id = pc.prompt_id
         WHERE p.conversation_id = ? AND pc.blob_hash IS NOT NULL
         UNION
         SELECT rc.blob_hash AS hash FROM response_content rc
         JOIN responses r ON r.id = rc.response_id
         WHERE r.conversation_id = ? AND rc.blob_hash IS NOT NULL",
    )
    .bind(conversation_id)
    .bind(conversation_id)
    .bind(conversation_id)
    .fetch_all(&mut *tx)
    .await?
    .iter()
    .map(|r| r.get("hash"))
    .collect();

    for hash in &blob_hashes {
        content::release_content(&mut *tx, hash).await?;
    }

    sqlx::query("DELETE FROM conversations WHERE id = ?").bind(conversation_id).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM ingested_files WHERE conversation_id = ?").bind(conversation_id).execute(&mut *tx).await?;

    content::collect_garbage(&mut *tx).await?;

    tx.commit().await?;
    Ok(())
}

/// A conversation fully persisted to the main store, along with the ids
/// assigned to its prompts (needed by live-tag reconciliation's
/// exchange-index addressing).
pub struct StoredConversation {
    pub conversation_id: String,
    pub prompt_ids: Vec<String>,
    pub prompt_count: usize,
    pub response_count: usize,
    pub tool_call_count: usize,
}

/// Insert a freshly parsed conversation and everything beneath it in one
/// transaction (§4.2 "per-file is atomic").
pub async fn store_conversation(
    pool: &SqlitePool,
    harness_id: &str,
    parsed: &ParsedConversation,
) -> Result<StoredConversation> {
    let mut tx = pool.begin().await?;

    let workspace_id = match &parsed.workspace_path {
        Some(path) => Some(workspace::get_or_create_workspace(pool, path).await?.id.to_string()),
        None => None,
    };
    let conv_model_id = match &parsed.model_raw_name {
        Some(raw) => Some(get_or_create_model(pool, raw).await?),
        None => None,
    };

    let conversation_id = new_id().to_string();
    sqlx::query(
        "INSERT INTO conversations (id, harness_id, workspace_id, model_id, external_id, started_at, ended_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&conversation_id)
    .bind(harness_id)
    .bind(&workspace_id)
    .bind(&conv_model_id)
    .bind(&parsed.external_id)
    .bind(parsed.started_at)
    .bind(parsed.ended_at)
    .execute(&mut *tx)
    .await?;

    let mut prompt_ids = Vec::with_capacity(parsed.prompts.len());
    let mut response_count = 0usize;
    let mut tool_call_count = 0usize;

    for (prompt_index, prompt) in parsed.prompts.iter().enumerate() {
        let prompt_id = new_id().to_string();
        sqlx::query("INSERT INTO prompts (id, conversation_id, prompt_index, external_id, timestamp) VALUES (?, ?, ?, ?, ?)")
            .bind(&prompt_id)
            .bind(&conversation_id)
            .bind(prompt_index as i64)
            .bind(&prompt.external_id)
            .bind(prompt.timestamp)
            .execute(&mut *tx)
            .await?;

        for (block_index, block) in prompt.blocks.iter().enumerate() {
            insert_content_block(&mut tx, "prompt_content", "prompt_id", &prompt_id, block_index, block).await?;
            if let ContentBlock::Text { text } = block {
                let content_id = new_id().to_string();
                fts::insert_fts_content(&mut *tx, &content_id, "prompt", &conversation_id, text).await?;
            }
        }

        for response in &prompt.responses {
            response_count += 1;
            let response_id = new_id().to_string();
            let response_model_id = match &response.model_raw_name {
                Some(raw) => Some(get_or_create_model(pool, raw).await?),
                None => conv_model_id.clone(),
            };
            let provider_id = match &response.provider_name {
                Some(name) => Some(get_or_create_provider(pool, name).await?),
                None => None,
            };

            sqlx::query(
                "INSERT INTO responses (id, prompt_id, conversation_id, external_id, timestamp, model_id, provider_id, input_tokens, output_tokens)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&response_id)
            .bind(&prompt_id)
            .bind(&conversation_id)
            .bind(&response.external_id)
            .bind(response.timestamp)
            .bind(&response_model_id)
            .bind(&provider_id)
            .bind(response.input_tokens)
            .bind(response.output_tokens)
            .execute(&mut *tx)
            .await?;

            for (key, value) in response
                .attributes
                .as_object()
                .map(|o| o.iter())
                .into_iter()
                .flatten()
            {
                sqlx::query("INSERT OR IGNORE INTO response_attributes (id, response_id, key, value) VALUES (?, ?, ?, ?)")
                    .bind(new_id().to_string())
                    .bind(&response_id)
                    .bind(key)
                    .bind(value.to_string())
                    .execute(&mut *tx)
                    .await?;
            }

            for (block_index, block) in response.blocks.iter().enumerate() {
                insert_content_block(&mut tx, "response_content", "response_id", &response_id, block_index, block).await?;
                if let ContentBlock::Text { text } = block {
                    let content_id = new_id().to_string();
                    fts::insert_fts_content(&mut *tx, &content_id, "response", &conversation_id, text).await?;
                }
            }

            for call in &response.tool_calls {
                tool_call_count += 1;
                let tool_id = resolve_tool_id(pool, harness_id, &call.raw_tool_name).await?;
                let (result_hash, result_inline) = match &call.result {
                    Some(ToolResultPayload::Text(text)) if text.len() > 2000 => {
                        (Some(content::store_content(&mut *tx, text.as_bytes()).await?), None)
                    }
                    Some(ToolResultPayload::Text(text)) => (None, Some(text.clone())),
                    Some(ToolResultPayload::Json(value)) => {
                        let filtered = content_filters::filter_tool_result_binary(value);
                        let serialized = filtered.to_string();
                        if serialized.len() > 2000 {
                            (Some(content::store_content(&mut *tx, serialized.as_bytes()).await?), None)
                        } else {
                            (None, Some(serialized))
                        }
                    }
                    None => (None, None),
                };

                sqlx::query(
                    "INSERT INTO tool_calls (id, response_id, tool_id, external_id, input_json, result_hash, result_inline, status)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(new_id().to_string())
                .bind(&response_id)
                .bind(&tool_id)
                .bind(&call.external_id)
                .bind(call.input.to_string())
                .bind(&result_hash)
                .bind(&result_inline)
                .bind(call.status.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        prompt_ids.push(prompt_id);
    }

    record_ingested_file_in_tx(&mut tx, harness_id, &conversation_id).await.ok();

    tx.commit().await?;

    Ok(StoredConversation {
        conversation_id,
        prompt_count: parsed.prompts.len(),
        response_count,
        tool_call_count,
        prompt_ids,
    })
}

async fn record_ingested_file_in_tx(_tx: &mut Transaction<'_, Sqlite>, _harness_id: &str, _conversation_id: &str) -> Result<()> {
    // ingested_files rows are written explicitly by the orchestrator (it
    // knows the source path and content hash); this is a placeholder seam
    // kept so a future adapter-reported path can be recorded here too.
    Ok(())
}

async fn insert_content_block(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    fk_column: &str,
    owner_id: &str,
    block_index: usize,
    block: &ContentBlock,
) -> Result<()> {
    let (block_type, text, json): (&str, Option<String>, Option<String>) = match block {
        ContentBlock::Text { text } => ("text", Some(text.clone()), None),
        ContentBlock::Image { media_type, placeholder } => {
            ("image", None, Some(serde_json::json!({"media_type": media_type, "placeholder": placeholder_json(placeholder)}).to_string()))
        }
        ContentBlock::ToolResult { tool_use_id, text, blob_hash } => (
            "tool_result",
            text.clone(),
            Some(serde_json::json!({"tool_use_id": tool_use_id, "blob_hash": blob_hash}).to_string()),
        ),
        ContentBlock::Context { label, text } => ("context", Some(text.clone()), Some(serde_json::json!({"label": label}).to_string())),
        ContentBlock::Unknown => ("unknown", None, None),
    };

    let sql = format!(
        "INSERT INTO {table} (id, {fk_column}, block_index, block_type, text, blob_hash, json) VALUES (?, ?, ?, ?, ?, NULL, ?)"
    );
    sqlx::query(&sql)
        .bind(new_id().to_string())
        .bind(owner_id)
        .bind(block_index as i64)
        .bind(block_type)
        .bind(&text)
        .bind(&json)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn placeholder_json(p: &BinaryPlaceholder) -> serde_json::Value {
    serde_json::to_value(p).unwrap_or(serde_json::Value::Null)
}

pub async fn record_ingested_file(
    pool: &SqlitePool,
    path: &str,
    content_hash: &str,
    harness_id: &str,
    conversation_id: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO ingested_files (path, content_hash, conversation_id, harness_id, ingested_at, error)
         VALUES (?, ?, ?, ?, strftime('%s','now'), ?)
         ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            conversation_id = excluded.conversation_id,
            harness_id = excluded.harness_id,
            ingested_at = excluded.ingested_at,
            error = excluded.error",
    )
    .bind(path)
    .bind(content_hash)
    .bind(harness_id)
    .bind(conversation_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn ingested_file_hash(pool: &SqlitePool, path: &str) -> Result<Option<String>> {
    Ok(sqlx::query_scalar("SELECT content_hash FROM ingested_files WHERE path = ?").bind(path).fetch_optional(pool).await?)
}
