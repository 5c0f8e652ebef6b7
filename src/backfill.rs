//! Maintenance operations that re-derive data from existing records (§4.11),
//! ported from `examples/original_source/src/siftd/backfill.py`. These use
//! storage primitives but are not storage primitives themselves.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::content_filters::filter_tool_result_binary;
use crate::domain::new_id;
use crate::model_names::parse_model_name;
use crate::shell_categories::{categorize_shell_command, SHELL_TAG_PREFIX};
use crate::storage;
use crate::storage::content::hash_payload;
use crate::storage::tags::{self, TaggableEntity, DERIVATIVE_TAG};

/// Re-derive `creator`/`family`/`version`/`variant`/`released` for model rows
/// that predate a parser improvement. Skips rows the parser still can't
/// classify, matching the reference's "no useful info" bail-out.
pub async fn backfill_models(pool: &SqlitePool) -> Result<u64> {
    let rows = sqlx::query("SELECT id, raw_name FROM models WHERE creator IS NULL OR family IS NULL").fetch_all(pool).await?;
    let mut updated = 0u64;
    for row in rows {
        let id: String = row.get("id");
        let raw_name: String = row.get("raw_name");
        let parsed = parse_model_name(&raw_name);
        if parsed.creator.is_none() {
            continue;
        }
        sqlx::query("UPDATE models SET name = ?, creator = ?, family = ?, version = ?, variant = ?, released = ? WHERE id = ?")
            .bind(&parsed.name)
            .bind(&parsed.creator)
            .bind(&parsed.family)
            .bind(&parsed.version)
            .bind(&parsed.variant)
            .bind(&parsed.released)
            .bind(&id)
            .execute(pool)
            .await?;
        updated += 1;
    }
    Ok(updated)
}

/// Backfill `responses.provider_id` from the harness's `source` field for
/// responses ingested before providers were tracked.
pub async fn backfill_providers(pool: &SqlitePool) -> Result<u64> {
    let harnesses = sqlx::query("SELECT id, source FROM harnesses WHERE source IS NOT NULL").fetch_all(pool).await?;
    let mut updated = 0u64;
    for harness in harnesses {
        let harness_id: String = harness.get("id");
        let source: String = harness.get("source");
        let provider_id = storage::get_or_create_provider(pool, &source).await?;

        let result = sqlx::query(
            "UPDATE responses SET provider_id = ?
             WHERE provider_id IS NULL
               AND conversation_id IN (SELECT id FROM conversations WHERE harness_id = ?)",
        )
        .bind(&provider_id)
        .bind(&harness_id)
        .execute(pool)
        .await?;
        updated += result.rows_affected();
    }
    Ok(updated)
}

/// Categorize every `shell.execute` tool call lacking a `shell:*` tag and
/// apply the matching tag. Returns a per-category count of newly tagged calls.
pub async fn backfill_shell_tags(pool: &SqlitePool) -> Result<HashMap<String, u64>> {
    let mut counts = HashMap::new();

    let Some(shell_tool_id): Option<String> = sqlx::query_scalar("SELECT id FROM tools WHERE name = 'shell.execute'").fetch_optional(pool).await? else {
        return Ok(counts);
    };

    let rows = sqlx::query(
        "SELECT tc.id, tc.input_json FROM tool_calls tc
         WHERE tc.tool_id = ?
           AND tc.id NOT IN (
               SELECT tct.tool_call_id FROM tool_call_tags tct
               JOIN tags t ON t.id = tct.tag_id
               WHERE t.name LIKE 'shell:%'
           )",
    )
    .bind(&shell_tool_id)
    .fetch_all(pool)
    .await?;

    let mut tag_cache: HashMap<String, String> = HashMap::new();

    for row in rows {
        let tool_call_id: String = row.get("id");
        let raw_input: String = row.get("input_json");
        let cmd = serde_json::from_str::<Value>(&raw_input)
            .ok()
            .and_then(|v| v.get("command").or_else(|| v.get("cmd")).and_then(Value::as_str).map(str::to_string))
            .unwrap_or(raw_input);

        let Some(category) = categorize_shell_command(&cmd) else { continue };
        let tag_name = format!("{SHELL_TAG_PREFIX}{category}");
        let tag_id = match tag_cache.get(&tag_name) {
            Some(id) => id.clone(),
            None => {
                let id = tags::get_or_create_tag(pool, &tag_name).await?;
                tag_cache.insert(tag_name.clone(), id.clone());
                id
            }
        };

        if tags::apply_tag(pool, TaggableEntity::ToolCall, &tool_call_id, &tag_id).await? {
            *counts.entry(category.to_string()).or_insert(0) += 1;
        }
    }

    Ok(counts)
}

/// Re-read raw `claude_code` JSONL files already on disk to recover
/// `cache_creation_input_tokens`/`cache_read_input_tokens`, for conversations
/// ingested before this adapter captured them.
pub async fn backfill_response_attributes(pool: &SqlitePool) -> Result<u64> {
    let Some(harness_id): Option<String> = sqlx::query_scalar("SELECT id FROM harnesses WHERE name = 'claude_code'").fetch_optional(pool).await? else {
        return Ok(0);
    };

    let files = sqlx::query("SELECT path, conversation_id FROM ingested_files WHERE harness_id = ?").bind(&harness_id).fetch_all(pool).await?;

    let mut inserted = 0u64;
    for file in files {
        let path: String = file.get("path");
        let conversation_id: Option<String> = file.get("conversation_id");
        let Some(conversation_id) = conversation_id else { continue };
        if !std::path::Path::new(&path).exists() {
            continue;
        }

        let Ok((records, _errors)) = crate::adapters::sdk::load_jsonl(std::path::Path::new(&path)) else { continue };

        for record in &records {
            if record.get("type").and_then(Value::as_str) != Some("assistant") {
                continue;
            }
            let usage = record.get("message").and_then(|m| m.get("usage"));
            let Some(external_msg_id) = record.get("uuid").and_then(Value::as_str) else { continue };
            let cache_creation = usage.and_then(|u| u.get("cache_creation_input_tokens")).and_then(Value::as_i64);
            let cache_read = usage.and_then(|u| u.get("cache_read_input_tokens")).and_then(Value::as_i64);
            if cache_creation.is_none() && cache_read.is_none() {
                continue;
            }

            let response_external_id = format!("claude_code::{external_msg_id}");
            let Some(response_id): Option<String> =
                sqlx::query_scalar("SELECT id FROM responses WHERE conversation_id = ? AND external_id = ?")
                    .bind(&conversation_id)
                    .bind(&response_external_id)
                    .fetch_optional(pool)
                    .await?
            else {
                continue;
            };

            if let Some(value) = cache_creation {
                insert_response_attribute(pool, &response_id, "cache_creation_input_tokens", &value.to_string()).await?;
                inserted += 1;
            }
            if let Some(value) = cache_read {
                insert_response_attribute(pool, &response_id, "cache_read_input_tokens", &value.to_string()).await?;
                inserted += 1;
            }
        }
    }

    Ok(inserted)
}

async fn insert_response_attribute(pool: &SqlitePool, response_id: &str, key: &str, value: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO response_attributes (id, response_id, key, value) VALUES (?, ?, ?, ?)")
        .bind(new_id().to_string())
        .bind(response_id)
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

fn is_derivative_tool_call(tool_name: &str, input: &Value) -> bool {
    match tool_name {
        "shell.execute" => {
            let cmd = input.get("command").or_else(|| input.get("cmd")).and_then(Value::as_str).unwrap_or("");
            cmd.contains("siftd ask") || cmd.contains("siftd query")
        }
        "skill.invoke" => input.get("skill").and_then(Value::as_str) == Some("siftd"),
        _ => false,
    }
}

/// Tag conversations that invoked this tool on themselves (`siftd ask`/`siftd
/// query` via shell, or the `siftd` skill) with `siftd:derivative`, so
/// retrieval can exclude them by default (§4.6 Stage A).
pub async fn backfill_derivative_tags(pool: &SqlitePool) -> Result<u64> {
    let mut tool_ids = Vec::new();
    for name in ["shell.execute", "skill.invoke"] {
        if let Some(id): Option<String> = sqlx::query_scalar("SELECT id FROM tools WHERE name = ?").bind(name).fetch_optional(pool).await? {
            tool_ids.push(id);
        }
    }
    if tool_ids.is_empty() {
        return Ok(0);
    }

    let already_tagged: std::collections::HashSet<String> = {
        let maybe_tag_id: Option<String> = sqlx::query_scalar("SELECT id FROM tags WHERE name = ?").bind(DERIVATIVE_TAG).fetch_optional(pool).await?;
        match maybe_tag_id {
            Some(tag_id) => sqlx::query_scalar("SELECT conversation_id FROM conversation_tags WHERE tag_id = ?")
                .bind(&tag_id)
                .fetch_all(pool)
                .await?
                .into_iter()
                .collect(),
            None => Default::default(),
        }
    };

    let placeholders = tool_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT r.conversation_id AS conversation_id, tc.input_json AS input_json, t.name AS tool_name
         FROM tool_calls tc
         JOIN responses r ON r.id = tc.response_id
         JOIN tools t ON t.id = tc.tool_id
         WHERE tc.tool_id IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for id in &tool_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;

    let mut derivative_conversation_ids = std::collections::HashSet::new();
    for row in rows {
        let conversation_id: String = row.get("conversation_id");
        if already_tagged.contains(&conversation_id) || derivative_conversation_ids.contains(&conversation_id) {
            continue;
        }
        let raw_input: String = row.get("input_json");
        let tool_name: String = row.get("tool_name");
        let Ok(input) = serde_json::from_str::<Value>(&raw_input) else { continue };
        if is_derivative_tool_call(&tool_name, &input) {
            derivative_conversation_ids.insert(conversation_id);
        }
    }

    if !derivative_conversation_ids.is_empty() {
        let tag_id = tags::get_or_create_tag(pool, DERIVATIVE_TAG).await?;
        for conversation_id in &derivative_conversation_ids {
            tags::apply_tag(pool, TaggableEntity::Conversation, conversation_id, &tag_id).await?;
        }
    }

    Ok(derivative_conversation_ids.len() as u64)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryFilterStats {
    pub filtered: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// Retroactively filter binary payloads out of existing `content_blobs` rows
/// (§3.2), repointing `tool_calls.result_hash` at the filtered blob and
/// adjusting ref-counts so the original stays content-addressed.
pub async fn backfill_filter_binary(pool: &SqlitePool, dry_run: bool) -> Result<BinaryFilterStats> {
    let mut stats = BinaryFilterStats::default();

    let rows = sqlx::query(
        "SELECT hash, payload FROM content_blobs
         WHERE payload LIKE '%\"type\": \"base64\"%'
            OR payload LIKE '%\"type\":\"base64\"%'
            OR payload LIKE '%iVBORw0KGgo%'
            OR payload LIKE '%JVBERi0%'
            OR payload LIKE '%/9j/%'",
    )
    .fetch_all(pool)
    .await?;

    let mut hash_mapping: HashMap<String, String> = HashMap::new();

    for row in rows {
        let old_hash: String = row.get("hash");
        let payload: Vec<u8> = row.get("payload");
        let Ok(content) = String::from_utf8(payload) else {
            stats.errors += 1;
            continue;
        };
        let Ok(data) = serde_json::from_str::<Value>(&content) else {
            stats.errors += 1;
            continue;
        };

        let filtered = filter_tool_result_binary(&data);
        if filtered == data {
            stats.skipped += 1;
            continue;
        }
        let filtered_json = filtered.to_string();
        let new_hash = hash_payload(filtered_json.as_bytes());
        if new_hash == old_hash {
            stats.skipped += 1;
            continue;
        }

        if !dry_run {
            sqlx::query("INSERT INTO content_blobs (hash, payload, ref_count) VALUES (?, ?, 0) ON CONFLICT(hash) DO NOTHING")
                .bind(&new_hash)
                .bind(filtered_json.as_bytes())
                .execute(pool)
                .await?;
            hash_mapping.insert(old_hash, new_hash);
        }
        stats.filtered += 1;
    }

    if !dry_run {
        for (old_hash, new_hash) in &hash_mapping {
            let ref_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tool_calls WHERE result_hash = ?").bind(old_hash).fetch_one(pool).await?;
            if ref_count == 0 {
                continue;
            }

            sqlx::query("UPDATE tool_calls SET result_hash = ? WHERE result_hash = ?").bind(new_hash).bind(old_hash).execute(pool).await?;
            sqlx::query("UPDATE content_blobs SET ref_count = ref_count - ? WHERE hash = ?").bind(ref_count).bind(old_hash).execute(pool).await?;
            sqlx::query("UPDATE content_blobs SET ref_count = ref_count + ? WHERE hash = ?").bind(ref_count).bind(new_hash).execute(pool).await?;
            sqlx::query("DELETE FROM content_blobs WHERE hash = ? AND ref_count <= 0").bind(old_hash).execute(pool).await?;
        }
    }

    Ok(stats)
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
    async fn backfill_models_skips_unparseable_names() {
        let pool = memory_pool().await;
        sqlx::query("INSERT INTO models (id, raw_name) VALUES ('m1', 'some-mystery-model')").execute(&pool).await.unwrap();
        let updated = backfill_models(&pool).await.unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn backfill_models_fills_known_family() {
        let pool = memory_pool().await;
        sqlx::query("INSERT INTO models (id, raw_name) VALUES ('m1', 'claude-opus-4-6-20260115')").execute(&pool).await.unwrap();
        let updated = backfill_models(&pool).await.unwrap();
        assert_eq!(updated, 1);
        let creator: String = sqlx::query_scalar("SELECT creator FROM models WHERE id = 'm1'").fetch_one(&pool).await.unwrap();
        assert_eq!(creator, "anthropic");
    }

    #[tokio::test]
    async fn shell_tags_skip_calls_already_tagged() {
        let pool = memory_pool().await;
        sqlx::query("INSERT INTO harnesses (id, name, source, log_format, display_name) VALUES ('h1','claude_code','anthropic','jsonl','Claude Code')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO tools (id, name) VALUES ('tool1', 'shell.execute')").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO conversations (id, harness_id, external_id, started_at) VALUES ('c1','h1','ext',1)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO prompts (id, conversation_id, prompt_index, timestamp) VALUES ('p1','c1',0,1)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO responses (id, prompt_id, conversation_id, timestamp) VALUES ('r1','p1','c1',1)").execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO tool_calls (id, response_id, tool_id, input_json, status) VALUES ('tc1','r1','tool1','{\"command\":\"cargo test\"}','success')")
            .execute(&pool)
            .await
            .unwrap();

        let counts = backfill_shell_tags(&pool).await.unwrap();
        assert_eq!(counts.get("test"), Some(&1));

        let counts_again = backfill_shell_tags(&pool).await.unwrap();
        assert!(counts_again.is_empty());
    }
}
