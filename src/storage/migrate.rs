//! Database schema creation and idempotent migrations.
//!
//! Grounded in the teacher's `migrate.rs`: check `sqlite_master` before
//! creating anything that isn't naturally `IF NOT EXISTS`-safe (FTS5 virtual
//! tables), and run migrations every time `run_migrations` is called so an
//! existing database picks up schema changes made by a newer binary.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    create_schema(pool).await?;
    migrate_rename_legacy_labels_tables(pool).await?;
    migrate_add_ingested_files_error_column(pool).await?;
    migrate_add_active_sessions_last_seen_at(pool).await?;
    ensure_fts(pool).await?;
    ensure_canonical_tools(pool).await?;
    Ok(())
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harnesses (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            log_format TEXT NOT NULL,
            display_name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            git_remote TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_workspaces_git_remote
            ON workspaces(git_remote) WHERE git_remote IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_workspaces_path
            ON workspaces(path) WHERE git_remote IS NULL;

        CREATE TABLE IF NOT EXISTS models (
            id TEXT PRIMARY KEY,
            raw_name TEXT NOT NULL UNIQUE,
            name TEXT,
            creator TEXT,
            family TEXT,
            version TEXT,
            variant TEXT,
            released TEXT
        );

        CREATE TABLE IF NOT EXISTS providers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS tools (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS tool_aliases (
            harness_id TEXT NOT NULL REFERENCES harnesses(id),
            raw_name TEXT NOT NULL,
            tool_id TEXT NOT NULL REFERENCES tools(id),
            PRIMARY KEY (harness_id, raw_name)
        );

        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            harness_id TEXT NOT NULL REFERENCES harnesses(id),
            workspace_id TEXT REFERENCES workspaces(id),
            model_id TEXT REFERENCES models(id),
            external_id TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            ended_at INTEGER,
            UNIQUE (harness_id, external_id)
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_workspace ON conversations(workspace_id);

        CREATE TABLE IF NOT EXISTS prompts (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            prompt_index INTEGER NOT NULL,
            external_id TEXT,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_prompts_conversation ON prompts(conversation_id, prompt_index);

        CREATE TABLE IF NOT EXISTS responses (
            id TEXT PRIMARY KEY,
            prompt_id TEXT NOT NULL REFERENCES prompts(id) ON DELETE CASCADE,
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            external_id TEXT,
            timestamp INTEGER NOT NULL,
            model_id TEXT REFERENCES models(id),
            provider_id TEXT REFERENCES providers(id),
            input_tokens INTEGER,
            output_tokens INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_responses_prompt ON responses(prompt_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_responses_conversation ON responses(conversation_id);

        CREATE TABLE IF NOT EXISTS tool_calls (
            id TEXT PRIMARY KEY,
            response_id TEXT NOT NULL REFERENCES responses(id) ON DELETE CASCADE,
            tool_id TEXT REFERENCES tools(id),
            external_id TEXT,
            input_json TEXT NOT NULL,
            result_hash TEXT REFERENCES content_blobs(hash),
            result_inline TEXT,
            status TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_calls_response ON tool_calls(response_id);
        CREATE INDEX IF NOT EXISTS idx_tool_calls_result_hash ON tool_calls(result_hash);

        CREATE TABLE IF NOT EXISTS content_blobs (
            hash TEXT PRIMARY KEY,
            payload BLOB NOT NULL,
            ref_count INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS prompt_content (
            id TEXT PRIMARY KEY,
            prompt_id TEXT NOT NULL REFERENCES prompts(id) ON DELETE CASCADE,
            block_index INTEGER NOT NULL,
            block_type TEXT NOT NULL,
            text TEXT,
            blob_hash TEXT REFERENCES content_blobs(hash),
            json TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_prompt_content_prompt ON prompt_content(prompt_id, block_index);

        CREATE TABLE IF NOT EXISTS response_content (
            id TEXT PRIMARY KEY,
            response_id TEXT NOT NULL REFERENCES responses(id) ON DELETE CASCADE,
            block_index INTEGER NOT NULL,
            block_type TEXT NOT NULL,
            text TEXT,
            blob_hash TEXT REFERENCES content_blobs(hash),
            json TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_response_content_response ON response_content(response_id, block_index);

        CREATE TABLE IF NOT EXISTS response_attributes (
            id TEXT PRIMARY KEY,
            response_id TEXT NOT NULL REFERENCES responses(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT,
            UNIQUE (response_id, key)
        );

        CREATE TABLE IF NOT EXISTS conversation_tags (
            conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            tag_id TEXT NOT NULL REFERENCES tags(id),
            PRIMARY KEY (conversation_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS workspace_tags (
            workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
            tag_id TEXT NOT NULL REFERENCES tags(id),
            PRIMARY KEY (workspace_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS tool_call_tags (
            tool_call_id TEXT NOT NULL REFERENCES tool_calls(id) ON DELETE CASCADE,
            tag_id TEXT NOT NULL REFERENCES tags(id),
            PRIMARY KEY (tool_call_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS prompt_tags (
            prompt_id TEXT NOT NULL REFERENCES prompts(id) ON DELETE CASCADE,
            tag_id TEXT NOT NULL REFERENCES tags(id),
            PRIMARY KEY (prompt_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS ingested_files (
            path TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            conversation_id TEXT REFERENCES conversations(id),
            harness_id TEXT REFERENCES harnesses(id),
            ingested_at INTEGER NOT NULL,
            error TEXT
        );

        CREATE TABLE IF NOT EXISTS pricing (
            provider_id TEXT NOT NULL REFERENCES providers(id),
            model_id TEXT NOT NULL REFERENCES models(id),
            input_cost_per_1k REAL,
            output_cost_per_1k REAL,
            cache_read_cost_per_1k REAL,
            cache_write_cost_per_1k REAL,
            effective_date TEXT NOT NULL,
            PRIMARY KEY (provider_id, model_id, effective_date)
        );

        CREATE TABLE IF NOT EXISTS active_sessions (
            harness_session_id TEXT PRIMARY KEY,
            adapter_name TEXT NOT NULL,
            workspace_path TEXT,
            started_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_tags (
            id TEXT PRIMARY KEY,
            harness_session_id TEXT NOT NULL,
            tag_name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            exchange_index INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_tags_session ON pending_tags(harness_session_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Rename `labels*` tables from an older schema generation to `tags*`, if
/// present. A no-op on a database created by this schema from scratch.
async fn migrate_rename_legacy_labels_tables(pool: &SqlitePool) -> Result<()> {
    let renames = [
        ("labels", "tags"),
        ("conversation_labels", "conversation_tags"),
        ("workspace_labels", "workspace_tags"),
        ("tool_call_labels", "tool_call_tags"),
        ("prompt_labels", "prompt_tags"),
    ];

    for (old, new) in renames {
        if table_exists(pool, old).await? && !table_exists(pool, new).await? {
            sqlx::query(&format!("ALTER TABLE {old} RENAME TO {new}")).execute(pool).await?;
        }
    }

    // Older schema generations named the column `label_name` / `label_id`.
    if table_exists(pool, "tags").await? && column_exists(pool, "tags", "label_name").await? {
        sqlx::query("ALTER TABLE tags RENAME COLUMN label_name TO name").execute(pool).await?;
    }

    Ok(())
}

async fn migrate_add_ingested_files_error_column(pool: &SqlitePool) -> Result<()> {
    if !column_exists(pool, "ingested_files", "error").await? {
        sqlx::query("ALTER TABLE ingested_files ADD COLUMN error TEXT").execute(pool).await?;
    }
    Ok(())
}

async fn migrate_add_active_sessions_last_seen_at(pool: &SqlitePool) -> Result<()> {
    if !column_exists(pool, "active_sessions", "last_seen_at").await? {
        sqlx::query("ALTER TABLE active_sessions ADD COLUMN last_seen_at INTEGER").execute(pool).await?;
        sqlx::query("UPDATE active_sessions SET last_seen_at = started_at WHERE last_seen_at IS NULL")
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn ensure_fts(pool: &SqlitePool) -> Result<()> {
    if !table_exists(pool, "content_fts").await? {
        sqlx::query(
            "CREATE VIRTUAL TABLE content_fts USING fts5(
                conversation_id UNINDEXED,
                side UNINDEXED,
                content_id UNINDEXED,
                text,
                tokenize = 'porter unicode61'
            )",
        )
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Canonical tool rows that every adapter maps its raw tool names onto.
async fn ensure_canonical_tools(pool: &SqlitePool) -> Result<()> {
    const CANONICAL_TOOLS: &[&str] =
        &["file.read", "file.write", "file.edit", "shell.execute", "search.grep", "search.glob", "web.fetch"];

    for name in CANONICAL_TOOLS {
        sqlx::query("INSERT OR IGNORE INTO tools (id, name) VALUES (?, ?)")
            .bind(crate::domain::new_id().to_string())
            .bind(name)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type IN ('table','view') AND name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

async fn column_exists(pool: &SqlitePool, table: &str, column: &str) -> Result<bool> {
    let rows = sqlx::query(&format!("PRAGMA table_info({table})")).fetch_all(pool).await?;
    Ok(rows.iter().any(|r| r.get::<String, _>("name") == column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn creates_schema_idempotently() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(table_exists(&pool, "conversations").await.unwrap());
        assert!(table_exists(&pool, "content_fts").await.unwrap());
    }

    #[tokio::test]
    async fn seeds_canonical_tools() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tools WHERE name = 'shell.execute'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
