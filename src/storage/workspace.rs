//! Workspace identity resolution and lookup (§4.3 "Workspace identity", §8 S6).

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::domain::{new_id, Workspace};
use crate::git;

/// Resolve `path` to its canonical workspace, creating a row if none exists
/// yet. Lookup order: (1) by `git_remote` if one can be computed; (2) by
/// path. A lookup hit on a row with a null `git_remote` backfills it.
pub async fn get_or_create_workspace(pool: &SqlitePool, path: &str) -> Result<Workspace> {
    let (canonical_path, git_remote) = git::canonical_workspace_identity(Path::new(path));
    let canonical_path = canonical_path.to_string_lossy().to_string();

    if let Some(remote) = &git_remote {
        if let Some(row) = sqlx::query("SELECT id, path, git_remote FROM workspaces WHERE git_remote = ?")
            .bind(remote)
            .fetch_optional(pool)
            .await?
        {
            return Ok(row_to_workspace(&row));
        }
    }

    if let Some(row) = sqlx::query("SELECT id, path, git_remote FROM workspaces WHERE path = ?")
        .bind(&canonical_path)
        .fetch_optional(pool)
        .await?
    {
        let existing_remote: Option<String> = row.get("git_remote");
        if existing_remote.is_none() {
            if let Some(remote) = &git_remote {
                let id: String = row.get("id");
                sqlx::query("UPDATE workspaces SET git_remote = ? WHERE id = ?")
                    .bind(remote)
                    .bind(&id)
                    .execute(pool)
                    .await?;
                return Ok(Workspace { id: id.parse().expect("stored id is a valid ulid"), path: canonical_path, git_remote: Some(remote.clone()) });
            }
        }
        return Ok(row_to_workspace(&row));
    }

    let id = new_id();
    sqlx::query("INSERT INTO workspaces (id, path, git_remote) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(&canonical_path)
        .bind(&git_remote)
        .execute(pool)
        .await?;

    Ok(Workspace { id, path: canonical_path, git_remote })
}

fn row_to_workspace(row: &sqlx::sqlite::SqliteRow) -> Workspace {
    let id: String = row.get("id");
    Workspace {
        id: id.parse().expect("stored id is a valid ulid"),
        path: row.get("path"),
        git_remote: row.get("git_remote"),
    }
}
