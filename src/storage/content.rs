//! Content-addressed blob storage with reference counting (§3.2, §8 property 4-5).

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Sqlite};

pub fn hash_payload(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    format!("{:x}", hasher.finalize())
}

/// Store `payload`, incrementing `ref_count` if the hash already exists.
/// Returns the hash. Must run inside the caller's transaction so the
/// ref-count stays consistent with whatever row references it (§5).
pub async fn store_content<'e, E>(executor: E, payload: &[u8]) -> Result<String>
where
    E: Executor<'e, Database = Sqlite>,
{
    let hash = hash_payload(payload);
    sqlx::query(
        "INSERT INTO content_blobs (hash, payload, ref_count) VALUES (?, ?, 1)
         ON CONFLICT(hash) DO UPDATE SET ref_count = ref_count + 1",
    )
    .bind(&hash)
    .bind(payload)
    .execute(executor)
    .await?;
    Ok(hash)
}

/// Decrement a blob's `ref_count`, deleting the row at zero.
pub async fn release_content<'e, E>(executor: E, hash: &str) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE content_blobs SET ref_count = ref_count - 1 WHERE hash = ?")
        .bind(hash)
        .execute(executor)
        .await?;
    Ok(())
}

/// Delete any blob whose `ref_count` has reached zero. Call after a batch of
/// `release_content` calls within the same transaction.
pub async fn collect_garbage<'e, E>(executor: E) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM content_blobs WHERE ref_count <= 0").execute(executor).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> sqlx::SqlitePool {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::storage::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn store_then_release_restores_prior_state() {
        let pool = memory_pool().await;
        let hash = store_content(&pool, b"hello").await.unwrap();
        release_content(&pool, &hash).await.unwrap();
        collect_garbage(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_blobs").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn duplicate_payload_shares_one_row_with_ref_count_two() {
        let pool = memory_pool().await;
        let h1 = store_content(&pool, b"dup").await.unwrap();
        let h2 = store_content(&pool, b"dup").await.unwrap();
        assert_eq!(h1, h2);
        let ref_count: i64 =
            sqlx::query_scalar("SELECT ref_count FROM content_blobs WHERE hash = ?").bind(&h1).fetch_one(&pool).await.unwrap();
        assert_eq!(ref_count, 2);

        release_content(&pool, &h1).await.unwrap();
        collect_garbage(&pool).await.unwrap();
        let ref_count: i64 =
            sqlx::query_scalar("SELECT ref_count FROM content_blobs WHERE hash = ?").bind(&h1).fetch_one(&pool).await.unwrap();
        assert_eq!(ref_count, 1);
    }
}
