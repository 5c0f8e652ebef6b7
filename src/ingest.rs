//! Ingestion pipeline orchestration (§4.2).
//!
//! Coordinates the full ingest flow: adapter discovery → parse → dedup →
//! storage. Each source file is one atomic unit: a parse failure or storage
//! error on one file never aborts the rest of the run.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::adapters::registry::load_all_adapters;
use crate::adapters::Adapter;
use crate::domain::DedupStrategy;
use crate::paths;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::sessions;
use crate::storage;
use crate::storage::tags::TaggableEntity;

#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub harness: String,
    pub sources_scanned: u64,
    pub conversations_ingested: u64,
    pub conversations_updated: u64,
    pub conversations_skipped: u64,
    pub parse_errors: u64,
}

/// Ingest every configured harness, or just `harness_filter` if given.
///
/// `full` re-parses every discovered source regardless of its recorded
/// content hash; otherwise a file whose hash is unchanged since the last run
/// is skipped entirely.
pub async fn run_ingest(
    pool: &SqlitePool,
    harness_filter: Option<&str>,
    full: bool,
    reporter: &dyn IngestProgressReporter,
) -> Result<Vec<IngestStats>> {
    let mut adapters = load_all_adapters(&paths::adapters_dir());
    adapters.sort_by(|a, b| a.name().cmp(b.name()));
    let mut report = Vec::new();

    for adapter in &adapters {
        if let Some(filter) = harness_filter {
            if filter != adapter.name() {
                continue;
            }
        }
        let stats = ingest_one_adapter(pool, adapter.as_ref(), full, reporter).await?;
        report.push(stats);
    }

    Ok(report)
}

async fn ingest_one_adapter(
    pool: &SqlitePool,
    adapter: &dyn Adapter,
    full: bool,
    reporter: &dyn IngestProgressReporter,
) -> Result<IngestStats> {
    let name = adapter.name().to_string();
    let mut stats = IngestStats { harness: name.clone(), ..Default::default() };

    reporter.report(IngestProgressEvent::Discovering { harness: name.clone() });
    let sources = adapter.discover(None)?;
    let total = sources.len() as u64;

    let harness_id = storage::get_or_create_harness(pool, &name, adapter.harness_source(), adapter.harness_log_format(), &name).await?;

    for (index, source) in sources.iter().enumerate() {
        reporter.report(IngestProgressEvent::Ingesting { harness: name.clone(), n: index as u64, total });
        stats.sources_scanned += 1;

        if !adapter.can_handle(source) {
            continue;
        }

        let path = source.path();
        let path_str = path.to_string_lossy().to_string();
        let content_hash = match std::fs::read(path) {
            Ok(bytes) => hex_sha256(&bytes),
            Err(_) => continue,
        };

        if !full {
            if let Some(existing_hash) = storage::ingested_file_hash(pool, &path_str).await? {
                if existing_hash == content_hash {
                    stats.conversations_skipped += 1;
                    continue;
                }
            }
        }

        let parsed_conversations = match adapter.parse(source) {
            Ok(conversations) => conversations,
            Err(err) => {
                stats.parse_errors += 1;
                storage::record_ingested_file(pool, &path_str, &content_hash, &harness_id, None, Some(&err.to_string())).await?;
                continue;
            }
        };

        let mut last_conversation_id = None;
        for parsed in &parsed_conversations {
            let existing = storage::get_conversation_id(pool, &harness_id, &parsed.external_id).await?;

            let should_replace = match (adapter.dedup_strategy(), &existing) {
                (_, None) => false,
                (DedupStrategy::File, Some(_)) => true,
                (DedupStrategy::Session, Some((_, ended_at))) => is_newer(parsed.ended_at, *ended_at),
            };

            if existing.is_some() && !should_replace {
                stats.conversations_skipped += 1;
                last_conversation_id = existing.map(|(id, _)| id);
                continue;
            }

            if let Some((old_id, _)) = &existing {
                storage::delete_conversation(pool, old_id).await?;
                stats.conversations_updated += 1;
            } else {
                stats.conversations_ingested += 1;
            }

            let stored = storage::store_conversation(pool, &harness_id, parsed).await?;
            if adapter.supports_live_registration() {
                reconcile_live_tags(pool, &parsed.external_id, &stored.conversation_id, &stored.prompt_ids).await?;
            }
            last_conversation_id = Some(stored.conversation_id);
        }

        storage::record_ingested_file(pool, &path_str, &content_hash, &harness_id, last_conversation_id.as_deref(), None).await?;
    }

    Ok(stats)
}

/// `null` is the oldest possible `ended_at` (§4.2); a later timestamp
/// replaces an earlier one, but two unresolved (`None`) timestamps are
/// treated as equal, not "newer".
fn is_newer(new: Option<i64>, old: Option<i64>) -> bool {
    match (new, old) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(n), Some(o)) => n > o,
    }
}

/// Live-tag reconciliation (§4.8): drain any tags queued against
/// `harness_session_id` while the session was live, apply them to the
/// conversation just stored (or to the i'th prompt for exchange-level
/// tags, skipping indices out of range), then unregister the session.
async fn reconcile_live_tags(pool: &SqlitePool, harness_session_id: &str, conversation_id: &str, prompt_ids: &[String]) -> Result<()> {
    let pending = sessions::consume_pending_tags(pool, harness_session_id).await?;
    for tag in pending {
        match tag.entity_type.as_str() {
            "conversation" => {
                storage::tags::apply_tag_by_name(pool, TaggableEntity::Conversation, conversation_id, &tag.tag_name).await?;
            }
            "exchange" => {
                if let Some(prompt_id) = tag.exchange_index.and_then(|i| usize::try_from(i).ok()).and_then(|i| prompt_ids.get(i)) {
                    storage::tags::apply_tag_by_name(pool, TaggableEntity::Prompt, prompt_id, &tag.tag_name).await?;
                }
            }
            _ => {}
        }
    }
    sessions::unregister_session(pool, harness_session_id).await?;
    Ok(())
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentBlock, ParsedConversation, ParsedPrompt, ParsedResponse};
    use crate::progress::NoProgress;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn is_newer_treats_null_as_oldest() {
        assert!(!is_newer(None, None));
        assert!(!is_newer(None, Some(100)));
        assert!(is_newer(Some(100), None));
        assert!(is_newer(Some(200), Some(100)));
        assert!(!is_newer(Some(100), Some(200)));
        assert!(!is_newer(Some(100), Some(100)));
    }

    async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        crate::storage::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    struct LiveTestAdapter {
        source_path: PathBuf,
        conversation: ParsedConversation,
    }

    impl Adapter for LiveTestAdapter {
        fn name(&self) -> &'static str {
            "live_test"
        }
        fn default_locations(&self) -> Vec<PathBuf> {
            vec![]
        }
        fn dedup_strategy(&self) -> DedupStrategy {
            DedupStrategy::Session
        }
        fn harness_source(&self) -> &'static str {
            "live_test"
        }
        fn harness_log_format(&self) -> &'static str {
            "jsonl"
        }
        fn supports_live_registration(&self) -> bool {
            true
        }
        fn discover(&self, _locations: Option<&[PathBuf]>) -> Result<Vec<crate::domain::Source>> {
            Ok(vec![crate::domain::Source::File(self.source_path.clone())])
        }
        fn can_handle(&self, _source: &crate::domain::Source) -> bool {
            true
        }
        fn parse(&self, _source: &crate::domain::Source) -> Result<Vec<ParsedConversation>> {
            Ok(vec![self.conversation.clone()])
        }
    }

    fn conversation_with_two_prompts(external_id: &str) -> ParsedConversation {
        ParsedConversation {
            external_id: external_id.to_string(),
            harness_name: "live_test".to_string(),
            workspace_path: None,
            model_raw_name: None,
            started_at: 1_700_000_000,
            ended_at: Some(1_700_000_100),
            prompts: vec![
                ParsedPrompt {
                    external_id: None,
                    timestamp: 1_700_000_000,
                    blocks: vec![ContentBlock::Text { text: "first".into() }],
                    responses: vec![ParsedResponse {
                        external_id: None,
                        timestamp: 1_700_000_010,
                        model_raw_name: None,
                        provider_name: None,
                        input_tokens: None,
                        output_tokens: None,
                        blocks: vec![ContentBlock::Text { text: "reply one".into() }],
                        tool_calls: vec![],
                        attributes: serde_json::Value::Null,
                    }],
                },
                ParsedPrompt {
                    external_id: None,
                    timestamp: 1_700_000_050,
                    blocks: vec![ContentBlock::Text { text: "second".into() }],
                    responses: vec![],
                },
            ],
        }
    }

    #[tokio::test]
    async fn ingest_reconciles_live_tags_after_a_matching_conversation_is_stored() {
        let pool = memory_pool().await;
        let session_id = "sess-live-1";

        sessions::register_session(&pool, session_id, "live_test", None).await.unwrap();
        sessions::queue_tag(&pool, session_id, "decision:auth", "conversation", None).await.unwrap();
        sessions::queue_tag(&pool, session_id, "key-insight", "exchange", Some(1)).await.unwrap();
        // Out-of-range exchange index must be skipped, not error.
        sessions::queue_tag(&pool, session_id, "out-of-range", "exchange", Some(99)).await.unwrap();

        let tmp = TempDir::new().unwrap();
        let source_path = tmp.path().join("session.jsonl");
        std::fs::write(&source_path, "{}").unwrap();
        let adapter = LiveTestAdapter { source_path, conversation: conversation_with_two_prompts(session_id) };

        let stats = ingest_one_adapter(&pool, &adapter, true, &NoProgress).await.unwrap();
        assert_eq!(stats.conversations_ingested, 1);

        let conversation_tags = storage::tags::conversation_ids_with_tag(&pool, "decision:auth").await.unwrap();
        assert_eq!(conversation_tags.len(), 1);

        let out_of_range_tags = storage::tags::conversation_ids_with_tag(&pool, "out-of-range").await.unwrap();
        assert!(out_of_range_tags.is_empty());

        assert!(sessions::get_pending_tags(&pool, session_id).await.unwrap().is_empty());
        assert!(!sessions::is_session_registered(&pool, session_id).await.unwrap());
    }

    async fn ingest_session_variant(pool: &SqlitePool, file_name: &str, external_id: &str, ended_at: i64) -> IngestStats {
        let tmp = TempDir::new().unwrap();
        let source_path = tmp.path().join(file_name);
        std::fs::write(&source_path, "{}").unwrap();
        let mut conversation = conversation_with_two_prompts(external_id);
        conversation.ended_at = Some(ended_at);
        let adapter = LiveTestAdapter { source_path, conversation };
        ingest_one_adapter(pool, &adapter, true, &NoProgress).await.unwrap()
    }

    #[tokio::test]
    async fn session_dedup_skips_replacement_when_new_ended_at_is_older() {
        let pool = memory_pool().await;
        let harness_id = storage::get_or_create_harness(&pool, "live_test", "live_test", "jsonl", "live_test").await.unwrap();

        let first = ingest_session_variant(&pool, "a.jsonl", "sess-a", 1_700_000_100).await;
        assert_eq!(first.conversations_ingested, 1);
        let (original_id, _) = storage::get_conversation_id(&pool, &harness_id, "sess-a").await.unwrap().unwrap();

        let second = ingest_session_variant(&pool, "b.jsonl", "sess-a", 1_700_000_050).await;
        assert_eq!(second.conversations_skipped, 1);
        assert_eq!(second.conversations_updated, 0);

        let (after_id, after_ended_at) = storage::get_conversation_id(&pool, &harness_id, "sess-a").await.unwrap().unwrap();
        assert_eq!(after_id, original_id, "an older ended_at must not replace the stored conversation");
        assert_eq!(after_ended_at, Some(1_700_000_100));
    }

    #[tokio::test]
    async fn session_dedup_replaces_when_new_ended_at_is_newer() {
        let pool = memory_pool().await;
        let harness_id = storage::get_or_create_harness(&pool, "live_test", "live_test", "jsonl", "live_test").await.unwrap();

        ingest_session_variant(&pool, "a.jsonl", "sess-b", 1_700_000_050).await;
        let second = ingest_session_variant(&pool, "b.jsonl", "sess-b", 1_700_000_100).await;
        assert_eq!(second.conversations_updated, 1);

        let (_, ended_at) = storage::get_conversation_id(&pool, &harness_id, "sess-b").await.unwrap().unwrap();
        assert_eq!(ended_at, Some(1_700_000_100));
    }
}
