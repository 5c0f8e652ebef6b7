//! Hybrid retrieval engine (§4.6): candidate filtering, full-text recall,
//! role filter, vector search, MMR diversity rerank, threshold, mode
//! post-processing, and enrichment.

use std::cmp::Ordering;
use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::embeddings::backend::EmbeddingBackend;
use crate::embeddings::store::{chunks_for_conversations, StoredChunk};
use crate::embeddings::vector::cosine_similarity;
use crate::storage::fts::{fts5_recall_conversations, RecallMode};
use crate::storage::tags::{active_conversation_ids, conversation_ids_with_tag, DERIVATIVE_TAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Default,
    Thread,
    Context,
    Full,
    First,
    Conversations,
}

#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    /// `-l`: a conversation matches if it carries any of these.
    pub any_of: Vec<String>,
    /// `--all-tags`: a conversation matches only if it carries every one.
    pub all_of: Vec<String>,
    /// `--no-tag`: a conversation is excluded if it carries any of these.
    pub none_of: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub workspace: Option<String>,
    pub model: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub tags: TagFilter,
    pub role: Option<Role>,
    pub mode: Mode,
    pub semantic_only: bool,
    pub diversity: bool,
    pub lambda: f64,
    pub threshold: Option<f32>,
    pub limit: i64,
    pub recall: i64,
    pub exclude_active: bool,
    pub exclude_derivative: bool,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            workspace: None,
            model: None,
            since: None,
            before: None,
            tags: TagFilter::default(),
            role: None,
            mode: Mode::Default,
            semantic_only: false,
            diversity: true,
            lambda: 0.7,
            threshold: None,
            limit: 10,
            recall: 200,
            exclude_active: true,
            exclude_derivative: true,
        }
    }
}

#[derive(Debug, Clone)]
struct ScoredChunk {
    chunk: StoredChunk,
    score: f32,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub conversation_id: String,
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
    pub workspace_path: Option<String>,
    pub conversation_started_at: Option<i64>,
    pub file_references: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationGroup {
    pub conversation_id: String,
    pub max_score: f32,
    pub mean_score: f32,
    pub chunk_count: usize,
    pub best_excerpt: String,
    pub workspace_path: Option<String>,
    pub conversation_started_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Chunks(Vec<SearchResult>),
    Conversations(Vec<ConversationGroup>),
}

const FIRST_RELEVANCE_FLOOR: f32 = 0.65;
const EXCERPT_TRUNCATE: usize = 240;

pub async fn search(
    main_pool: &SqlitePool,
    embeddings_pool: &SqlitePool,
    backend: &dyn EmbeddingBackend,
    params: &SearchParams,
) -> Result<SearchOutcome> {
    let candidate_ids = build_candidate_set(main_pool, params).await?;

    let candidate_ids = if params.semantic_only {
        candidate_ids
    } else {
        let (fts_hits, mode) = fts5_recall_conversations(main_pool, &params.query, params.recall).await?;
        if mode == RecallMode::None {
            eprintln!("full-text recall found nothing for '{}'; falling back to pure embeddings", params.query);
            candidate_ids
        } else {
            Some(match candidate_ids {
                Some(ids) => {
                    let intersection: HashSet<String> = ids.intersection(&fts_hits).cloned().collect();
                    if intersection.is_empty() { ids } else { intersection }
                }
                None => fts_hits,
            })
        }
    };

    let source_ids = if let Some(role) = params.role {
        let ids = allowed_source_ids(main_pool, role, candidate_ids.as_ref()).await?;
        if ids.is_empty() {
            return Ok(empty_outcome(params.mode));
        }
        Some(ids)
    } else {
        None
    };

    let query_embedding = backend.embed_one(&params.query).await?;
    let search_limit = widen_limit(params.limit, params.mode, params.diversity);
    let mut scored = vector_search(embeddings_pool, &query_embedding, candidate_ids.as_ref(), source_ids.as_ref(), search_limit).await?;

    if params.diversity {
        let mmr_limit = widen_limit(params.limit, params.mode, false);
        scored = mmr_rerank(scored, params.lambda, mmr_limit);
    }

    if let Some(threshold) = params.threshold {
        scored.retain(|s| s.score >= threshold);
    }

    mode_postprocess_and_enrich(main_pool, scored, params).await
}

/// `search_limit`/`mmr_limit` widening: thread mode fixes a generous window
/// since its post-filter keeps only chunks from one conversation; first and
/// conversations modes need many more candidates than they'll keep because
/// they filter or group post-hoc; diversity rerank needs a larger pool than
/// its final cut to have anything to diversify against.
fn widen_limit(limit: i64, mode: Mode, diversity_pending: bool) -> i64 {
    if limit == 0 {
        // `--limit 0` means "no final trim" (testable property #12); nothing
        // downstream should be capped on its account either.
        return i64::MAX;
    }
    let base = match mode {
        Mode::Thread => 40,
        Mode::First | Mode::Conversations => limit.saturating_mul(10),
        _ => limit,
    };
    if diversity_pending {
        base.saturating_mul(3).max(base)
    } else {
        base
    }
}

fn empty_outcome(mode: Mode) -> SearchOutcome {
    match mode {
        Mode::Conversations => SearchOutcome::Conversations(Vec::new()),
        _ => SearchOutcome::Chunks(Vec::new()),
    }
}

async fn all_conversation_ids(pool: &SqlitePool) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT id FROM conversations").fetch_all(pool).await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

async fn conversation_ids_for_workspace(pool: &SqlitePool, substr: &str) -> Result<HashSet<String>> {
    let pattern = format!("%{substr}%");
    let rows = sqlx::query("SELECT c.id FROM conversations c JOIN workspaces w ON w.id = c.workspace_id WHERE w.path LIKE ?")
        .bind(pattern)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

async fn conversation_ids_for_model(pool: &SqlitePool, substr: &str) -> Result<HashSet<String>> {
    let pattern = format!("%{substr}%");
    let rows = sqlx::query(
        "SELECT c.id FROM conversations c JOIN models m ON m.id = c.model_id WHERE m.raw_name LIKE ? OR m.name LIKE ?",
    )
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

async fn conversation_ids_since(pool: &SqlitePool, since: i64) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT id FROM conversations WHERE started_at >= ?").bind(since).fetch_all(pool).await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

async fn conversation_ids_before(pool: &SqlitePool, before: i64) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT id FROM conversations WHERE started_at <= ?").bind(before).fetch_all(pool).await?;
    Ok(rows.iter().map(|r| r.get("id")).collect())
}

/// A tag ending in `:` is a prefix match against every tag name sharing
/// that prefix (e.g. `shell:` matches `shell:test`, `shell:build`, ...).
async fn conversation_ids_matching_tag(pool: &SqlitePool, tag: &str) -> Result<HashSet<String>> {
    if let Some(prefix) = tag.strip_suffix(':') {
        let pattern = format!("{prefix}:%");
        let rows = sqlx::query(
            "SELECT DISTINCT ct.conversation_id FROM conversation_tags ct JOIN tags t ON t.id = ct.tag_id WHERE t.name LIKE ?",
        )
        .bind(pattern)
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("conversation_id")).collect())
    } else {
        Ok(conversation_ids_with_tag(pool, tag).await?.into_iter().collect())
    }
}

fn intersect_into(acc: Option<HashSet<String>>, new: HashSet<String>) -> Option<HashSet<String>> {
    match acc {
        None => Some(new),
        Some(existing) => Some(existing.intersection(&new).cloned().collect()),
    }
}

async fn build_candidate_set(pool: &SqlitePool, params: &SearchParams) -> Result<Option<HashSet<String>>> {
    let mut candidate_ids: Option<HashSet<String>> = None;

    if let Some(workspace) = &params.workspace {
        candidate_ids = intersect_into(candidate_ids, conversation_ids_for_workspace(pool, workspace).await?);
    }
    if let Some(model) = &params.model {
        candidate_ids = intersect_into(candidate_ids, conversation_ids_for_model(pool, model).await?);
    }
    if let Some(since) = params.since {
        candidate_ids = intersect_into(candidate_ids, conversation_ids_since(pool, since.timestamp()).await?);
    }
    if let Some(before) = params.before {
        candidate_ids = intersect_into(candidate_ids, conversation_ids_before(pool, before.timestamp()).await?);
    }

    if !params.tags.any_of.is_empty() {
        let mut union = HashSet::new();
        for tag in &params.tags.any_of {
            union.extend(conversation_ids_matching_tag(pool, tag).await?);
        }
        candidate_ids = intersect_into(candidate_ids, union);
    }
    for tag in &params.tags.all_of {
        candidate_ids = intersect_into(candidate_ids, conversation_ids_matching_tag(pool, tag).await?);
    }

    let mut excluded = HashSet::new();
    for tag in &params.tags.none_of {
        excluded.extend(conversation_ids_matching_tag(pool, tag).await?);
    }
    if params.exclude_active {
        excluded.extend(active_conversation_ids(pool).await?);
    }
    if params.exclude_derivative {
        excluded.extend(conversation_ids_with_tag(pool, DERIVATIVE_TAG).await?);
    }

    if !excluded.is_empty() {
        let base = match candidate_ids {
            Some(ids) => ids,
            None => all_conversation_ids(pool).await?,
        };
        candidate_ids = Some(base.difference(&excluded).cloned().collect());
    }

    Ok(candidate_ids)
}

async fn allowed_source_ids(pool: &SqlitePool, role: Role, candidate_ids: Option<&HashSet<String>>) -> Result<HashSet<String>> {
    let table = match role {
        Role::User => "prompts",
        Role::Assistant => "responses",
    };
    let sql = format!("SELECT id, conversation_id FROM {table}");
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .filter(|row| {
            let conversation_id: String = row.get("conversation_id");
            candidate_ids.map_or(true, |ids| ids.contains(&conversation_id))
        })
        .map(|row| row.get("id"))
        .collect())
}

async fn vector_search(
    embeddings_pool: &SqlitePool,
    query_embedding: &[f32],
    candidate_ids: Option<&HashSet<String>>,
    source_ids: Option<&HashSet<String>>,
    limit: i64,
) -> Result<Vec<ScoredChunk>> {
    let chunks = chunks_for_conversations(embeddings_pool, candidate_ids).await?;
    let mut scored: Vec<ScoredChunk> = chunks
        .into_iter()
        .filter(|chunk| source_ids.map_or(true, |ids| chunk.source_ids.iter().any(|s| ids.contains(s))))
        .map(|chunk| {
            let score = cosine_similarity(query_embedding, &chunk.embedding);
            ScoredChunk { chunk, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit.max(0) as usize);
    Ok(scored)
}

/// Greedy MMR: repeatedly pick the candidate maximizing
/// `lambda * relevance - (1 - lambda) * max_sim_to_selected`.
fn mmr_rerank(candidates: Vec<ScoredChunk>, lambda: f64, limit: i64) -> Vec<ScoredChunk> {
    let lambda = lambda as f32;
    let limit = limit.max(0) as usize;
    let mut remaining = candidates;
    let mut selected: Vec<ScoredChunk> = Vec::new();

    while !remaining.is_empty() && selected.len() < limit {
        let mut best_idx = 0;
        let mut best_value = f32::NEG_INFINITY;
        for (i, candidate) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| cosine_similarity(&candidate.chunk.embedding, &s.chunk.embedding))
                .fold(0.0f32, f32::max);
            let value = lambda * candidate.score - (1.0 - lambda) * max_sim;
            if value > best_value {
                best_value = value;
                best_idx = i;
            }
        }
        selected.push(remaining.remove(best_idx));
    }
    selected
}

async fn conversation_meta(pool: &SqlitePool, conversation_id: &str) -> Result<(Option<String>, Option<i64>)> {
    let row = sqlx::query(
        "SELECT w.path AS workspace_path, c.started_at FROM conversations c LEFT JOIN workspaces w ON w.id = c.workspace_id WHERE c.id = ?",
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await?;
    Ok(match row {
        Some(r) => (r.try_get("workspace_path").ok(), r.try_get::<i64, _>("started_at").ok()),
        None => (None, None),
    })
}

/// Earliest timestamp among a chunk's source prompts/responses, used by
/// `--first` to rank by position in the conversation rather than score.
async fn earliest_source_timestamp(pool: &SqlitePool, source_ids: &[String]) -> Result<Option<i64>> {
    if source_ids.is_empty() {
        return Ok(None);
    }
    let placeholders = source_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT MIN(timestamp) AS ts FROM (
            SELECT timestamp FROM prompts WHERE id IN ({placeholders})
            UNION ALL
            SELECT timestamp FROM responses WHERE id IN ({placeholders})
        )"
    );
    let mut query = sqlx::query(&sql);
    for id in source_ids {
        query = query.bind(id);
    }
    for id in source_ids {
        query = query.bind(id);
    }
    let row = query.fetch_one(pool).await?;
    Ok(row.try_get::<i64, _>("ts").ok())
}

async fn to_search_result(pool: &SqlitePool, scored: &ScoredChunk) -> Result<SearchResult> {
    let (workspace_path, conversation_started_at) = conversation_meta(pool, &scored.chunk.conversation_id).await?;
    Ok(SearchResult {
        conversation_id: scored.chunk.conversation_id.clone(),
        chunk_id: scored.chunk.id.clone(),
        text: scored.chunk.text.clone(),
        score: scored.score,
        workspace_path,
        conversation_started_at,
        file_references: extract_file_references(&scored.chunk.text),
    })
}

async fn mode_postprocess_and_enrich(pool: &SqlitePool, scored: Vec<ScoredChunk>, params: &SearchParams) -> Result<SearchOutcome> {
    match params.mode {
        Mode::First => {
            let mut candidates = Vec::new();
            for chunk in &scored {
                if chunk.score < FIRST_RELEVANCE_FLOOR {
                    continue;
                }
                let timestamp = earliest_source_timestamp(pool, &chunk.chunk.source_ids)
                    .await?
                    .or(conversation_meta(pool, &chunk.chunk.conversation_id).await?.1);
                candidates.push((timestamp, chunk));
            }
            candidates.sort_by_key(|(ts, _)| ts.unwrap_or(i64::MAX));
            let Some((_, winner)) = candidates.into_iter().next() else {
                return Ok(SearchOutcome::Chunks(Vec::new()));
            };
            Ok(SearchOutcome::Chunks(vec![to_search_result(pool, winner).await?]))
        }
        Mode::Conversations => {
            use std::collections::HashMap;
            let mut groups: HashMap<String, Vec<&ScoredChunk>> = HashMap::new();
            for chunk in &scored {
                groups.entry(chunk.chunk.conversation_id.clone()).or_default().push(chunk);
            }

            let mut result = Vec::new();
            for (conversation_id, chunks) in groups {
                let max_score = chunks.iter().map(|c| c.score).fold(f32::MIN, f32::max);
                let mean_score = chunks.iter().map(|c| c.score).sum::<f32>() / chunks.len() as f32;
                let best = chunks.iter().max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal)).unwrap();
                let (workspace_path, conversation_started_at) = conversation_meta(pool, &conversation_id).await?;
                result.push(ConversationGroup {
                    conversation_id,
                    max_score,
                    mean_score,
                    chunk_count: chunks.len(),
                    best_excerpt: truncate_excerpt(&best.chunk.text),
                    workspace_path,
                    conversation_started_at,
                });
            }
            result.sort_by(|a, b| b.max_score.partial_cmp(&a.max_score).unwrap_or(Ordering::Equal));
            apply_final_limit(&mut result, params.limit);
            Ok(SearchOutcome::Conversations(result))
        }
        _ => {
            let mut trimmed = scored;
            apply_final_limit(&mut trimmed, params.limit);
            let mut results = Vec::with_capacity(trimmed.len());
            for chunk in &trimmed {
                results.push(to_search_result(pool, chunk).await?);
            }
            Ok(SearchOutcome::Chunks(results))
        }
    }
}

/// `limit == 0` means "no final trim" (testable property #12); any other
/// value (negative treated as zero results) truncates as usual.
fn apply_final_limit<T>(items: &mut Vec<T>, limit: i64) {
    if limit == 0 {
        return;
    }
    items.truncate(limit.max(0) as usize);
}

fn truncate_excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_TRUNCATE {
        return text.to_string();
    }
    let mut truncated = text.chars().take(EXCERPT_TRUNCATE).collect::<String>();
    truncated.push('…');
    truncated
}

const FILE_EXTENSIONS: &[&str] =
    &["rs", "py", "js", "ts", "tsx", "jsx", "go", "rb", "java", "c", "cpp", "h", "hpp", "toml", "yaml", "yml", "json", "md", "sh", "sql"];

/// A small heuristic, not a parser: tokens containing a path separator, or
/// ending in a known source-file extension, are treated as file references.
fn extract_file_references(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for raw in text.split(|c: char| c.is_whitespace() || matches!(c, '`' | '"' | '\'' | '(' | ')' | ',')) {
        let token = raw.trim_matches(|c: char| matches!(c, '.' | ':' | ';'));
        if token.is_empty() {
            continue;
        }
        let looks_pathy = token.contains('/') && !token.starts_with("http://") && !token.starts_with("https://");
        let has_known_ext = token.rsplit_once('.').map(|(_, ext)| FILE_EXTENSIONS.contains(&ext)).unwrap_or(false);
        if (looks_pathy || has_known_ext) && seen.insert(token.to_string()) {
            refs.push(token.to_string());
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_limit_thread_mode_is_fixed() {
        assert_eq!(widen_limit(10, Mode::Thread, false), 40);
        assert_eq!(widen_limit(10, Mode::Thread, true), 120);
    }

    #[test]
    fn widen_limit_first_mode_multiplies() {
        assert_eq!(widen_limit(5, Mode::First, false), 50);
    }

    #[test]
    fn mmr_prefers_diverse_items_over_near_duplicates() {
        let a = ScoredChunk {
            chunk: StoredChunk { id: "a".into(), conversation_id: "c1".into(), text: "a".into(), embedding: vec![1.0, 0.0], source_ids: vec![] },
            score: 0.9,
        };
        let dup = ScoredChunk {
            chunk: StoredChunk { id: "dup".into(), conversation_id: "c1".into(), text: "dup".into(), embedding: vec![1.0, 0.01], source_ids: vec![] },
            score: 0.89,
        };
        let diverse = ScoredChunk {
            chunk: StoredChunk { id: "diverse".into(), conversation_id: "c2".into(), text: "d".into(), embedding: vec![0.0, 1.0], source_ids: vec![] },
            score: 0.5,
        };
        let picked = mmr_rerank(vec![a, dup, diverse], 0.5, 2);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].chunk.id, "a");
        assert_eq!(picked[1].chunk.id, "diverse");
    }

    #[test]
    fn extract_file_references_finds_paths_and_extensions() {
        let text = "edit src/main.rs then check README.md, also see https://example.com/a.rs";
        let refs = extract_file_references(text);
        assert!(refs.contains(&"src/main.rs".to_string()));
        assert!(refs.contains(&"README.md".to_string()));
        assert!(!refs.iter().any(|r| r.starts_with("https://")));
    }

    #[test]
    fn truncate_excerpt_respects_short_text() {
        assert_eq!(truncate_excerpt("short"), "short");
    }
}
