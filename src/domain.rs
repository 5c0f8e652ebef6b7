//! Core in-memory record types shared by adapters, storage, ingestion, and
//! retrieval.
//!
//! This module may not import `storage`, `adapters`, or `cli` — it is the
//! leaf of the dependency order (paths → domain → …) and the import-layering
//! test in `tests/layering.rs` enforces that statically.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// A stable, sortable identifier: time-prefixed, lexicographically ordered
/// close to creation order. Stored as TEXT in SQLite.
pub type Id = Ulid;

pub fn new_id() -> Id {
    Ulid::new()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupStrategy {
    File,
    Session,
}

impl DedupStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupStrategy::File => "file",
            DedupStrategy::Session => "session",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(DedupStrategy::File),
            "session" => Some(DedupStrategy::Session),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityType {
    Conversation,
    Exchange,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Conversation => "conversation",
            EntityType::Exchange => "exchange",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversation" => Some(EntityType::Conversation),
            "exchange" => Some(EntityType::Exchange),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCallStatus {
    Success,
    Error,
    Pending,
}

impl ToolCallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Success => "success",
            ToolCallStatus::Error => "error",
            ToolCallStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ToolCallStatus::Success),
            "error" => Some(ToolCallStatus::Error),
            "pending" => Some(ToolCallStatus::Pending),
            _ => None,
        }
    }
}

/// A typed content block. `Unknown` preserves forward compatibility with
/// block shapes no adapter yet recognizes (Design Notes, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { media_type: String, placeholder: BinaryPlaceholder },
    ToolResult { tool_use_id: String, text: Option<String>, blob_hash: Option<String> },
    Context { label: String, text: String },
    #[serde(other)]
    Unknown,
}

/// Recorded in place of filtered binary content (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryPlaceholder {
    pub original_type: String,
    pub media_type: Option<String>,
    pub original_size: usize,
    pub filtered_reason: String,
}

#[derive(Debug, Clone)]
pub struct Harness {
    pub id: Id,
    pub name: String,
    pub source: String,
    pub log_format: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub id: Id,
    pub path: String,
    pub git_remote: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedModelName {
    pub name: Option<String>,
    pub creator: Option<String>,
    pub family: Option<String>,
    pub version: Option<String>,
    pub variant: Option<String>,
    pub released: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub id: Id,
    pub raw_name: String,
    pub parsed: ParsedModelName,
}

#[derive(Debug, Clone)]
pub struct Provider {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Tool {
    pub id: Id,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Tag {
    pub id: Id,
    pub name: String,
}

/// A conversation as produced by an adapter, not yet assigned storage-side
/// foreign keys (those are resolved by `storage::get_or_create_*` during
/// ingestion).
#[derive(Debug, Clone)]
pub struct ParsedConversation {
    pub external_id: String,
    pub harness_name: String,
    pub workspace_path: Option<String>,
    pub model_raw_name: Option<String>,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub prompts: Vec<ParsedPrompt>,
}

#[derive(Debug, Clone)]
pub struct ParsedPrompt {
    pub external_id: Option<String>,
    pub timestamp: i64,
    pub blocks: Vec<ContentBlock>,
    pub responses: Vec<ParsedResponse>,
}

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub external_id: Option<String>,
    pub timestamp: i64,
    pub model_raw_name: Option<String>,
    pub provider_name: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub blocks: Vec<ContentBlock>,
    pub tool_calls: Vec<ParsedToolCall>,
    pub attributes: Value,
}

#[derive(Debug, Clone)]
pub struct ParsedToolCall {
    pub external_id: Option<String>,
    pub raw_tool_name: String,
    pub input: Value,
    pub result: Option<ToolResultPayload>,
    pub status: ToolCallStatus,
}

#[derive(Debug, Clone)]
pub enum ToolResultPayload {
    Text(String),
    Json(Value),
}

/// A discovered log location. Most adapters only ever produce `File`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(std::path::PathBuf),
}

impl Source {
    pub fn path(&self) -> &std::path::Path {
        match self {
            Source::File(p) => p,
        }
    }
}
