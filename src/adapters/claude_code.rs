//! Claude Code adapter. Session transcripts are one JSONL file per session
//! under `~/.claude/projects/<workspace-slug>/<session-id>.jsonl`, each line
//! a `user` or `assistant` turn carrying `message.content` blocks and,
//! on assistant turns, a `message.usage` object with token counters
//! (including `cache_creation_input_tokens` / `cache_read_input_tokens`,
//! which `backfill_response_attributes` re-reads from the raw file since
//! they aren't part of the normalized `ParsedResponse` usage fields).

use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;

use super::sdk::{discover_files, load_jsonl, tool_result_payload_from_value, ToolCallLinker};
use super::Adapter;
use crate::domain::{ContentBlock, DedupStrategy, ParsedConversation, ParsedPrompt, ParsedResponse, ParsedToolCall, Source, ToolCallStatus};

pub struct ClaudeCodeAdapter;

impl Adapter for ClaudeCodeAdapter {
    fn name(&self) -> &'static str {
        "claude_code"
    }

    fn default_locations(&self) -> Vec<PathBuf> {
        vec![dirs_home().join(".claude").join("projects")]
    }

    fn dedup_strategy(&self) -> DedupStrategy {
        DedupStrategy::Session
    }

    fn harness_source(&self) -> &'static str {
        "anthropic"
    }

    fn harness_log_format(&self) -> &'static str {
        "jsonl"
    }

    fn supports_live_registration(&self) -> bool {
        true
    }

    fn discover(&self, locations: Option<&[PathBuf]>) -> Result<Vec<Source>> {
        Ok(discover_files(locations, &self.default_locations(), &["*.jsonl"]))
    }

    fn can_handle(&self, source: &Source) -> bool {
        source.path().extension().map_or(false, |e| e == "jsonl")
            && source.path().components().any(|c| c.as_os_str() == ".claude" || c.as_os_str() == "projects")
    }

    fn parse(&self, source: &Source) -> Result<Vec<ParsedConversation>> {
        let path = source.path();
        let (records, _errors) = load_jsonl(path)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let session_id = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let workspace_path = records
            .iter()
            .find_map(|r| r.get("cwd").and_then(Value::as_str))
            .map(str::to_string);

        let mut prompts = Vec::new();
        let mut started_at = None;
        let mut ended_at = None;
        let mut linker = ToolCallLinker::new();
        let mut pending_tool_names: std::collections::HashMap<String, String> = std::collections::HashMap::new();

        for record in &records {
            let timestamp = parse_iso_timestamp(record.get("timestamp").and_then(Value::as_str).unwrap_or(""));
            if started_at.is_none() {
                started_at = Some(timestamp);
            }
            ended_at = Some(timestamp);

            let role = record.get("type").and_then(Value::as_str).unwrap_or("");
            let message = record.get("message");

            match role {
                "user" => {
                    let blocks = extract_blocks(message, &mut linker, &mut pending_tool_names, true);
                    prompts.push(ParsedPrompt {
                        external_id: record.get("uuid").and_then(Value::as_str).map(str::to_string),
                        timestamp,
                        blocks,
                        responses: Vec::new(),
                    });
                }
                "assistant" => {
                    let blocks = extract_blocks(message, &mut linker, &mut pending_tool_names, false);
                    let usage = message.and_then(|m| m.get("usage"));
                    let input_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(Value::as_i64);
                    let output_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_i64);
                    let model_raw_name = message.and_then(|m| m.get("model")).and_then(Value::as_str).map(str::to_string);

                    let mut attributes = serde_json::Map::new();
                    if let Some(v) = usage.and_then(|u| u.get("cache_creation_input_tokens")) {
                        attributes.insert("cache_creation_input_tokens".into(), v.clone());
                    }
                    if let Some(v) = usage.and_then(|u| u.get("cache_read_input_tokens")) {
                        attributes.insert("cache_read_input_tokens".into(), v.clone());
                    }

                    let response = ParsedResponse {
                        external_id: record.get("uuid").and_then(Value::as_str).map(str::to_string),
                        timestamp,
                        model_raw_name,
                        provider_name: Some("anthropic".to_string()),
                        input_tokens,
                        output_tokens,
                        blocks,
                        tool_calls: Vec::new(),
                        attributes: Value::Object(attributes),
                    };

                    if let Some(last) = prompts.last_mut() {
                        last.responses.push(response);
                    } else {
                        prompts.push(ParsedPrompt { external_id: None, timestamp, blocks: Vec::new(), responses: vec![response] });
                    }
                }
                _ => {}
            }
        }

        attach_tool_calls(&mut prompts, &mut linker, &pending_tool_names);

        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![ParsedConversation {
            external_id: session_id,
            harness_name: "claude_code".to_string(),
            workspace_path,
            model_raw_name: None,
            started_at: started_at.unwrap_or(0),
            ended_at,
            prompts,
        }])
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

fn parse_iso_timestamp(s: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(s).map(|dt| dt.timestamp()).unwrap_or(0)
}

fn extract_blocks(
    message: Option<&Value>,
    linker: &mut ToolCallLinker,
    pending_tool_names: &mut std::collections::HashMap<String, String>,
    is_user_turn: bool,
) -> Vec<ContentBlock> {
    let Some(content) = message.and_then(|m| m.get("content")) else { return Vec::new() };

    let blocks_json: Vec<Value> = match content {
        Value::Array(arr) => arr.clone(),
        Value::String(s) => vec![serde_json::json!({"type": "text", "text": s})],
        _ => Vec::new(),
    };

    let mut blocks = Vec::new();
    for block in blocks_json {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    blocks.push(ContentBlock::Text { text: text.to_string() });
                }
            }
            Some("tool_use") if !is_user_turn => {
                if let Some(id) = block.get("id").and_then(Value::as_str) {
                    linker.add_use(id, block.get("input").cloned().unwrap_or(Value::Null));
                    if let Some(name) = block.get("name").and_then(Value::as_str) {
                        pending_tool_names.insert(id.to_string(), name.to_string());
                    }
                }
            }
            Some("tool_result") if is_user_turn => {
                if let Some(id) = block.get("tool_use_id").and_then(Value::as_str) {
                    let is_error = block.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                    linker.add_result(id, Some(if is_error { "error" } else { "success" }), block.get("content").cloned().unwrap_or(Value::Null));
                    blocks.push(ContentBlock::ToolResult {
                        tool_use_id: id.to_string(),
                        text: block.get("content").and_then(Value::as_str).map(str::to_string),
                        blob_hash: None,
                    });
                }
            }
            _ => blocks.push(ContentBlock::Unknown),
        }
    }
    blocks
}

fn attach_tool_calls(prompts: &mut [ParsedPrompt], linker: &mut ToolCallLinker, pending_tool_names: &std::collections::HashMap<String, String>) {
    let pairs = linker.get_pairs();
    if pairs.is_empty() {
        return;
    }
    // Tool calls are attached to the most recent response seen so far, which
    // is always the last response in the last prompt at the point a result
    // arrives back (the assistant that issued tool_use precedes the user
    // turn carrying its tool_result).
    let Some(last_prompt) = prompts.last_mut() else { return };
    let Some(last_response) = last_prompt.responses.last_mut() else { return };

    for (id, input, status, result) in pairs {
        let raw_tool_name = pending_tool_names.get(&id).cloned().unwrap_or_else(|| "unknown".to_string());
        last_response.tool_calls.push(ParsedToolCall {
            external_id: Some(id),
            raw_tool_name,
            input,
            result: Some(tool_result_payload_from_value(&result)),
            status: status.as_deref().and_then(ToolCallStatus::parse).unwrap_or(ToolCallStatus::Success),
        });
    }
}
