//! Aider adapter, ported from `examples/original_source/src/adapters/aider.py`.
//!
//! Aider produces two relevant file shapes: an opt-in analytics JSONL log
//! (token/cost data per message, grouped into sessions by session-start
//! events) and `.aider.chat.history.md` chat transcripts (always written).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use super::sdk::load_jsonl;
use super::Adapter;
use crate::domain::{ContentBlock, DedupStrategy, ParsedConversation, ParsedPrompt, ParsedResponse, Source};

const SESSION_START_EVENTS: &[&str] = &["cli session", "gui session", "launched"];
const MESSAGE_EVENT: &str = "message_send";

pub struct AiderAdapter;

impl Adapter for AiderAdapter {
    fn name(&self) -> &'static str {
        "aider"
    }

    fn default_locations(&self) -> Vec<PathBuf> {
        vec![dirs_home().join(".aider").join("analytics.jsonl")]
    }

    fn dedup_strategy(&self) -> DedupStrategy {
        DedupStrategy::File
    }

    fn harness_source(&self) -> &'static str {
        "multi"
    }

    fn harness_log_format(&self) -> &'static str {
        "jsonl"
    }

    fn discover(&self, locations: Option<&[PathBuf]>) -> Result<Vec<Source>> {
        let mut found = Vec::new();
        let roots: Vec<PathBuf> = match locations {
            Some(locs) if !locs.is_empty() => locs.to_vec(),
            _ => self.default_locations(),
        };
        for root in roots {
            if root.is_file() {
                found.push(Source::File(root));
            }
        }
        for entry in walkdir::WalkDir::new(dirs_home()).max_depth(3).into_iter().filter_map(|e| e.ok()) {
            if entry.file_name() == ".aider.chat.history.md" {
                found.push(Source::File(entry.path().to_path_buf()));
            }
        }
        Ok(found)
    }

    fn can_handle(&self, source: &Source) -> bool {
        let path = source.path();
        (path.extension().map_or(false, |e| e == "jsonl") && path.to_string_lossy().to_lowercase().contains("aider"))
            || path.file_name().map_or(false, |n| n == ".aider.chat.history.md")
    }

    fn parse(&self, source: &Source) -> Result<Vec<ParsedConversation>> {
        let path = source.path();
        if path.file_name().map_or(false, |n| n == ".aider.chat.history.md") {
            Ok(parse_chat_history(path))
        } else {
            Ok(parse_analytics(path))
        }
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

fn parse_analytics(path: &Path) -> Vec<ParsedConversation> {
    let Ok((records, _errors)) = load_jsonl(path) else { return Vec::new() };
    if records.is_empty() {
        return Vec::new();
    }

    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    split_into_sessions(&records).into_iter().filter_map(|session| session_to_conversation(&session, &stem)).collect()
}

fn split_into_sessions(records: &[Value]) -> Vec<Vec<Value>> {
    let mut sessions = Vec::new();
    let mut current: Vec<Value> = Vec::new();

    for record in records {
        let event = record.get("event").and_then(Value::as_str).unwrap_or("");
        if SESSION_START_EVENTS.contains(&event) && !current.is_empty() {
            sessions.push(std::mem::take(&mut current));
        }
        current.push(record.clone());
    }
    if !current.is_empty() {
        sessions.push(current);
    }
    sessions
}

fn session_to_conversation(records: &[Value], stem: &str) -> Option<ParsedConversation> {
    let first = records.first()?;
    let first_time = first.get("time").and_then(Value::as_i64);
    let started_at = first_time.unwrap_or(0);
    let ended_at = records.iter().filter_map(|r| r.get("time").and_then(Value::as_i64)).max();
    let default_model = first.get("properties").and_then(|p| p.get("main_model")).and_then(Value::as_str).map(str::to_string);

    let external_id = format!("aider::{}::{}", stem, first_time.unwrap_or(0));

    let mut prompts = Vec::new();
    let mut prompt_idx = 0;

    for record in records {
        if record.get("event").and_then(Value::as_str) != Some(MESSAGE_EVENT) {
            continue;
        }
        prompt_idx += 1;
        let timestamp = record.get("time").and_then(Value::as_i64).unwrap_or(started_at);
        let props = record.get("properties").cloned().unwrap_or(Value::Null);

        let input_tokens = props.get("prompt_tokens").and_then(Value::as_i64);
        let output_tokens = props.get("completion_tokens").and_then(Value::as_i64);
        let model = props.get("main_model").and_then(Value::as_str).map(str::to_string).or_else(|| default_model.clone());

        let mut attributes = serde_json::Map::new();
        if let Some(cost) = props.get("cost") {
            attributes.insert("cost".into(), Value::String(cost.to_string()));
        }
        if let Some(total_cost) = props.get("total_cost") {
            attributes.insert("total_cost".into(), Value::String(total_cost.to_string()));
        }
        if let Some(edit_format) = props.get("edit_format").and_then(Value::as_str) {
            attributes.insert("edit_format".into(), Value::String(edit_format.to_string()));
        }

        let response = ParsedResponse {
            external_id: Some(format!("{external_id}::msg{prompt_idx}::r")),
            timestamp,
            model_raw_name: model,
            provider_name: None,
            input_tokens,
            output_tokens,
            blocks: Vec::new(),
            tool_calls: Vec::new(),
            attributes: Value::Object(attributes),
        };

        prompts.push(ParsedPrompt {
            external_id: Some(format!("{external_id}::msg{prompt_idx}")),
            timestamp,
            blocks: Vec::new(),
            responses: vec![response],
        });
    }

    if prompts.is_empty() {
        return None;
    }

    Some(ParsedConversation {
        external_id,
        harness_name: "aider".to_string(),
        workspace_path: None,
        model_raw_name: default_model,
        started_at,
        ended_at,
        prompts,
    })
}

fn parse_chat_history(path: &Path) -> Vec<ParsedConversation> {
    let Ok(text) = std::fs::read_to_string(path) else { return Vec::new() };
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let workspace_path = path.parent().map(|p| p.to_string_lossy().to_string());

    let splits = find_session_headers(&text);
    if splits.is_empty() {
        return Vec::new();
    }

    let mut conversations = Vec::new();
    for (i, (header_end, timestamp_str)) in splits.iter().enumerate() {
        let end_pos = splits.get(i + 1).map(|(start, _)| *start).unwrap_or(text.len());
        let session_text = text[*header_end..end_pos].trim();
        if session_text.is_empty() {
            continue;
        }
        let started_at = parse_chat_timestamp(timestamp_str);
        let external_id = format!("aider::{stem}::{timestamp_str}");
        let prompts = parse_markdown_messages(session_text, &external_id);
        if prompts.is_empty() {
            continue;
        }
        conversations.push(ParsedConversation {
            external_id,
            harness_name: "aider".to_string(),
            workspace_path: workspace_path.clone(),
            model_raw_name: None,
            started_at,
            ended_at: None,
            prompts,
        });
    }
    conversations
}

/// Finds `# aider chat started at YYYY-MM-DD HH:MM:SS` headers, returning
/// (end-of-header-line offset, timestamp string) pairs.
fn find_session_headers(text: &str) -> Vec<(usize, String)> {
    const PREFIX: &str = "# aider chat started at ";
    let mut out = Vec::new();
    let mut search_from = 0;
    while let Some(rel) = text[search_from..].find(PREFIX) {
        let start = search_from + rel;
        let line_end = text[start..].find('\n').map(|i| start + i + 1).unwrap_or(text.len());
        let rest = &text[start + PREFIX.len()..line_end];
        let timestamp = rest.trim().to_string();
        out.push((line_end, timestamp));
        search_from = line_end;
    }
    out
}

fn parse_chat_timestamp(s: &str) -> i64 {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp())
        .unwrap_or(0)
}

fn parse_markdown_messages(text: &str, base_id: &str) -> Vec<ParsedPrompt> {
    let mut prompts: Vec<ParsedPrompt> = Vec::new();
    let mut current_role: Option<&str> = None;
    let mut current_lines: Vec<&str> = Vec::new();
    let mut prompt_idx = 0usize;

    let mut flush = |role: Option<&str>, lines: &mut Vec<&str>, prompts: &mut Vec<ParsedPrompt>, idx: &mut usize| {
        if lines.is_empty() {
            return;
        }
        let content = lines.join("\n").trim().to_string();
        lines.clear();
        if content.is_empty() {
            return;
        }
        match role {
            Some("user") => {
                *idx += 1;
                prompts.push(ParsedPrompt {
                    external_id: Some(format!("{base_id}::p{idx}")),
                    timestamp: 0,
                    blocks: vec![ContentBlock::Text { text: content }],
                    responses: Vec::new(),
                });
            }
            Some("assistant") => {
                if let Some(last) = prompts.last_mut() {
                    last.responses.push(ParsedResponse {
                        external_id: Some(format!("{base_id}::p{idx}::r")),
                        timestamp: 0,
                        model_raw_name: None,
                        provider_name: None,
                        input_tokens: None,
                        output_tokens: None,
                        blocks: vec![ContentBlock::Text { text: content }],
                        tool_calls: Vec::new(),
                        attributes: Value::Null,
                    });
                }
            }
            _ => {}
        }
    };

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("#### ") {
            flush(current_role, &mut current_lines, &mut prompts, &mut prompt_idx);
            current_role = Some("user");
            current_lines = vec![rest];
        } else if current_role == Some("user") {
            flush(current_role, &mut current_lines, &mut prompts, &mut prompt_idx);
            current_role = Some("assistant");
            current_lines = vec![line];
        } else if current_role == Some("assistant") {
            current_lines.push(line);
        }
    }
    flush(current_role, &mut current_lines, &mut prompts, &mut prompt_idx);

    prompts
}
