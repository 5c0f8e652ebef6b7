//! Codex CLI adapter. Session transcripts are JSONL files under
//! `~/.codex/sessions/`, one file per session, each line a role-tagged
//! message event.

use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;

use super::sdk::{discover_files, load_jsonl};
use super::Adapter;
use crate::domain::{ContentBlock, DedupStrategy, ParsedConversation, ParsedPrompt, ParsedResponse, Source};

pub struct CodexCliAdapter;

impl Adapter for CodexCliAdapter {
    fn name(&self) -> &'static str {
        "codex_cli"
    }

    fn default_locations(&self) -> Vec<PathBuf> {
        vec![dirs_home().join(".codex").join("sessions")]
    }

    fn dedup_strategy(&self) -> DedupStrategy {
        DedupStrategy::Session
    }

    fn harness_source(&self) -> &'static str {
        "openai"
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
            && source.path().components().any(|c| c.as_os_str() == ".codex")
    }

    fn parse(&self, source: &Source) -> Result<Vec<ParsedConversation>> {
        let path = source.path();
        let (records, _errors) = load_jsonl(path)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let session_id = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let workspace_path = records.iter().find_map(|r| r.get("cwd").and_then(Value::as_str)).map(str::to_string);

        let mut prompts = Vec::new();
        let mut started_at = None;
        let mut ended_at = None;

        for record in &records {
            let timestamp = record.get("timestamp").and_then(Value::as_str).and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok()).map(|d| d.timestamp()).unwrap_or(0);
            if started_at.is_none() {
                started_at = Some(timestamp);
            }
            ended_at = Some(timestamp);

            let role = record.get("role").and_then(Value::as_str).unwrap_or("");
            let text = record.get("content").and_then(Value::as_str).map(str::to_string);
            let Some(text) = text else { continue };

            match role {
                "user" => prompts.push(ParsedPrompt {
                    external_id: record.get("id").and_then(Value::as_str).map(str::to_string),
                    timestamp,
                    blocks: vec![ContentBlock::Text { text }],
                    responses: Vec::new(),
                }),
                "assistant" => {
                    let response = ParsedResponse {
                        external_id: record.get("id").and_then(Value::as_str).map(str::to_string),
                        timestamp,
                        model_raw_name: record.get("model").and_then(Value::as_str).map(str::to_string),
                        provider_name: Some("openai".to_string()),
                        input_tokens: record.get("usage").and_then(|u| u.get("input_tokens")).and_then(Value::as_i64),
                        output_tokens: record.get("usage").and_then(|u| u.get("output_tokens")).and_then(Value::as_i64),
                        blocks: vec![ContentBlock::Text { text }],
                        tool_calls: Vec::new(),
                        attributes: Value::Null,
                    };
                    if let Some(last) = prompts.last_mut() {
                        last.responses.push(response);
                    }
                }
                _ => {}
            }
        }

        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![ParsedConversation {
            external_id: session_id,
            harness_name: "codex_cli".to_string(),
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
