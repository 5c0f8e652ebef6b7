//! Gemini CLI adapter. Session transcripts are JSONL files under
//! `~/.gemini/tmp/<session-id>/logs.jsonl`.

use std::path::PathBuf;

use anyhow::Result;
use serde_json::Value;

use super::sdk::{discover_files, load_jsonl};
use super::Adapter;
use crate::domain::{ContentBlock, DedupStrategy, ParsedConversation, ParsedPrompt, ParsedResponse, Source};

pub struct GeminiCliAdapter;

impl Adapter for GeminiCliAdapter {
    fn name(&self) -> &'static str {
        "gemini_cli"
    }

    fn default_locations(&self) -> Vec<PathBuf> {
        vec![dirs_home().join(".gemini").join("tmp")]
    }

    fn dedup_strategy(&self) -> DedupStrategy {
        DedupStrategy::Session
    }

    fn harness_source(&self) -> &'static str {
        "google"
    }

    fn harness_log_format(&self) -> &'static str {
        "jsonl"
    }

    fn supports_live_registration(&self) -> bool {
        true
    }

    fn discover(&self, locations: Option<&[PathBuf]>) -> Result<Vec<Source>> {
        Ok(discover_files(locations, &self.default_locations(), &["logs.jsonl"]))
    }

    fn can_handle(&self, source: &Source) -> bool {
        source.path().file_name().map_or(false, |n| n == "logs.jsonl")
            && source.path().components().any(|c| c.as_os_str() == ".gemini")
    }

    fn parse(&self, source: &Source) -> Result<Vec<ParsedConversation>> {
        let path = source.path();
        let (records, _errors) = load_jsonl(path)?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let session_id = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let workspace_path = records.iter().find_map(|r| r.get("workingDirectory").and_then(Value::as_str)).map(str::to_string);

        let mut prompts = Vec::new();
        let mut started_at = None;
        let mut ended_at = None;

        for record in &records {
            let timestamp = record
                .get("timestamp")
                .and_then(Value::as_str)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.timestamp())
                .unwrap_or(0);
            if started_at.is_none() {
                started_at = Some(timestamp);
            }
            ended_at = Some(timestamp);

            let kind = record.get("type").and_then(Value::as_str).unwrap_or("");
            let Some(text) = record.get("message").and_then(Value::as_str).map(str::to_string) else { continue };

            match kind {
                "user" => prompts.push(ParsedPrompt {
                    external_id: None,
                    timestamp,
                    blocks: vec![ContentBlock::Text { text }],
                    responses: Vec::new(),
                }),
                "model" | "assistant" => {
                    let response = ParsedResponse {
                        external_id: None,
                        timestamp,
                        model_raw_name: record.get("model").and_then(Value::as_str).map(str::to_string),
                        provider_name: Some("google".to_string()),
                        input_tokens: record.get("tokenCount").and_then(|t| t.get("input")).and_then(Value::as_i64),
                        output_tokens: record.get("tokenCount").and_then(|t| t.get("output")).and_then(Value::as_i64),
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
            harness_name: "gemini_cli".to_string(),
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
