//! Helpers shared by adapter implementations, ported from
//! `examples/original_source/src/siftd/adapters/sdk.py`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use serde_json::Value;

use crate::domain::{Source, ToolResultPayload};

/// A parse error tied to a specific line, so a malformed record never aborts
/// the rest of the file.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub path: PathBuf,
    pub line: usize,
    pub message: String,
}

/// Walk `locations` (falling back to `default_locations` if none given),
/// returning every file matching one of `glob_patterns`.
pub fn discover_files(
    locations: Option<&[PathBuf]>,
    default_locations: &[PathBuf],
    glob_patterns: &[&str],
) -> Vec<Source> {
    let mut builder = GlobSetBuilder::new();
    for pattern in glob_patterns {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    let Ok(set) = builder.build() else {
        return Vec::new();
    };

    let roots: Vec<PathBuf> = match locations {
        Some(locs) if !locs.is_empty() => locs.to_vec(),
        _ => default_locations.to_vec(),
    };

    let mut found = Vec::new();
    for root in roots {
        if !root.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            if set.is_match(entry.path()) {
                found.push(Source::File(entry.path().to_path_buf()));
            }
        }
    }
    found
}

/// The earliest and latest value of `key` across a slice of JSON records,
/// read as an RFC3339 or epoch-seconds timestamp string.
pub fn timestamp_bounds(records: &[Value], key: &str) -> (Option<String>, Option<String>) {
    let mut earliest: Option<String> = None;
    let mut latest: Option<String> = None;
    for record in records {
        let Some(value) = record.get(key).and_then(Value::as_str) else { continue };
        if earliest.as_deref().map_or(true, |e| value < e) {
            earliest = Some(value.to_string());
        }
        if latest.as_deref().map_or(true, |l| value > l) {
            latest = Some(value.to_string());
        }
    }
    (earliest, latest)
}

/// Parse a JSONL file, collecting each line's `Value` and, separately, a
/// line-numbered `ParseError` for any line that fails to parse. Never
/// aborts early on a bad line.
pub fn load_jsonl(path: &Path) -> std::io::Result<(Vec<Value>, Vec<ParseError>)> {
    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();
    let mut errors = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => records.push(value),
            Err(err) => errors.push(ParseError {
                path: path.to_path_buf(),
                line: index + 1,
                message: err.to_string(),
            }),
        }
    }

    Ok((records, errors))
}

/// Pairs `tool_use` blocks with their matching `tool_result` blocks by id,
/// across however many response turns separate them.
#[derive(Debug, Default)]
pub struct ToolCallLinker {
    uses: HashMap<String, Value>,
    results: HashMap<String, (Option<String>, Value)>,
}

impl ToolCallLinker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_use(&mut self, id: &str, input: Value) {
        self.uses.insert(id.to_string(), input);
    }

    pub fn add_result(&mut self, id: &str, status: Option<&str>, result: Value) {
        self.results.insert(id.to_string(), (status.map(str::to_string), result));
    }

    /// Matched (id, input, status, result) triples, draining both maps.
    pub fn get_pairs(&mut self) -> Vec<(String, Value, Option<String>, Value)> {
        let mut pairs = Vec::new();
        let ids: Vec<String> = self.uses.keys().filter(|id| self.results.contains_key(*id)).cloned().collect();
        for id in ids {
            let input = self.uses.remove(&id).expect("checked contains_key above");
            let (status, result) = self.results.remove(&id).expect("checked contains_key above");
            pairs.push((id, input, status, result));
        }
        pairs
    }

    /// `tool_use` blocks with no matching result yet (status `pending`).
    pub fn pending_uses(&self) -> Vec<(String, Value)> {
        self.uses.iter().map(|(id, input)| (id.clone(), input.clone())).collect()
    }
}

pub fn tool_result_payload_from_value(value: &Value) -> ToolResultPayload {
    match value {
        Value::String(s) => ToolResultPayload::Text(s.clone()),
        other => ToolResultPayload::Json(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_bounds_picks_min_and_max() {
        let records = vec![
            serde_json::json!({"ts": "2026-01-02T00:00:00Z"}),
            serde_json::json!({"ts": "2026-01-01T00:00:00Z"}),
            serde_json::json!({"ts": "2026-01-05T00:00:00Z"}),
        ];
        let (earliest, latest) = timestamp_bounds(&records, "ts");
        assert_eq!(earliest.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(latest.as_deref(), Some("2026-01-05T00:00:00Z"));
    }

    #[test]
    fn tool_call_linker_pairs_matching_ids() {
        let mut linker = ToolCallLinker::new();
        linker.add_use("call-1", serde_json::json!({"cmd": "ls"}));
        linker.add_result("call-1", Some("success"), serde_json::json!("a.txt\nb.txt"));
        linker.add_use("call-2", serde_json::json!({"cmd": "pwd"}));

        let pairs = linker.get_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "call-1");
        assert_eq!(linker.pending_uses().len(), 1);
    }
}
