//! Output formatter contract (§6.4): the same subprocess-JSON-RPC shape as
//! drop-in adapters (`adapters::registry`), applied to rendering search and
//! query results instead of parsing them.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Result};
use serde::Deserialize;

pub const FORMATTER_INTERFACE_VERSION: u32 = 1;

pub trait Formatter {
    fn name(&self) -> &str;
    fn format(&self, payload: &serde_json::Value) -> Result<String>;
}

/// Plain-text rendering: one result per line, terse enough for a terminal.
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn name(&self) -> &str {
        "text"
    }

    fn format(&self, payload: &serde_json::Value) -> Result<String> {
        let Some(items) = payload.as_array() else {
            return Ok(serde_json::to_string_pretty(payload)?);
        };
        let mut out = String::new();
        for item in items {
            let score = item.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let conversation_id = item.get("conversation_id").and_then(|v| v.as_str()).unwrap_or("?");
            let text = item.get("text").or_else(|| item.get("best_excerpt")).and_then(|v| v.as_str()).unwrap_or("");
            out.push_str(&format!("[{score:.3}] {conversation_id}  {text}\n"));
        }
        Ok(out)
    }
}

/// Raw JSON passthrough, pretty-printed.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn name(&self) -> &str {
        "json"
    }

    fn format(&self, payload: &serde_json::Value) -> Result<String> {
        Ok(serde_json::to_string_pretty(payload)?)
    }
}

#[derive(Debug, Deserialize)]
pub struct DropinFormatterManifest {
    pub name: String,
    pub interface_version: u32,
    pub executable: String,
}

/// A drop-in formatter, speaking one JSON-RPC method (`format`) over stdio,
/// the same shape as `adapters::registry::SubprocessAdapter::call`.
pub struct SubprocessFormatter {
    manifest: DropinFormatterManifest,
    executable: PathBuf,
}

impl SubprocessFormatter {
    pub fn load(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join("manifest.toml");
        let raw = std::fs::read_to_string(&manifest_path).map_err(|e| anyhow!("reading {}: {e}", manifest_path.display()))?;
        let manifest: DropinFormatterManifest = toml::from_str(&raw)?;
        if manifest.interface_version != FORMATTER_INTERFACE_VERSION {
            bail!(
                "drop-in formatter '{}' declares interface version {}, expected {}",
                manifest.name,
                manifest.interface_version,
                FORMATTER_INTERFACE_VERSION
            );
        }
        let executable = dir.join(&manifest.executable);
        if !executable.exists() {
            bail!("drop-in formatter '{}' executable not found: {}", manifest.name, executable.display());
        }
        Ok(Self { manifest, executable })
    }
}

impl Formatter for SubprocessFormatter {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn format(&self, payload: &serde_json::Value) -> Result<String> {
        let mut child = Command::new(&self.executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("spawning drop-in formatter '{}': {e}", self.manifest.name))?;

        let request = serde_json::json!({"method": "format", "params": {"payload": payload}});
        let mut stdin = child.stdin.take().expect("piped stdin");
        writeln!(stdin, "{request}")?;
        drop(stdin);

        let stdout = child.stdout.take().expect("piped stdout");
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        child.wait()?;

        let response: serde_json::Value =
            serde_json::from_str(line.trim()).map_err(|e| anyhow!("decoding response from '{}': {e}", self.manifest.name))?;
        response
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("drop-in formatter '{}' did not return a string", self.manifest.name))
    }
}

/// Resolve a formatter by name: built-ins first, then a drop-in directory
/// match (`$XDG_CONFIG_HOME/siftd/formatters/<name>/manifest.toml`).
pub fn resolve(name: &str, formatters_dir: &Path) -> Result<Box<dyn Formatter>> {
    match name {
        "text" => Ok(Box::new(TextFormatter)),
        "json" => Ok(Box::new(JsonFormatter)),
        other => {
            let dir = formatters_dir.join(other);
            Ok(Box::new(SubprocessFormatter::load(&dir)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_formatter_renders_score_and_excerpt() {
        let payload = serde_json::json!([{"score": 0.842, "conversation_id": "c1", "text": "hello"}]);
        let out = TextFormatter.format(&payload).unwrap();
        assert!(out.contains("[0.842] c1  hello"));
    }

    #[test]
    fn json_formatter_round_trips() {
        let payload = serde_json::json!({"a": 1});
        let out = JsonFormatter.format(&payload).unwrap();
        assert!(out.contains("\"a\": 1"));
    }
}
