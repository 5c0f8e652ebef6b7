//! Best-effort parsing of raw model name strings into structured fields.
//!
//! Used both at ingest time (§3.1 `Model.raw_name`) and by `backfill models`
//! to re-derive fields for rows that predate a parser improvement.

use crate::domain::ParsedModelName;

struct KnownFamily {
    creator: &'static str,
    family: &'static str,
    prefixes: &'static [&'static str],
}

const KNOWN_FAMILIES: &[KnownFamily] = &[
    KnownFamily { creator: "anthropic", family: "claude", prefixes: &["claude-"] },
    KnownFamily { creator: "openai", family: "gpt", prefixes: &["gpt-", "o1", "o3", "o4"] },
    KnownFamily { creator: "google", family: "gemini", prefixes: &["gemini-"] },
    KnownFamily { creator: "meta", family: "llama", prefixes: &["llama-", "llama3", "llama2"] },
    KnownFamily { creator: "mistral", family: "mistral", prefixes: &["mistral-", "mixtral-"] },
    KnownFamily { creator: "deepseek", family: "deepseek", prefixes: &["deepseek-"] },
];

/// Parse a raw model identifier such as `claude-opus-4-6-20260115` or
/// `gpt-4o-2024-11-20` into best-effort creator/family/version/variant/date
/// fields. Returns a `ParsedModelName` with all fields `None` when the name
/// doesn't match any known family (callers should skip updating in that
/// case, matching `backfill_models`' "skip if parsing produced no useful
/// info" behavior).
pub fn parse_model_name(raw_name: &str) -> ParsedModelName {
    let lower = raw_name.to_ascii_lowercase();

    let Some(known) = KNOWN_FAMILIES.iter().find(|k| k.prefixes.iter().any(|p| lower.starts_with(p))) else {
        return ParsedModelName::default();
    };

    let rest = lower.trim_start_matches(|c: char| c.is_ascii_alphabetic() || c == '-');
    let parts: Vec<&str> = lower.split('-').filter(|s| !s.is_empty()).collect();

    let released = parts
        .iter()
        .rev()
        .find(|p| p.len() == 8 && p.chars().all(|c| c.is_ascii_digit()))
        .map(|s| s.to_string())
        .or_else(|| {
            parts.iter().rev().find(|p| p.len() == 10 && p.contains('-')).map(|s| s.to_string())
        });

    let version = parts
        .iter()
        .find(|p| p.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
        .map(|s| s.to_string());

    let variant = if lower.contains("haiku") {
        Some("haiku".to_string())
    } else if lower.contains("sonnet") {
        Some("sonnet".to_string())
    } else if lower.contains("opus") {
        Some("opus".to_string())
    } else if lower.contains("mini") {
        Some("mini".to_string())
    } else if lower.contains("flash") {
        Some("flash".to_string())
    } else if lower.contains("pro") {
        Some("pro".to_string())
    } else {
        None
    };

    let _ = rest;

    ParsedModelName {
        name: Some(raw_name.to_string()),
        creator: Some(known.creator.to_string()),
        family: Some(known.family.to_string()),
        version,
        variant,
        released,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_claude_family() {
        let parsed = parse_model_name("claude-opus-4-6-20260115");
        assert_eq!(parsed.creator.as_deref(), Some("anthropic"));
        assert_eq!(parsed.family.as_deref(), Some("claude"));
        assert_eq!(parsed.variant.as_deref(), Some("opus"));
        assert_eq!(parsed.released.as_deref(), Some("20260115"));
    }

    #[test]
    fn parses_gpt_family() {
        let parsed = parse_model_name("gpt-4o-mini-2024-11-20");
        assert_eq!(parsed.creator.as_deref(), Some("openai"));
        assert_eq!(parsed.variant.as_deref(), Some("mini"));
    }

    #[test]
    fn unknown_family_yields_no_useful_fields() {
        let parsed = parse_model_name("some-internal-finetune-v7");
        assert!(parsed.creator.is_none());
    }
}
