//! Binary content detection and filtering.
//!
//! Filters binary payloads (images, PDFs, base64 blobs) out of ingested
//! content so the main store stays text-searchable without ballooning in
//! size. Ported from the Python reference implementation's
//! `content/filters.py`.

use serde_json::Value;

use crate::domain::BinaryPlaceholder;

/// 500+ chars of base64 alphabet, optionally padded. Long enough to avoid
/// false-positiving on JWTs or hex digests.
const BASE64_MIN_LEN: usize = 500;

const BINARY_SIGNATURES: &[&[u8]] = &[
    b"SQLite format 3",
    b"\x89PNG",
    b"%PDF",
    b"GIF87a",
    b"GIF89a",
    b"\xff\xd8\xff",
];

/// True if `block` looks like an Anthropic-style `{"type": "image"|"document", "source": {"type": "base64", ...}}`.
pub fn is_base64_image_block(block: &Value) -> bool {
    let Some(obj) = block.as_object() else {
        return false;
    };
    let block_type = obj.get("type").and_then(Value::as_str);
    if !matches!(block_type, Some("image") | Some("document")) {
        return false;
    }
    let Some(source) = obj.get("source").and_then(Value::as_object) else {
        return false;
    };
    source.get("type").and_then(Value::as_str) == Some("base64")
}

/// True if `content` looks like raw binary data (null bytes or known magic bytes).
pub fn is_binary_content(content: &str) -> bool {
    let head: &str = &content[..content.len().min(1000)];
    if head.contains('\0') {
        return true;
    }
    let head_bytes = content.as_bytes();
    let probe = &head_bytes[..head_bytes.len().min(50)];
    BINARY_SIGNATURES.iter().any(|sig| probe.starts_with(sig))
}

/// True if `content` contains a long run of base64-alphabet characters.
pub fn has_large_base64(content: &str) -> bool {
    let mut run = 0usize;
    for b in content.bytes() {
        let in_alphabet = b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=';
        if in_alphabet {
            run += 1;
            if run >= BASE64_MIN_LEN {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Replace a binary image/document block's `source.data` with a metadata
/// placeholder, preserving every other field on the block.
pub fn filter_binary_block(block: &Value) -> Value {
    if !is_base64_image_block(block) {
        return block.clone();
    }
    let obj = block.as_object().expect("checked by is_base64_image_block");
    let source = obj.get("source").and_then(Value::as_object);
    let original_data_len = source
        .and_then(|s| s.get("data"))
        .and_then(Value::as_str)
        .map(|s| s.len())
        .unwrap_or(0);
    let original_type = source
        .and_then(|s| s.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("base64")
        .to_string();
    let media_type = source.and_then(|s| s.get("media_type")).cloned();

    let mut result = serde_json::Map::new();
    for (k, v) in obj {
        if k != "source" {
            result.insert(k.clone(), v.clone());
        }
    }
    result.insert(
        "source".to_string(),
        serde_json::json!({
            "type": "filtered",
            "original_type": original_type,
            "media_type": media_type,
            "original_size": original_data_len,
            "filtered_reason": "binary_content",
        }),
    );
    Value::Object(result)
}

pub fn placeholder_for_block(block: &Value) -> Option<BinaryPlaceholder> {
    if !is_base64_image_block(block) {
        return None;
    }
    let obj = block.as_object()?;
    let source = obj.get("source")?.as_object()?;
    let original_size = source.get("data").and_then(Value::as_str).map(|s| s.len()).unwrap_or(0);
    Some(BinaryPlaceholder {
        original_type: source.get("type").and_then(Value::as_str).unwrap_or("base64").to_string(),
        media_type: source.get("media_type").and_then(Value::as_str).map(String::from),
        original_size,
        filtered_reason: "binary_content".to_string(),
    })
}

/// Filter binary content out of a tool-call result payload shaped like
/// `{"content": ...}`. Only the `content` key is inspected, matching the
/// Anthropic tool-result shape.
pub fn filter_tool_result_binary(result: &Value) -> Value {
    let Some(obj) = result.as_object() else {
        return result.clone();
    };
    let Some(content) = obj.get("content") else {
        return result.clone();
    };

    if let Some(items) = content.as_array() {
        let filtered: Vec<Value> = items
            .iter()
            .map(|item| {
                if item.is_object() {
                    filter_binary_block(item)
                } else {
                    item.clone()
                }
            })
            .collect();
        if filtered != *items {
            let mut new_result = obj.clone();
            new_result.insert("content".to_string(), Value::Array(filtered));
            return Value::Object(new_result);
        }
        return result.clone();
    }

    if let Some(text) = content.as_str() {
        if is_binary_content(text) {
            let mut new_result = obj.clone();
            new_result.insert("content".to_string(), Value::String("[binary content filtered]".to_string()));
            new_result.insert("original_size".to_string(), Value::from(text.len()));
            new_result.insert("filtered_reason".to_string(), Value::String("binary_content".to_string()));
            return Value::Object(new_result);
        }
        if has_large_base64(text) {
            let mut new_result = obj.clone();
            new_result.insert("content".to_string(), Value::String("[base64 content filtered]".to_string()));
            new_result.insert("original_size".to_string(), Value::from(text.len()));
            new_result.insert("filtered_reason".to_string(), Value::String("base64_content".to_string()));
            return Value::Object(new_result);
        }
    }

    result.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_png_magic_bytes() {
        assert!(is_binary_content("\u{89}PNG rest of file"));
    }

    #[test]
    fn detects_null_byte() {
        assert!(is_binary_content("abc\0def"));
    }

    #[test]
    fn plain_text_is_not_binary() {
        assert!(!is_binary_content("just some normal log text"));
    }

    #[test]
    fn short_base64_like_string_is_not_flagged() {
        let jwt_like = "a".repeat(100);
        assert!(!has_large_base64(&jwt_like));
    }

    #[test]
    fn long_base64_run_is_flagged() {
        let blob = "A".repeat(600);
        assert!(has_large_base64(&blob));
    }

    #[test]
    fn filters_base64_image_block_preserving_other_fields() {
        let block = serde_json::json!({
            "type": "image",
            "cache_control": {"type": "ephemeral"},
            "source": {"type": "base64", "media_type": "image/png", "data": "A".repeat(1000)},
        });
        let filtered = filter_binary_block(&block);
        assert_eq!(filtered["source"]["type"], "filtered");
        assert_eq!(filtered["source"]["media_type"], "image/png");
        assert_eq!(filtered["source"]["original_size"], 1000);
        assert_eq!(filtered["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn non_binary_tool_result_passes_through_unchanged() {
        let result = serde_json::json!({"content": "normal output"});
        assert_eq!(filter_tool_result_binary(&result), result);
    }
}
