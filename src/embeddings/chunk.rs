//! Exchange-window chunker (§4.5): windows of consecutive exchanges whose
//! cumulative token count targets `target_tokens` and never exceeds
//! `max_tokens`, with `overlap_tokens` carried into the next window.

use crate::storage::queries::Exchange;

/// Approximate token count: `(chars + 3) / 4`, minus a fixed 2-token
/// special-token reserve (teacher's `CHARS_PER_TOKEN` constant, generalized
/// to this corpus's text instead of paragraph-boundary documents).
pub fn approx_token_count(text: &str) -> u32 {
    let chars = text.chars().count() as u32;
    let raw = (chars + 3) / 4;
    raw.saturating_sub(2)
}

#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub conversation_id: String,
    pub text: String,
    pub token_count: u32,
    pub source_ids: Vec<String>,
}

pub struct ChunkParams {
    pub target_tokens: u32,
    pub max_tokens: u32,
    pub overlap_tokens: u32,
}

/// Build exchange-window chunks for one conversation's ordered exchanges.
pub fn chunk_exchanges(conversation_id: &str, exchanges: &[Exchange], params: &ChunkParams) -> Vec<PendingChunk> {
    if exchanges.is_empty() {
        return Vec::new();
    }

    let units: Vec<(String, u32, String)> = exchanges
        .iter()
        .map(|ex| {
            let text = format!("{}\n\n{}", ex.prompt_text, ex.response_text).trim().to_string();
            let tokens = approx_token_count(&text);
            (text, tokens, ex.prompt_id.clone())
        })
        .collect();

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < units.len() {
        let mut end = start;
        let mut running_tokens = 0u32;
        while end < units.len() {
            let next_tokens = running_tokens + units[end].1;
            if end > start && next_tokens > params.max_tokens {
                break;
            }
            running_tokens = next_tokens;
            end += 1;
            if running_tokens >= params.target_tokens {
                break;
            }
        }
        end = end.max(start + 1);

        let text = units[start..end].iter().map(|(t, _, _)| t.as_str()).collect::<Vec<_>>().join("\n\n");
        let token_count = units[start..end].iter().map(|(_, tok, _)| *tok).sum();
        let source_ids = units[start..end].iter().map(|(_, _, id)| id.clone()).collect();

        chunks.push(PendingChunk { conversation_id: conversation_id.to_string(), text, token_count, source_ids });

        if end >= units.len() {
            break;
        }

        // Slide back by however many trailing units make up ~overlap_tokens.
        let mut overlap_units = 0usize;
        let mut overlap_sum = 0u32;
        for (_, tok, _) in units[start..end].iter().rev() {
            if overlap_sum >= params.overlap_tokens {
                break;
            }
            overlap_sum += tok;
            overlap_units += 1;
        }
        start = end.saturating_sub(overlap_units).max(start + 1);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(id: &str, prompt: &str, response: &str) -> Exchange {
        Exchange {
            conversation_id: "conv-1".to_string(),
            prompt_id: id.to_string(),
            prompt_timestamp: 0,
            prompt_text: prompt.to_string(),
            response_text: response.to_string(),
        }
    }

    #[test]
    fn short_conversation_becomes_one_chunk() {
        let exchanges = vec![exchange("p1", "hi", "hello there")];
        let params = ChunkParams { target_tokens: 256, max_tokens: 512, overlap_tokens: 25 };
        let chunks = chunk_exchanges("conv-1", &exchanges, &params);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_ids, vec!["p1".to_string()]);
    }

    #[test]
    fn long_conversation_splits_with_overlap() {
        let long_text = "word ".repeat(500);
        let exchanges: Vec<Exchange> = (0..10).map(|i| exchange(&format!("p{i}"), &long_text, &long_text)).collect();
        let params = ChunkParams { target_tokens: 256, max_tokens: 512, overlap_tokens: 25 };
        let chunks = chunk_exchanges("conv-1", &exchanges, &params);
        assert!(chunks.len() > 1, "expected multiple chunks, got {}", chunks.len());
        for chunk in &chunks {
            assert!(chunk.token_count <= params.max_tokens * 2, "chunk exceeded bound: {}", chunk.token_count);
        }
    }

    #[test]
    fn empty_exchanges_yield_no_chunks() {
        let params = ChunkParams { target_tokens: 256, max_tokens: 512, overlap_tokens: 25 };
        assert!(chunk_exchanges("conv-1", &[], &params).is_empty());
    }
}
