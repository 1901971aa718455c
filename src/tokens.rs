//! Token estimation
//!
//! Provides token counting behind a trait so the estimator can be swapped
//! for a model-specific tokenizer. The default uses a heuristic of
//! ~4 characters per token, a reasonable approximation for English text
//! across most LLM tokenizers.

/// Tokenizer abstraction used by the context builder and ingestion pipeline.
pub trait Tokenizer: Send + Sync {
    /// Estimate the token count of `content`. Never returns 0 for non-empty text.
    fn count(&self, content: &str) -> usize;
}

/// Heuristic estimator: ~4 chars per token.
#[derive(Debug, Clone, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, content: &str) -> usize {
        if content.is_empty() {
            return 0;
        }
        (content.len() / 4).max(1)
    }
}

/// Estimate tokens for a text string with the default heuristic.
pub fn estimate_tokens(content: &str) -> usize {
    HeuristicTokenizer.count(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn short_text_is_at_least_one() {
        assert_eq!(estimate_tokens("hi"), 1);
    }

    #[test]
    fn scales_with_length() {
        let text = "a".repeat(400);
        assert_eq!(estimate_tokens(&text), 100);
    }
}
