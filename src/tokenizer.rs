//! Token Estimation
//!
//! Character-based token estimate for the `usage` block of chat responses.
//! Backends that report their own usage win; the estimate fills the gap for
//! servers that omit it.

use crate::backend::{ChatMessage, TokenUsage};

/// Per-message overhead for role and formatting tokens
const MESSAGE_OVERHEAD: u64 = 4;

/// Approximate BPE token counter
pub struct TokenCounter {
    /// Average characters per token for English text
    chars_per_token: f32,
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            // ~4 chars/token for prose, ~3.5 for code
            chars_per_token: 3.8,
        }
    }

    /// Approximate tokens in a text
    pub fn count(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }

        let chars = text.chars().count() as f32;
        let base = (chars / self.chars_per_token).ceil();
        (base * Self::density(text)).ceil() as u64
    }

    /// Content-type correction factor
    fn density(text: &str) -> f32 {
        let mut factor = 1.0f32;
        let len = text.len().max(1) as f32;

        let symbols: usize = ["{", "}", "(", ")", ";", "=>", "->", "::"]
            .iter()
            .map(|p| text.matches(p).count())
            .sum();
        if symbols as f32 / len > 0.01 {
            factor *= 1.15;
        }

        if text.contains("http://") || text.contains("https://") {
            factor *= 1.1;
        }

        let digits = text.chars().filter(|c| c.is_ascii_digit()).count() as f32;
        if digits / len > 0.3 {
            factor *= 0.9;
        }

        factor
    }

    pub fn count_messages(&self, messages: &[ChatMessage]) -> u64 {
        messages
            .iter()
            .map(|m| MESSAGE_OVERHEAD + self.count(&m.content))
            .sum()
    }

    /// Backend-reported usage, or an estimate from the caller's messages and the answer
    pub fn usage(
        &self,
        reported: Option<TokenUsage>,
        messages: &[ChatMessage],
        completion: &str,
    ) -> TokenUsage {
        reported.unwrap_or_else(|| TokenUsage {
            prompt_tokens: self.count_messages(messages),
            completion_tokens: self.count(completion),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_count() {
        let counter = TokenCounter::new();
        assert_eq!(counter.count(""), 0);

        let prose = "The quick brown fox jumps over the lazy dog.";
        let tokens = counter.count(prose);
        assert!((10..=14).contains(&tokens), "got {}", tokens);

        let code = "fn main() { let x = 1; let y = 2; println!(\"{}{}\", x, y); }";
        let plain = "fn main let x equals one let y equals two and print them both";
        assert!(counter.count(code) as f32 / code.len() as f32 > counter.count(plain) as f32 / plain.len() as f32);
    }

    #[test]
    fn test_reported_usage_wins() {
        let counter = TokenCounter::new();
        let reported = TokenUsage {
            prompt_tokens: 12,
            completion_tokens: 3,
        };
        let usage = counter.usage(Some(reported), &[ChatMessage::user("Hi")], "Hello!");
        assert_eq!(usage, reported);
    }

    #[test]
    fn test_estimated_usage() {
        let counter = TokenCounter::new();
        let usage = counter.usage(None, &[ChatMessage::user("Hi")], "Hello there!");
        assert_eq!(usage.prompt_tokens, MESSAGE_OVERHEAD + 1);
        assert!(usage.completion_tokens > 0);
    }
}
