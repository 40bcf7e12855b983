use std::path::PathBuf;
use std::time::Duration;

use taskforge_types::estimate_tokens;

/// Token budgets and auxiliary-model settings for context assembly.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Upper bound on replayed history.
    pub max_total_tokens: u64,
    /// Budget for verbatim recent messages.
    pub recent_tokens_budget: u64,
    /// Unsummarized token total that triggers summarization.
    pub extraction_threshold: u64,
    /// Individual message truncation cap.
    pub max_single_message: u64,
    /// Cache lifetime of a project structure snapshot.
    pub map_expiry_days: i64,
    /// Binary used for auxiliary model calls (summaries, probes).
    pub claude_bin: PathBuf,
    /// Model alias for auxiliary calls.
    pub aux_model: String,
    /// Hard timeout per auxiliary call.
    pub aux_timeout: Duration,
    /// User whose preferences are surfaced in the preamble.
    pub preferences_user: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_total_tokens: 100_000,
            recent_tokens_budget: 50_000,
            extraction_threshold: 50_000,
            max_single_message: 10_000,
            map_expiry_days: 7,
            claude_bin: PathBuf::from("claude"),
            aux_model: "haiku".to_string(),
            aux_timeout: Duration::from_secs(30),
            preferences_user: "default".to_string(),
        }
    }
}

/// Truncate an oversized message around a center marker, keeping the
/// head 40% and tail 40% of the allowed size.
pub fn truncate_middle(content: &str, max_tokens: u64) -> String {
    let tokens = estimate_tokens(content);
    if tokens <= max_tokens {
        return content.to_string();
    }

    let char_limit = (max_tokens * 4) as usize;
    let keep = (char_limit as f64 * 0.4) as usize;
    let chars: Vec<char> = content.chars().collect();
    let head: String = chars[..keep.min(chars.len())].iter().collect();
    let tail: String = chars[chars.len().saturating_sub(keep)..].iter().collect();

    format!(
        "{}\n\n[... truncated {} tokens ...]\n\n{}",
        head,
        tokens - max_tokens,
        tail
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_messages_pass_through() {
        assert_eq!(truncate_middle("short", 10_000), "short");
    }

    #[test]
    fn oversized_message_keeps_head_and_tail() {
        let content = format!("{}{}{}", "A".repeat(30_000), "B".repeat(10_000), "C".repeat(30_000));
        let truncated = truncate_middle(&content, 1_000);

        assert!(truncated.starts_with('A'));
        assert!(truncated.ends_with('C'));
        assert!(truncated.contains("[... truncated"));
        // Head and tail are each 40% of the char budget.
        assert!(truncated.len() < content.len());
    }

    #[test]
    fn boundary_sits_at_the_token_cap() {
        // 40,000 chars is exactly 10,000 tokens: not over the cap.
        let content = "z".repeat(40_000);
        assert_eq!(truncate_middle(&content, 10_000), content);

        // One more char tips it over and triggers the elision.
        let content = "z".repeat(40_001);
        let truncated = truncate_middle(&content, 10_000);
        assert!(truncated.contains("[... truncated"));
        assert!(truncated.len() < 40_001);
    }
}
