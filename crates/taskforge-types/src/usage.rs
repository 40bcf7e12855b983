use serde::{Deserialize, Serialize};

/// Token accounting for one agent session.
///
/// Accumulates incrementally from streaming `assistant` records; the
/// terminating `result` record replaces the accumulated values with
/// authoritative totals. Reset at session start; never carried across
/// sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl UsageTotals {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &UsageTotals) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
    }

    pub fn replace(&mut self, other: &UsageTotals) {
        *self = *other;
    }
}
