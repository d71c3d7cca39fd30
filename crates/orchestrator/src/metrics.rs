//! Per-session timing and throughput.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetrics {
    pub prompt_tokens: usize,
    pub prefill_calls: usize,
    pub prefill_ms: f64,
    pub decode_calls: usize,
    pub decode_ms: f64,
    pub tokens_generated: usize,
}

impl GenerationMetrics {
    pub fn total_ms(&self) -> f64 {
        self.prefill_ms + self.decode_ms
    }

    /// Decode throughput; the first token comes out of prefill and is not
    /// counted against decode time.
    pub fn tokens_per_sec(&self) -> f64 {
        if self.decode_ms > 0.0 {
            (self.decode_calls as f64 / self.decode_ms) * 1000.0
        } else {
            0.0
        }
    }
}
