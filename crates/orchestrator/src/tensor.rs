//! Tensor vocabulary shared by every stage.

use ndarray::{Array1, Array3, Array4};
use std::collections::BTreeMap;

/// Token id in `[0, vocab_size)`.
pub type Token = u32;

/// `[1, seq_len, hidden_dim]`
pub type HiddenTensor = Array3<f32>;

/// Additive attention bias, `[1, 1, seq_len, context_length]`.
pub type CausalMask = Array4<f32>;

/// `[1, 1, shard_size]`
pub type VocabShard = Array3<f32>;

/// Shards keyed by their 1-based index.
pub type ShardMap = BTreeMap<usize, VocabShard>;

/// Assembled vocabulary distribution, `[vocab_size]`.
pub type Logits = Array1<f32>;
