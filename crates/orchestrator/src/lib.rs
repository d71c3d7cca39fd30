//! Decode orchestration for language models split into three compiled
//! modules: a token embedder, a transformer trunk with a persistent
//! key/value cache, and a vocabulary-sharded output head.
//!
//! The crate owns everything between those modules:
//! - position bookkeeping and causal masks for prefill and decode windows
//! - a cache handle whose counter must track the session cursor exactly
//! - reassembly of logit shards in ascending shard order
//! - pluggable sampling
//! - a per-session state machine with cancellation and metrics
//!
//! Numeric backends plug in through [`TokenEmbedder`], [`TransformerTrunk`]
//! and [`VocabHead`].

pub mod backend;
pub mod cache;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod logits;
pub mod mask;
pub mod metrics;
pub mod orchestrator;
pub mod positions;
pub mod sampler;
pub mod session;
pub mod tensor;
pub mod trunk;

pub use backend::{
    embed_tokens, project_logits, ModelBackend, ModelHandles, ModelLoader, TokenEmbedder,
    TransformerTrunk, VocabHead,
};
pub use cache::KVCacheState;
pub use cancellation::{CancellationHandle, CancellationToken};
pub use config::{GenerationConfig, ModelShape};
pub use error::{OrchestratorError, Result};
pub use logits::LogitsAssembler;
pub use mask::CausalMaskBuilder;
pub use metrics::GenerationMetrics;
pub use orchestrator::{DecodeOrchestrator, GenerationOutput, StepOutcome};
pub use positions::{Phase, PositionSequence, PositionSequencer};
pub use sampler::{LogitsSampler, Sampler, SamplerConfig};
pub use session::{
    GenerationSession, SessionHandle, SessionId, SessionState, SessionSummary, TerminationReason,
};
pub use tensor::{CausalMask, HiddenTensor, Logits, ShardMap, Token, VocabShard};
