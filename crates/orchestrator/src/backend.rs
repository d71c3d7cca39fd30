//! Narrow interfaces to the three compiled model modules.
//!
//! Each module is an opaque numeric kernel. Implementations return
//! `anyhow::Result`; the orchestrator wraps their failures as
//! `OrchestratorError::Backend` and checks every shape on the way in and
//! out, so a backend never sees a request that violates its contract.

use crate::config::ModelShape;
use crate::error::{OrchestratorError, Result};
use crate::logits::LogitsAssembler;
use crate::positions::PositionSequence;
use crate::tensor::{CausalMask, HiddenTensor, Logits, ShardMap, Token};

/// Stateless token id to hidden vector lookup.
pub trait TokenEmbedder {
    /// Returns `[1, token_ids.len(), hidden_dim]`.
    fn embed(&self, token_ids: &[Token]) -> anyhow::Result<HiddenTensor>;
}

/// Stateful transformer stack with a persistent attention cache.
///
/// Prefill and decode share this one entry point and differ only in window
/// width. Backends compiled with separate prefill/decode functions dispatch
/// on `positions.phase()` internally.
pub trait TransformerTrunk {
    /// Backend-owned cache memory. Never touched by the orchestrator.
    type Cache;

    fn create_cache(&self) -> anyhow::Result<Self::Cache>;

    /// Runs the stack over `hidden` (`[1, rows, hidden_dim]`).
    ///
    /// The first `positions.len()` rows are real tokens at `positions`.
    /// Any rows after those are filler padding the window to its compiled
    /// width: they may be computed but must not be written to the cache.
    /// `mask` is `[1, 1, rows, context_length]`. The output has the shape
    /// of `hidden`.
    fn forward(
        &self,
        cache: &mut Self::Cache,
        hidden: &HiddenTensor,
        positions: &PositionSequence,
        mask: &CausalMask,
    ) -> anyhow::Result<HiddenTensor>;
}

/// Output projection split into fixed-size vocabulary shards.
pub trait VocabHead {
    /// Projects a `[1, 1, hidden_dim]` state into shards keyed `1..=num_shards`.
    fn project(&self, hidden: &HiddenTensor) -> anyhow::Result<ShardMap>;
}

/// A loaded model: three module handles plus their shape constants.
pub trait ModelBackend {
    type Embedder: TokenEmbedder;
    type Trunk: TransformerTrunk;
    type Head: VocabHead;

    fn shape(&self) -> &ModelShape;
    fn embedder(&self) -> &Self::Embedder;
    fn trunk(&self) -> &Self::Trunk;
    fn head(&self) -> &Self::Head;
}

/// Plain bundle of module handles, as produced by a [`ModelLoader`].
#[derive(Debug, Clone)]
pub struct ModelHandles<E, T, H> {
    pub embedder: E,
    pub trunk: T,
    pub head: H,
    pub shape: ModelShape,
}

impl<E, T, H> ModelBackend for ModelHandles<E, T, H>
where
    E: TokenEmbedder,
    T: TransformerTrunk,
    H: VocabHead,
{
    type Embedder = E;
    type Trunk = T;
    type Head = H;

    fn shape(&self) -> &ModelShape {
        &self.shape
    }

    fn embedder(&self) -> &E {
        &self.embedder
    }

    fn trunk(&self) -> &T {
        &self.trunk
    }

    fn head(&self) -> &H {
        &self.head
    }
}

/// Produces module handles and shape constants for one model.
pub trait ModelLoader {
    type Embedder: TokenEmbedder;
    type Trunk: TransformerTrunk;
    type Head: VocabHead;

    fn load(&self) -> anyhow::Result<ModelHandles<Self::Embedder, Self::Trunk, Self::Head>>;
}

/// Embeds `token_ids`, rejecting empty input, out-of-vocab ids and
/// malformed backend output.
pub fn embed_tokens<E: TokenEmbedder + ?Sized>(
    embedder: &E,
    token_ids: &[Token],
    shape: &ModelShape,
) -> Result<HiddenTensor> {
    if token_ids.is_empty() {
        return Err(OrchestratorError::shape("embedder", "at least one token", 0));
    }
    if let Some(bad) = token_ids
        .iter()
        .find(|t| **t as usize >= shape.vocab_size)
    {
        return Err(OrchestratorError::shape(
            "embedder",
            format!("token id < {}", shape.vocab_size),
            bad,
        ));
    }

    let hidden = embedder.embed(token_ids)?;
    let expected = (1, token_ids.len(), shape.hidden_dim);
    if hidden.dim() != expected {
        return Err(OrchestratorError::shape(
            "embedder",
            format!("{expected:?}"),
            format!("{:?}", hidden.dim()),
        ));
    }
    Ok(hidden)
}

/// Projects a single final hidden state and reassembles the vocabulary.
pub fn project_logits<H: VocabHead + ?Sized>(
    head: &H,
    assembler: &LogitsAssembler,
    hidden: &HiddenTensor,
    shape: &ModelShape,
) -> Result<Logits> {
    let expected = (1, 1, shape.hidden_dim);
    if hidden.dim() != expected {
        return Err(OrchestratorError::shape(
            "vocab head",
            format!("{expected:?}"),
            format!("{:?}", hidden.dim()),
        ));
    }
    let shards = head.project(hidden)?;
    assembler.assemble(&shards)
}
