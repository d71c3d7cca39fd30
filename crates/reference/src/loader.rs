//! Builds the three reference modules from a shape and a seed.

use crate::config::ReferenceConfig;
use crate::embedder::ReferenceEmbedder;
use crate::head::ReferenceHead;
use crate::rope::RoPECache;
use crate::trunk::ReferenceTrunk;
use crate::weights::ReferenceWeights;
use anyhow::Result;
use kvforge_orchestrator::{ModelHandles, ModelLoader, ModelShape};
use tracing::info;

pub type ReferenceModel = ModelHandles<ReferenceEmbedder, ReferenceTrunk, ReferenceHead>;

#[derive(Debug, Clone)]
pub struct ReferenceLoader {
    shape: ModelShape,
    config: ReferenceConfig,
}

impl ReferenceLoader {
    pub fn new(shape: ModelShape, config: ReferenceConfig) -> Self {
        Self { shape, config }
    }

    pub fn shape(&self) -> &ModelShape {
        &self.shape
    }

    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }
}

impl ModelLoader for ReferenceLoader {
    type Embedder = ReferenceEmbedder;
    type Trunk = ReferenceTrunk;
    type Head = ReferenceHead;

    fn load(&self) -> Result<ReferenceModel> {
        self.shape.validate()?;
        self.config.validate(&self.shape)?;

        info!(
            vocab_size = self.shape.vocab_size,
            hidden_dim = self.shape.hidden_dim,
            n_layers = self.config.n_layers,
            precision = %self.config.precision,
            seed = self.config.seed,
            "generating reference weights"
        );
        let weights = ReferenceWeights::random(&self.shape, &self.config);
        let precision = self.config.precision;

        let embedder = ReferenceEmbedder::new(weights.token_embeddings, precision);
        let rope = RoPECache::new(
            self.shape.context_length,
            self.config.head_dim(&self.shape),
            self.config.rope_theta,
        );
        let trunk = ReferenceTrunk::new(
            weights.layers,
            rope,
            self.config.n_heads,
            self.shape.hidden_dim,
            self.shape.context_length,
            precision,
        );
        let head = ReferenceHead::new(
            weights.final_norm,
            weights.lm_head,
            self.shape.shard_size,
            precision,
        )?;

        Ok(ModelHandles {
            embedder,
            trunk,
            head,
            shape: self.shape.clone(),
        })
    }
}
