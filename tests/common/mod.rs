#![allow(dead_code)]

use anyhow::{anyhow, Result};
use kvforge::orchestrator::{
    CausalMask, HiddenTensor, ModelHandles, ModelLoader, ModelShape, PositionSequence,
    TransformerTrunk,
};
use kvforge::reference::{
    ReferenceConfig, ReferenceEmbedder, ReferenceHead, ReferenceLoader, ReferenceTrunk,
};
use std::sync::Mutex;

/// One trunk invocation as seen from the outside.
#[derive(Debug, Clone)]
pub struct TrunkCall {
    pub positions: Vec<usize>,
    pub mask: CausalMask,
    pub output: HiddenTensor,
}

/// Wraps a trunk and records every call made through it.
pub struct RecordingTrunk<T> {
    inner: T,
    calls: Mutex<Vec<TrunkCall>>,
}

impl<T> RecordingTrunk<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<TrunkCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl<T: TransformerTrunk> TransformerTrunk for RecordingTrunk<T> {
    type Cache = T::Cache;

    fn create_cache(&self) -> Result<T::Cache> {
        self.inner.create_cache()
    }

    fn forward(
        &self,
        cache: &mut T::Cache,
        hidden: &HiddenTensor,
        positions: &PositionSequence,
        mask: &CausalMask,
    ) -> Result<HiddenTensor> {
        let output = self.inner.forward(cache, hidden, positions, mask)?;
        self.calls
            .lock()
            .map_err(|_| anyhow!("call log poisoned"))?
            .push(TrunkCall {
                positions: positions.to_vec(),
                mask: mask.clone(),
                output: output.clone(),
            });
        Ok(output)
    }
}

pub type RecordedModel =
    ModelHandles<ReferenceEmbedder, RecordingTrunk<ReferenceTrunk>, ReferenceHead>;

/// 32-wide model over a 32-token vocabulary in four shards.
pub fn small_shape(batch_width: usize, context_length: usize) -> ModelShape {
    ModelShape {
        hidden_dim: 32,
        context_length,
        batch_width,
        shard_size: 8,
        num_shards: 4,
        vocab_size: 32,
    }
}

pub fn small_config() -> ReferenceConfig {
    ReferenceConfig {
        n_layers: 2,
        n_heads: 4,
        d_ff: 64,
        init_scale: 0.5,
        seed: 7,
        ..ReferenceConfig::default()
    }
}

pub fn recorded_model(shape: ModelShape, config: ReferenceConfig) -> Result<RecordedModel> {
    let model = ReferenceLoader::new(shape, config).load()?;
    Ok(ModelHandles {
        embedder: model.embedder,
        trunk: RecordingTrunk::new(model.trunk),
        head: model.head,
        shape: model.shape,
    })
}

pub fn bits(tensor: &HiddenTensor) -> Vec<u32> {
    tensor.iter().map(|v| v.to_bits()).collect()
}
