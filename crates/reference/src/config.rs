//! Knobs private to the software backend.

use anyhow::{ensure, Result};
use kvforge_kernels::DataType;
use kvforge_orchestrator::ModelShape;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub n_layers: usize,
    pub n_heads: usize,
    pub d_ff: usize,
    pub rope_theta: f32,
    pub layer_norm_eps: f32,
    /// Half-width of the uniform weight initialisation.
    pub init_scale: f32,
    pub seed: u64,
    /// Storage precision at the module boundary and inside the cache.
    pub precision: DataType,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            n_layers: 2,
            n_heads: 4,
            d_ff: 256,
            rope_theta: 10000.0,
            layer_norm_eps: 1e-5,
            init_scale: 0.02,
            seed: 0,
            precision: DataType::F32,
        }
    }
}

impl ReferenceConfig {
    pub fn head_dim(&self, shape: &ModelShape) -> usize {
        shape.hidden_dim / self.n_heads
    }

    pub fn validate(&self, shape: &ModelShape) -> Result<()> {
        ensure!(self.n_layers > 0, "reference model needs at least one layer");
        ensure!(self.n_heads > 0, "reference model needs at least one head");
        ensure!(self.d_ff > 0, "d_ff must be non-zero");
        ensure!(
            shape.hidden_dim % self.n_heads == 0,
            "hidden dim {} is not divisible by {} heads",
            shape.hidden_dim,
            self.n_heads
        );
        ensure!(
            self.head_dim(shape) % 2 == 0,
            "rotary embeddings need an even head dim, got {}",
            self.head_dim(shape)
        );
        ensure!(self.init_scale > 0.0, "init scale must be positive");
        Ok(())
    }
}
