//! Seeded random weights for the software backend.

use crate::config::ReferenceConfig;
use kvforge_kernels::LayerNorm;
use kvforge_orchestrator::ModelShape;
use ndarray::Array2;

#[derive(Debug, Clone)]
pub struct LayerWeights {
    pub attn_norm: LayerNorm,
    pub q_proj: Array2<f32>,
    pub k_proj: Array2<f32>,
    pub v_proj: Array2<f32>,
    pub out_proj: Array2<f32>,
    pub mlp_norm: LayerNorm,
    pub mlp_up: Array2<f32>,
    pub mlp_down: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct ReferenceWeights {
    /// (vocab_size, hidden_dim)
    pub token_embeddings: Array2<f32>,
    pub layers: Vec<LayerWeights>,
    pub final_norm: LayerNorm,
    /// (hidden_dim, vocab_size)
    pub lm_head: Array2<f32>,
}

impl ReferenceWeights {
    /// Uniform weights in `[-init_scale, init_scale)` drawn from `config.seed`.
    /// Only the shape's vocabulary and hidden width matter, so models that
    /// differ in batch width or context length get identical weights.
    pub fn random(shape: &ModelShape, config: &ReferenceConfig) -> Self {
        let mut rng = fastrand::Rng::with_seed(config.seed);
        let scale = config.init_scale;
        let mut random_array = |dims: (usize, usize)| {
            Array2::from_shape_simple_fn(dims, || (rng.f32() * 2.0 - 1.0) * scale)
        };

        let d_model = shape.hidden_dim;
        let token_embeddings = random_array((shape.vocab_size, d_model));
        let layers = (0..config.n_layers)
            .map(|_| LayerWeights {
                attn_norm: LayerNorm::identity(d_model, config.layer_norm_eps),
                q_proj: random_array((d_model, d_model)),
                k_proj: random_array((d_model, d_model)),
                v_proj: random_array((d_model, d_model)),
                out_proj: random_array((d_model, d_model)),
                mlp_norm: LayerNorm::identity(d_model, config.layer_norm_eps),
                mlp_up: random_array((d_model, config.d_ff)),
                mlp_down: random_array((config.d_ff, d_model)),
            })
            .collect();
        let lm_head = random_array((d_model, shape.vocab_size));

        Self {
            token_embeddings,
            layers,
            final_norm: LayerNorm::identity(d_model, config.layer_norm_eps),
            lm_head,
        }
    }
}
