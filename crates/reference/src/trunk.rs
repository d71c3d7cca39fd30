//! Pre-norm decoder stack over a position-indexed K/V cache.

use crate::cache::SlotCache;
use crate::rope::RoPECache;
use crate::weights::LayerWeights;
use anyhow::{ensure, Result};
use kvforge_kernels::{gelu_inplace, multi_head_attention, DataType};
use kvforge_orchestrator::{CausalMask, HiddenTensor, PositionSequence, TransformerTrunk};
use ndarray::{s, Array2, Axis};

pub struct ReferenceTrunk {
    layers: Vec<LayerWeights>,
    rope: RoPECache,
    n_heads: usize,
    d_model: usize,
    context_length: usize,
    precision: DataType,
}

impl ReferenceTrunk {
    pub fn new(
        layers: Vec<LayerWeights>,
        rope: RoPECache,
        n_heads: usize,
        d_model: usize,
        context_length: usize,
        precision: DataType,
    ) -> Self {
        Self {
            layers,
            rope,
            n_heads,
            d_model,
            context_length,
            precision,
        }
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Projects one normed row, rotates q/k at `position` and stores k/v.
    /// Returns the rotated query.
    fn project_row(
        &self,
        layer: &LayerWeights,
        layer_idx: usize,
        cache: &mut SlotCache,
        row: &Array2<f32>,
        position: usize,
    ) -> Result<Array2<f32>> {
        let normed = layer.attn_norm.forward(row.view())?;
        let mut q = normed.dot(&layer.q_proj);
        let mut k = normed.dot(&layer.k_proj);
        let mut v = normed.dot(&layer.v_proj);
        self.rope.apply(q.row_mut(0), position)?;
        self.rope.apply(k.row_mut(0), position)?;

        self.precision.cast_inplace(&mut k);
        self.precision.cast_inplace(&mut v);
        cache.write(layer_idx, position, k.row(0), v.row(0))?;
        Ok(q)
    }

    /// Attention over the cache plus the MLP, both with residuals.
    fn mix_row(
        &self,
        layer: &LayerWeights,
        layer_idx: usize,
        cache: &SlotCache,
        row: &Array2<f32>,
        query: &Array2<f32>,
        bias: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let (keys, values) = cache.get(layer_idx);
        let attn = multi_head_attention(query.view(), keys, values, bias.view(), self.n_heads)?;
        let x = row + &attn.dot(&layer.out_proj);

        let normed = layer.mlp_norm.forward(x.view())?;
        let mut hidden = normed.dot(&layer.mlp_up);
        gelu_inplace(hidden.view_mut());
        Ok(x + &hidden.dot(&layer.mlp_down))
    }
}

impl TransformerTrunk for ReferenceTrunk {
    type Cache = SlotCache;

    fn create_cache(&self) -> Result<SlotCache> {
        Ok(SlotCache::new(self.layers.len(), self.context_length, self.d_model))
    }

    /// Rows are processed one at a time with fixed operand shapes, so a
    /// token's result does not depend on how the prompt was windowed.
    /// Filler rows pass through unchanged.
    fn forward(
        &self,
        cache: &mut SlotCache,
        hidden: &HiddenTensor,
        positions: &PositionSequence,
        mask: &CausalMask,
    ) -> Result<HiddenTensor> {
        let (_, rows, d_model) = hidden.dim();
        ensure!(d_model == self.d_model, "expected width {}, got {}", self.d_model, d_model);
        ensure!(
            positions.len() <= rows,
            "{} positions for {} rows",
            positions.len(),
            rows
        );

        let mut x = hidden.index_axis(Axis(0), 0).to_owned();
        self.precision.cast_inplace(&mut x);

        for (layer_idx, layer) in self.layers.iter().enumerate() {
            let mut queries = Vec::with_capacity(positions.len());
            for (row, position) in positions.iter().enumerate() {
                let input = x.slice(s![row..row + 1, ..]).to_owned();
                queries.push(self.project_row(layer, layer_idx, cache, &input, position)?);
            }

            for (row, query) in queries.iter().enumerate() {
                let input = x.slice(s![row..row + 1, ..]).to_owned();
                let bias = mask.slice(s![0, 0, row..row + 1, ..]).to_owned();
                let mixed = self.mix_row(layer, layer_idx, cache, &input, query, &bias)?;
                x.slice_mut(s![row..row + 1, ..]).assign(&mixed);
            }
        }

        self.precision.cast_inplace(&mut x);
        Ok(x.insert_axis(Axis(0)))
    }
}
