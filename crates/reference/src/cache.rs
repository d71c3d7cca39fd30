//! Position-indexed K/V storage.
//!
//! Every layer owns a fixed `(context_length, d_model)` buffer for keys and
//! one for values. Writing position `p` overwrites row `p`; rows that were
//! never written stay zero and are hidden by the causal mask.

use anyhow::{ensure, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};

pub struct SlotCache {
    keys: Vec<Array2<f32>>,
    values: Vec<Array2<f32>>,
    /// One past the highest position written so far.
    high_water: usize,
}

impl SlotCache {
    pub fn new(n_layers: usize, context_length: usize, d_model: usize) -> Self {
        let keys = (0..n_layers)
            .map(|_| Array2::<f32>::zeros((context_length, d_model)))
            .collect();
        let values = (0..n_layers)
            .map(|_| Array2::<f32>::zeros((context_length, d_model)))
            .collect();
        Self {
            keys,
            values,
            high_water: 0,
        }
    }

    pub fn write(
        &mut self,
        layer: usize,
        position: usize,
        key: ArrayView1<'_, f32>,
        value: ArrayView1<'_, f32>,
    ) -> Result<()> {
        ensure!(layer < self.keys.len(), "layer {} out of range", layer);
        let (slots, d_model) = self.keys[layer].dim();
        ensure!(
            position < slots,
            "position {} exceeds cache capacity {}",
            position,
            slots
        );
        ensure!(
            key.len() == d_model && value.len() == d_model,
            "k/v width {}/{} differs from cache width {}",
            key.len(),
            value.len(),
            d_model
        );
        self.keys[layer].row_mut(position).assign(&key);
        self.values[layer].row_mut(position).assign(&value);
        self.high_water = self.high_water.max(position + 1);
        Ok(())
    }

    /// Cached K/V for a layer: (context_length, d_model) each.
    pub fn get(&self, layer: usize) -> (ArrayView2<'_, f32>, ArrayView2<'_, f32>) {
        (self.keys[layer].view(), self.values[layer].view())
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn capacity(&self) -> usize {
        self.keys.first().map(Array2::nrows).unwrap_or(0)
    }
}
