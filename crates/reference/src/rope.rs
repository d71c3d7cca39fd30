//! Rotary Position Embeddings (RoPE) as used in LLaMA/Qwen.
//!
//! Reference: https://arxiv.org/abs/2104.09864

use anyhow::{ensure, Result};
use ndarray::{s, Array2, ArrayViewMut1};

pub struct RoPECache {
    cos: Array2<f32>,
    sin: Array2<f32>,
}

impl RoPECache {
    pub fn new(max_positions: usize, head_dim: usize, theta: f32) -> Self {
        let mut cos = Array2::<f32>::zeros((max_positions, head_dim / 2));
        let mut sin = Array2::<f32>::zeros((max_positions, head_dim / 2));

        for pos in 0..max_positions {
            for pair in 0..head_dim / 2 {
                let freq = 1.0 / theta.powf((2 * pair) as f32 / head_dim as f32);
                let angle = pos as f32 * freq;
                cos[[pos, pair]] = angle.cos();
                sin[[pos, pair]] = angle.sin();
            }
        }

        Self { cos, sin }
    }

    pub fn max_positions(&self) -> usize {
        self.cos.nrows()
    }

    pub fn head_dim(&self) -> usize {
        self.cos.ncols() * 2
    }

    /// Rotates every head of one projected row at global `position`.
    pub fn apply(&self, mut row: ArrayViewMut1<'_, f32>, position: usize) -> Result<()> {
        let head_dim = self.head_dim();
        ensure!(
            position < self.max_positions(),
            "position {} outside rotary table of {}",
            position,
            self.max_positions()
        );
        ensure!(
            head_dim > 0 && row.len() % head_dim == 0,
            "row width {} is not a multiple of head dim {}",
            row.len(),
            head_dim
        );

        let cos = self.cos.row(position);
        let sin = self.sin.row(position);
        for head_start in (0..row.len()).step_by(head_dim) {
            let mut head = row.slice_mut(s![head_start..head_start + head_dim]);
            for pair in 0..head_dim / 2 {
                let x0 = head[2 * pair];
                let x1 = head[2 * pair + 1];
                head[2 * pair] = x0 * cos[pair] - x1 * sin[pair];
                head[2 * pair + 1] = x0 * sin[pair] + x1 * cos[pair];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    #[test]
    fn rope_cache_basic() {
        let cache = RoPECache::new(128, 64, 10000.0);
        assert_eq!(cache.max_positions(), 128);
        assert_eq!(cache.head_dim(), 64);
    }

    #[test]
    fn position_zero_is_identity() {
        let cache = RoPECache::new(16, 8, 10000.0);
        let mut row = Array1::from_shape_fn(16, |i| i as f32 - 4.0);
        let before = row.clone();
        cache.apply(row.view_mut(), 0).unwrap();
        assert_eq!(row, before);
    }

    #[test]
    fn rotation_preserves_pair_norm() {
        let cache = RoPECache::new(32, 8, 10000.0);
        let mut row = Array1::from_shape_fn(8, |i| (i as f32 + 1.0) * 0.5);
        let before = row.clone();
        cache.apply(row.view_mut(), 17).unwrap();
        for pair in 0..4 {
            let n0 = before[2 * pair].hypot(before[2 * pair + 1]);
            let n1 = row[2 * pair].hypot(row[2 * pair + 1]);
            assert_abs_diff_eq!(n0, n1, epsilon = 1e-5);
        }
        assert_ne!(row, before);
    }

    #[test]
    fn out_of_table_position_fails() {
        let cache = RoPECache::new(4, 8, 10000.0);
        let mut row = Array1::<f32>::ones(8);
        assert!(cache.apply(row.view_mut(), 4).is_err());
    }
}
