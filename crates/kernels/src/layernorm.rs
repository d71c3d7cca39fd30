//! Layer normalization kernels.

use anyhow::{ensure, Result};
use ndarray::{Array1, Array2, ArrayView2, ArrayViewMut2, Axis};
use rayon::prelude::*;

/// Affine layer norm over the last axis of a (rows, features) matrix.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub epsilon: f32,
}

impl LayerNorm {
    /// Identity-initialised norm (gamma = 1, beta = 0).
    pub fn identity(features: usize, epsilon: f32) -> Self {
        Self {
            gamma: Array1::ones(features),
            beta: Array1::zeros(features),
            epsilon,
        }
    }

    pub fn features(&self) -> usize {
        self.gamma.len()
    }

    pub fn forward_inplace(&self, mut data: ArrayViewMut2<'_, f32>) -> Result<()> {
        let feature_dim = data.len_of(Axis(1));
        ensure!(
            self.gamma.len() == feature_dim && self.beta.len() == feature_dim,
            "layer norm expects {} features, got {}",
            self.gamma.len(),
            feature_dim
        );

        let gamma = &self.gamma;
        let beta = &self.beta;
        let epsilon = self.epsilon;
        data.axis_iter_mut(Axis(0))
            .into_par_iter()
            .for_each(|mut row| {
                let len = row.len() as f32;
                let mean = row.iter().sum::<f32>() / len;
                let var = row.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / len;
                let inv_std = 1.0 / (var + epsilon).sqrt();

                for (idx, value) in row.iter_mut().enumerate() {
                    *value = (*value - mean) * inv_std * gamma[idx] + beta[idx];
                }
            });
        Ok(())
    }

    pub fn forward(&self, data: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let mut output = data.to_owned();
        self.forward_inplace(output.view_mut())?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn layer_norm_zero_mean_unit_var() {
        let mut data = Array2::from_shape_fn((4, 8), |(i, j)| ((i + 1) * (j + 1)) as f32 * 0.125);
        let norm = LayerNorm::identity(8, 1e-5);
        norm.forward_inplace(data.view_mut()).expect("layer norm");

        for row in data.axis_iter(Axis(0)) {
            let len = row.len() as f32;
            let mean = row.iter().sum::<f32>() / len;
            let var = row.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / len;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-4);
            assert_abs_diff_eq!(var, 1.0, epsilon = 5e-4);
        }
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let norm = LayerNorm::identity(6, 1e-5);
        let data = Array2::<f32>::ones((2, 8));
        assert!(norm.forward(data.view()).is_err());
    }
}
