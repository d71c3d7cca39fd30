//! Shared helpers for kernel implementations.

use ndarray::{ArrayViewMut1, ArrayViewMut2, Axis};
use rayon::prelude::*;

/// Numerically stable softmax over each row.
pub fn softmax_inplace(mut scores: ArrayViewMut2<'_, f32>) {
    scores
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(softmax_row);
}

pub fn softmax_row(mut row: ArrayViewMut1<'_, f32>) {
    let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    row -= max;
    row.mapv_inplace(|x| x.exp());
    let sum = row.sum();
    row /= sum.max(f32::EPSILON);
}

/// Approximate GELU (tanh formulation).
pub fn gelu_inplace(mut data: ArrayViewMut2<'_, f32>) {
    let c = (2.0 / std::f32::consts::PI).sqrt();
    data.mapv_inplace(|x| 0.5 * x * (1.0 + (c * (x + 0.044715 * x.powi(3))).tanh()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn softmax_rows_sum_to_one() {
        let mut scores = array![[1.0f32, 2.0, 3.0], [0.0, f32::NEG_INFINITY, 0.0]];
        softmax_inplace(scores.view_mut());
        for row in scores.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
        assert_eq!(scores[[1, 1]], 0.0);
        assert_abs_diff_eq!(scores[[1, 0]], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn gelu_fixes_zero() {
        let mut data = array![[0.0f32, 3.0]];
        gelu_inplace(data.view_mut());
        assert_eq!(data[[0, 0]], 0.0);
        assert_abs_diff_eq!(data[[0, 1]], 2.996, epsilon = 1e-3);
    }
}
