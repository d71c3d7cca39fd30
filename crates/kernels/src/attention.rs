//! Attention mechanism kernels.

use crate::utils::softmax_inplace;
use anyhow::{ensure, Result};
use ndarray::{s, Array2, ArrayView2};

/// Scaled dot-product attention with an additive bias.
///
/// `query` is (rows, d), `key`/`value` are (slots, d) and `bias` is
/// (rows, slots). Bias entries of `-inf` remove a slot from the row.
pub fn scaled_dot_product_attention(
    query: ArrayView2<'_, f32>,
    key: ArrayView2<'_, f32>,
    value: ArrayView2<'_, f32>,
    bias: ArrayView2<'_, f32>,
    scale: f32,
) -> Result<Array2<f32>> {
    ensure!(
        query.ncols() == key.ncols(),
        "query dim {} must match key dim {}",
        query.ncols(),
        key.ncols()
    );
    ensure!(
        key.nrows() == value.nrows(),
        "key slots {} differ from value slots {}",
        key.nrows(),
        value.nrows()
    );

    let mut scores = query.dot(&key.t());
    scores *= scale;
    ensure!(
        bias.dim() == scores.dim(),
        "bias shape {:?} incompatible with attention scores {:?}",
        bias.dim(),
        scores.dim()
    );
    scores += &bias;

    softmax_inplace(scores.view_mut());
    Ok(scores.dot(&value))
}

/// Splits the feature axis into `n_heads` equal heads and attends each one
/// independently against the same bias. Output has the shape of `query`.
pub fn multi_head_attention(
    query: ArrayView2<'_, f32>,
    key: ArrayView2<'_, f32>,
    value: ArrayView2<'_, f32>,
    bias: ArrayView2<'_, f32>,
    n_heads: usize,
) -> Result<Array2<f32>> {
    ensure!(n_heads > 0, "attention needs at least one head");
    let d_model = query.ncols();
    ensure!(
        d_model % n_heads == 0,
        "feature dim {} is not divisible by {} heads",
        d_model,
        n_heads
    );
    let head_dim = d_model / n_heads;
    let scale = 1.0 / (head_dim as f32).sqrt();

    let mut output = Array2::<f32>::zeros(query.raw_dim());
    for h in 0..n_heads {
        let cols = h * head_dim..(h + 1) * head_dim;
        let head = scaled_dot_product_attention(
            query.slice(s![.., cols.clone()]),
            key.slice(s![.., cols.clone()]),
            value.slice(s![.., cols.clone()]),
            bias,
            scale,
        )?;
        output.slice_mut(s![.., cols]).assign(&head);
    }
    Ok(output)
}
