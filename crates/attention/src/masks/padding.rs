//! Builders turning boolean keep-masks into attention masks.

use candle_core::{bail, Device, Result, Tensor};
use layers::ops;

use super::{MASKED_SCORE, MASK_DTYPE};

/// Construct `(batch, k_len)` keep-masks from boolean padding indicators.
///
/// `true` marks a padded (dropped) key position. Every row must share the same
/// length.
pub fn keep_mask_from_booleans(device: &Device, padding: &[Vec<bool>]) -> Result<Tensor> {
    let k_len = padding.first().map_or(0, Vec::len);
    if padding.iter().any(|row| row.len() != k_len) {
        bail!("all boolean padding masks must share k_len");
    }
    let data = padding
        .iter()
        .flat_map(|row| row.iter().map(|&padded| u8::from(!padded)))
        .collect::<Vec<_>>();
    Tensor::from_vec(data, (padding.len(), k_len), device)
}

/// Combines per-position query and key keep-masks into `(batch, q_len, k_len)`.
pub fn attention_mask_from_keep(query_mask: &Tensor, key_mask: &Tensor) -> Result<Tensor> {
    let (qb, q_len) = query_mask.dims2()?;
    let (kb, k_len) = key_mask.dims2()?;
    if qb != kb {
        bail!("query mask batch {qb} does not match key mask batch {kb}");
    }
    let rows = query_mask.unsqueeze(2)?.broadcast_as((qb, q_len, k_len))?;
    let cols = key_mask.unsqueeze(1)?.broadcast_as((kb, q_len, k_len))?;
    ops::mask_and(&rows, &cols)
}

/// Converts a keep-mask into the additive `(batch, 1, q_len, k_len)` form.
pub fn additive_mask(mask: &Tensor, q_len: usize, k_len: usize) -> Result<Tensor> {
    let batch = mask.dim(0)?;
    let mask = match mask.rank() {
        2 => mask.unsqueeze(1)?.broadcast_as((batch, q_len, k_len))?,
        3 => mask.clone(),
        rank => bail!("attention masks must have rank 2 or 3, got {rank}"),
    };
    if mask.dims() != [batch, q_len, k_len] {
        bail!(
            "attention mask shape {:?} does not match (batch, {q_len}, {k_len})",
            mask.dims()
        );
    }
    mask.to_dtype(MASK_DTYPE)?
        .affine(-MASKED_SCORE, MASKED_SCORE)?
        .unsqueeze(1)
}
