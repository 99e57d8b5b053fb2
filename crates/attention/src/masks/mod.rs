//! Mask utilities shared by attention implementations.
//!
//! Layers accept `u8` keep-masks (`1` attend, `0` drop) shaped `(batch, k_len)`
//! or `(batch, q_len, k_len)`. Before the softmax they are converted into
//! additive `f32` tensors shaped `(batch, 1, q_len, k_len)` holding `0.0` or
//! [`MASKED_SCORE`]. The large finite constant keeps fully masked rows finite.

pub mod padding;

use candle_core::DType;

/// Dtype shared by all additive masks.
pub const MASK_DTYPE: DType = DType::F32;

/// Value added to the logits of dropped positions.
pub const MASKED_SCORE: f64 = -1e9;

pub use padding::{additive_mask, attention_mask_from_keep, keep_mask_from_booleans};
