//! Small tensor constructors that the masking, attention and attribution code
//! share: boolean sequence masks, span masks, inclusive linear spacing and the
//! value-plus-mask pair carried between layers.
//!
//! Boolean masks are `u8` tensors where `1` means "keep / attend" and `0`
//! means "masked".

use candle_core::{DType, Device, Error, Result, Tensor};

/// Dtype used for every boolean mask in the workspace.
pub const MASK_DTYPE: DType = DType::U8;

/// A tensor travelling together with an optional boolean keep-mask.
///
/// The mask, when present, covers the leading `(batch, seq)` axes of `values`.
#[derive(Debug, Clone)]
pub struct MaskedTensor {
    pub values: Tensor,
    pub mask: Option<Tensor>,
}

impl MaskedTensor {
    pub fn new(values: Tensor, mask: Option<Tensor>) -> Self {
        Self { values, mask }
    }

    pub fn unmasked(values: Tensor) -> Self {
        Self { values, mask: None }
    }

    pub fn mask(&self) -> Option<&Tensor> {
        self.mask.as_ref()
    }
}

/// Builds `(batch, max_len)` masks with `mask[b, t] = t < lengths[b]`.
pub fn sequence_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let starts = vec![0usize; lengths.len()];
    span_mask(&starts, lengths, max_len, device)
}

/// Builds `(batch, max_len)` masks that are 1 on `[starts[b], starts[b] + lengths[b])`.
pub fn span_mask(
    starts: &[usize],
    lengths: &[usize],
    max_len: usize,
    device: &Device,
) -> Result<Tensor> {
    if starts.len() != lengths.len() {
        return Err(Error::Msg(format!(
            "span_mask: {} starts but {} lengths",
            starts.len(),
            lengths.len()
        )));
    }
    let mut data = Vec::with_capacity(starts.len() * max_len);
    for (&start, &len) in starts.iter().zip(lengths) {
        if start + len > max_len {
            return Err(Error::Msg(format!(
                "span_mask: span [{start}, {}) exceeds length {max_len}",
                start + len
            )));
        }
        data.extend((0..max_len).map(|t| u8::from(t >= start && t < start + len)));
    }
    Tensor::from_vec(data, (starts.len(), max_len), device)
}

/// Inclusive linear spacing over `[start, stop]` with `steps` points.
///
/// A single step yields `[start]`; zero steps yield an empty vector.
pub fn linspace(start: f32, stop: f32, steps: usize) -> Vec<f32> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        n => {
            let delta = (stop - start) / (n - 1) as f32;
            (0..n)
                .map(|i| if i + 1 == n { stop } else { start + delta * i as f32 })
                .collect()
        }
    }
}

/// Logical not of a `u8` mask.
pub fn invert_mask(mask: &Tensor) -> Result<Tensor> {
    let zeros = mask.zeros_like()?;
    mask.eq(&zeros)
}

/// Element-wise logical and of two broadcast-compatible `u8` masks.
pub fn mask_and(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    lhs.broadcast_mul(rhs)
}
