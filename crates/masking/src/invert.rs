//! Mask inversion stage.

use candle_core::Result;
use layers::{ops, MaskedTensor};

/// Passes values through and flips the boolean mask riding alongside them.
///
/// Used to let attention see only the masked positions. The values are always
/// copied into a fresh tensor so the stage is never folded away by callers that
/// compare tensors by identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvertMask;

impl InvertMask {
    pub fn forward(&self, input: &MaskedTensor) -> Result<MaskedTensor> {
        let values = input.values.copy()?;
        let mask = input.mask.as_ref().map(ops::invert_mask).transpose()?;
        Ok(MaskedTensor::new(values, mask))
    }
}
