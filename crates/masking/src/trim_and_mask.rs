//! Trim-then-mask corruption used by the legacy sequence pretraining setup.
//!
//! Runs [`RandomTrim`] and then masks a span inside each row's trimmed window.
//! The span length is `ceil(u * trimmed_len * mask_ratio)` with `u ~ U[0, 1)`,
//! so rows are masked anywhere from zero up to the full ratio.

use candle_core::{Result, Tensor};
use layers::ops;
use rand::Rng;

use crate::{
    trim::{RandomTrim, TrimWindow},
    validate_ratio, MaskRng,
};

#[derive(Debug)]
pub struct TrimAndContiguousMask {
    trim: RandomTrim,
    mask_ratio: f64,
    rng: MaskRng,
}

impl TrimAndContiguousMask {
    pub fn new(min_len: usize, max_len: usize, mask_ratio: f64) -> Result<Self> {
        validate_ratio("trim and mask", mask_ratio)?;
        Ok(Self {
            trim: RandomTrim::new(min_len, max_len)?,
            mask_ratio,
            rng: MaskRng::new(None),
        })
    }

    pub fn with_seed(min_len: usize, max_len: usize, mask_ratio: f64, seed: u64) -> Result<Self> {
        validate_ratio("trim and mask", mask_ratio)?;
        Ok(Self {
            trim: RandomTrim::with_seed(min_len, max_len, seed)?,
            mask_ratio,
            rng: MaskRng::new(Some(seed.wrapping_add(1))),
        })
    }

    pub fn set_mask_ratio(&mut self, mask_ratio: f64) -> Result<()> {
        validate_ratio("trim and mask", mask_ratio)?;
        self.mask_ratio = mask_ratio;
        Ok(())
    }

    /// Picks the masked span (absolute start, length) inside each window.
    fn sample_spans(&self, windows: &[TrimWindow]) -> Result<(Vec<usize>, Vec<usize>)> {
        let mut rng = self.rng.lock()?;
        Ok(windows
            .iter()
            .map(|window| {
                let scale: f64 = rng.gen();
                let exact = scale * window.len as f64 * self.mask_ratio;
                let mask_len = (exact.ceil() as usize).min(window.len);
                let offset = rng.gen_range(0..=window.len - mask_len);
                (window.offset + offset, mask_len)
            })
            .unzip())
    }

    /// Trims then masks `(batch, max_len)` tokens.
    pub fn forward(&self, tokens: &Tensor) -> Result<Tensor> {
        let (trimmed, windows) = self.trim.forward(tokens)?;
        let (starts, lens) = self.sample_spans(&windows)?;
        let span = ops::span_mask(&starts, &lens, self.trim.max_len(), tokens.device())?;
        let keep = ops::invert_mask(&span)?.to_dtype(tokens.dtype())?;
        trimmed.mul(&keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MASK_TOKEN, PAD_TOKEN};
    use candle_core::Device;

    #[test]
    fn positions_are_masked_padded_or_kept() -> Result<()> {
        let layer = TrimAndContiguousMask::with_seed(4, 12, 0.5, 17)?;
        let data = (0..32 * 12).map(|i| 2 + (i % 4) as u32).collect::<Vec<_>>();
        let tokens = Tensor::from_vec(data, (32, 12), &Device::Cpu)?;
        let output = layer.forward(&tokens)?.to_vec2::<u32>()?;
        let original = tokens.to_vec2::<u32>()?;

        for (row, orig) in output.iter().zip(&original) {
            let kept = row.iter().zip(orig).filter(|(v, o)| v == o).count();
            let masked = row.iter().filter(|&&v| v == MASK_TOKEN).count();
            let padded = row.iter().filter(|&&v| v == PAD_TOKEN).count();
            assert_eq!(kept + masked + padded, 12);
            assert!(12 - padded >= 4, "window shorter than min_len");

            let first_kept_or_masked = row.iter().position(|&v| v != PAD_TOKEN).unwrap_or(12);
            let last = row.iter().rposition(|&v| v != PAD_TOKEN).map_or(0, |p| p + 1);
            assert!(row[first_kept_or_masked..last].iter().all(|&v| v != PAD_TOKEN));
        }
        Ok(())
    }

    #[test]
    fn full_windows_mask_a_single_span() -> Result<()> {
        let layer = TrimAndContiguousMask::with_seed(6, 6, 1.0, 2)?;
        let tokens = Tensor::new(&[[7u32, 7, 7, 7, 7, 7]], &Device::Cpu)?;
        for _ in 0..20 {
            let row = layer.forward(&tokens)?.to_vec2::<u32>()?.remove(0);
            assert!(row.iter().all(|&v| v != PAD_TOKEN));
            let zeros = row
                .iter()
                .enumerate()
                .filter(|(_, &v)| v == MASK_TOKEN)
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            if let (Some(first), Some(last)) = (zeros.first(), zeros.last()) {
                assert_eq!(last - first + 1, zeros.len());
            }
        }
        Ok(())
    }
}
