//! Contiguous span masking.

use candle_core::{Result, Tensor};
use layers::{checks, ops};
use rand::Rng;

use crate::{ceil_count, validate_ratio, MaskRng};

/// Zeroes one contiguous span of `ceil(mask_ratio * L)` tokens per row.
///
/// Span starts are drawn uniformly from `[0, L - mask_len]`, independently per
/// row. The ratio can be changed between calls to implement masking schedules.
#[derive(Debug)]
pub struct ContiguousMask {
    mask_ratio: f64,
    rng: MaskRng,
}

impl ContiguousMask {
    pub fn new(mask_ratio: f64) -> Result<Self> {
        Self::build(mask_ratio, None)
    }

    /// Deterministic variant for reproducible corruption.
    pub fn with_seed(mask_ratio: f64, seed: u64) -> Result<Self> {
        Self::build(mask_ratio, Some(seed))
    }

    fn build(mask_ratio: f64, seed: Option<u64>) -> Result<Self> {
        validate_ratio("contiguous mask", mask_ratio)?;
        Ok(Self {
            mask_ratio,
            rng: MaskRng::new(seed),
        })
    }

    pub fn mask_ratio(&self) -> f64 {
        self.mask_ratio
    }

    pub fn set_mask_ratio(&mut self, mask_ratio: f64) -> Result<()> {
        validate_ratio("contiguous mask", mask_ratio)?;
        self.mask_ratio = mask_ratio;
        Ok(())
    }

    /// Number of tokens masked per row for a sequence of `seq_len` tokens.
    pub fn mask_len(&self, seq_len: usize) -> usize {
        ceil_count(self.mask_ratio, seq_len)
    }

    /// Applies the mask to `(batch, L)` integer tokens.
    pub fn forward(&self, tokens: &Tensor) -> Result<Tensor> {
        Ok(self.forward_with_mask(tokens)?.0)
    }

    /// Applies the mask and also returns the `(batch, L)` keep-mask (1 = untouched).
    pub fn forward_with_mask(&self, tokens: &Tensor) -> Result<(Tensor, Tensor)> {
        checks::expect_rank("contiguous_mask.input", tokens, 2)?;
        checks::expect_integer_dtype("contiguous_mask.input", tokens)?;
        let (batch, seq_len) = tokens.dims2()?;
        let mask_len = self.mask_len(seq_len);

        let starts = {
            let mut rng = self.rng.lock()?;
            (0..batch)
                .map(|_| rng.gen_range(0..=seq_len - mask_len))
                .collect::<Vec<_>>()
        };
        let spans = ops::span_mask(&starts, &vec![mask_len; batch], seq_len, tokens.device())?;
        let keep = ops::invert_mask(&spans)?;
        let masked = tokens.mul(&keep.to_dtype(tokens.dtype())?)?;
        Ok((masked, keep))
    }
}
