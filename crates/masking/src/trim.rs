//! Random trimming of fixed-length token sequences.

use candle_core::{Error, Result, Tensor};
use layers::{checks, ops};
use rand::Rng;

use crate::{MaskRng, PAD_TOKEN};

/// The kept region `[offset, offset + len)` of one trimmed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimWindow {
    pub offset: usize,
    pub len: usize,
}

/// Keeps a random window of `[min_len, max_len]` tokens per row and pads the rest.
///
/// Inputs are `(batch, max_len)`; positions outside the window become
/// [`PAD_TOKEN`].
#[derive(Debug)]
pub struct RandomTrim {
    min_len: usize,
    max_len: usize,
    rng: MaskRng,
}

impl RandomTrim {
    pub fn new(min_len: usize, max_len: usize) -> Result<Self> {
        Self::build(min_len, max_len, None)
    }

    pub fn with_seed(min_len: usize, max_len: usize, seed: u64) -> Result<Self> {
        Self::build(min_len, max_len, Some(seed))
    }

    fn build(min_len: usize, max_len: usize, seed: Option<u64>) -> Result<Self> {
        if min_len > max_len {
            return Err(Error::Msg(format!(
                "random trim: min_len {min_len} exceeds max_len {max_len}"
            )));
        }
        Ok(Self {
            min_len,
            max_len,
            rng: MaskRng::new(seed),
        })
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Draws one window per row.
    pub fn sample_windows(&self, batch: usize) -> Result<Vec<TrimWindow>> {
        let mut rng = self.rng.lock()?;
        Ok((0..batch)
            .map(|_| {
                let len = rng.gen_range(self.min_len..=self.max_len);
                let offset = rng.gen_range(0..=self.max_len - len);
                TrimWindow { offset, len }
            })
            .collect())
    }

    /// Trims `(batch, max_len)` tokens, returning the result and the windows used.
    pub fn forward(&self, tokens: &Tensor) -> Result<(Tensor, Vec<TrimWindow>)> {
        checks::expect_rank("random_trim.input", tokens, 2)?;
        checks::expect_integer_dtype("random_trim.input", tokens)?;
        let (batch, seq_len) = tokens.dims2()?;
        if seq_len != self.max_len {
            return Err(Error::Msg(format!(
                "random trim: expected sequences of length {}, got {seq_len}",
                self.max_len
            )));
        }
        let windows = self.sample_windows(batch)?;
        let trimmed = apply_windows(tokens, &windows)?;
        Ok((trimmed, windows))
    }
}

/// Replaces tokens outside each row's window with [`PAD_TOKEN`].
pub(crate) fn apply_windows(tokens: &Tensor, windows: &[TrimWindow]) -> Result<Tensor> {
    let (_, seq_len) = tokens.dims2()?;
    let offsets = windows.iter().map(|w| w.offset).collect::<Vec<_>>();
    let lens = windows.iter().map(|w| w.len).collect::<Vec<_>>();
    let inside = ops::span_mask(&offsets, &lens, seq_len, tokens.device())?.to_dtype(tokens.dtype())?;
    let outside = ops::invert_mask(&inside)?.to_dtype(tokens.dtype())?;
    let pad = outside.affine(f64::from(PAD_TOKEN), 0.0)?;
    tokens.mul(&inside)?.add(&pad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn windows_respect_bounds() -> Result<()> {
        let trim = RandomTrim::with_seed(3, 9, 5)?;
        for window in trim.sample_windows(200)? {
            assert!((3..=9).contains(&window.len));
            assert!(window.offset + window.len <= 9);
        }
        Ok(())
    }

    #[test]
    fn outside_window_is_padded() -> Result<()> {
        let tokens = Tensor::new(&[[5u32, 6, 7, 8, 9]], &Device::Cpu)?;
        let windows = [TrimWindow { offset: 1, len: 3 }];
        let trimmed = apply_windows(&tokens, &windows)?;
        assert_eq!(trimmed.to_vec2::<u32>()?, vec![vec![1, 6, 7, 8, 1]]);
        Ok(())
    }

    #[test]
    fn length_mismatch_is_rejected() -> Result<()> {
        let trim = RandomTrim::new(2, 4)?;
        let tokens = Tensor::new(&[[5u32, 6, 7]], &Device::Cpu)?;
        assert!(trim.forward(&tokens).is_err());
        assert!(RandomTrim::new(5, 4).is_err());
        Ok(())
    }
}
