//! Base-to-k-mer token encoding.
//!
//! Each window of `k` base ids `b_0 .. b_{k-1}` becomes the integer
//! `Σ b_i · num_bases^(k-1-i)`. Overlapping encoders slide by one base and
//! produce `L - k + 1` tokens; non-overlapping encoders slide by `k` and
//! produce `L / k`. With `include_mask_token` every id is shifted by one so
//! that id 0 stays free for the mask token.

use candle_core::{bail, DType, Result, Tensor};
use layers::checks;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerEncoderConfig {
    pub kmer: usize,
    pub include_mask_token: bool,
    pub overlap: bool,
    pub num_bases: usize,
}

impl KmerEncoderConfig {
    pub fn new(kmer: usize) -> Self {
        Self {
            kmer,
            include_mask_token: true,
            overlap: true,
            num_bases: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KmerEncoder {
    config: KmerEncoderConfig,
    powers: Vec<u32>,
}

impl KmerEncoder {
    pub fn new(config: KmerEncoderConfig) -> Result<Self> {
        if config.kmer == 0 || config.num_bases < 2 {
            bail!("kmer encoder requires kmer >= 1 and num_bases >= 2");
        }
        let vocab = (config.num_bases as u64)
            .checked_pow(config.kmer as u32)
            .filter(|v| *v < u64::from(u32::MAX))
            .map(|v| v + u64::from(config.include_mask_token));
        if vocab.is_none() {
            bail!(
                "kmer encoder: {}^{} ids do not fit in u32",
                config.num_bases,
                config.kmer
            );
        }
        let powers = (0..config.kmer)
            .rev()
            .map(|p| (config.num_bases as u32).pow(p as u32))
            .collect();
        Ok(Self { config, powers })
    }

    pub fn config(&self) -> &KmerEncoderConfig {
        &self.config
    }

    /// Number of distinct k-mer ids produced, including the mask id when reserved.
    pub fn vocab_size(&self) -> usize {
        self.config.num_bases.pow(self.config.kmer as u32) + usize::from(self.config.include_mask_token)
    }

    /// Number of k-mer tokens produced for `seq_len` bases.
    pub fn output_len(&self, seq_len: usize) -> usize {
        let k = self.config.kmer;
        match (seq_len >= k, self.config.overlap) {
            (false, _) => 0,
            (true, true) => seq_len - k + 1,
            (true, false) => seq_len / k,
        }
    }

    /// Encodes `(batch, L)` base ids into `(batch, output_len(L))` k-mer ids.
    pub fn forward(&self, bases: &Tensor) -> Result<Tensor> {
        checks::expect_rank("kmer_encoder.input", bases, 2)?;
        let bases = layers::dtypes::to_index_dtype(bases)?;
        let (batch, seq_len) = bases.dims2()?;
        let out_len = self.output_len(seq_len);
        if out_len == 0 {
            bail!(
                "kmer encoder: sequence of {seq_len} bases is shorter than k = {}",
                self.config.kmer
            );
        }
        let k = self.config.kmer;
        let powers = Tensor::new(self.powers.as_slice(), bases.device())?;

        let encoded = if self.config.overlap {
            let mut acc = Tensor::zeros((batch, out_len), DType::U32, bases.device())?;
            for (offset, &power) in self.powers.iter().enumerate() {
                let window = bases.narrow(1, offset, out_len)?;
                acc = acc.add(&window.affine(f64::from(power), 0.0)?)?;
            }
            acc
        } else {
            bases
                .narrow(1, 0, out_len * k)?
                .reshape((batch, out_len, k))?
                .broadcast_mul(&powers)?
                .sum(2)?
        };

        if self.config.include_mask_token {
            encoded.affine(1.0, 1.0)
        } else {
            Ok(encoded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn overlapping_windows_slide_by_one() -> Result<()> {
        let encoder = KmerEncoder::new(KmerEncoderConfig {
            include_mask_token: false,
            ..KmerEncoderConfig::new(3)
        })?;
        let bases = Tensor::new(&[[0u32, 1, 2, 3, 0]], &Device::Cpu)?;
        let encoded = encoder.forward(&bases)?;
        // 012 -> 6, 123 -> 27, 230 -> 44
        assert_eq!(encoded.to_vec2::<u32>()?, vec![vec![6, 27, 44]]);
        Ok(())
    }

    #[test]
    fn non_overlapping_windows_reserve_the_mask_id() -> Result<()> {
        let encoder = KmerEncoder::new(KmerEncoderConfig {
            overlap: false,
            ..KmerEncoderConfig::new(2)
        })?;
        let bases = Tensor::new(&[[3u32, 3, 0, 1, 2]], &Device::Cpu)?;
        let encoded = encoder.forward(&bases)?;
        assert_eq!(encoded.to_vec2::<u32>()?, vec![vec![16, 2]]);
        assert_eq!(encoder.vocab_size(), 17);
        Ok(())
    }

    #[test]
    fn short_sequences_are_rejected() -> Result<()> {
        let encoder = KmerEncoder::new(KmerEncoderConfig::new(4))?;
        let bases = Tensor::new(&[[0u32, 1]], &Device::Cpu)?;
        assert!(encoder.forward(&bases).is_err());
        Ok(())
    }
}
