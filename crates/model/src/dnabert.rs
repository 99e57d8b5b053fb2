//! DnaBERT: a BERT-style encoder over overlapping k-mer tokens.
//!
//! Inputs are `(batch, L - k + 1)` k-mer ids with id 0 reserved for the mask
//! token. A class token is prepended and the sequence runs through a stack of
//! relative-attention blocks. [`DnaBertEncoder`] reduces a sequence to its
//! class-token vector and is what SetBERT evaluates per set element.

use attention::RelativeMultiHeadAttention;
use candle_core::{bail, DType, Device, Module, ModuleT, Result, Tensor, Var};
use embedding::{
    class_token::EmbeddingWithClassToken,
    kmer::{KmerEncoder, KmerEncoderConfig},
    positional::FixedPositionEmbedding,
};
use layers::{
    checks,
    init::ParamInit,
    linear::{Linear, LinearConfig},
    ops::MaskedTensor,
};
use masking::ContiguousMask;

use crate::{block::attention_error, config::DnaBertConfig, stack::TransformerStack};

#[derive(Debug)]
pub struct DnaBertModel {
    config: DnaBertConfig,
    embedding: EmbeddingWithClassToken,
    positions: Option<FixedPositionEmbedding>,
    stack: TransformerStack<RelativeMultiHeadAttention>,
}

impl DnaBertModel {
    pub fn new(config: DnaBertConfig, device: &Device, dtype: DType) -> Result<Self> {
        config.validate()?;
        let transformer = &config.transformer;
        let embedding =
            EmbeddingWithClassToken::new(config.vocab_size(), transformer.embed_dim, device, dtype)?;
        let max_seq_len = config.kmer_sequence_length() + 1;
        let positions = if config.fixed_positions {
            Some(FixedPositionEmbedding::new(max_seq_len, transformer.embed_dim, device, dtype)?)
        } else {
            None
        };
        let attention = transformer.attention();
        let stack = TransformerStack::new(
            transformer,
            |_| {
                RelativeMultiHeadAttention::new(&attention, Some(max_seq_len), device, dtype)
                    .map_err(attention_error)
            },
            device,
            dtype,
        )?;
        log::info!(
            "dnabert kmer={} tokens={} vocab={} embed_dim={} stack={} fixed_positions={}",
            config.kmer,
            config.kmer_sequence_length(),
            config.vocab_size(),
            transformer.embed_dim,
            transformer.stack,
            config.fixed_positions
        );
        Ok(Self {
            config,
            embedding,
            positions,
            stack,
        })
    }

    pub fn config(&self) -> &DnaBertConfig {
        &self.config
    }

    pub fn embed_dim(&self) -> usize {
        self.config.transformer.embed_dim
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.embedding.named_parameters(&format!("{scope}.embedding"));
        if let Some(positions) = &self.positions {
            params.extend(positions.named_parameters(&format!("{scope}.positions")));
        }
        params.extend(self.stack.named_parameters(&format!("{scope}.transformer")));
        params
    }

    /// `(batch, L - k + 1)` k-mer ids to `(batch, L - k + 2, embed_dim)`, class token first.
    pub fn forward_t(&self, kmers: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_rank("dnabert.input", kmers, 2)?;
        let expected = self.config.kmer_sequence_length();
        if kmers.dim(1)? != expected {
            bail!(
                "dnabert expects {expected} k-mer tokens per sequence, got {}",
                kmers.dim(1)?
            );
        }
        let mut embedded = self.embedding.forward(kmers)?;
        if let Some(positions) = &self.positions {
            embedded = positions.forward(&embedded)?;
        }
        let (hidden, _) = self.stack.forward_t(&MaskedTensor::unmasked(embedded), train)?;
        Ok(hidden.values)
    }
}

/// Reduces each k-mer sequence to the final class-token vector, `(batch, embed_dim)`.
#[derive(Debug)]
pub struct DnaBertEncoder {
    base: DnaBertModel,
}

impl DnaBertEncoder {
    pub fn new(base: DnaBertModel) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &DnaBertModel {
        &self.base
    }

    pub fn embed_dim(&self) -> usize {
        self.base.embed_dim()
    }
}

impl ModuleT for DnaBertEncoder {
    fn forward_t(&self, kmers: &Tensor, train: bool) -> Result<Tensor> {
        self.base.forward_t(kmers, train)?.narrow(1, 0, 1)?.squeeze(1)
    }
}

/// Predictions of the masked-token pretraining head.
#[derive(Debug, Clone)]
pub struct DnaBertPretrainOutput {
    /// `(batch, tokens, vocab)` logits over k-mer ids, class position dropped.
    pub logits: Tensor,
    /// Uncorrupted k-mer ids, the reconstruction targets.
    pub targets: Tensor,
    /// `(batch, tokens)` u8, `0` where the span mask hid the token.
    pub keep_mask: Tensor,
}

/// Masked-language-model wrapper: encodes bases into k-mers, hides one
/// contiguous span per sequence and predicts every k-mer id.
#[derive(Debug)]
pub struct DnaBertPretrainModel {
    base: DnaBertModel,
    kmers: KmerEncoder,
    masking: ContiguousMask,
    head: Linear,
}

impl DnaBertPretrainModel {
    pub fn new(base: DnaBertModel, device: &Device, dtype: DType) -> Result<Self> {
        let masking = ContiguousMask::new(base.config().mask_ratio)?;
        Self::with_masking(base, masking, device, dtype)
    }

    pub fn with_masking(
        base: DnaBertModel,
        masking: ContiguousMask,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let kmers = KmerEncoder::new(KmerEncoderConfig::new(base.config().kmer))?;
        let head = Linear::with_init(
            LinearConfig::new(base.embed_dim(), base.config().vocab_size()),
            &ParamInit::XavierUniform,
            device,
            dtype,
        )?;
        Ok(Self {
            base,
            kmers,
            masking,
            head,
        })
    }

    pub fn base(&self) -> &DnaBertModel {
        &self.base
    }

    pub fn into_base(self) -> DnaBertModel {
        self.base
    }

    pub fn set_mask_ratio(&mut self, mask_ratio: f64) -> Result<()> {
        self.masking.set_mask_ratio(mask_ratio)
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.base.named_parameters(&format!("{scope}.base"));
        params.extend(self.head.named_parameters(&format!("{scope}.head")));
        params
    }

    /// Runs the pretraining task on `(batch, sequence_length)` base ids.
    pub fn forward_t(&self, bases: &Tensor, train: bool) -> Result<DnaBertPretrainOutput> {
        let targets = self.kmers.forward(bases)?;
        let (masked, keep_mask) = self.masking.forward_with_mask(&targets)?;
        let hidden = self.base.forward_t(&masked, train)?;
        let tokens = hidden.dim(1)? - 1;
        let logits = self.head.forward(&hidden.narrow(1, 1, tokens)?)?;
        Ok(DnaBertPretrainOutput {
            logits,
            targets,
            keep_mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformerConfig;

    fn config() -> DnaBertConfig {
        let mut transformer = TransformerConfig::new(8, 2, 16, 2);
        transformer.prenorm = true;
        DnaBertConfig::new(2, 6, transformer)
    }

    #[test]
    fn base_model_prepends_the_class_token() -> Result<()> {
        let model = DnaBertModel::new(config(), &Device::Cpu, DType::F32)?;
        let kmers = Tensor::new(&[[1u32, 2, 3, 4, 5], [6, 7, 8, 9, 10]], &Device::Cpu)?;
        let hidden = model.forward_t(&kmers, false)?;
        assert_eq!(hidden.dims(), &[2, 6, 8]);

        let encoder = DnaBertEncoder::new(model);
        assert_eq!(encoder.forward_t(&kmers, false)?.dims(), &[2, 8]);
        Ok(())
    }

    #[test]
    fn fixed_positions_are_optional_parameters() -> Result<()> {
        let plain = DnaBertModel::new(config(), &Device::Cpu, DType::F32)?;
        assert!(!plain
            .named_parameters("dnabert")
            .iter()
            .any(|(name, _)| name.starts_with("dnabert.positions")));

        let mut config = config();
        config.fixed_positions = true;
        let model = DnaBertModel::new(config, &Device::Cpu, DType::F32)?;
        let params = model.named_parameters("dnabert");
        let table = params
            .iter()
            .find(|(name, _)| name == "dnabert.positions.positions")
            .map(|(_, var)| var.as_tensor().clone())
            .ok_or_else(|| candle_core::Error::Msg("missing position table".into()))?;
        assert_eq!(table.dims(), &[6, 8]);

        let kmers = Tensor::new(&[[1u32, 2, 3, 4, 5]], &Device::Cpu)?;
        let hidden = model.forward_t(&kmers, false)?;
        let grads = hidden.sum_all()?.backward()?;
        assert!(grads.get(&table).is_some());
        Ok(())
    }

    #[test]
    fn wrong_token_count_is_rejected() -> Result<()> {
        let model = DnaBertModel::new(config(), &Device::Cpu, DType::F32)?;
        let kmers = Tensor::new(&[[1u32, 2, 3, 4]], &Device::Cpu)?;
        assert!(model.forward_t(&kmers, false).is_err());
        Ok(())
    }

    #[test]
    fn pretraining_masks_one_span_per_sequence() -> Result<()> {
        let base = DnaBertModel::new(config(), &Device::Cpu, DType::F32)?;
        let masking = ContiguousMask::with_seed(0.4, 7)?;
        let model = DnaBertPretrainModel::with_masking(base, masking, &Device::Cpu, DType::F32)?;
        let bases = Tensor::new(&[[0u32, 1, 2, 3, 0, 1], [3, 3, 2, 2, 1, 1]], &Device::Cpu)?;
        let out = model.forward_t(&bases, false)?;
        assert_eq!(out.logits.dims(), &[2, 5, 17]);
        assert_eq!(out.targets.to_vec2::<u32>()?[0], vec![2, 7, 12, 13, 2]);
        for row in out.keep_mask.to_vec2::<u8>()? {
            assert_eq!(row.iter().filter(|&&keep| keep == 0).count(), 2);
        }
        Ok(())
    }
}
