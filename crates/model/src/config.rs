use candle_core::{Error, Result};
use layers::activations::ActivationKind;
use serde::Deserialize;

use attention::AttentionConfig;

fn default_dropout() -> f32 {
    0.1
}

fn default_norm_epsilon() -> f64 {
    1e-6
}

fn default_chunk_size() -> Option<usize> {
    Some(256)
}

fn default_set_mask_ratio() -> f64 {
    0.15
}

fn default_sequence_mask_ratio() -> f64 {
    0.15
}

/// Shape of a transformer stack shared by the sequence and set encoders.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformerConfig {
    pub embed_dim: usize,
    pub num_heads: usize,
    /// Width of the hidden feed-forward layer.
    pub ff_dim: usize,
    #[serde(default)]
    pub activation: ActivationKind,
    /// Residual dropout after attention and after the feed-forward network.
    #[serde(default = "default_dropout")]
    pub dropout_p: f32,
    #[serde(default)]
    pub prenorm: bool,
    /// Number of blocks.
    pub stack: usize,
    #[serde(default = "default_norm_epsilon")]
    pub norm_epsilon: f64,
}

impl TransformerConfig {
    pub fn new(embed_dim: usize, num_heads: usize, ff_dim: usize, stack: usize) -> Self {
        Self {
            embed_dim,
            num_heads,
            ff_dim,
            activation: ActivationKind::default(),
            dropout_p: default_dropout(),
            prenorm: false,
            stack,
            norm_epsilon: default_norm_epsilon(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.embed_dim == 0 {
            return Err(Error::Msg("embed_dim must be greater than zero".into()));
        }
        if self.num_heads == 0 {
            return Err(Error::Msg("num_heads must be greater than zero".into()));
        }
        if self.ff_dim == 0 {
            return Err(Error::Msg("ff_dim must be greater than zero".into()));
        }
        if self.stack == 0 {
            return Err(Error::Msg("stack must be greater than zero".into()));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(Error::Msg(format!(
                "dropout_p must be in [0, 1), got {}",
                self.dropout_p
            )));
        }
        if self.norm_epsilon <= 0.0 {
            return Err(Error::Msg("norm_epsilon must be positive".into()));
        }
        Ok(())
    }

    /// Attention settings for one block; each head projects to `embed_dim`.
    pub fn attention(&self) -> AttentionConfig {
        AttentionConfig::new(self.embed_dim, self.num_heads)
    }
}

/// DnaBERT: a relative-attention encoder over overlapping k-mer tokens.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DnaBertConfig {
    pub kmer: usize,
    /// Length of the nucleotide sequences, before k-mer encoding.
    pub sequence_length: usize,
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    /// Fraction of k-mer tokens hidden by the pretraining span mask.
    #[serde(default = "default_sequence_mask_ratio")]
    pub mask_ratio: f64,
    /// Adds a learned absolute position table after the token embedding.
    #[serde(default)]
    pub fixed_positions: bool,
}

impl DnaBertConfig {
    pub fn new(kmer: usize, sequence_length: usize, transformer: TransformerConfig) -> Self {
        Self {
            kmer,
            sequence_length,
            transformer,
            mask_ratio: default_sequence_mask_ratio(),
            fixed_positions: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.transformer.validate()?;
        if self.kmer == 0 {
            return Err(Error::Msg("kmer must be greater than zero".into()));
        }
        if self.sequence_length < self.kmer {
            return Err(Error::Msg(format!(
                "sequence_length ({}) must be at least kmer ({})",
                self.sequence_length, self.kmer
            )));
        }
        Ok(())
    }

    /// `4^k` k-mers plus the mask token.
    pub fn vocab_size(&self) -> usize {
        4usize.pow(self.kmer as u32) + 1
    }

    /// Number of overlapping k-mer tokens per sequence.
    pub fn kmer_sequence_length(&self) -> usize {
        self.sequence_length + 1 - self.kmer
    }
}

/// SetBERT: a set transformer over DnaBERT sequence embeddings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SetBertConfig {
    #[serde(flatten)]
    pub transformer: TransformerConfig,
    /// Largest number of sequences per sample.
    pub max_set_len: usize,
    /// Sequences encoded per DnaBERT call; `None` encodes a whole batch at once.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: Option<usize>,
    /// Fraction of set elements replaced by mask embeddings during pretraining.
    #[serde(default = "default_set_mask_ratio")]
    pub mask_ratio: f64,
}

impl SetBertConfig {
    pub fn new(transformer: TransformerConfig, max_set_len: usize) -> Self {
        Self {
            transformer,
            max_set_len,
            chunk_size: default_chunk_size(),
            mask_ratio: default_set_mask_ratio(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.transformer.validate()?;
        if self.max_set_len == 0 {
            return Err(Error::Msg("max_set_len must be greater than zero".into()));
        }
        if self.chunk_size == Some(0) {
            return Err(Error::Msg("chunk_size must be greater than zero".into()));
        }
        if !(0.0..=1.0).contains(&self.mask_ratio) {
            return Err(Error::Msg(format!(
                "mask_ratio must lie in [0, 1], got {}",
                self.mask_ratio
            )));
        }
        Ok(())
    }
}
