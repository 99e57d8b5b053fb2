//! Class-token handling.
//!
//! A class token is an extra element placed at position 0 of a sequence or set
//! whose final hidden state serves as the aggregate representation. Two
//! flavours exist: [`EmbeddingWithClassToken`] reserves an extra row of a token
//! embedding table (id `num_tokens`), while [`InjectClassToken`] prepends a
//! learned vector to already-embedded inputs. [`SplitClassToken`] undoes the
//! injection after the transformer stack.

use candle_core::{DType, Device, Error, Result, Tensor, Var};
use layers::{checks, init::ParamInit, ops::MaskedTensor};

use crate::token::{TokenEmbedding, TokenEmbeddingConfig};

/// Token embedding whose table has one extra row for the class token.
#[derive(Debug, Clone)]
pub struct EmbeddingWithClassToken {
    num_tokens: usize,
    embedding: TokenEmbedding,
}

impl EmbeddingWithClassToken {
    pub fn new(num_tokens: usize, embed_dim: usize, device: &Device, dtype: DType) -> Result<Self> {
        let mut config = TokenEmbeddingConfig::new(num_tokens + 1, embed_dim, device);
        config.dtype = dtype;
        Ok(Self {
            num_tokens,
            embedding: TokenEmbedding::new(config)?,
        })
    }

    /// Id reserved for the class token.
    pub fn class_token_id(&self) -> u32 {
        self.num_tokens as u32
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.embedding.named_parameters(scope)
    }

    /// Embeds `(batch, L)` ids as `(batch, L + 1, embed_dim)` with the class token first.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        checks::expect_rank("class_embedding.ids", token_ids, 2)?;
        let ids = layers::dtypes::to_index_dtype(token_ids)?;
        let batch = ids.dim(0)?;
        let class = Tensor::full(self.class_token_id(), (batch, 1), ids.device())?;
        self.embedding.forward(&Tensor::cat(&[&class, &ids], 1)?)
    }
}

/// Prepends a learned class vector to `(batch, N, embed_dim)` inputs.
#[derive(Debug, Clone)]
pub struct InjectClassToken {
    embed_dim: usize,
    class_token: Var,
}

impl InjectClassToken {
    pub fn new(embed_dim: usize, device: &Device, dtype: DType) -> Result<Self> {
        let class_token = ParamInit::XavierNormal.var((1, 1, embed_dim), (1, embed_dim), device, dtype)?;
        Ok(Self {
            embed_dim,
            class_token,
        })
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![(format!("{scope}.class_token"), self.class_token.clone())]
    }

    /// Returns `(batch, N + 1, embed_dim)`; a mask gains a leading `1` column.
    pub fn forward(&self, input: &MaskedTensor) -> Result<MaskedTensor> {
        checks::expect_rank("inject_class_token.input", &input.values, 3)?;
        checks::expect_last_dim("inject_class_token.input", &input.values, self.embed_dim)?;
        let batch = input.values.dim(0)?;
        let class = self
            .class_token
            .as_tensor()
            .to_dtype(input.values.dtype())?
            .broadcast_as((batch, 1, self.embed_dim))?
            .contiguous()?;
        let values = Tensor::cat(&[&class, &input.values], 1)?;
        let mask = match &input.mask {
            Some(mask) => {
                let keep = Tensor::ones((batch, 1), mask.dtype(), mask.device())?;
                Some(Tensor::cat(&[&keep, mask], 1)?)
            }
            None => None,
        };
        Ok(MaskedTensor::new(values, mask))
    }
}

/// Splits `(batch, N + 1, embed_dim)` into the class vector and the remaining elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitClassToken;

impl SplitClassToken {
    /// Returns `(class (batch, embed_dim), others (batch, N, embed_dim))`.
    ///
    /// The mask of `others` drops the class column; the class vector carries no mask.
    pub fn forward(&self, input: &MaskedTensor) -> Result<(Tensor, MaskedTensor)> {
        checks::expect_rank("split_class_token.input", &input.values, 3)?;
        let len = input.values.dim(1)?;
        if len == 0 {
            return Err(Error::Msg("split class token: empty sequence".into()));
        }
        let class = input.values.narrow(1, 0, 1)?.squeeze(1)?;
        let others = input.values.narrow(1, 1, len - 1)?;
        let mask = input
            .mask
            .as_ref()
            .map(|mask| mask.narrow(1, 1, len - 1))
            .transpose()?;
        Ok((class, MaskedTensor::new(others, mask)))
    }
}
