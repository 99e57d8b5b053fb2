//! Multi-head self-attention with learned relative-position logits.
//!
//! A `(max_seq_len, key_dim)` table `Er` is multiplied with the scaled queries,
//! giving `QEr` of shape `(batch, heads, T, M)`. [`skew`] re-indexes it so entry
//! `(i, j)` holds the logit for relative distance `i - j`, and the result is
//! added to the content logits before the softmax.
//!
//! The table size is bound to a single sequence length. When no
//! `max_seq_len` is configured, the first call fixes it.

use std::sync::{Mutex, OnceLock};

use candle_core::{DType, Device, Tensor, Var};

use crate::{
    core::{AttentionConfig, AttentionError, AttentionLayer, AttentionOutput},
    projection::{attention_dropout, dot_product_logits, masked_softmax, MultiHeadProjection},
};
use layers::init::ParamInit;

/// Music-Transformer style skew of `(batch, heads, T, M)` relative logits.
///
/// Pads one zero column on the left, reinterprets the buffer as
/// `(batch, heads, M + 1, T)` and drops the first row.
pub fn skew(relative: &Tensor) -> candle_core::Result<Tensor> {
    let (batch, heads, seq, max_len) = relative.dims4()?;
    relative
        .pad_with_zeros(3, 1, 0)?
        .reshape((batch, heads, max_len + 1, seq))?
        .narrow(2, 1, max_len)
}

#[derive(Debug)]
pub struct RelativeMultiHeadAttention {
    projection: MultiHeadProjection,
    relative: Mutex<Option<Var>>,
    device: Device,
    dtype: DType,
    first_call: OnceLock<()>,
}

impl RelativeMultiHeadAttention {
    pub fn new(
        config: &AttentionConfig,
        max_seq_len: Option<usize>,
        device: &Device,
        dtype: DType,
    ) -> Result<Self, AttentionError> {
        let projection = MultiHeadProjection::new(config, device, dtype)?;
        let relative = match max_seq_len {
            Some(0) => return Err(AttentionError::config("max_seq_len must be positive")),
            Some(len) => Some(Self::build_table(len, config.key_dim(), device, dtype)?),
            None => None,
        };
        Ok(Self {
            projection,
            relative: Mutex::new(relative),
            device: device.clone(),
            dtype,
            first_call: OnceLock::new(),
        })
    }

    fn build_table(len: usize, key_dim: usize, device: &Device, dtype: DType) -> candle_core::Result<Var> {
        ParamInit::XavierUniform.var((len, key_dim), (len, key_dim), device, dtype)
    }

    /// The bound sequence length, if any call or the constructor has fixed it.
    pub fn max_seq_len(&self) -> Option<usize> {
        self.relative
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|table| table.dims()[0]))
    }

    fn table_for(&self, seq_len: usize) -> Result<Var, AttentionError> {
        let mut guard = self
            .relative
            .lock()
            .map_err(|_| AttentionError::config("relative table mutex poisoned"))?;
        match guard.as_ref() {
            Some(table) if table.dims()[0] == seq_len => Ok(table.clone()),
            Some(table) => Err(AttentionError::config(format!(
                "relative attention is bound to sequences of length {}, got {seq_len}",
                table.dims()[0]
            ))),
            None => {
                log::info!("attention::relative binding max_seq_len={seq_len}");
                let key_dim = self.projection.config().key_dim();
                let table = Self::build_table(seq_len, key_dim, &self.device, self.dtype)?;
                *guard = Some(table.clone());
                Ok(table)
            }
        }
    }
}

impl AttentionLayer for RelativeMultiHeadAttention {
    fn num_heads(&self) -> usize {
        self.projection.config().num_heads
    }

    fn embed_dim(&self) -> usize {
        self.projection.config().embed_dim
    }

    fn attend(
        &self,
        query: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<AttentionOutput, AttentionError> {
        let config = self.projection.config();
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::relative init heads={} key_dim={} max_seq_len={:?}",
                config.num_heads,
                config.key_dim(),
                self.max_seq_len()
            );
        }
        let (_, q_len, _) = query.dims3()?;
        let (_, k_len, _) = value.dims3()?;
        if q_len != k_len {
            return Err(AttentionError::shape(format!(
                "relative attention is self-attention only; got q_len {q_len}, k_len {k_len}"
            )));
        }
        let table = self.table_for(q_len)?;

        let heads = self.projection.project(query, value)?;
        let (batch, num_heads, seq, key_dim) = heads.query.dims4()?;
        let relative = heads
            .query
            .reshape((batch * num_heads * seq, key_dim))?
            .matmul(&table.as_tensor().to_dtype(heads.query.dtype())?.t()?)?
            .reshape((batch, num_heads, seq, q_len))?;
        let logits = (dot_product_logits(&heads)? + skew(&relative)?)?;

        let scores = masked_softmax(&logits, mask)?;
        let weighted = attention_dropout(&scores, config.dropout_p, train)?;
        let context = weighted.matmul(&heads.value)?;
        Ok(AttentionOutput {
            output: self.projection.merge_heads(&context)?,
            scores,
        })
    }

    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.projection.named_parameters(scope);
        if let Ok(guard) = self.relative.lock() {
            if let Some(table) = guard.as_ref() {
                params.push((format!("{scope}.relative_embeddings"), table.clone()));
            }
        }
        params
    }
}
