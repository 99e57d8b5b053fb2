//! Multi-head attention with per-head re-weighting of the attention scores.
//!
//! After the softmax, the `(batch, heads, q, k)` scores are multiplied by a
//! `(1, heads, 1, 1)` weight vector before they are combined with the values.
//! With unit weights the layer is standard scaled dot-product attention.
//! Attribution sweeps one head's weight from 0 to 1 and integrates the gradient
//! of the model output with respect to the unweighted scores.

use std::sync::OnceLock;

use candle_core::{DType, Device, Tensor, Var};

use crate::{
    core::{
        AttentionConfig, AttentionError, AttentionLayer, AttentionOutput, AttributableAttention,
        HeadWeights, ScoreTracking,
    },
    projection::{attention_dropout, dot_product_logits, masked_softmax, MultiHeadProjection},
};

#[derive(Debug)]
pub struct AttributableMultiHeadAttention {
    projection: MultiHeadProjection,
    first_call: OnceLock<()>,
}

impl AttributableMultiHeadAttention {
    pub fn new(config: &AttentionConfig, device: &Device, dtype: DType) -> Result<Self, AttentionError> {
        Ok(Self {
            projection: MultiHeadProjection::new(config, device, dtype)?,
            first_call: OnceLock::new(),
        })
    }

    pub fn config(&self) -> &AttentionConfig {
        self.projection.config()
    }

    fn compute(
        &self,
        query: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        weights: &HeadWeights,
        tracking: ScoreTracking,
        train: bool,
    ) -> Result<AttentionOutput, AttentionError> {
        let config = self.projection.config();
        if self.first_call.set(()).is_ok() {
            log::info!(
                "attention::attributable init heads={} key_dim={} dropout={}",
                config.num_heads,
                config.key_dim(),
                config.dropout_p
            );
        }
        if weights.num_heads() != config.num_heads {
            return Err(AttentionError::config(format!(
                "{} head weights supplied for {} heads",
                weights.num_heads(),
                config.num_heads
            )));
        }

        let heads = self.projection.project(query, value)?;
        let probs = masked_softmax(&dot_product_logits(&heads)?, mask)?;
        let scores = match tracking {
            ScoreTracking::Graph => probs,
            ScoreTracking::Leaf => Var::from_tensor(&probs.detach())?.as_tensor().clone(),
        };

        let alpha = weights.to_tensor(scores.device(), scores.dtype())?;
        let weighted = scores.broadcast_mul(&alpha)?;
        let weighted = attention_dropout(&weighted, config.dropout_p, train)?;
        let context = weighted.matmul(&heads.value)?;
        Ok(AttentionOutput {
            output: self.projection.merge_heads(&context)?,
            scores,
        })
    }
}

impl AttentionLayer for AttributableMultiHeadAttention {
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
        let weights = HeadWeights::ones(self.num_heads());
        self.compute(query, value, mask, &weights, ScoreTracking::Graph, train)
    }

    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.projection.named_parameters(scope)
    }
}

impl AttributableAttention for AttributableMultiHeadAttention {
    fn attend_weighted(
        &self,
        query: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        weights: &HeadWeights,
        tracking: ScoreTracking,
    ) -> Result<AttentionOutput, AttentionError> {
        self.compute(query, value, mask, weights, tracking, false)
    }
}
