use std::fmt;

use attention::{
    AttentionError, AttentionLayer, AttentionOutput, AttributableAttention, HeadWeights,
    ScoreTracking,
};
use candle_core::{DType, Device, Error, Module, Result, Tensor, Var};
use layers::{
    checks,
    init::ParamInit,
    mlp::{FeedForward, FeedForwardConfig},
    norm::{LayerNorm, NormConfig},
    ops::MaskedTensor,
};

use crate::config::TransformerConfig;

/// Maps attention failures onto the Candle error used by the model crates.
pub(crate) fn attention_error(err: AttentionError) -> Error {
    match err {
        AttentionError::Backend(inner) => inner,
        other => Error::Msg(other.to_string()),
    }
}

fn build_norm(config: &TransformerConfig, device: &Device, dtype: DType) -> Result<LayerNorm> {
    let norm = NormConfig::new(config.embed_dim).with_epsilon(config.norm_epsilon);
    LayerNorm::new(norm, device, dtype)
}

/// Residual dropout, active only while training.
fn dropout(tensor: &Tensor, p: f32, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(tensor, p)
    } else {
        Ok(tensor.clone())
    }
}

/// Self-attention followed by a position-wise feed-forward network, in either
/// the post-norm (`LN(x + f(x))`) or pre-norm (`x + f(LN(x))`) layout.
///
/// The block never touches the mask of its input; it is forwarded to the
/// attention layer as a key mask and returned unchanged.
pub struct TransformerBlock<A> {
    embed_dim: usize,
    dropout_p: f32,
    prenorm: bool,
    attention: A,
    ffn: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
}

impl<A: AttentionLayer> fmt::Debug for TransformerBlock<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerBlock")
            .field("embed_dim", &self.embed_dim)
            .field("heads", &self.attention.num_heads())
            .field("dropout_p", &self.dropout_p)
            .field("prenorm", &self.prenorm)
            .finish()
    }
}

impl<A: AttentionLayer> TransformerBlock<A> {
    pub fn new(config: &TransformerConfig, attention: A, device: &Device, dtype: DType) -> Result<Self> {
        config.validate()?;
        if attention.embed_dim() != config.embed_dim {
            return Err(Error::Msg(format!(
                "attention embed_dim {} does not match block embed_dim {}",
                attention.embed_dim(),
                config.embed_dim
            )));
        }
        let ffn = FeedForward::with_init(
            FeedForwardConfig::new(config.embed_dim, config.ff_dim, config.activation),
            &ParamInit::XavierUniform,
            device,
            dtype,
        )?;
        Ok(Self {
            embed_dim: config.embed_dim,
            dropout_p: config.dropout_p,
            prenorm: config.prenorm,
            attention,
            ffn,
            norm1: build_norm(config, device, dtype)?,
            norm2: build_norm(config, device, dtype)?,
        })
    }

    pub fn attention(&self) -> &A {
        &self.attention
    }

    pub fn is_prenorm(&self) -> bool {
        self.prenorm
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.attention.named_parameters(&format!("{scope}.attention"));
        params.extend(self.ffn.named_parameters(&format!("{scope}.ffn")));
        params.extend(self.norm1.named_parameters(&format!("{scope}.norm1")));
        params.extend(self.norm2.named_parameters(&format!("{scope}.norm2")));
        params
    }

    /// Runs the block, returning the new hidden state and this block's scores.
    pub fn forward_t(&self, input: &MaskedTensor, train: bool) -> Result<(MaskedTensor, Tensor)> {
        self.run(input, train, |x, mask| self.attention.attend(x, x, mask, train))
    }

    fn run<F>(&self, input: &MaskedTensor, train: bool, attend: F) -> Result<(MaskedTensor, Tensor)>
    where
        F: Fn(&Tensor, Option<&Tensor>) -> std::result::Result<AttentionOutput, AttentionError>,
    {
        let hidden = &input.values;
        checks::expect_rank("transformer_block.input", hidden, 3)?;
        checks::expect_last_dim("transformer_block.input", hidden, self.embed_dim)?;
        let mask = input.mask();

        let (output, scores) = if self.prenorm {
            let normed = self.norm1.forward(hidden)?;
            let attended = attend(&normed, mask).map_err(attention_error)?;
            let residual = (hidden + dropout(&attended.output, self.dropout_p, train)?)?;
            let ffn = self.ffn.forward(&self.norm2.forward(&residual)?)?;
            let output = (&residual + dropout(&ffn, self.dropout_p, train)?)?;
            (output, attended.scores)
        } else {
            let attended = attend(hidden, mask).map_err(attention_error)?;
            let first = self
                .norm1
                .forward(&(hidden + dropout(&attended.output, self.dropout_p, train)?)?)?;
            let ffn = self.ffn.forward(&first)?;
            let output = self
                .norm2
                .forward(&(&first + dropout(&ffn, self.dropout_p, train)?)?)?;
            (output, attended.scores)
        };
        Ok((MaskedTensor::new(output, input.mask.clone()), scores))
    }
}

impl<A: AttributableAttention> TransformerBlock<A> {
    /// Inference pass with the attention heads scaled by `weights`.
    pub fn forward_weighted(
        &self,
        input: &MaskedTensor,
        weights: &HeadWeights,
        tracking: ScoreTracking,
    ) -> Result<(MaskedTensor, Tensor)> {
        self.run(input, false, |x, mask| {
            self.attention.attend_weighted(x, x, mask, weights, tracking)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attention::AttributableMultiHeadAttention;

    fn block(prenorm: bool, dropout_p: f32) -> Result<TransformerBlock<AttributableMultiHeadAttention>> {
        let mut config = TransformerConfig::new(8, 2, 16, 1);
        config.prenorm = prenorm;
        config.dropout_p = dropout_p;
        let attention = AttributableMultiHeadAttention::new(&config.attention(), &Device::Cpu, DType::F32)
            .map_err(attention_error)?;
        TransformerBlock::new(&config, attention, &Device::Cpu, DType::F32)
    }

    #[test]
    fn both_layouts_preserve_shape_and_mask() -> Result<()> {
        let x = Tensor::randn(0f32, 1.0, (2, 5, 8), &Device::Cpu)?;
        let mask = layers::ops::sequence_mask(&[5, 3], 5, &Device::Cpu)?;
        let input = MaskedTensor::new(x, Some(mask.clone()));
        for prenorm in [false, true] {
            let block = block(prenorm, 0.1)?;
            let (out, scores) = block.forward_t(&input, false)?;
            assert_eq!(out.values.dims(), &[2, 5, 8]);
            assert_eq!(scores.dims(), &[2, 2, 5, 5]);
            let kept = out.mask().map(|m| m.to_vec2::<u8>()).transpose()?;
            assert_eq!(kept, Some(mask.to_vec2::<u8>()?));
        }
        Ok(())
    }

    #[test]
    fn post_norm_output_is_normalised() -> Result<()> {
        let block = block(false, 0.0)?;
        let x = Tensor::randn(0f32, 3.0, (1, 4, 8), &Device::Cpu)?;
        let (out, _) = block.forward_t(&MaskedTensor::unmasked(x), false)?;
        let means = out.values.mean_keepdim(2)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(means < 1e-4);
        Ok(())
    }

    #[test]
    fn dropout_is_inactive_in_eval() -> Result<()> {
        let block = block(true, 0.5)?;
        let x = Tensor::randn(0f32, 1.0, (2, 3, 8), &Device::Cpu)?;
        let input = MaskedTensor::unmasked(x);
        let (first, _) = block.forward_t(&input, false)?;
        let (second, _) = block.forward_t(&input, false)?;
        let diff = first.values.sub(&second.values)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn unit_weights_match_the_plain_pass() -> Result<()> {
        let block = block(false, 0.1)?;
        let x = Tensor::randn(0f32, 1.0, (1, 4, 8), &Device::Cpu)?;
        let input = MaskedTensor::unmasked(x);
        let (plain, _) = block.forward_t(&input, false)?;
        let (weighted, scores) =
            block.forward_weighted(&input, &HeadWeights::ones(2), ScoreTracking::Leaf)?;
        let diff = plain.values.sub(&weighted.values)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff < 1e-6);
        let grads = weighted.values.sum_all()?.backward()?;
        assert!(grads.get(&scores).is_some());
        Ok(())
    }

    #[test]
    fn mismatched_attention_width_is_rejected() -> Result<()> {
        let config = TransformerConfig::new(8, 2, 16, 1);
        let attention = AttributableMultiHeadAttention::new(
            &attention::AttentionConfig::new(4, 2),
            &Device::Cpu,
            DType::F32,
        )
        .map_err(attention_error)?;
        assert!(TransformerBlock::new(&config, attention, &Device::Cpu, DType::F32).is_err());
        Ok(())
    }
}
