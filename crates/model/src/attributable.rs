//! Models whose attention heads can be swept for attribution.

use attention::{AttributableAttention, HeadWeights};
use candle_core::{Result, Tensor};
use layers::ops::MaskedTensor;

use crate::stack::TransformerStack;

/// A model exposing per-layer attention scores and explicit head weights.
pub trait AttributableModel {
    fn stack_depth(&self) -> usize;

    fn num_heads(&self) -> usize;

    /// Inference pass with `weights[l]` scaling the heads of layer `l`.
    ///
    /// Returns the model output and one `(batch, heads, q, k)` score tensor per
    /// layer; `scores[probe]` is a gradient leaf, so after
    /// `output.sum_all()?.backward()?` its gradient can be read back with
    /// `grads.get(&scores[probe])`.
    fn forward_attributed(
        &self,
        input: &Tensor,
        weights: &[HeadWeights],
        probe: Option<usize>,
    ) -> Result<(Tensor, Vec<Tensor>)>;
}

/// A bare stack attributes over `(batch, seq, embed_dim)` inputs and outputs
/// its final hidden state.
impl<A: AttributableAttention> AttributableModel for TransformerStack<A> {
    fn stack_depth(&self) -> usize {
        self.depth()
    }

    fn num_heads(&self) -> usize {
        TransformerStack::num_heads(self)
    }

    fn forward_attributed(
        &self,
        input: &Tensor,
        weights: &[HeadWeights],
        probe: Option<usize>,
    ) -> Result<(Tensor, Vec<Tensor>)> {
        let (hidden, scores) =
            self.forward_weighted(&MaskedTensor::unmasked(input.clone()), weights, probe)?;
        Ok((hidden.values, scores))
    }
}
