//! Core traits and types shared across attention implementations.
//!
//! Layers consume `(batch, seq, embed_dim)` query/value inputs and return the
//! same layout, together with the post-softmax attention scores shaped
//! `(batch, heads, q_len, k_len)`. Masks are `u8` keep-masks shaped
//! `(batch, k_len)` or `(batch, q_len, k_len)`.

pub mod config;
pub mod errors;
pub mod head_weights;

use candle_core::{Tensor, Var};

pub use config::AttentionConfig;
pub use errors::AttentionError;
pub use head_weights::HeadWeights;

/// Result of one attention call.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// `(batch, q_len, embed_dim)`.
    pub output: Tensor,
    /// Post-softmax scores before any head weighting, `(batch, heads, q_len, k_len)`.
    pub scores: Tensor,
}

/// How the returned score tensor relates to the autograd graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreTracking {
    /// Scores stay part of the regular graph.
    #[default]
    Graph,
    /// Scores are re-rooted as a leaf variable so `grads.get(&scores)` is populated
    /// after a backward pass through the layer output.
    Leaf,
}

/// Multi-head attention over `(batch, seq, embed_dim)` inputs.
pub trait AttentionLayer: Send + Sync {
    fn num_heads(&self) -> usize;

    fn embed_dim(&self) -> usize;

    /// Attends from `query` to `value` (keys are projected from `value`).
    ///
    /// Dropout on the attention weights is only applied when `train` is set.
    fn attend(
        &self,
        query: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        train: bool,
    ) -> Result<AttentionOutput, AttentionError>;

    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)>;
}

/// Attention layers whose heads can be re-weighted for attribution.
pub trait AttributableAttention: AttentionLayer {
    /// Inference-mode attention with post-softmax scores scaled per head by `weights`.
    fn attend_weighted(
        &self,
        query: &Tensor,
        value: &Tensor,
        mask: Option<&Tensor>,
        weights: &HeadWeights,
        tracking: ScoreTracking,
    ) -> Result<AttentionOutput, AttentionError>;
}
