//! Multi-head attention layers for the sequence and set encoders.
//!
//! Two variants share the projection core in [`projection`]:
//!
//! * [`AttributableMultiHeadAttention`] scales each head's post-softmax scores by
//!   an explicit [`HeadWeights`] vector and can expose those scores as a leaf
//!   variable, which is what integrated-gradients attribution differentiates
//!   against.
//! * [`RelativeMultiHeadAttention`] adds learned relative-position logits
//!   through the [`skew`] re-indexing.
//!
//! Both consume `(batch, seq, embed_dim)` tensors and optional `u8` keep-masks;
//! see [`masks`] for the accepted layouts.

pub mod attributable;
pub mod core;
pub mod masks;
pub mod projection;
pub mod relative;

pub use attributable::AttributableMultiHeadAttention;
pub use core::{
    AttentionConfig, AttentionError, AttentionLayer, AttentionOutput, AttributableAttention,
    HeadWeights, ScoreTracking,
};
pub use relative::{skew, RelativeMultiHeadAttention};
