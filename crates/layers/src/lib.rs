//! Building blocks shared by the sequence and set encoders.
//!
//! The crate hosts dense projections, layer normalisation, the position-wise
//! feed-forward network, the chunked evaluation wrapper, the learned set
//! sampler and the Gumbel-softmax relaxation, together with the dtype and shape
//! helpers every other crate in the workspace leans on. Parameters are held as
//! [`candle_core::Var`]s owned by the layer that created them.

pub mod activations;
pub mod checks;
pub mod chunked;
pub mod dtypes;
pub mod gumbel;
pub mod init;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod ops;
pub mod sample_set;

pub use chunked::{ChunkedEmbeddingConfig, ChunkedEmbeddingLayer};
pub use dtypes::{cast, PrecisionPolicy};
pub use gumbel::{GumbelSample, GumbelSoftmax};
pub use init::ParamInit;
pub use linear::{Linear, LinearConfig};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
pub use ops::MaskedTensor;
pub use sample_set::SampleSet;
