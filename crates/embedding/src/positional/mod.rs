//! Positional embeddings.

pub mod fixed;

pub use fixed::FixedPositionEmbedding;
