//! Embedding crate
//!
//! Token and k-mer embeddings, class-token injection and splitting, and the
//! learned absolute positional table used by the sequence encoder.

pub mod class_token;
pub mod kmer;
pub mod positional;
pub mod token;

pub use class_token::{EmbeddingWithClassToken, InjectClassToken, SplitClassToken};
pub use kmer::{KmerEncoder, KmerEncoderConfig};
pub use positional::FixedPositionEmbedding;
pub use token::{TokenEmbedding, TokenEmbeddingConfig};
