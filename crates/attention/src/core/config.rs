//! Construction parameters shared by the attention layers.

use serde::Deserialize;

use super::AttentionError;

fn default_bias() -> bool {
    true
}

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttentionConfig {
    /// Width of the query/value inputs and of the output.
    pub embed_dim: usize,
    pub num_heads: usize,
    /// Per-head projection width; defaults to `embed_dim`.
    #[serde(default)]
    pub key_dim: Option<usize>,
    /// Probability for dropout applied to attention weights during training.
    #[serde(default)]
    pub dropout_p: f32,
    #[serde(default = "default_bias")]
    pub use_bias: bool,
}

impl AttentionConfig {
    pub fn new(embed_dim: usize, num_heads: usize) -> Self {
        Self {
            embed_dim,
            num_heads,
            key_dim: None,
            dropout_p: 0.0,
            use_bias: true,
        }
    }

    pub fn key_dim(&self) -> usize {
        self.key_dim.unwrap_or(self.embed_dim)
    }

    pub fn validate(&self) -> Result<(), AttentionError> {
        if self.embed_dim == 0 || self.num_heads == 0 || self.key_dim() == 0 {
            return Err(AttentionError::config(
                "embed_dim, num_heads and key_dim must be positive",
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(AttentionError::config(format!(
                "dropout probability must be in [0, 1), got {}",
                self.dropout_p
            )));
        }
        Ok(())
    }
}
