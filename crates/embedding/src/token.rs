//! Token embedding lookup table.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};
use layers::{checks, init::ParamInit, ops};

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Treat token id 0 as padding and report it through the output mask.
    pub mask_zero: bool,
    /// Storage dtype used for the underlying parameters and outputs.
    pub dtype: DType,
    /// Device hosting the parameters.
    pub device: Device,
}

impl TokenEmbeddingConfig {
    pub fn new(vocab_size: usize, hidden_dim: usize, device: &Device) -> Self {
        Self {
            vocab_size,
            hidden_dim,
            mask_zero: false,
            dtype: DType::F32,
            device: device.clone(),
        }
    }
}

/// Learnable token embedding table, initialised from `U(-0.05, 0.05)`.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Var,
}

impl TokenEmbedding {
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }
        let shape = (config.vocab_size, config.hidden_dim);
        let weight = ParamInit::Uniform {
            low: -0.05,
            high: 0.05,
        }
        .var(shape, shape, &config.device, config.dtype)?;
        Ok(Self { config, weight })
    }

    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    /// Looks up embeddings for integer token ids of any shape.
    ///
    /// The output appends a trailing `hidden_dim` axis to the id shape.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        checks::expect_integer_dtype("token_embedding.ids", token_ids)?;
        if token_ids.elem_count() == 0 {
            bail!("token_ids must not be empty, got shape {:?}", token_ids.dims());
        }
        let ids = token_ids.to_dtype(DType::I64)?.flatten_all()?;
        self.ensure_id_range(&ids)?;

        let gathered = self.weight.as_tensor().index_select(&ids, 0)?;
        let mut output_dims = token_ids.dims().to_vec();
        output_dims.push(self.config.hidden_dim);
        gathered.reshape(output_dims)
    }

    /// Like [`forward`](Self::forward) but also returns the keep-mask when `mask_zero` is set.
    pub fn forward_masked(&self, token_ids: &Tensor) -> Result<ops::MaskedTensor> {
        let values = self.forward(token_ids)?;
        let mask = if self.config.mask_zero {
            Some(token_ids.ne(&token_ids.zeros_like()?)?)
        } else {
            None
        };
        Ok(ops::MaskedTensor::new(values, mask))
    }

    /// Returns the trainable parameters for this embedding with an optional scope prefix.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let prefix = if scope.is_empty() { "embedding" } else { scope };
        vec![(format!("{prefix}.weight"), self.weight.clone())]
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            return Err(Error::Msg(format!(
                "encountered negative token id {min_id} (minimum)"
            )));
        }
        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            return Err(Error::Msg(format!(
                "token id {max_id} exceeds vocab size {vocab}"
            )));
        }
        Ok(())
    }
}
