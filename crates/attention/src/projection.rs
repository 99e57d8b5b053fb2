//! Query/key/value/output projections and the scaled dot-product core shared by
//! every attention variant.

use candle_core::{DType, Device, Module, Tensor, Var, D};
use layers::{
    checks,
    init::ParamInit,
    linear::{Linear, LinearConfig},
};

use crate::{
    core::{AttentionConfig, AttentionError},
    masks,
};

/// Dense projections `embed_dim -> heads * key_dim` for q/k/v and back for the output.
#[derive(Debug, Clone)]
pub struct MultiHeadProjection {
    config: AttentionConfig,
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
}

/// Projected inputs split into heads, `(batch, heads, seq, key_dim)`.
pub struct ProjectedHeads {
    /// Already multiplied by `1 / sqrt(key_dim)`.
    pub query: Tensor,
    pub key: Tensor,
    pub value: Tensor,
}

impl MultiHeadProjection {
    pub fn new(config: &AttentionConfig, device: &Device, dtype: DType) -> Result<Self, AttentionError> {
        config.validate()?;
        let inner = config.num_heads * config.key_dim();
        let dense = |input, output| {
            let mut linear = LinearConfig::new(input, output);
            linear.bias = config.use_bias;
            Linear::with_init(linear, &ParamInit::XavierUniform, device, dtype)
        };
        Ok(Self {
            config: config.clone(),
            query: dense(config.embed_dim, inner)?,
            key: dense(config.embed_dim, inner)?,
            value: dense(config.embed_dim, inner)?,
            output: dense(inner, config.embed_dim)?,
        })
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.query.named_parameters(&format!("{scope}.query"));
        params.extend(self.key.named_parameters(&format!("{scope}.key")));
        params.extend(self.value.named_parameters(&format!("{scope}.value")));
        params.extend(self.output.named_parameters(&format!("{scope}.output")));
        params
    }

    fn validate_input(&self, label: &str, tensor: &Tensor) -> Result<(), AttentionError> {
        checks::expect_rank(label, tensor, 3)
            .and_then(|_| checks::expect_last_dim(label, tensor, self.config.embed_dim))
            .map_err(|e| AttentionError::shape(e.to_string()))
    }

    /// Projects `query` and `value` (keys come from `value`) and splits heads.
    pub fn project(&self, query: &Tensor, value: &Tensor) -> Result<ProjectedHeads, AttentionError> {
        self.validate_input("attention.query", query)?;
        self.validate_input("attention.value", value)?;
        if query.dim(0)? != value.dim(0)? {
            return Err(AttentionError::shape(format!(
                "query batch {} does not match value batch {}",
                query.dim(0)?,
                value.dim(0)?
            )));
        }
        let scale = 1.0 / (self.config.key_dim() as f64).sqrt();
        Ok(ProjectedHeads {
            query: self.split_heads(&self.query.forward(query)?)?.affine(scale, 0.0)?,
            key: self.split_heads(&self.key.forward(value)?)?,
            value: self.split_heads(&self.value.forward(value)?)?,
        })
    }

    /// `(batch, seq, heads * key_dim)` to `(batch, heads, seq, key_dim)`.
    fn split_heads(&self, tensor: &Tensor) -> candle_core::Result<Tensor> {
        let (batch, seq, _) = tensor.dims3()?;
        tensor
            .reshape((batch, seq, self.config.num_heads, self.config.key_dim()))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// Combines `(batch, heads, q, key_dim)` head outputs and applies the output projection.
    pub fn merge_heads(&self, heads: &Tensor) -> Result<Tensor, AttentionError> {
        let (batch, num_heads, seq, key_dim) = heads.dims4()?;
        let merged = heads
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, num_heads * key_dim))?;
        Ok(self.output.forward(&merged)?)
    }
}

/// Raw scaled dot-product logits `(batch, heads, q, k)`.
pub fn dot_product_logits(heads: &ProjectedHeads) -> candle_core::Result<Tensor> {
    let key_t = heads.key.transpose(2, 3)?.contiguous()?;
    heads.query.matmul(&key_t)
}

/// Adds the optional keep-mask and normalises over keys.
pub fn masked_softmax(logits: &Tensor, mask: Option<&Tensor>) -> Result<Tensor, AttentionError> {
    let (batch, _, q_len, k_len) = logits.dims4()?;
    let logits = match mask {
        Some(mask) => {
            if mask.dim(0)? != batch {
                return Err(AttentionError::shape(format!(
                    "mask batch {} does not match scores batch {batch}",
                    mask.dim(0)?
                )));
            }
            let additive = masks::additive_mask(mask, q_len, k_len)
                .map_err(|e| AttentionError::shape(e.to_string()))?
                .to_dtype(logits.dtype())?;
            logits.broadcast_add(&additive)?
        }
        None => logits.clone(),
    };
    Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
}

/// Attention-weight dropout, active only while training.
pub fn attention_dropout(probs: &Tensor, dropout_p: f32, train: bool) -> candle_core::Result<Tensor> {
    if train && dropout_p > 0.0 {
        candle_nn::ops::dropout(probs, dropout_p)
    } else {
        Ok(probs.clone())
    }
}
