//! Dense affine projections.
//!
//! Inputs may have any number of leading axes; the projection is applied to
//! the trailing feature axis, so `(batch, seq, in_dim)` becomes
//! `(batch, seq, out_dim)` and `(batch, set, seq, in_dim)` keeps its three
//! leading axes. Weights are stored `(out_dim, in_dim)` and cast to
//! [`PrecisionPolicy::compute`] for the matmul before the output is cast back to
//! the storage dtype.

use candle_core::{DType, Device, Error, Module, Result, Tensor, Var};

use crate::{checks, dtypes::PrecisionPolicy, init::ParamInit};

/// Configuration shared by dense projection layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
    /// Whether a learnable bias vector should be applied.
    pub bias: bool,
}

impl LinearConfig {
    /// Creates a configuration for a biased projection.
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
            bias: true,
        }
    }

    pub fn without_bias(mut self) -> Self {
        self.bias = false;
        self
    }
}

/// Dense affine projection with optional bias.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Var,
    bias: Option<Var>,
    policy: PrecisionPolicy,
}

impl Linear {
    /// Constructs a linear layer from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        Self::validate_weight(&config, &weight)?;
        Self::validate_bias(&config, bias.as_ref())?;
        let policy = PrecisionPolicy::from_parameter_dtype(weight.dtype());
        Ok(Self {
            config,
            weight: Var::from_tensor(&weight)?,
            bias: bias.map(|b| Var::from_tensor(&b)).transpose()?,
            policy,
        })
    }

    /// Builds a linear layer with randomly initialised weights following `init`.
    ///
    /// Biases start at zero.
    pub fn with_init(
        config: LinearConfig,
        init: &ParamInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let weight = init.sample(
            (config.output_dim, config.input_dim),
            (config.input_dim, config.output_dim),
            device,
            dtype,
        )?;
        let bias = if config.bias {
            Some(Tensor::zeros(config.output_dim, dtype, device)?)
        } else {
            None
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    /// Returns the underlying weight tensor.
    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    /// Returns the bias tensor if present.
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref().map(Var::as_tensor)
    }

    /// Trainable parameters keyed by `scope`.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = vec![(format!("{scope}.weight"), self.weight.clone())];
        if let Some(bias) = &self.bias {
            params.push((format!("{scope}.bias"), bias.clone()));
        }
        params
    }

    fn validate_weight(config: &LinearConfig, weight: &Tensor) -> Result<()> {
        checks::expect_rank("linear.weight", weight, 2)?;
        checks::expect_shape("linear.weight", weight, &[config.output_dim, config.input_dim])?;
        checks::expect_dtype_in("linear.weight", weight, checks::FLOAT_DTYPES)
    }

    fn validate_bias(config: &LinearConfig, bias: Option<&Tensor>) -> Result<()> {
        match (config.bias, bias) {
            (true, Some(tensor)) => {
                checks::expect_shape("linear.bias", tensor, &[config.output_dim])?;
                checks::expect_dtype_in("linear.bias", tensor, checks::FLOAT_DTYPES)
            }
            (false, Some(_)) => Err(Error::Msg("bias provided but config disables bias".into())),
            (true, None) => Err(Error::Msg("config expects bias but none supplied".into())),
            (false, None) => Ok(()),
        }
    }
}

impl Module for Linear {
    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_min_rank("linear.input", hidden, 1)?;
        checks::expect_last_dim("linear.input", hidden, self.config.input_dim)?;

        let dims = hidden.dims().to_vec();
        let rows: usize = dims[..dims.len() - 1].iter().product();
        let input = self
            .policy
            .cast_for_matmul(hidden)?
            .reshape((rows, self.config.input_dim))?;
        let weight = self.policy.cast_for_matmul(self.weight.as_tensor())?;
        let mut output = input.matmul(&weight.t()?)?;

        if let Some(bias) = &self.bias {
            let bias = self.policy.cast_for_matmul(bias.as_tensor())?;
            output = output.broadcast_add(&bias)?;
        }

        let mut out_dims = dims;
        if let Some(last) = out_dims.last_mut() {
            *last = self.config.output_dim;
        }
        self.policy.cast_to_storage(&output.reshape(out_dims)?)
    }
}
