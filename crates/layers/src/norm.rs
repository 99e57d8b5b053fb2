//! Layer normalisation over the trailing feature axis.
//!
//! Statistics (mean, variance) are computed in [`PrecisionPolicy::reduction`]
//! before the affine transform and the cast back to the storage dtype. Inputs
//! may carry any number of leading axes.

use candle_core::{DType, Device, Result, Tensor, Var, D};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
    /// Whether post-normalisation affine parameters are trained.
    pub elementwise_affine: bool,
}

impl NormConfig {
    /// Creates a configuration using the epsilon of the encoder blocks (1e-6).
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-6,
            elementwise_affine: true,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }
}

/// Standard LayerNorm with optional learnable scale (`gamma`) and shift (`beta`).
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    gamma: Option<Var>,
    beta: Option<Var>,
}

impl LayerNorm {
    /// Builds a LayerNorm with `gamma = 1`, `beta = 0`.
    pub fn new(config: NormConfig, device: &Device, dtype: DType) -> Result<Self> {
        let (gamma, beta) = if config.elementwise_affine {
            (
                Some(Var::ones(config.hidden_size, dtype, device)?),
                Some(Var::zeros(config.hidden_size, dtype, device)?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            config,
            gamma,
            beta,
        })
    }

    /// Constructs a LayerNorm from existing affine parameters.
    pub fn from_parameters(config: NormConfig, gamma: Tensor, beta: Tensor) -> Result<Self> {
        checks::expect_shape("norm.gamma", &gamma, &[config.hidden_size])?;
        checks::expect_shape("norm.beta", &beta, &[config.hidden_size])?;
        checks::expect_dtype_in("norm.gamma", &gamma, checks::FLOAT_DTYPES)?;
        Ok(Self {
            config,
            gamma: Some(Var::from_tensor(&gamma)?),
            beta: Some(Var::from_tensor(&beta)?),
        })
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = Vec::new();
        if let Some(gamma) = &self.gamma {
            params.push((format!("{scope}.gamma"), gamma.clone()));
        }
        if let Some(beta) = &self.beta {
            params.push((format!("{scope}.beta"), beta.clone()));
        }
        params
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_last_dim("norm.input", hidden, self.config.hidden_size)?;
        let policy = PrecisionPolicy::from_parameter_dtype(hidden.dtype());

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;
        let mean = (policy.reduce_sum(&compute, D::Minus1)? / hidden_size)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (policy.reduce_sum(&centered.sqr()?, D::Minus1)? / hidden_size)?;
        // Never stabilise below what the reduction dtype can resolve.
        let epsilon = self.config.epsilon.max(policy.epsilons().reduction);
        let denom = (variance + epsilon)?.sqrt()?;
        let mut normalized = centered.broadcast_div(&denom)?;

        if let Some(gamma) = &self.gamma {
            normalized = normalized.broadcast_mul(&gamma.as_tensor().to_dtype(normalized.dtype())?)?;
        }
        if let Some(beta) = &self.beta {
            normalized = normalized.broadcast_add(&beta.as_tensor().to_dtype(normalized.dtype())?)?;
        }

        policy.cast_to_storage(&normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        a.to_dtype(DType::F32)?
            .sub(&b.to_dtype(DType::F32)?)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()
    }

    #[test]
    fn layer_norm_matches_candle_reference() -> Result<()> {
        let device = Device::Cpu;
        let data = (0..24).map(|i| i as f32 * 0.25 - 1.5).collect::<Vec<_>>();
        let input = Tensor::from_vec(data, (2, 3, 4), &device)?;
        let gamma = Tensor::new(&[1.0f32, 0.5, -0.25, 1.5], &device)?;
        let beta = Tensor::new(&[0.1f32, -0.2, 0.05, 0.0], &device)?;

        let norm = LayerNorm::from_parameters(NormConfig::new(4), gamma.clone(), beta.clone())?;
        let output = norm.forward(&input)?;
        let reference = candle_nn::ops::layer_norm(&input, &gamma, &beta, 1e-6)?;
        assert!(max_diff(&output, &reference)? < 1e-5);
        Ok(())
    }

    #[test]
    fn fresh_norm_standardises_rows() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(8), &device, DType::F32)?;
        let input = Tensor::randn(3f32, 2.0, (4, 8), &device)?;
        let output = norm.forward(&input)?;
        let means = output.mean_keepdim(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(means.iter().all(|m| m.abs() < 1e-5));
        assert_eq!(norm.named_parameters("ln").len(), 2);
        Ok(())
    }

    #[test]
    fn constant_rows_stay_finite_without_configured_epsilon() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(4).with_epsilon(0.0), &device, DType::F32)?;
        let input = Tensor::full(2.5f32, (3, 4), &device)?;
        let output = norm.forward(&input)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(output.iter().all(|v| v.is_finite() && v.abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn wrong_hidden_size_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(8), &device, DType::F32)?;
        let input = Tensor::zeros((2, 4), DType::F32, &device)?;
        assert!(norm.forward(&input).is_err());
        Ok(())
    }
}
