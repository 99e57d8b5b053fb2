//! Parameter initialisation policies.
//!
//! Every trainable tensor in the workspace is created through [`ParamInit`] so
//! the Glorot/He recipes live in one place. Fans are passed explicitly because
//! the same policy initialises dense kernels `(out, in)`, embedding tables
//! `(rows, dim)` and learned tokens `(1, dim)`.

use candle_core::{DType, Device, Result, Shape, Tensor, Var};

/// Supported weight initialisation policies.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamInit {
    /// Xavier/Glorot uniform initialisation.
    XavierUniform,
    /// Xavier/Glorot normal initialisation.
    XavierNormal,
    /// Kaiming/He uniform initialisation.
    KaimingUniform { negative_slope: f64 },
    /// Kaiming/He normal initialisation.
    KaimingNormal { negative_slope: f64 },
    /// Gaussian with a fixed standard deviation.
    Normal { mean: f64, std: f64 },
    /// Uniform over `[low, high)`.
    Uniform { low: f64, high: f64 },
    /// Every element set to `value`.
    Constant(f64),
    /// Scales another policy to support deep network stabilisation.
    Scaled { base: Box<ParamInit>, scale: f64 },
}

impl ParamInit {
    /// Convenience helper to scale an existing policy.
    pub fn scaled(base: ParamInit, scale: f64) -> Self {
        Self::Scaled {
            base: Box::new(base),
            scale,
        }
    }

    /// Samples a tensor of `shape` using `(fan_in, fan_out)` for the variance-scaling policies.
    pub fn sample<S: Into<Shape>>(
        &self,
        shape: S,
        fans: (usize, usize),
        device: &Device,
        dtype: DType,
    ) -> Result<Tensor> {
        let shape = shape.into();
        let (fan_in, fan_out) = (fans.0.max(1) as f64, fans.1.max(1) as f64);
        let sampled = match self {
            ParamInit::XavierUniform => {
                let bound = (6.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            ParamInit::XavierNormal => {
                let std = (2.0f64 / (fan_in + fan_out)).sqrt();
                Tensor::randn(0f32, std as f32, shape, device)?
            }
            ParamInit::KaimingUniform { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                let bound = 3.0f64.sqrt() * gain / fan_in.sqrt();
                Tensor::rand(-bound as f32, bound as f32, shape, device)?
            }
            ParamInit::KaimingNormal { negative_slope } => {
                let gain = (2.0f64 / (1.0 + negative_slope.powi(2))).sqrt();
                Tensor::randn(0f32, (gain / fan_in.sqrt()) as f32, shape, device)?
            }
            ParamInit::Normal { mean, std } => {
                Tensor::randn(*mean as f32, *std as f32, shape, device)?
            }
            ParamInit::Uniform { low, high } => {
                Tensor::rand(*low as f32, *high as f32, shape, device)?
            }
            ParamInit::Constant(value) => {
                Tensor::full(*value as f32, shape, device)?
            }
            ParamInit::Scaled { base, scale } => {
                base.sample(shape, fans, device, DType::F32)?.affine(*scale, 0.0)?
            }
        };
        crate::dtypes::cast(&sampled, dtype)
    }

    /// Samples a fresh trainable variable.
    pub fn var<S: Into<Shape>>(
        &self,
        shape: S,
        fans: (usize, usize),
        device: &Device,
        dtype: DType,
    ) -> Result<Var> {
        Var::from_tensor(&self.sample(shape, fans, device, dtype)?)
    }
}
