//! Position-wise feed-forward network used inside transformer blocks.
//!
//! `Dense(intermediate_size, activation)` followed by `Dense(hidden_size)`,
//! applied to the trailing axis of `(batch, seq, hidden)` inputs.

use candle_core::{DType, Device, Module, Result, Tensor, Var};

use crate::{
    activations::ActivationKind,
    init::ParamInit,
    linear::{Linear, LinearConfig},
};

/// Configuration shared by transformer feed-forward networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation applied between projections.
    pub activation: ActivationKind,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize, activation: ActivationKind) -> Self {
        Self {
            hidden_size,
            intermediate_size,
            activation,
        }
    }
}

/// Two-projection MLP.
#[derive(Debug, Clone)]
pub struct FeedForward {
    config: FeedForwardConfig,
    up: Linear,
    down: Linear,
}

impl FeedForward {
    pub fn with_init(
        config: FeedForwardConfig,
        init: &ParamInit,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let up = Linear::with_init(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            init,
            device,
            dtype,
        )?;
        let down = Linear::with_init(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            init,
            device,
            dtype,
        )?;
        Ok(Self { config, up, down })
    }

    pub fn config(&self) -> &FeedForwardConfig {
        &self.config
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.up.named_parameters(&format!("{scope}.up"));
        params.extend(self.down.named_parameters(&format!("{scope}.down")));
        params
    }
}

impl Module for FeedForward {
    fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let expanded = self.up.forward(hidden)?;
        let activated = self.config.activation.apply(&expanded)?;
        self.down.forward(&activated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_hidden_layout() -> Result<()> {
        let device = Device::Cpu;
        let config = FeedForwardConfig::new(16, 64, ActivationKind::Gelu);
        let mlp = FeedForward::with_init(config, &ParamInit::XavierUniform, &device, DType::F32)?;
        let input = Tensor::randn(0f32, 1.0, (2, 7, 16), &device)?;
        assert_eq!(mlp.forward(&input)?.dims(), &[2, 7, 16]);
        assert_eq!(mlp.named_parameters("ffn").len(), 4);
        Ok(())
    }
}
