//! Integrated-gradient attribution over attention heads.
//!
//! For layer `l` and head `h` the head's weight is swept over
//! `linspace(0, 1, integration_steps)` with every other weight held at 1.
//! At each point the gradient of `sum(output)` with respect to layer `l`'s
//! attention scores is taken and its slice for head `h` accumulated.

use attention::HeadWeights;
use candle_core::{DType, Tensor};
use layers::ops::linspace;
use model::AttributableModel;

use crate::{
    config::AttributionConfig,
    error::{AttributionError, Result},
    store::AttributionStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegratedGradients {
    integration_steps: usize,
}

impl IntegratedGradients {
    pub fn new(integration_steps: usize) -> Result<Self> {
        if integration_steps == 0 {
            return Err(AttributionError::Config(
                "integration_steps must be greater than zero".into(),
            ));
        }
        Ok(Self { integration_steps })
    }

    pub fn from_config(config: &AttributionConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.integration_steps)
    }

    pub fn integration_steps(&self) -> usize {
        self.integration_steps
    }

    /// Attributes one unbatched example, returning `(layers, heads, q, k)`.
    pub fn attribute<M: AttributableModel>(&self, model: &M, example: &Tensor) -> Result<Tensor> {
        let input = example.unsqueeze(0)?;
        let depth = model.stack_depth();
        let heads = model.num_heads();
        let ones = vec![HeadWeights::ones(heads); depth];
        let alphas = linspace(0.0, 1.0, self.integration_steps);

        let mut layers = Vec::with_capacity(depth);
        for layer in 0..depth {
            let mut per_head = Vec::with_capacity(heads);
            for head in 0..heads {
                let mut total: Option<Tensor> = None;
                for &alpha in &alphas {
                    let mut weights = ones.clone();
                    weights[layer] = weights[layer]
                        .with_head(head, alpha)
                        .map_err(|e| AttributionError::Config(e.to_string()))?;
                    let grad = self.head_gradient(model, &input, &weights, layer, head)?;
                    total = Some(match total {
                        Some(acc) => (acc + grad)?,
                        None => grad,
                    });
                }
                let total = total.ok_or_else(|| {
                    AttributionError::Config("integration produced no steps".into())
                })?;
                per_head.push(total);
            }
            layers.push(Tensor::stack(&per_head, 0)?);
            log::debug!("integrated gradients: layer {layer} done");
        }
        Ok(Tensor::stack(&layers, 0)?)
    }

    /// `(q, k)` gradient of `sum(output)` w.r.t. head `head` of layer `layer`'s scores.
    fn head_gradient<M: AttributableModel>(
        &self,
        model: &M,
        input: &Tensor,
        weights: &[HeadWeights],
        layer: usize,
        head: usize,
    ) -> Result<Tensor> {
        let (output, scores) = model.forward_attributed(input, weights, Some(layer))?;
        let probe = scores.get(layer).ok_or_else(|| {
            AttributionError::Shape(format!(
                "model returned {} score tensors, expected at least {}",
                scores.len(),
                layer + 1
            ))
        })?;
        let grads = output.sum_all()?.backward()?;
        let grad = grads.get(probe).ok_or_else(|| {
            AttributionError::Shape(format!("no gradient reached the scores of layer {layer}"))
        })?;
        Ok(grad.get(0)?.get(head)?.to_dtype(DType::F32)?.detach())
    }

    /// Attributes every `(token names, example)` pair and appends it to `store`.
    ///
    /// Returns the number of records written.
    pub fn collect<M, I>(&self, model: &M, examples: I, store: &mut AttributionStore) -> Result<usize>
    where
        M: AttributableModel,
        I: IntoIterator<Item = (Vec<String>, Tensor)>,
    {
        let mut written = 0;
        for (metadata, example) in examples {
            let attrs = self.attribute(model, &example)?;
            let index = store.append(&example, &metadata, &attrs)?;
            log::info!("attention attribution: record {} ({:?})", index + 1, attrs.dims());
            written += 1;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attention::{AttentionConfig, AttributableMultiHeadAttention};
    use candle_core::Device;
    use model::{TransformerConfig, TransformerStack};

    fn stack() -> Result<TransformerStack<AttributableMultiHeadAttention>> {
        let mut config = TransformerConfig::new(8, 2, 16, 2);
        config.dropout_p = 0.0;
        let attention = AttentionConfig::new(8, 2);
        Ok(TransformerStack::new(
            &config,
            |_| {
                AttributableMultiHeadAttention::new(&attention, &Device::Cpu, DType::F32)
                    .map_err(|e| candle_core::Error::Msg(e.to_string()))
            },
            &Device::Cpu,
            DType::F32,
        )?)
    }

    #[test]
    fn attributions_cover_every_layer_and_head() -> Result<()> {
        let model = stack()?;
        let example = Tensor::randn(0f32, 1.0, (4, 8), &Device::Cpu)?;
        let attrs = IntegratedGradients::new(3)?.attribute(&model, &example)?;
        assert_eq!(attrs.dims(), &[2, 2, 4, 4]);
        let finite = attrs.flatten_all()?.to_vec1::<f32>()?;
        assert!(finite.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn attribution_is_the_sum_over_steps() -> Result<()> {
        let model = stack()?;
        let example = Tensor::randn(0f32, 1.0, (3, 8), &Device::Cpu)?;
        let ig = IntegratedGradients::new(2)?;
        let attrs = ig.attribute(&model, &example)?;

        let input = example.unsqueeze(0)?;
        let ones = vec![HeadWeights::ones(2); 2];
        let mut expected: Option<Tensor> = None;
        for alpha in [0.0, 1.0] {
            let mut weights = ones.clone();
            weights[1] = weights[1].with_head(0, alpha).map_err(|e| AttributionError::Config(e.to_string()))?;
            let grad = ig.head_gradient(&model, &input, &weights, 1, 0)?;
            expected = Some(match expected {
                Some(acc) => (acc + grad)?,
                None => grad,
            });
        }
        let expected = expected.ok_or(AttributionError::EmptyStore)?;
        let diff = attrs
            .get(1)?
            .get(0)?
            .sub(&expected)?
            .abs()?
            .max_all()?
            .to_vec0::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }

    #[test]
    fn zero_steps_are_rejected() {
        assert!(IntegratedGradients::new(0).is_err());
        let config = AttributionConfig {
            integration_steps: 0,
            tau: 0.4,
        };
        assert!(IntegratedGradients::from_config(&config).is_err());
    }
}
