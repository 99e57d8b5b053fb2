//! Learned masking of set elements.

use candle_core::{DType, Device, Error, Result, Tensor, Var};
use layers::{checks, init::ParamInit};

use crate::{floor_count, validate_ratio};

/// Replaces the trailing `floor(set_size * mask_ratio)` elements of a set with
/// learned mask embeddings.
///
/// Sets are unordered, so masking the tail is equivalent to masking a random
/// subset once the caller has shuffled the elements.
#[derive(Debug, Clone)]
pub struct SetMask {
    embed_dim: usize,
    set_size: usize,
    num_mask_tokens: usize,
    mask_tokens: Option<Var>,
}

impl SetMask {
    pub fn new(
        embed_dim: usize,
        set_size: usize,
        mask_ratio: f64,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        validate_ratio("set mask", mask_ratio)?;
        let num_mask_tokens = floor_count(mask_ratio, set_size);
        let mask_tokens = if num_mask_tokens > 0 {
            Some(ParamInit::XavierUniform.var(
                (num_mask_tokens, embed_dim),
                (num_mask_tokens, embed_dim),
                device,
                dtype,
            )?)
        } else {
            None
        };
        log::debug!("set mask replaces {num_mask_tokens} of {set_size} elements");
        Ok(Self {
            embed_dim,
            set_size,
            num_mask_tokens,
            mask_tokens,
        })
    }

    pub fn num_mask_tokens(&self) -> usize {
        self.num_mask_tokens
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.mask_tokens
            .iter()
            .map(|var| (format!("{scope}.mask_tokens"), var.clone()))
            .collect()
    }

    fn validate(&self, inputs: &Tensor) -> Result<usize> {
        checks::expect_rank("set_mask.input", inputs, 3)?;
        let (batch, set_size, embed_dim) = inputs.dims3()?;
        if set_size != self.set_size || embed_dim != self.embed_dim {
            return Err(Error::Msg(format!(
                "set mask: expected (batch, {}, {}), got {:?}",
                self.set_size,
                self.embed_dim,
                inputs.dims()
            )));
        }
        Ok(batch)
    }

    /// Keeps the leading elements and appends the learned mask embeddings.
    pub fn forward(&self, inputs: &Tensor) -> Result<Tensor> {
        let batch = self.validate(inputs)?;
        let Some(tokens) = &self.mask_tokens else {
            return Ok(inputs.clone());
        };
        let kept = inputs.narrow(1, 0, self.set_size - self.num_mask_tokens)?;
        let mask = tokens
            .as_tensor()
            .to_dtype(inputs.dtype())?
            .unsqueeze(0)?
            .broadcast_as((batch, self.num_mask_tokens, self.embed_dim))?
            .contiguous()?;
        Tensor::cat(&[&kept, &mask], 1)
    }

    /// The original elements at the positions [`forward`](Self::forward) replaces.
    pub fn masked_embeddings(&self, inputs: &Tensor) -> Result<Tensor> {
        self.validate(inputs)?;
        inputs.narrow(1, self.set_size - self.num_mask_tokens, self.num_mask_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(ratio: f64) -> Result<SetMask> {
        SetMask::new(4, 10, ratio, &Device::Cpu, DType::F32)
    }

    #[test]
    fn replaces_trailing_elements() -> Result<()> {
        let layer = layer(0.3)?;
        assert_eq!(layer.num_mask_tokens(), 3);
        let inputs = Tensor::randn(0f32, 1.0, (2, 10, 4), &Device::Cpu)?;
        let output = layer.forward(&inputs)?;
        assert_eq!(output.dims(), &[2, 10, 4]);

        let head = output.narrow(1, 0, 7)?.sub(&inputs.narrow(1, 0, 7)?)?;
        assert_eq!(head.abs()?.max_all()?.to_vec0::<f32>()?, 0.0);

        let tail = output.narrow(1, 7, 3)?.to_vec3::<f32>()?;
        assert_eq!(tail[0], tail[1], "mask embeddings are shared across the batch");
        Ok(())
    }

    #[test]
    fn masked_embeddings_are_the_trailing_inputs() -> Result<()> {
        let layer = layer(0.25)?;
        let inputs = Tensor::randn(0f32, 1.0, (3, 10, 4), &Device::Cpu)?;
        let targets = layer.masked_embeddings(&inputs)?;
        assert_eq!(targets.dims(), &[3, 2, 4]);
        assert_eq!(
            targets.to_vec3::<f32>()?,
            inputs.narrow(1, 8, 2)?.to_vec3::<f32>()?
        );
        Ok(())
    }

    #[test]
    fn zero_ratio_passes_through() -> Result<()> {
        let layer = layer(0.05)?;
        assert_eq!(layer.num_mask_tokens(), 0);
        let inputs = Tensor::randn(0f32, 1.0, (1, 10, 4), &Device::Cpu)?;
        assert_eq!(layer.forward(&inputs)?.to_vec3::<f32>()?, inputs.to_vec3::<f32>()?);
        assert_eq!(layer.masked_embeddings(&inputs)?.dims(), &[1, 0, 4]);
        assert!(layer.named_parameters("mask").is_empty());
        Ok(())
    }

    #[test]
    fn wrong_set_size_is_rejected() -> Result<()> {
        let inputs = Tensor::zeros((1, 9, 4), DType::F32, &Device::Cpu)?;
        assert!(layer(0.3)?.forward(&inputs).is_err());
        Ok(())
    }
}
