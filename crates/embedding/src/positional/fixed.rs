//! Learned absolute positions for fixed-length sequences.

use candle_core::{DType, Device, Result, Tensor, Var};
use layers::{checks, init::ParamInit};

/// Adds a learned `(length, embed_dim)` table to `(batch, length, embed_dim)` inputs.
#[derive(Debug, Clone)]
pub struct FixedPositionEmbedding {
    length: usize,
    embed_dim: usize,
    positions: Var,
}

impl FixedPositionEmbedding {
    pub fn new(length: usize, embed_dim: usize, device: &Device, dtype: DType) -> Result<Self> {
        let init = ParamInit::Uniform {
            low: -0.05,
            high: 0.05,
        };
        let shape = (length, embed_dim);
        Ok(Self {
            length,
            embed_dim,
            positions: init.var(shape, shape, device, dtype)?,
        })
    }

    pub fn positions(&self) -> &Tensor {
        self.positions.as_tensor()
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![(format!("{scope}.positions"), self.positions.clone())]
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_rank("fixed_position.input", hidden, 3)?;
        let (_, length, embed_dim) = hidden.dims3()?;
        if length != self.length || embed_dim != self.embed_dim {
            candle_core::bail!(
                "fixed position embedding expects (batch, {}, {}), got {:?}",
                self.length,
                self.embed_dim,
                hidden.dims()
            );
        }
        let positions = self.positions.as_tensor().to_dtype(hidden.dtype())?;
        hidden.broadcast_add(&positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_the_same_table_to_every_row() -> Result<()> {
        let device = Device::Cpu;
        let layer = FixedPositionEmbedding::new(3, 2, &device, DType::F32)?;
        let zeros = Tensor::zeros((2, 3, 2), DType::F32, &device)?;
        let output = layer.forward(&zeros)?.to_vec3::<f32>()?;
        let table = layer.positions().to_vec2::<f32>()?;
        assert_eq!(output[0], table);
        assert_eq!(output[1], table);
        Ok(())
    }

    #[test]
    fn rejects_other_lengths() -> Result<()> {
        let device = Device::Cpu;
        let layer = FixedPositionEmbedding::new(3, 2, &device, DType::F32)?;
        let input = Tensor::zeros((1, 4, 2), DType::F32, &device)?;
        assert!(layer.forward(&input).is_err());
        Ok(())
    }
}
