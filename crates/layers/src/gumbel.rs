//! Gumbel-softmax relaxation of categorical sampling.
//!
//! Noise `g = -ln(-ln(u + eps) + eps)` with `u ~ U[0, 1)` is added to the
//! logits, which are then divided by the temperature and normalised with a
//! softmax along `axis`. The hard output is the one-hot argmax of the soft
//! sample with straight-through gradients: `hard - soft.detach() + soft`.

use candle_core::{DType, Error, Result, Tensor};

use crate::checks;

const GUMBEL_EPS: f64 = 1e-20;

/// Soft sample and its straight-through one-hot counterpart, both shaped like the logits.
#[derive(Debug, Clone)]
pub struct GumbelSample {
    pub soft: Tensor,
    pub hard: Tensor,
}

#[derive(Debug, Clone)]
pub struct GumbelSoftmax {
    axis: isize,
    temperature: f64,
}

impl Default for GumbelSoftmax {
    fn default() -> Self {
        Self {
            axis: -1,
            temperature: 1.0,
        }
    }
}

impl GumbelSoftmax {
    /// `axis` may be negative to count from the last dimension.
    pub fn new(axis: isize) -> Self {
        Self {
            axis,
            ..Self::default()
        }
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Sets the temperature used when `forward` receives none; annealing
    /// schedules call this between steps.
    pub fn set_temperature(&mut self, temperature: f64) -> Result<()> {
        self.temperature = validate_temperature(temperature)?;
        Ok(())
    }

    fn resolve_axis(&self, rank: usize) -> Result<usize> {
        let axis = if self.axis < 0 {
            rank as isize + self.axis
        } else {
            self.axis
        };
        if axis < 0 || axis as usize >= rank {
            return Err(Error::Msg(format!(
                "gumbel softmax: axis {} out of range for rank {rank}",
                self.axis
            )));
        }
        Ok(axis as usize)
    }

    pub fn forward(&self, logits: &Tensor, temperature: Option<f64>) -> Result<GumbelSample> {
        checks::expect_min_rank("gumbel.logits", logits, 1)?;
        checks::expect_dtype_in("gumbel.logits", logits, checks::FLOAT_DTYPES)?;
        let temperature = match temperature {
            Some(t) => validate_temperature(t)?,
            None => self.temperature,
        };
        let axis = self.resolve_axis(logits.rank())?;
        let dtype = logits.dtype();

        let uniform = Tensor::rand(0f32, 1.0, logits.dims(), logits.device())?;
        let gumbel = uniform
            .affine(1.0, GUMBEL_EPS)?
            .log()?
            .neg()?
            .affine(1.0, GUMBEL_EPS)?
            .log()?
            .neg()?;
        let perturbed = logits
            .to_dtype(DType::F32)?
            .add(&gumbel)?
            .affine(1.0 / temperature, 0.0)?;
        let soft = candle_nn::ops::softmax(&perturbed, axis)?;

        let classes = soft.dim(axis)?;
        let mut index_shape = vec![1usize; soft.rank()];
        index_shape[axis] = classes;
        let positions = Tensor::arange(0u32, classes as u32, soft.device())?.reshape(index_shape)?;
        let one_hot = positions
            .broadcast_eq(&soft.argmax_keepdim(axis)?)?
            .to_dtype(DType::F32)?;
        let hard = one_hot.sub(&soft.detach())?.add(&soft)?;

        Ok(GumbelSample {
            soft: soft.to_dtype(dtype)?,
            hard: hard.to_dtype(dtype)?,
        })
    }
}

fn validate_temperature(temperature: f64) -> Result<f64> {
    if temperature.is_finite() && temperature > 0.0 {
        Ok(temperature)
    } else {
        Err(Error::Msg(format!(
            "gumbel softmax: temperature must be positive, got {temperature}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    #[test]
    fn soft_rows_sum_to_one_and_hard_rows_are_one_hot() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::randn(0f32, 1.0, (4, 5), &device)?;
        let sample = GumbelSoftmax::default().forward(&logits, Some(0.5))?;
        assert_eq!(sample.soft.dims(), &[4, 5]);

        for row in sample.soft.to_vec2::<f32>()? {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        let soft = sample.soft.to_vec2::<f32>()?;
        for (r, row) in sample.hard.to_vec2::<f32>()?.into_iter().enumerate() {
            let hot = row.iter().filter(|v| (**v - 1.0).abs() < 1e-5).count();
            let cold = row.iter().filter(|v| v.abs() < 1e-5).count();
            assert_eq!((hot, cold), (1, 4));
            let picked = row.iter().position(|v| (*v - 1.0).abs() < 1e-5);
            let best = soft[r]
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i);
            assert_eq!(picked, best);
        }
        Ok(())
    }

    #[test]
    fn dominant_logit_always_wins() -> Result<()> {
        let device = Device::Cpu;
        // Gumbel noise lies within roughly [-4, 46], so a gap of 100 decides the argmax.
        let logits = Tensor::new(&[[0f32, 100.0, 0.0], [0.0, 0.0, 100.0]], &device)?;
        let layer = GumbelSoftmax::default();
        for _ in 0..5 {
            let hard = layer.forward(&logits, None)?.hard.round()?.to_vec2::<f32>()?;
            assert_eq!(hard, vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]]);
        }
        Ok(())
    }

    #[test]
    fn normalises_along_the_configured_axis() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::randn(0f32, 1.0, (3, 2), &device)?;
        let sample = GumbelSoftmax::new(0).forward(&logits, None)?;
        let sums = sample.soft.sum(0)?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        let hot = sample.hard.sum(0)?.to_vec1::<f32>()?;
        assert!(hot.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn straight_through_gradient_reaches_logits() -> Result<()> {
        let device = Device::Cpu;
        let logits = Var::from_tensor(&Tensor::randn(0f32, 1.0, (2, 3), &device)?)?;
        let weights = Tensor::new(&[[1f32, 2.0, 3.0], [3.0, 1.0, 2.0]], &device)?;
        let sample = GumbelSoftmax::default().forward(logits.as_tensor(), None)?;
        let grads = sample.hard.mul(&weights)?.sum_all()?.backward()?;
        let grad = grads
            .get(logits.as_tensor())
            .ok_or_else(|| Error::Msg("no gradient for logits".into()))?;
        assert_eq!(grad.dims(), &[2, 3]);
        assert!(grad.abs()?.sum_all()?.to_vec0::<f32>()? > 0.0);
        Ok(())
    }

    #[test]
    fn invalid_temperature_and_axis_are_rejected() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::zeros((2, 3), DType::F32, &device)?;
        let mut layer = GumbelSoftmax::default();
        assert!(layer.set_temperature(0.0).is_err());
        assert!(layer.forward(&logits, Some(-1.0)).is_err());
        layer.set_temperature(0.25)?;
        assert_eq!(layer.temperature(), 0.25);
        assert!(GumbelSoftmax::new(2).forward(&logits, None).is_err());
        Ok(())
    }
}
