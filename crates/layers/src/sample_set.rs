//! Learned generator of random latent sets.
//!
//! [`SampleSet`] learns a per-slot Gaussian (`mu`, `sigma`) over
//! `max_set_size` slots, samples every slot, then keeps a uniformly random
//! subset of `n` slots per batch row. `sigma` is squared before use so the
//! effective standard deviation stays non-negative.

use candle_core::{DType, Device, Error, Result, Tensor, Var, D};

use crate::{checks, init::ParamInit};

#[derive(Debug, Clone)]
pub struct SampleSet {
    max_set_size: usize,
    embed_dim: usize,
    mu: Var,
    sigma: Var,
}

impl SampleSet {
    pub fn new(max_set_size: usize, embed_dim: usize, device: &Device, dtype: DType) -> Result<Self> {
        if max_set_size == 0 || embed_dim == 0 {
            return Err(Error::Msg(
                "sample set: max_set_size and embed_dim must be positive".into(),
            ));
        }
        let init = ParamInit::Normal {
            mean: 0.0,
            std: 0.05,
        };
        let shape = (max_set_size, embed_dim);
        Ok(Self {
            max_set_size,
            embed_dim,
            mu: init.var(shape, shape, device, dtype)?,
            sigma: init.var(shape, shape, device, dtype)?,
        })
    }

    pub fn max_set_size(&self) -> usize {
        self.max_set_size
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![
            (format!("{scope}.mu"), self.mu.clone()),
            (format!("{scope}.sigma"), self.sigma.clone()),
        ]
    }

    /// Draws `(batch, n, embed_dim)` latent sets where `n = sizes[0]`.
    ///
    /// Every entry of `sizes` must be equal.
    pub fn forward(&self, sizes: &Tensor) -> Result<Tensor> {
        checks::expect_rank("sample_set.sizes", sizes, 1)?;
        let sizes = sizes.to_dtype(DType::U32)?.to_vec1::<u32>()?;
        let n = match sizes.first() {
            Some(&n) => n as usize,
            None => return Err(Error::Msg("sample set: empty batch".into())),
        };
        if sizes.iter().any(|&s| s as usize != n) {
            return Err(Error::Msg(format!(
                "sample set: all target sizes in a batch must match, got {sizes:?}"
            )));
        }
        if n > self.max_set_size {
            return Err(Error::Msg(format!(
                "sample set: requested {n} elements but max_set_size is {}",
                self.max_set_size
            )));
        }
        let batch = sizes.len();
        let device = self.mu.device();
        let dtype = self.mu.dtype();

        let noise = Tensor::randn(0f32, 1.0, (batch, self.max_set_size, self.embed_dim), device)?
            .to_dtype(dtype)?;
        let stddev = self.sigma.as_tensor().sqr()?;
        let initial = noise
            .broadcast_mul(&stddev)?
            .broadcast_add(self.mu.as_tensor())?;

        let order = Tensor::rand(0f32, 1.0, (batch, self.max_set_size), device)?
            .arg_sort_last_dim(false)?
            .narrow(D::Minus1, 0, n)?
            .contiguous()?;
        let index = order
            .unsqueeze(D::Minus1)?
            .broadcast_as((batch, n, self.embed_dim))?
            .contiguous()?;
        initial.gather(&index, 1)
    }
}
