//! Numeric coercion helpers used throughout the workspace.
//!
//! Token inputs arrive as arbitrary integer tensors, while parameters may be
//! stored in reduced precision. Matmuls run in at least `f32` and layer-norm
//! statistics always in `f32`; [`PrecisionPolicy`] derives both from the
//! parameter dtype.

use candle_core::shape::Dim;
use candle_core::{DType, Result, Tensor};

/// Machine epsilon of each dtype a policy tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecisionEpsilons {
    pub storage: f64,
    pub compute: f64,
    pub reduction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Half-precision parameters compute in `f32`; everything reduces in `f32`.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self {
            storage,
            compute,
            reduction: DType::F32,
        }
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn reduction(&self) -> DType {
        self.reduction
    }

    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.compute)
    }

    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.reduction)
    }

    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast(tensor, self.storage)
    }

    /// Sums over `dim` (kept as size 1) in the reduction dtype. The result stays
    /// in that dtype; callers cast to storage once the statistic is consumed.
    pub fn reduce_sum<D: Dim>(&self, tensor: &Tensor, dim: D) -> Result<Tensor> {
        self.cast_for_reduction(tensor)?.sum_keepdim(dim)
    }

    pub fn epsilons(&self) -> PrecisionEpsilons {
        PrecisionEpsilons {
            storage: machine_epsilon(self.storage),
            compute: machine_epsilon(self.compute),
            reduction: machine_epsilon(self.reduction),
        }
    }
}

fn machine_epsilon(dtype: DType) -> f64 {
    match dtype {
        DType::BF16 => 7.8125e-3,
        DType::F16 => 9.765625e-4,
        DType::F32 => f32::EPSILON as f64,
        DType::F64 => f64::EPSILON,
        _ => 0.0,
    }
}

/// Casts `tensor` to `dtype`, returning a cheap clone when it already matches.
pub fn cast(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

/// Coerces any integer tensor into the `u32` index dtype used for lookups.
/// Floating inputs are rejected.
pub fn to_index_dtype(tensor: &Tensor) -> Result<Tensor> {
    match tensor.dtype() {
        DType::U32 => Ok(tensor.clone()),
        DType::U8 | DType::I64 => tensor.to_dtype(DType::U32),
        other => Err(candle_core::Error::Msg(format!(
            "expected integer token ids, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn half_precision_parameters_compute_in_f32() {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::BF16);
        assert_eq!(policy.storage(), DType::BF16);
        assert_eq!(policy.compute(), DType::F32);
        assert_eq!(policy.reduction(), DType::F32);

        let policy = PrecisionPolicy::from_parameter_dtype(DType::F64);
        assert_eq!(policy.compute(), DType::F64);
        assert_eq!(policy.reduction(), DType::F32);
    }

    #[test]
    fn storage_cast_restores_parameter_dtype() -> Result<()> {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        let x = Tensor::new(&[0.5f32, -2.0], &Device::Cpu)?.to_dtype(DType::F16)?;
        let wide = policy.cast_for_matmul(&x)?;
        assert_eq!(wide.dtype(), DType::F32);
        let back = policy.cast_to_storage(&wide)?;
        assert_eq!(back.dtype(), DType::F16);
        assert_eq!(back.to_dtype(DType::F32)?.to_vec1::<f32>()?, vec![0.5, -2.0]);
        Ok(())
    }

    #[test]
    fn reductions_run_in_f32_for_half_storage() -> Result<()> {
        let policy = PrecisionPolicy::from_parameter_dtype(DType::F16);
        // f16 cannot represent 4097; the f32 sum can.
        let x = Tensor::ones((2, 4097), DType::F16, &Device::Cpu)?;
        let summed = policy.reduce_sum(&x, 1)?;
        assert_eq!(summed.dtype(), DType::F32);
        assert_eq!(summed.dims(), &[2, 1]);
        assert_eq!(summed.flatten_all()?.to_vec1::<f32>()?, vec![4097.0, 4097.0]);
        Ok(())
    }

    #[test]
    fn epsilons_follow_each_dtype() {
        let eps = PrecisionPolicy::from_parameter_dtype(DType::BF16).epsilons();
        assert_eq!(eps.storage, 7.8125e-3);
        assert_eq!(eps.compute, f32::EPSILON as f64);
        assert_eq!(eps.reduction, f32::EPSILON as f64);
        assert!(eps.storage > eps.compute);

        let eps = PrecisionPolicy::from_parameter_dtype(DType::F64).epsilons();
        assert_eq!(eps.compute, f64::EPSILON);
    }

    #[test]
    fn index_coercion_accepts_integers_only() -> Result<()> {
        let device = Device::Cpu;
        let ids = Tensor::new(&[3i64, 0, 7], &device)?;
        let coerced = to_index_dtype(&ids)?;
        assert_eq!(coerced.dtype(), DType::U32);
        assert_eq!(coerced.to_vec1::<u32>()?, vec![3, 0, 7]);

        let floats = Tensor::new(&[1.0f32], &device)?;
        assert!(to_index_dtype(&floats).is_err());
        Ok(())
    }
}
