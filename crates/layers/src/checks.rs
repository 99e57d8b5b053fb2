//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. Every check takes a label naming the
//! tensor being validated and returns `candle_core::Result<()>` so call sites can
//! propagate errors without panicking.

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Ensures a tensor has at least `rank` dimensions.
pub fn expect_min_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() >= rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected at least {rank} dims, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Validates the size of the trailing feature axis.
pub fn expect_last_dim(label: &str, tensor: &Tensor, size: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(&actual) if actual == size => Ok(()),
        _ => Err(Error::Msg(format!(
            "{label}: expected trailing dim {size}, got shape {:?}",
            tensor.dims()
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.contains(&dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {allowed:?}, got {dtype:?}"
        )))
    }
}

/// Token and index tensors must carry an integer dtype.
pub fn expect_integer_dtype(label: &str, tensor: &Tensor) -> Result<()> {
    expect_dtype_in(label, tensor, &[DType::U8, DType::U32, DType::I64])
}

/// Floating point dtypes accepted for parameters and activations.
pub const FLOAT_DTYPES: &[DType] = &[DType::F16, DType::BF16, DType::F32, DType::F64];
