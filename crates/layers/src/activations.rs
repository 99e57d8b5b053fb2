//! Activation catalogue for the feed-forward networks.
//!
//! * **GELU** uses the erf form `0.5 * x * (1 + erf(x / sqrt(2)))`.
//! * **SiLU** computes `x * sigmoid(x)`.
//! * **ReLU** zeroes negative values.
//!
//! Activations are evaluated in at least `f32` and cast back to the input
//! dtype.

use std::{fmt, str::FromStr};

use candle_core::{Error, Result, Tensor};
use serde::Deserialize;

use crate::dtypes::PrecisionPolicy;

/// Identifies a non-linearity by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationKind {
    /// Identity function, useful for debugging or wiring custom stacks.
    Identity,
    /// GELU, the default for transformer feed-forward networks.
    #[default]
    Gelu,
    /// Standard SiLU (a.k.a. swish) activation.
    Silu,
    Relu,
}

impl ActivationKind {
    /// Applies the activation to `input`.
    pub fn apply(self, input: &Tensor) -> Result<Tensor> {
        let policy = PrecisionPolicy::from_parameter_dtype(input.dtype());
        let compute = policy.cast_for_matmul(input)?;
        let activated = match self {
            ActivationKind::Identity => return Ok(input.clone()),
            ActivationKind::Gelu => compute.gelu_erf()?,
            ActivationKind::Silu => compute.silu()?,
            ActivationKind::Relu => compute.relu()?,
        };
        policy.cast_to_storage(&activated)
    }
}

impl FromStr for ActivationKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "identity" | "linear" => Ok(Self::Identity),
            "gelu" => Ok(Self::Gelu),
            "silu" | "swish" => Ok(Self::Silu),
            "relu" => Ok(Self::Relu),
            other => Err(Error::Msg(format!("unknown activation '{other}'"))),
        }
    }
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationKind::Identity => "identity",
            ActivationKind::Gelu => "gelu",
            ActivationKind::Silu => "silu",
            ActivationKind::Relu => "relu",
        };
        f.write_str(name)
    }
}
