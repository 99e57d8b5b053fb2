//! Reconstruction losses between predicted and target sets.

use std::{fmt, str::FromStr};

use candle_core::{bail, Error, Result, Tensor, D};
use serde::Deserialize;

/// Selects the set-reconstruction loss by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetLossKind {
    /// Symmetric nearest-neighbour squared distance.
    Chamfer,
    /// Mean squared error after sorting every feature across the set.
    #[default]
    #[serde(alias = "setloss")]
    Sorted,
}

impl SetLossKind {
    pub fn compute(self, predicted: &Tensor, target: &Tensor) -> Result<Tensor> {
        match self {
            Self::Chamfer => chamfer_distance(predicted, target),
            Self::Sorted => sorted_loss(predicted, target),
        }
    }
}

impl FromStr for SetLossKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "chamfer" => Ok(Self::Chamfer),
            "setloss" | "sorted" => Ok(Self::Sorted),
            other => Err(Error::Msg(format!("unknown set loss: {other}"))),
        }
    }
}

impl fmt::Display for SetLossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Chamfer => "chamfer",
            Self::Sorted => "setloss",
        })
    }
}

fn expect_sets(predicted: &Tensor, target: &Tensor) -> Result<(usize, usize, usize, usize)> {
    let (batch, n, dim) = predicted.dims3()?;
    let (target_batch, m, target_dim) = target.dims3()?;
    if batch != target_batch || dim != target_dim {
        bail!(
            "set loss: predicted {:?} and target {:?} disagree on batch or feature size",
            predicted.dims(),
            target.dims()
        );
    }
    Ok((batch, n, m, dim))
}

/// Chamfer distance between `(batch, N, E)` and `(batch, M, E)` sets, averaged
/// over the batch.
///
/// For each batch row: `mean_i min_j |a_i - b_j|² + mean_j min_i |a_i - b_j|²`.
pub fn chamfer_distance(predicted: &Tensor, target: &Tensor) -> Result<Tensor> {
    expect_sets(predicted, target)?;
    let predicted_sq = predicted.sqr()?.sum_keepdim(D::Minus1)?;
    let target_sq = target.sqr()?.sum_keepdim(D::Minus1)?.transpose(1, 2)?;
    let cross = predicted.matmul(&target.transpose(1, 2)?.contiguous()?)?;
    let distances = predicted_sq
        .broadcast_add(&target_sq)?
        .sub(&cross.affine(2.0, 0.0)?)?
        .relu()?;
    let forward = distances.min(2)?.mean(1)?;
    let backward = distances.min(1)?.mean(1)?;
    (forward + backward)?.mean_all()
}

/// Sorts each feature across the set axis and compares the sorted sets with a
/// mean squared error, which makes the loss invariant to element order.
pub fn sorted_loss(predicted: &Tensor, target: &Tensor) -> Result<Tensor> {
    let (_, n, m, _) = expect_sets(predicted, target)?;
    if n != m {
        bail!("sorted set loss requires equal set sizes, got {n} and {m}");
    }
    let sort = |set: &Tensor| -> Result<Tensor> {
        Ok(set.transpose(1, 2)?.contiguous()?.sort_last_dim(true)?.0)
    };
    sort(predicted)?.sub(&sort(target)?)?.sqr()?.mean_all()
}
