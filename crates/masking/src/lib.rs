//! Masked-language-model corruption stages.
//!
//! Token inputs follow the encoding `0 = mask token`, `1 = pad token`. Every
//! stochastic stage owns a seedable [`StdRng`] behind a mutex so layers stay
//! `Send + Sync` and can be shared by a model.

use std::sync::{Mutex, MutexGuard};

use candle_core::{Error, Result};
use rand::{rngs::StdRng, SeedableRng};

pub mod contiguous;
pub mod invert;
pub mod set_mask;
pub mod trim;
pub mod trim_and_mask;

pub use contiguous::ContiguousMask;
pub use invert::InvertMask;
pub use set_mask::SetMask;
pub use trim::{RandomTrim, TrimWindow};
pub use trim_and_mask::TrimAndContiguousMask;

/// Token id written over masked positions.
pub const MASK_TOKEN: u32 = 0;
/// Token id written outside a trimmed window.
pub const PAD_TOKEN: u32 = 1;

const RATIO_TOLERANCE: f64 = 1e-9;

/// `ceil(ratio * len)` with a tolerance for binary rounding (e.g. `0.3 * 10`).
pub(crate) fn ceil_count(ratio: f64, len: usize) -> usize {
    let exact = ratio * len as f64;
    ((exact - RATIO_TOLERANCE).ceil().max(0.0) as usize).min(len)
}

/// `floor(ratio * len)` with the same tolerance as [`ceil_count`].
pub(crate) fn floor_count(ratio: f64, len: usize) -> usize {
    let exact = ratio * len as f64;
    ((exact + RATIO_TOLERANCE).floor().max(0.0) as usize).min(len)
}

pub(crate) fn validate_ratio(label: &str, ratio: f64) -> Result<()> {
    if (0.0..=1.0).contains(&ratio) {
        Ok(())
    } else {
        Err(Error::Msg(format!("{label}: mask ratio must lie in [0, 1], got {ratio}")))
    }
}

/// Seedable random source shared by the stochastic stages.
#[derive(Debug)]
pub(crate) struct MaskRng(Mutex<StdRng>);

impl MaskRng {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self(Mutex::new(rng))
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, StdRng>> {
        self.0
            .lock()
            .map_err(|_| Error::Msg("masking rng mutex poisoned".into()))
    }
}
