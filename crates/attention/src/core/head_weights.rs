//! Per-head scaling factors ("alpha") applied to post-softmax attention scores.
//!
//! [`HeadWeights`] is an immutable value: every update returns a new vector, and
//! the weights are handed to each attention call explicitly. Attribution sweeps
//! therefore never mutate shared layer state.

use candle_core::{DType, Device, Result as CandleResult, Tensor};

use super::AttentionError;

#[derive(Debug, Clone, PartialEq)]
pub struct HeadWeights {
    values: Vec<f32>,
}

impl HeadWeights {
    /// Unit weights for `num_heads` heads; attention behaves as standard MHA.
    pub fn ones(num_heads: usize) -> Self {
        Self {
            values: vec![1.0; num_heads],
        }
    }

    pub fn from_vec(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn num_heads(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// All weights back to 1.0.
    pub fn reset(&self) -> Self {
        Self::ones(self.values.len())
    }

    /// Copy with head `head` set to `alpha`.
    pub fn with_head(&self, head: usize, alpha: f32) -> Result<Self, AttentionError> {
        self.with_heads(&[head], &[alpha])
    }

    /// Copy with every `heads[i]` set to `alphas[i]`.
    pub fn with_heads(&self, heads: &[usize], alphas: &[f32]) -> Result<Self, AttentionError> {
        if heads.len() != alphas.len() {
            return Err(AttentionError::config(format!(
                "{} head indices but {} weights",
                heads.len(),
                alphas.len()
            )));
        }
        let mut values = self.values.clone();
        for (&head, &alpha) in heads.iter().zip(alphas) {
            let slot = values.get_mut(head).ok_or_else(|| {
                AttentionError::config(format!(
                    "head {head} out of range for {} heads",
                    self.values.len()
                ))
            })?;
            *slot = alpha;
        }
        Ok(Self { values })
    }

    /// `(1, heads, 1, 1)` tensor ready to broadcast over `(batch, heads, q, k)` scores.
    pub fn to_tensor(&self, device: &Device, dtype: DType) -> CandleResult<Tensor> {
        Tensor::from_vec(self.values.clone(), (1, self.values.len(), 1, 1), device)?.to_dtype(dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_return_new_vectors() -> Result<(), AttentionError> {
        let base = HeadWeights::ones(4);
        let updated = base.with_head(2, 0.25)?;
        assert_eq!(base.as_slice(), &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(updated.as_slice(), &[1.0, 1.0, 0.25, 1.0]);

        let scattered = updated.with_heads(&[0, 3], &[0.0, 0.5])?;
        assert_eq!(scattered.as_slice(), &[0.0, 1.0, 0.25, 0.5]);
        assert_eq!(scattered.reset(), base);
        Ok(())
    }

    #[test]
    fn invalid_updates_are_rejected() {
        let base = HeadWeights::ones(2);
        assert!(base.with_head(2, 0.5).is_err());
        assert!(base.with_heads(&[0, 1], &[0.5]).is_err());
    }
}
