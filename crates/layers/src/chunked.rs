//! Chunked (time-distributed) evaluation of a sub-model.
//!
//! [`ChunkedEmbeddingLayer`] flattens every axis up to and including `axis`
//! into one leading dimension, runs the wrapped module over slices of at most
//! `chunk_size` rows, and reshapes the concatenated result back. Chunks are
//! evaluated strictly in order so peak memory is bounded by one chunk.

use candle_core::{Error, ModuleT, Result, Tensor};
use serde::Deserialize;

fn default_axis() -> isize {
    -2
}

/// Configuration for [`ChunkedEmbeddingLayer`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChunkedEmbeddingConfig {
    /// Last axis folded into the batch; negative values count from the end.
    #[serde(default = "default_axis")]
    pub axis: isize,
    /// Maximum rows per call to the wrapped module; `None` evaluates everything at once.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Detach the output from the autograd graph.
    #[serde(default)]
    pub stop_gradient: bool,
}

impl Default for ChunkedEmbeddingConfig {
    fn default() -> Self {
        Self {
            axis: default_axis(),
            chunk_size: None,
            stop_gradient: false,
        }
    }
}

/// Wraps a module and evaluates it over a flattened, chunked batch.
#[derive(Debug, Clone)]
pub struct ChunkedEmbeddingLayer<M> {
    inner: M,
    config: ChunkedEmbeddingConfig,
}

impl<M: ModuleT> ChunkedEmbeddingLayer<M> {
    pub fn new(inner: M, config: ChunkedEmbeddingConfig) -> Result<Self> {
        if config.chunk_size == Some(0) {
            return Err(Error::Msg("chunked embedding: chunk_size must be positive".into()));
        }
        Ok(Self { inner, config })
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    pub fn config(&self) -> &ChunkedEmbeddingConfig {
        &self.config
    }

    fn resolve_axis(&self, rank: usize) -> Result<usize> {
        let axis = self.config.axis;
        let resolved = if axis < 0 { rank as isize + axis } else { axis };
        if resolved < 0 || resolved as usize >= rank {
            return Err(Error::Msg(format!(
                "chunked embedding: axis {axis} out of range for rank {rank}"
            )));
        }
        Ok(resolved as usize)
    }

    fn evaluate(&self, rows: &Tensor, train: bool) -> Result<Tensor> {
        let expected = rows.dim(0)?;
        let output = self.inner.forward_t(rows, train)?;
        let produced = output.dims().first().copied().unwrap_or(0);
        if produced != expected {
            return Err(Error::Msg(format!(
                "chunked embedding: sub-layer returned {produced} rows for {expected} inputs"
            )));
        }
        Ok(output)
    }
}

impl<M: ModuleT> ModuleT for ChunkedEmbeddingLayer<M> {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let dims = xs.dims().to_vec();
        let axis = self.resolve_axis(dims.len())?;
        let leading = &dims[..=axis];
        let rows: usize = leading.iter().product();

        let mut flat_dims = vec![rows];
        flat_dims.extend_from_slice(&dims[axis + 1..]);
        let flat = xs.reshape(flat_dims)?;

        let output = match self.config.chunk_size {
            Some(chunk) if rows > chunk => {
                let mut pieces = Vec::with_capacity(rows.div_ceil(chunk));
                let mut start = 0;
                while start < rows {
                    let len = chunk.min(rows - start);
                    pieces.push(self.evaluate(&flat.narrow(0, start, len)?, train)?);
                    start += len;
                }
                log::debug!("chunked embedding evaluated {rows} rows in {} chunks", pieces.len());
                Tensor::cat(&pieces, 0)?
            }
            _ => self.evaluate(&flat, train)?,
        };

        let mut out_dims = leading.to_vec();
        out_dims.extend_from_slice(&output.dims()[1..]);
        let output = output.reshape(out_dims)?;
        if self.config.stop_gradient {
            Ok(output.detach())
        } else {
            Ok(output)
        }
    }
}
