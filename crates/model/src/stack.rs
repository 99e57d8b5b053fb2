//! A sequence of transformer blocks sharing one configuration.

use std::fmt;

use attention::{AttentionLayer, AttributableAttention, HeadWeights, ScoreTracking};
use candle_core::{bail, DType, Device, Result, Tensor, Var};
use layers::ops::MaskedTensor;

use crate::{block::TransformerBlock, config::TransformerConfig};

pub struct TransformerStack<A> {
    blocks: Vec<TransformerBlock<A>>,
}

impl<A: AttentionLayer> fmt::Debug for TransformerStack<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.blocks).finish()
    }
}

impl<A: AttentionLayer> TransformerStack<A> {
    /// Builds `config.stack` blocks, asking `make_attention` for each block's
    /// attention layer.
    pub fn new<F>(config: &TransformerConfig, mut make_attention: F, device: &Device, dtype: DType) -> Result<Self>
    where
        F: FnMut(usize) -> Result<A>,
    {
        config.validate()?;
        let blocks = (0..config.stack)
            .map(|index| TransformerBlock::new(config, make_attention(index)?, device, dtype))
            .collect::<Result<Vec<_>>>()?;
        log::debug!(
            "transformer stack depth={} embed_dim={} heads={} prenorm={}",
            config.stack,
            config.embed_dim,
            config.num_heads,
            config.prenorm
        );
        Ok(Self { blocks })
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_heads(&self) -> usize {
        self.blocks
            .first()
            .map_or(0, |block| block.attention().num_heads())
    }

    pub fn blocks(&self) -> &[TransformerBlock<A>] {
        &self.blocks
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        self.blocks
            .iter()
            .enumerate()
            .flat_map(|(index, block)| block.named_parameters(&format!("{scope}.blocks.{index}")))
            .collect()
    }

    /// Applies every block in order, collecting one score tensor per block.
    pub fn forward_t(&self, input: &MaskedTensor, train: bool) -> Result<(MaskedTensor, Vec<Tensor>)> {
        let mut hidden = input.clone();
        let mut scores = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let (next, block_scores) = block.forward_t(&hidden, train)?;
            hidden = next;
            scores.push(block_scores);
        }
        Ok((hidden, scores))
    }
}

impl<A: AttributableAttention> TransformerStack<A> {
    /// Inference pass with one [`HeadWeights`] per block.
    ///
    /// The scores of block `probe`, if given, are returned as a gradient leaf.
    pub fn forward_weighted(
        &self,
        input: &MaskedTensor,
        weights: &[HeadWeights],
        probe: Option<usize>,
    ) -> Result<(MaskedTensor, Vec<Tensor>)> {
        if weights.len() != self.blocks.len() {
            bail!(
                "{} head weight vectors supplied for a stack of depth {}",
                weights.len(),
                self.blocks.len()
            );
        }
        if let Some(probe) = probe.filter(|&probe| probe >= self.blocks.len()) {
            bail!("probe layer {probe} out of range for depth {}", self.blocks.len());
        }
        let mut hidden = input.clone();
        let mut scores = Vec::with_capacity(self.blocks.len());
        for (index, (block, block_weights)) in self.blocks.iter().zip(weights).enumerate() {
            let tracking = if probe == Some(index) {
                ScoreTracking::Leaf
            } else {
                ScoreTracking::Graph
            };
            let (next, block_scores) = block.forward_weighted(&hidden, block_weights, tracking)?;
            hidden = next;
            scores.push(block_scores);
        }
        Ok((hidden, scores))
    }
}
