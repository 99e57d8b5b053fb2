//! SetBERT: a set transformer over DnaBERT sequence embeddings.
//!
//! A sample is a `(batch, N, tokens)` tensor of k-mer sequences. Every
//! sequence is reduced to a vector by a chunked [`DnaBertEncoder`], a learned
//! class vector is prepended to the set, and a stack of attributable attention
//! blocks mixes the elements. The class vector is the sample embedding.

use attention::{AttributableMultiHeadAttention, HeadWeights};
use candle_core::{bail, DType, Device, Module, ModuleT, Result, Tensor, Var};
use embedding::class_token::{InjectClassToken, SplitClassToken};
use layers::{
    checks,
    chunked::{ChunkedEmbeddingConfig, ChunkedEmbeddingLayer},
    init::ParamInit,
    linear::{Linear, LinearConfig},
    ops::MaskedTensor,
};
use masking::SetMask;

use crate::{
    attributable::AttributableModel, block::attention_error, config::SetBertConfig,
    dnabert::DnaBertEncoder, stack::TransformerStack,
};

/// Output of a SetBERT pass.
#[derive(Debug, Clone)]
pub struct SetBertOutput {
    /// `(batch, embed_dim)` sample embedding.
    pub class_token: Tensor,
    /// `(batch, N, embed_dim)` contextualised set elements.
    pub elements: MaskedTensor,
    /// One `(batch, heads, N + 1, N + 1)` tensor per block.
    pub scores: Vec<Tensor>,
}

#[derive(Debug)]
pub struct SetBertModel {
    config: SetBertConfig,
    encoder: ChunkedEmbeddingLayer<DnaBertEncoder>,
    projection: Option<Linear>,
    class_token: InjectClassToken,
    stack: TransformerStack<AttributableMultiHeadAttention>,
    split: SplitClassToken,
}

impl SetBertModel {
    pub fn new(config: SetBertConfig, encoder: DnaBertEncoder, device: &Device, dtype: DType) -> Result<Self> {
        config.validate()?;
        let embed_dim = config.transformer.embed_dim;
        let projection = if encoder.embed_dim() != embed_dim {
            Some(Linear::with_init(
                LinearConfig::new(encoder.embed_dim(), embed_dim),
                &ParamInit::XavierUniform,
                device,
                dtype,
            )?)
        } else {
            None
        };
        let encoder = ChunkedEmbeddingLayer::new(
            encoder,
            ChunkedEmbeddingConfig {
                axis: -2,
                chunk_size: config.chunk_size,
                stop_gradient: false,
            },
        )?;
        let attention = config.transformer.attention();
        let stack = TransformerStack::new(
            &config.transformer,
            |_| {
                AttributableMultiHeadAttention::new(&attention, device, dtype)
                    .map_err(attention_error)
            },
            device,
            dtype,
        )?;
        log::info!(
            "setbert max_set_len={} embed_dim={} stack={} heads={} chunk_size={:?}",
            config.max_set_len,
            embed_dim,
            config.transformer.stack,
            config.transformer.num_heads,
            config.chunk_size
        );
        Ok(Self {
            class_token: InjectClassToken::new(embed_dim, device, dtype)?,
            config,
            encoder,
            projection,
            stack,
            split: SplitClassToken,
        })
    }

    pub fn config(&self) -> &SetBertConfig {
        &self.config
    }

    pub fn encoder(&self) -> &DnaBertEncoder {
        self.encoder.inner()
    }

    pub fn stack(&self) -> &TransformerStack<AttributableMultiHeadAttention> {
        &self.stack
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self
            .encoder
            .inner()
            .base()
            .named_parameters(&format!("{scope}.dnabert"));
        if let Some(projection) = &self.projection {
            params.extend(projection.named_parameters(&format!("{scope}.projection")));
        }
        params.extend(self.class_token.named_parameters(&format!("{scope}.inject")));
        params.extend(self.stack.named_parameters(&format!("{scope}.transformer")));
        params
    }

    /// Encodes `(batch, N, tokens)` k-mer sequences into `(batch, N, embed_dim)`.
    pub fn embed_sequences(&self, sequences: &Tensor, train: bool) -> Result<Tensor> {
        checks::expect_rank("setbert.sequences", sequences, 3)?;
        let set_len = sequences.dim(1)?;
        if set_len > self.config.max_set_len {
            bail!(
                "set of {set_len} sequences exceeds max_set_len {}",
                self.config.max_set_len
            );
        }
        let embedded = self.encoder.forward_t(sequences, train)?;
        match &self.projection {
            Some(projection) => projection.forward(&embedded),
            None => Ok(embedded),
        }
    }

    /// Runs the set transformer over already-embedded elements.
    pub fn encode(&self, embeddings: &MaskedTensor, train: bool) -> Result<SetBertOutput> {
        let injected = self.class_token.forward(embeddings)?;
        let (hidden, scores) = self.stack.forward_t(&injected, train)?;
        let (class_token, elements) = self.split.forward(&hidden)?;
        Ok(SetBertOutput {
            class_token,
            elements,
            scores,
        })
    }

    pub fn forward_t(&self, sequences: &Tensor, train: bool) -> Result<SetBertOutput> {
        let embeddings = self.embed_sequences(sequences, train)?;
        self.encode(&MaskedTensor::unmasked(embeddings), train)
    }
}

/// Attribution runs over `(batch, N, tokens)` sequences and differentiates the
/// class-token output.
impl AttributableModel for SetBertModel {
    fn stack_depth(&self) -> usize {
        self.stack.depth()
    }

    fn num_heads(&self) -> usize {
        self.stack.num_heads()
    }

    fn forward_attributed(
        &self,
        input: &Tensor,
        weights: &[HeadWeights],
        probe: Option<usize>,
    ) -> Result<(Tensor, Vec<Tensor>)> {
        let embeddings = self.embed_sequences(input, false)?;
        let injected = self.class_token.forward(&MaskedTensor::unmasked(embeddings))?;
        let (hidden, scores) = self.stack.forward_weighted(&injected, weights, probe)?;
        let (class_token, _) = self.split.forward(&hidden)?;
        Ok((class_token, scores))
    }
}

/// Predictions of the masked-set pretraining task.
#[derive(Debug, Clone)]
pub struct SetBertPretrainOutput {
    /// `(batch, masked, embed_dim)` outputs at the masked slots.
    pub predicted: Tensor,
    /// The detached embeddings that were replaced, same shape as `predicted`.
    pub target: Tensor,
    pub class_token: Tensor,
}

/// Masked-set pretraining: the trailing elements of a full set are replaced by
/// learned mask vectors and the model reconstructs their embeddings.
#[derive(Debug)]
pub struct SetBertPretrainModel {
    base: SetBertModel,
    set_mask: SetMask,
}

impl SetBertPretrainModel {
    pub fn new(base: SetBertModel, device: &Device, dtype: DType) -> Result<Self> {
        let config = base.config();
        let set_mask = SetMask::new(
            config.transformer.embed_dim,
            config.max_set_len,
            config.mask_ratio,
            device,
            dtype,
        )?;
        Ok(Self { base, set_mask })
    }

    pub fn base(&self) -> &SetBertModel {
        &self.base
    }

    pub fn into_base(self) -> SetBertModel {
        self.base
    }

    pub fn num_mask_tokens(&self) -> usize {
        self.set_mask.num_mask_tokens()
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.base.named_parameters(&format!("{scope}.base"));
        params.extend(self.set_mask.named_parameters(&format!("{scope}.set_mask")));
        params
    }

    /// `sequences` must hold exactly `max_set_len` sequences per sample.
    pub fn forward_t(&self, sequences: &Tensor, train: bool) -> Result<SetBertPretrainOutput> {
        let embeddings = self.base.embed_sequences(sequences, train)?;
        let target = self.set_mask.masked_embeddings(&embeddings)?.detach();
        let masked = self.set_mask.forward(&embeddings)?;
        let output = self.base.encode(&MaskedTensor::unmasked(masked), train)?;
        let set_len = output.elements.values.dim(1)?;
        let count = self.set_mask.num_mask_tokens();
        let predicted = output.elements.values.narrow(1, set_len - count, count)?;
        Ok(SetBertPretrainOutput {
            predicted,
            target,
            class_token: output.class_token,
        })
    }
}
