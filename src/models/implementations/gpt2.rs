//! GPT-2 causal language model.
//!
//! Covers the GPT-2 family of checkpoints (OpenAI GPT-2, DistilGPT-2, ruGPT-3
//! and other `GPT2LMHeadModel` exports):
//! - Learned absolute position embeddings
//! - Pre-norm transformer blocks with `Conv1D` projections (`[in, out]` weights)
//! - Output head tied to the token embeddings
//! - KV caching for autoregressive generation, with forkable contexts so one
//!   prefilled prompt can seed several independent samples

use crate::pipelines::text_generation::model::{LanguageModelContext, TextGenerationModel};
use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{embedding, layer_norm, ops::softmax_last_dim, Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;
use std::sync::Arc;

// Constants
const DEFAULT_N_POSITIONS: usize = 1024;
const DEFAULT_LAYER_NORM_EPS: f64 = 1e-5;

type LayerCache = Option<(Tensor, Tensor)>;

/// Activation used in the feed-forward block (`activation_function` in
/// `config.json`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[serde(alias = "gelu_fast", alias = "gelu_pytorch_tanh")]
    GeluNew,
    Gelu,
    Relu,
}

impl Activation {
    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Activation::GeluNew => xs.gelu(),
            Activation::Gelu => xs.gelu_erf(),
            Activation::Relu => xs.relu(),
        }
    }
}

fn default_activation() -> Activation {
    Activation::GeluNew
}

fn default_n_positions() -> usize {
    DEFAULT_N_POSITIONS
}

fn default_layer_norm_eps() -> f64 {
    DEFAULT_LAYER_NORM_EPS
}

/// Subset of the Hugging Face `GPT2Config` needed for inference.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub vocab_size: usize,
    #[serde(default = "default_n_positions")]
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default)]
    pub n_inner: Option<usize>,
    #[serde(default = "default_activation", rename = "activation_function")]
    pub activation: Activation,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_epsilon: f64,
    #[serde(default)]
    pub bos_token_id: Option<u32>,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
    #[serde(default)]
    pub pad_token_id: Option<u32>,
}

impl Config {
    fn inner_dim(&self) -> usize {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }

    /// End-of-text token. GPT-2 vocabularies put `<|endoftext|>` last, which is
    /// the fallback when the config leaves it out.
    pub fn eos_token(&self) -> u32 {
        self.eos_token_id
            .or(self.bos_token_id)
            .unwrap_or(self.vocab_size.saturating_sub(1) as u32)
    }

    pub fn bos_token(&self) -> u32 {
        self.bos_token_id.unwrap_or_else(|| self.eos_token())
    }

    /// Ids the tokenizer must treat as special (BOS, EOS, PAD), deduplicated.
    pub fn special_token_ids(&self) -> Vec<u32> {
        let mut ids = vec![self.bos_token(), self.eos_token()];
        ids.extend(self.pad_token_id);
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Linear projection stored as `[in, out]`, as exported by GPT-2 checkpoints.
#[derive(Debug, Clone)]
struct Conv1D {
    weight: Tensor,
    bias: Tensor,
    span: tracing::Span,
}

impl Conv1D {
    fn load(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(
            (in_dim, out_dim),
            "weight",
            candle_nn::init::DEFAULT_KAIMING_NORMAL,
        )?;
        let bias = vb.get_with_hints(out_dim, "bias", candle_nn::Init::Const(0.))?;
        let span = tracing::span!(tracing::Level::TRACE, "conv1d");
        Ok(Self { weight, bias, span })
    }
}

impl Module for Conv1D {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let _enter = self.span.enter();
        xs.broadcast_matmul(&self.weight)?.broadcast_add(&self.bias)
    }
}

#[derive(Debug, Clone)]
struct Attention {
    c_attn: Conv1D,
    c_proj: Conv1D,
    num_heads: usize,
    head_dim: usize,
    span: tracing::Span,
}

impl Attention {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let hidden = config.n_embd;
        if hidden % config.n_head != 0 {
            return Err(candle_core::Error::Msg(format!(
                "n_embd ({hidden}) is not divisible by n_head ({})",
                config.n_head
            )));
        }
        let c_attn = Conv1D::load(hidden, 3 * hidden, vb.pp("c_attn"))?;
        let c_proj = Conv1D::load(hidden, hidden, vb.pp("c_proj"))?;
        let span = tracing::span!(tracing::Level::TRACE, "attention");
        Ok(Self {
            c_attn,
            c_proj,
            num_heads: config.n_head,
            head_dim: hidden / config.n_head,
            span,
        })
    }

    fn forward(
        &self,
        hidden_states: &Tensor,
        attention_mask: Option<&Tensor>,
        cache: &mut LayerCache,
    ) -> Result<Tensor> {
        let _enter = self.span.enter();
        let (batch, seq_len, hidden) = hidden_states.dims3()?;

        let qkv = self.c_attn.forward(hidden_states)?;
        let split_heads = |index: usize| -> Result<Tensor> {
            qkv.narrow(D::Minus1, index * hidden, hidden)?
                .reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split_heads(0)?;
        let mut k = split_heads(1)?;
        let mut v = split_heads(2)?;

        if let Some((past_k, past_v)) = cache.as_ref() {
            k = Tensor::cat(&[past_k, &k], 2)?;
            v = Tensor::cat(&[past_v, &v], 2)?;
        }
        *cache = Some((k.clone(), v.clone()));

        let scale = (self.head_dim as f64).sqrt();
        let mut scores = (q.matmul(&k.t()?)? / scale)?;
        if let Some(mask) = attention_mask {
            scores = scores.broadcast_add(mask)?;
        }
        let probs = softmax_last_dim(&scores)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((batch, seq_len, hidden))?;
        self.c_proj.forward(&context)
    }
}

#[derive(Debug, Clone)]
struct FeedForward {
    c_fc: Conv1D,
    c_proj: Conv1D,
    activation: Activation,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let c_fc = Conv1D::load(config.n_embd, config.inner_dim(), vb.pp("c_fc"))?;
        let c_proj = Conv1D::load(config.inner_dim(), config.n_embd, vb.pp("c_proj"))?;
        Ok(Self {
            c_fc,
            c_proj,
            activation: config.activation,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.c_fc.forward(xs)?;
        let xs = self.activation.apply(&xs)?;
        self.c_proj.forward(&xs)
    }
}

/// Transformer block containing attention and feed-forward sub-layers.
#[derive(Debug, Clone)]
struct TransformerLayer {
    attention_norm: LayerNorm,
    attention: Attention,
    ffn_norm: LayerNorm,
    feed_forward: FeedForward,
}

impl TransformerLayer {
    fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let eps = config.layer_norm_epsilon;
        Ok(Self {
            attention_norm: layer_norm(config.n_embd, eps, vb.pp("ln_1"))?,
            attention: Attention::load(vb.pp("attn"), config)?,
            ffn_norm: layer_norm(config.n_embd, eps, vb.pp("ln_2"))?,
            feed_forward: FeedForward::load(vb.pp("mlp"), config)?,
        })
    }

    fn forward(
        &self,
        hidden_states: &Tensor,
        attention_mask: Option<&Tensor>,
        cache: &mut LayerCache,
    ) -> Result<Tensor> {
        // Pre-norm attention
        let normed = self.attention_norm.forward(hidden_states)?;
        let attention_out = self.attention.forward(&normed, attention_mask, cache)?;
        let hidden_states = (attention_out + hidden_states)?;

        // Pre-norm feed-forward
        let normed = self.ffn_norm.forward(&hidden_states)?;
        let ffn_out = self.feed_forward.forward(&normed)?;
        hidden_states + ffn_out
    }
}

/// Main model weights structure containing all layers.
pub struct ModelWeights {
    token_embeddings: Embedding,
    position_embeddings: Embedding,
    layers: Vec<TransformerLayer>,
    final_norm: LayerNorm,
    output_projection: Linear,
    config: Config,
    device: Device,
}

impl ModelWeights {
    /// Load weights from a var builder. Both bare (`h.0.attn...`) and
    /// `GPT2LMHeadModel` (`transformer.h.0.attn...`) layouts are accepted.
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let token_embeddings = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let position_embeddings = embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;

        let mut layers = Vec::with_capacity(config.n_layer);
        for layer_idx in 0..config.n_layer {
            layers.push(TransformerLayer::load(
                vb.pp(format!("h.{layer_idx}")),
                config,
            )?);
        }

        let final_norm = layer_norm(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_f"))?;

        // Tied output head
        let output_projection = Linear::new(token_embeddings.embeddings().clone(), None);

        Ok(Self {
            token_embeddings,
            position_embeddings,
            layers,
            final_norm,
            output_projection,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    /// Forward `input_ids` placed after `position_offset` cached tokens and return
    /// the logits of the last position, `[batch, vocab_size]`.
    fn forward(
        &self,
        input_ids: &Tensor,
        position_offset: usize,
        kv_caches: &mut [LayerCache],
    ) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len == 0 {
            return Err(candle_core::Error::Msg(
                "Input tensor has zero sequence length".to_string(),
            ));
        }
        if position_offset + seq_len > self.config.n_positions {
            return Err(candle_core::Error::Msg(format!(
                "sequence of {} tokens exceeds the context window of {}",
                position_offset + seq_len,
                self.config.n_positions
            )));
        }

        let positions = Tensor::arange(
            position_offset as u32,
            (position_offset + seq_len) as u32,
            &self.device,
        )?
        .unsqueeze(0)?;

        let mut hidden_states = self
            .token_embeddings
            .forward(input_ids)?
            .broadcast_add(&self.position_embeddings.forward(&positions)?)?;

        // Only needed for multi-token sequences
        let attention_mask = if seq_len > 1 {
            Some(create_causal_mask(seq_len, position_offset, &self.device)?)
        } else {
            None
        };

        for (layer, cache) in self.layers.iter().zip(kv_caches.iter_mut()) {
            hidden_states = layer.forward(&hidden_states, attention_mask.as_ref(), cache)?;
        }

        let hidden_states = self.final_norm.forward(&hidden_states)?;
        let last_hidden = hidden_states.narrow(1, seq_len - 1, 1)?;
        self.output_projection.forward(&last_hidden)?.squeeze(1)
    }
}

/// Additive mask, `[seq_len, position_offset + seq_len]`, hiding future positions.
fn create_causal_mask(seq_len: usize, position_offset: usize, device: &Device) -> Result<Tensor> {
    let total_len = position_offset + seq_len;
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|row| {
            (0..total_len).map(move |col| {
                if col > row + position_offset {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
        })
        .collect();
    Tensor::from_vec(mask, (seq_len, total_len), device)
}

/// High-level GPT-2 model interface for text generation.
/// This struct manages the shared weights and creates individual contexts.
#[derive(Clone)]
pub struct Gpt2Model {
    weights: Arc<ModelWeights>,
}

impl Gpt2Model {
    pub fn load(vb: VarBuilder, config: &Config) -> Result<Self> {
        let weights = ModelWeights::load(vb, config)?;
        Ok(Self {
            weights: Arc::new(weights),
        })
    }

    pub fn config(&self) -> &Config {
        &self.weights.config
    }

    /// Create a new inference context with this model.
    pub fn new_context(&self) -> Context {
        Context::new(self.weights.clone())
    }

    /// Get model information.
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            num_layers: self.weights.layers.len(),
            max_seq_len: self.weights.config.n_positions,
            vocab_size: self.weights.config.vocab_size,
            dtype: self.weights.token_embeddings.embeddings().dtype(),
            device: self.weights.device.clone(),
        }
    }
}

/// A single inference context with independent state.
/// Multiple contexts can share the same model weights.
#[derive(Clone)]
pub struct Context {
    weights: Arc<ModelWeights>,
    kv_caches: Vec<LayerCache>,
    position: usize,
}

impl Context {
    pub fn new(weights: Arc<ModelWeights>) -> Self {
        let kv_caches = vec![None; weights.layers.len()];
        Self {
            weights,
            kv_caches,
            position: 0,
        }
    }

    /// Generate next token logits given input token IDs.
    /// Position is tracked automatically within this context.
    pub fn generate(&mut self, input_ids: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let logits = self
            .weights
            .forward(input_ids, self.position, &mut self.kv_caches)?;

        // Update position after successful generation
        self.position += seq_len;

        Ok(logits)
    }
}

/// Model information structure.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub num_layers: usize,
    pub max_seq_len: usize,
    pub vocab_size: usize,
    pub dtype: DType,
    pub device: Device,
}

impl LanguageModelContext for Context {
    fn generate(&mut self, input: &Tensor) -> Result<Tensor> {
        Context::generate(self, input)
    }
}

impl TextGenerationModel for Gpt2Model {
    type Context = Context;

    fn new_context(&self) -> Context {
        Gpt2Model::new_context(self)
    }

    fn get_bos_token(&self) -> u32 {
        self.weights.config.bos_token()
    }

    fn get_eos_token(&self) -> u32 {
        self.weights.config.eos_token()
    }

    fn get_max_seq_len(&self) -> usize {
        self.weights.config.n_positions
    }

    fn device(&self) -> &Device {
        &self.weights.device
    }
}
