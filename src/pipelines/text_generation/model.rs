use candle_core::{Device, Tensor};

/// Minimal interface required by the text-generation pipeline for a model context.
///
/// A context owns the per-sequence state (kv-cache and position) while the
/// weights stay shared with the model. Cloning a context forks that state, which
/// lets the pipeline prefill a prompt once and sample several continuations from
/// it.
pub trait LanguageModelContext: Clone + Send {
    /// Forward the input tokens (`[batch, seq_len]`) through the model, returning
    /// the logits for the next token (`[batch, vocab_size]`).
    fn generate(&mut self, input: &Tensor) -> candle_core::Result<Tensor>;
}

/// A loaded causal language model.
pub trait TextGenerationModel {
    type Context: LanguageModelContext;

    fn new_context(&self) -> Self::Context;

    /// Token used to seed generation when the prompt encodes to nothing.
    fn get_bos_token(&self) -> u32;

    fn get_eos_token(&self) -> u32;

    /// Get all EOS token IDs for robust termination detection
    fn get_eos_tokens(&self) -> Vec<u32> {
        vec![self.get_eos_token()]
    }

    fn get_max_seq_len(&self) -> usize;

    fn device(&self) -> &Device;
}
