use super::model::{LanguageModelContext, TextGenerationModel};
use crate::core::{GenerationConfig, GenerationError};
use crate::models::generation::{
    apply_repeat_penalty, initialize_logits_processor, GenerationParams,
};
use candle_core::Tensor;
use std::time::Instant;
use tokenizers::Tokenizer;

/// Sample `config.num_return_sequences` continuations of `start_text` and
/// return their token ids, prompt included.
///
/// Every sequence is at most `config.max_length` tokens long and ends either at
/// an EOS token or at that limit. An empty prompt is seeded with the model's
/// BOS token; the seed does not count towards `max_length` and is not part of
/// the returned sequences.
pub fn generate_tokens<M: TextGenerationModel>(
    start_text: &str,
    model: &M,
    tokenizer: &Tokenizer,
    config: &GenerationConfig,
) -> Result<Vec<Vec<u32>>, GenerationError> {
    config.validate()?;
    let params = GenerationParams::from_config(config);

    let mut prompt_tokens = tokenizer
        .encode(start_text, true)
        .map_err(|e| GenerationError::Encode(e.to_string()))?
        .get_ids()
        .to_vec();

    let limit = model.get_max_seq_len();
    if params.max_len > limit {
        return Err(GenerationError::ContextOverflow {
            requested: params.max_len,
            limit,
        });
    }
    if prompt_tokens.len() >= params.max_len {
        return Err(GenerationError::PromptTooLong {
            prompt_tokens: prompt_tokens.len(),
            max_length: params.max_len,
        });
    }

    // The final token is never fed back, so the seed still fits the window.
    let seed_len = if prompt_tokens.is_empty() {
        prompt_tokens.push(model.get_bos_token());
        1
    } else {
        0
    };
    let total_len = params.max_len + seed_len;

    tracing::debug!(
        prompt_tokens = prompt_tokens.len(),
        seed = params.seed,
        "sampling {} sequences",
        config.num_return_sequences
    );
    let started = Instant::now();

    let eos_tokens = model.get_eos_tokens();
    let device = model.device();

    // The prompt is processed once; every sample forks from this context.
    let mut prompt_context = model.new_context();
    let input = Tensor::new(prompt_tokens.as_slice(), device)?.unsqueeze(0)?;
    let prompt_logits = prompt_context.generate(&input)?.squeeze(0)?;

    let mut sequences = Vec::with_capacity(config.num_return_sequences);
    for index in 0..config.num_return_sequences {
        let mut logits_processor =
            initialize_logits_processor(&params, params.seed.wrapping_add(index as u64));
        let mut context = prompt_context.clone();
        let mut tokens = prompt_tokens.clone();
        let mut logits = prompt_logits.clone();

        loop {
            let logits_step = if params.repeat_penalty > 1.0 {
                apply_repeat_penalty(&logits, params.repeat_penalty, &tokens)?
            } else {
                logits
            };

            let next_token = logits_processor.sample(&logits_step)?;
            tokens.push(next_token);

            if eos_tokens.contains(&next_token) || tokens.len() >= total_len {
                break;
            }

            let input = Tensor::new(&[next_token], device)?.unsqueeze(0)?;
            logits = context.generate(&input)?.squeeze(0)?;
        }

        sequences.push(tokens.split_off(seed_len));
    }

    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "sampling finished");
    Ok(sequences)
}

/// Generate `config.num_return_sequences` continuations of `start_text`,
/// decoded without special tokens. Results keep sampling order.
pub fn generate_text<M: TextGenerationModel>(
    start_text: &str,
    model: &M,
    tokenizer: &Tokenizer,
    config: &GenerationConfig,
) -> Result<Vec<String>, GenerationError> {
    let sequences = generate_tokens(start_text, model, tokenizer, config)?;

    // Filter out EOS tokens before decoding
    let eos_tokens = model.get_eos_tokens();
    sequences
        .iter()
        .map(|tokens| {
            let filtered: Vec<u32> = tokens
                .iter()
                .copied()
                .filter(|token| !eos_tokens.contains(token))
                .collect();
            tokenizer
                .decode(&filtered, /*skip_special_tokens=*/ true)
                .map_err(|e| GenerationError::Decode(e.to_string()))
        })
        .collect()
}

/// A model paired with the tokenizer loaded from the same identifier.
pub struct TextGenerationPipeline<M: TextGenerationModel> {
    model: M,
    tokenizer: Tokenizer,
}

impl<M: TextGenerationModel> TextGenerationPipeline<M> {
    pub fn new(model: M, tokenizer: Tokenizer) -> Self {
        Self { model, tokenizer }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Generate the configured number of continuations for `prompt`.
    pub fn completion(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<Vec<String>, GenerationError> {
        generate_text(prompt, &self.model, &self.tokenizer, config)
    }
}
