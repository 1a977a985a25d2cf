#![allow(dead_code)]

use candle_core::{Device, Tensor};
use std::str::FromStr;
use std::time::Duration;
use textgen::{GenerationConfig, LanguageModelContext, OutputRegion, TextGenerationModel};
use tokenizers::Tokenizer;

pub const EOS: u32 = 0;
pub const UNK: u32 = 1;
pub const VOCAB: [&str; 14] = [
    "<|endoftext|>",
    "<unk>",
    "Once",
    "upon",
    "a",
    "time",
    "there",
    "was",
    "dragon",
    "castle",
    "the",
    "and",
    "quiet",
    "river",
];

/// Word-level tokenizer over [`VOCAB`] with `<|endoftext|>` registered as special.
pub fn word_tokenizer() -> Tokenizer {
    let vocab = VOCAB
        .iter()
        .enumerate()
        .map(|(id, word)| format!("{word:?}: {id}"))
        .collect::<Vec<_>>()
        .join(", ");
    let json = format!(
        r#"{{
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [{{
                "id": {EOS},
                "content": "<|endoftext|>",
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            }}],
            "normalizer": null,
            "pre_tokenizer": {{ "type": "Whitespace" }},
            "post_processor": null,
            "decoder": null,
            "model": {{ "type": "WordLevel", "vocab": {{ {vocab} }}, "unk_token": "<unk>" }}
        }}"#
    );
    Tokenizer::from_str(&json).unwrap()
}

/// How the mock model scores the next token.
#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    /// Spread over ordinary words; EOS and `<unk>` are never likely.
    Words,
    /// Always predicts EOS.
    EndOfText,
}

#[derive(Clone)]
pub struct MockContext {
    behaviour: Behaviour,
    prefill_delay: Duration,
    position: usize,
}

impl LanguageModelContext for MockContext {
    fn generate(&mut self, input: &Tensor) -> candle_core::Result<Tensor> {
        let (_, seq_len) = input.dims2()?;
        if self.position == 0 && !self.prefill_delay.is_zero() {
            std::thread::sleep(self.prefill_delay);
        }
        self.position += seq_len;

        let logits: Vec<f32> = (0..VOCAB.len() as u32)
            .map(|id| match (self.behaviour, id) {
                (Behaviour::EndOfText, EOS) => 0.0,
                (Behaviour::EndOfText, _) => -1e4,
                (Behaviour::Words, EOS | UNK) => -1e4,
                (Behaviour::Words, _) => ((id as usize + self.position) % 4) as f32 * 0.5,
            })
            .collect();
        Tensor::from_vec(logits, (1, VOCAB.len()), &Device::Cpu)
    }
}

pub struct MockModel {
    behaviour: Behaviour,
    prefill_delay: Duration,
    max_seq_len: usize,
    device: Device,
}

impl MockModel {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            prefill_delay: Duration::ZERO,
            max_seq_len: 64,
            device: Device::Cpu,
        }
    }

    pub fn with_prefill_delay(mut self, delay: Duration) -> Self {
        self.prefill_delay = delay;
        self
    }
}

impl TextGenerationModel for MockModel {
    type Context = MockContext;

    fn new_context(&self) -> MockContext {
        MockContext {
            behaviour: self.behaviour,
            prefill_delay: self.prefill_delay,
            position: 0,
        }
    }

    fn get_bos_token(&self) -> u32 {
        EOS
    }

    fn get_eos_token(&self) -> u32 {
        EOS
    }

    fn get_max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    fn device(&self) -> &Device {
        &self.device
    }
}

/// max_length 50, top_k 5, top_p 0.95, temperature 1.0, 3 sequences, penalty 1.5.
pub fn scenario_config() -> GenerationConfig {
    GenerationConfig {
        model_name_or_path: "mock".into(),
        max_length: 50,
        top_k: 5,
        top_p: 0.95,
        temperature: 1.0,
        num_return_sequences: 3,
        repetition_penalty: 1.5,
        seed: None,
    }
}

/// In-memory output region recording every call.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    pub entries: Vec<String>,
    pub errors: Vec<String>,
    pub clears: usize,
}

impl RecordingOutput {
    pub fn rendered(&self) -> String {
        self.entries.concat()
    }
}

impl OutputRegion for RecordingOutput {
    fn clear(&mut self) {
        self.clears += 1;
        self.entries.clear();
    }

    fn append(&mut self, entry: &str) {
        self.entries.push(entry.to_string());
    }

    fn show_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}
