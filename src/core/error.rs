use std::path::PathBuf;
use thiserror::Error;

/// A generation parameter outside of its allowed domain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidParameter {
    #[error("model_name_or_path must not be empty")]
    EmptyModelIdentifier,

    #[error("max_length must be a positive number of tokens")]
    ZeroMaxLength,

    #[error("top_p must be in (0, 1], got {0}")]
    TopPOutOfRange(f64),

    #[error("temperature must be a positive finite number, got {0}")]
    NonPositiveTemperature(f64),

    #[error("num_return_sequences must be at least 1")]
    ZeroReturnSequences,

    #[error("repetition_penalty must be a finite number >= 1.0, got {0}")]
    RepetitionPenaltyBelowOne(f32),
}

/// The configuration resource could not be turned into a [`GenerationConfig`].
///
/// [`GenerationConfig`]: crate::core::GenerationConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {path:?}: {source}")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration file {path:?} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration file {path:?} is missing required key `{key}`")]
    MissingKey { path: PathBuf, key: String },

    #[error("configuration file {path:?} has an invalid value: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: InvalidParameter,
    },
}

/// The model provider could not resolve an identifier into a usable
/// model/tokenizer pair.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("cannot fetch `{file}` for model `{identifier}`: {reason}")]
    MissingFile {
        identifier: String,
        file: String,
        reason: String,
    },

    #[error("model `{identifier}` has an unreadable config.json: {reason}")]
    ModelConfig { identifier: String, reason: String },

    #[error("cannot build tokenizer for model `{identifier}`: {reason}")]
    Tokenizer { identifier: String, reason: String },

    #[error("cannot load weights for model `{identifier}`: {source}")]
    Weights {
        identifier: String,
        #[source]
        source: candle_core::Error,
    },

    #[error("cannot select device: {0}")]
    Device(#[source] candle_core::Error),
}

/// A single generation request failed. Recoverable: the caller reports it and
/// may try again.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    InvalidParameter(#[from] InvalidParameter),

    #[error("failed to encode prompt: {0}")]
    Encode(String),

    #[error("failed to decode generated tokens: {0}")]
    Decode(String),

    #[error("prompt is {prompt_tokens} tokens long but max_length is {max_length}")]
    PromptTooLong {
        prompt_tokens: usize,
        max_length: usize,
    },

    #[error("max_length {requested} exceeds the model context window of {limit} tokens")]
    ContextOverflow { requested: usize, limit: usize },

    #[error("model call failed: {0}")]
    Model(#[from] candle_core::Error),

    #[error("generation worker stopped unexpectedly: {0}")]
    Interrupted(String),
}
