//! Application configuration: which model to load and how to sample from it.
//!
//! The settings live in a JSON file with a top-level `model_name_or_path` and a
//! `generation_parameters` group:
//!
//! ```json
//! {
//!   "model_name_or_path": "openai-community/gpt2",
//!   "generation_parameters": {
//!     "max_length": 150,
//!     "top_k": 5,
//!     "top_p": 0.95,
//!     "temperature": 1.0,
//!     "num_return_sequences": 3,
//!     "repetition_penalty": 1.5
//!   }
//! }
//! ```
//!
//! Every parameter is required. There are no fallbacks: a missing or
//! out-of-range value fails the load.

use super::error::{ConfigError, InvalidParameter};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// File name used when no configuration path is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const PARAMETERS_KEY: &str = "generation_parameters";
const MODEL_KEY: &str = "model_name_or_path";
const REQUIRED_PARAMETERS: [&str; 6] = [
    "max_length",
    "top_k",
    "top_p",
    "temperature",
    "num_return_sequences",
    "repetition_penalty",
];

/// Immutable generation settings, loaded once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Local directory or Hugging Face Hub repository id.
    pub model_name_or_path: String,
    /// Total length of each sequence in tokens, prompt included.
    pub max_length: usize,
    /// 0 disables top-k filtering.
    pub top_k: usize,
    pub top_p: f64,
    pub temperature: f64,
    pub num_return_sequences: usize,
    pub repetition_penalty: f32,
    /// Fixed sampling seed. `None` draws a fresh seed for every request.
    pub seed: Option<u64>,
}

#[derive(Deserialize)]
struct RawConfig {
    model_name_or_path: String,
    generation_parameters: RawGenerationParameters,
}

#[derive(Deserialize)]
struct RawGenerationParameters {
    max_length: usize,
    top_k: usize,
    top_p: f64,
    temperature: f64,
    num_return_sequences: usize,
    repetition_penalty: f32,
    #[serde(default)]
    seed: Option<u64>,
}

impl GenerationConfig {
    /// Check that every numeric field lies within its domain.
    pub fn validate(&self) -> Result<(), InvalidParameter> {
        if self.model_name_or_path.trim().is_empty() {
            return Err(InvalidParameter::EmptyModelIdentifier);
        }
        if self.max_length == 0 {
            return Err(InvalidParameter::ZeroMaxLength);
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(InvalidParameter::TopPOutOfRange(self.top_p));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(InvalidParameter::NonPositiveTemperature(self.temperature));
        }
        if self.num_return_sequences == 0 {
            return Err(InvalidParameter::ZeroReturnSequences);
        }
        if !(self.repetition_penalty.is_finite() && self.repetition_penalty >= 1.0) {
            return Err(InvalidParameter::RepetitionPenaltyBelowOne(
                self.repetition_penalty,
            ));
        }
        Ok(())
    }

    /// Parse and validate a configuration document. `path` is only used for
    /// error messages.
    pub fn from_json_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(content).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let missing = |key: String| ConfigError::MissingKey {
            path: path.to_path_buf(),
            key,
        };

        if value.get(MODEL_KEY).is_none() {
            return Err(missing(MODEL_KEY.to_string()));
        }
        let parameters = value
            .get(PARAMETERS_KEY)
            .ok_or_else(|| missing(PARAMETERS_KEY.to_string()))?;
        for key in REQUIRED_PARAMETERS {
            if parameters.get(key).is_none() {
                return Err(missing(format!("{PARAMETERS_KEY}.{key}")));
            }
        }

        let raw: RawConfig =
            serde_json::from_value(value).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let params = raw.generation_parameters;
        let config = Self {
            model_name_or_path: raw.model_name_or_path,
            max_length: params.max_length,
            top_k: params.top_k,
            top_p: params.top_p,
            temperature: params.temperature,
            num_return_sequences: params.num_return_sequences,
            repetition_penalty: params.repetition_penalty,
            seed: params.seed,
        };

        config.validate().map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(config)
    }
}

/// Load the generation configuration from `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<GenerationConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Missing {
        path: path.to_path_buf(),
        source,
    })?;

    let config = GenerationConfig::from_json_str(&content, path)?;
    tracing::info!(
        model = %config.model_name_or_path,
        max_length = config.max_length,
        num_return_sequences = config.num_return_sequences,
        "loaded configuration from {}",
        path.display()
    );
    Ok(config)
}
