//! Model and tokenizer loading from local directories and the Hugging Face Hub.
//!
//! A model identifier is either a directory on disk holding the usual
//! `GPT2LMHeadModel` export, or a Hub repository id. The loaders here resolve
//! the individual files:
//! - `config.json` - model hyper-parameters
//! - `model.safetensors` or `pytorch_model.bin` - weights
//! - `tokenizer.json`, or `vocab.json` + `merges.txt` for checkpoints that only
//!   ship the slow-tokenizer files
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use textgen::loaders::load_tokenizer_and_model;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let device = candle_core::Device::Cpu;
//! let (tokenizer, model) = load_tokenizer_and_model("openai-community/gpt2", &device).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Hub downloads retry when the local cache lock is held by another process.

use crate::core::ModelLoadError;
use crate::models::implementations::gpt2::{Config, Gpt2Model};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::{AddedToken, Tokenizer};

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct HfLoader {
    pub repo: String,
    pub filename: String,
}

impl HfLoader {
    pub fn new(repo: &str, filename: &str) -> Self {
        Self {
            repo: repo.into(),
            filename: filename.into(),
        }
    }

    fn missing(&self, reason: impl ToString) -> ModelLoadError {
        ModelLoadError::MissingFile {
            identifier: self.repo.clone(),
            file: self.filename.clone(),
            reason: reason.to_string(),
        }
    }

    /// Resolve the file to a local path, downloading it if `repo` is not a
    /// local directory.
    pub async fn load(&self) -> Result<PathBuf, ModelLoadError> {
        let local_dir = Path::new(&self.repo);
        if local_dir.is_dir() {
            let path = local_dir.join(&self.filename);
            return if path.is_file() {
                Ok(path)
            } else {
                Err(self.missing("not present in the local model directory"))
            };
        }

        let hf_api = hf_hub::api::tokio::ApiBuilder::new()
            .with_progress(true)
            .build()
            .map_err(|e| self.missing(e))?;
        let hf_api = hf_api.model(self.repo.clone());

        let mut attempt = 0;
        loop {
            match hf_api.get(self.filename.as_str()).await {
                Ok(path) => return Ok(path),
                Err(e) => {
                    let error_msg = e.to_string();
                    if error_msg.contains("Lock acquisition failed") && attempt + 1 < MAX_RETRIES {
                        // Wait before retrying, with exponential backoff
                        let wait_time = Duration::from_millis(100 * (1 << attempt));
                        tracing::warn!(
                            repo = %self.repo,
                            file = %self.filename,
                            "hub cache is locked, retrying in {wait_time:?}"
                        );
                        tokio::time::sleep(wait_time).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(self.missing(error_msg));
                }
            }
        }
    }
}

/// Report a failed fallback against the file that was asked for first, keeping
/// both reasons.
fn fallback_failed(primary: ModelLoadError, fallback: ModelLoadError) -> ModelLoadError {
    match primary {
        ModelLoadError::MissingFile {
            identifier,
            file,
            reason,
        } => ModelLoadError::MissingFile {
            identifier,
            file,
            reason: format!("{reason}; fallback failed: {fallback}"),
        },
        other => other,
    }
}

#[derive(Clone)]
pub struct ModelConfigLoader {
    pub config_file_loader: HfLoader,
}

impl ModelConfigLoader {
    pub fn new(repo: &str) -> Self {
        Self {
            config_file_loader: HfLoader::new(repo, "config.json"),
        }
    }

    pub async fn load(&self) -> Result<Config, ModelLoadError> {
        let config_path = self.config_file_loader.load().await?;
        let invalid = |reason: String| ModelLoadError::ModelConfig {
            identifier: self.config_file_loader.repo.clone(),
            reason,
        };

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| invalid(format!("{}: {e}", config_path.display())))?;
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
    }
}

#[derive(Clone)]
pub struct TokenizerLoader {
    pub repo: String,
}

impl TokenizerLoader {
    pub fn new(repo: &str) -> Self {
        Self { repo: repo.into() }
    }

    fn error(&self, reason: impl ToString) -> ModelLoadError {
        ModelLoadError::Tokenizer {
            identifier: self.repo.clone(),
            reason: reason.to_string(),
        }
    }

    /// Load the tokenizer and register `special_token_ids` as special tokens so
    /// they are skipped when decoding.
    pub async fn load(&self, special_token_ids: &[u32]) -> Result<Tokenizer, ModelLoadError> {
        let mut tokenizer = match HfLoader::new(&self.repo, "tokenizer.json").load().await {
            Ok(path) => Tokenizer::from_file(path).map_err(|e| self.error(e))?,
            Err(primary) => {
                tracing::debug!("{primary}; assembling a byte-level BPE tokenizer instead");
                let slow_files = async {
                    let vocab = HfLoader::new(&self.repo, "vocab.json").load().await?;
                    let merges = HfLoader::new(&self.repo, "merges.txt").load().await?;
                    Ok::<_, ModelLoadError>((vocab, merges))
                }
                .await;
                let (vocab, merges) =
                    slow_files.map_err(|fallback| fallback_failed(primary, fallback))?;
                self.byte_level_bpe(&vocab, &merges)?
            }
        };

        let specials: Vec<AddedToken> = special_token_ids
            .iter()
            .filter_map(|&id| tokenizer.id_to_token(id))
            .map(|content| AddedToken::from(content, true))
            .collect();
        tokenizer.add_special_tokens(&specials);

        Ok(tokenizer)
    }

    /// GPT-2 style tokenizer: byte-level pre-tokenization without a prefix
    /// space and a byte-level decoder.
    fn byte_level_bpe(&self, vocab: &Path, merges: &Path) -> Result<Tokenizer, ModelLoadError> {
        let as_str = |path: &Path| {
            path.to_str()
                .map(str::to_owned)
                .ok_or_else(|| self.error(format!("non UTF-8 path {}", path.display())))
        };

        let bpe = BPE::from_file(&as_str(vocab)?, &as_str(merges)?)
            .build()
            .map_err(|e| self.error(e))?;

        let mut tokenizer = Tokenizer::new(bpe);
        tokenizer.with_pre_tokenizer(Some(ByteLevel::new(false, true, true)));
        tokenizer.with_decoder(Some(ByteLevel::default()));
        Ok(tokenizer)
    }
}

#[derive(Clone)]
pub struct WeightsLoader {
    pub repo: String,
}

impl WeightsLoader {
    pub fn new(repo: &str) -> Self {
        Self { repo: repo.into() }
    }

    pub async fn load(&self, config: &Config, device: &Device) -> Result<Gpt2Model, ModelLoadError> {
        let weights_filename = match HfLoader::new(&self.repo, "model.safetensors").load().await {
            Ok(path) => path,
            Err(primary) => {
                tracing::debug!("{primary}; trying pytorch_model.bin");
                HfLoader::new(&self.repo, "pytorch_model.bin")
                    .load()
                    .await
                    .map_err(|fallback| fallback_failed(primary, fallback))?
            }
        };
        let weights_error = |source| ModelLoadError::Weights {
            identifier: self.repo.clone(),
            source,
        };

        let dtype = DType::F32;
        let vb = if weights_filename
            .extension()
            .is_some_and(|ext| ext == "safetensors")
        {
            unsafe { VarBuilder::from_mmaped_safetensors(&[&weights_filename], dtype, device) }
        } else {
            VarBuilder::from_pth(&weights_filename, dtype, device)
        }
        .map_err(weights_error)?;

        Gpt2Model::load(vb, config).map_err(weights_error)
    }
}

/// Resolve `model_name_or_path` into a tokenizer and a model on `device`.
pub async fn load_tokenizer_and_model(
    model_name_or_path: &str,
    device: &Device,
) -> Result<(Tokenizer, Gpt2Model), ModelLoadError> {
    let config = ModelConfigLoader::new(model_name_or_path).load().await?;
    let model = WeightsLoader::new(model_name_or_path)
        .load(&config, device)
        .await?;
    let tokenizer = TokenizerLoader::new(model_name_or_path)
        .load(&config.special_token_ids())
        .await?;

    let info = model.info();
    tracing::info!(
        model = model_name_or_path,
        layers = info.num_layers,
        context = info.max_seq_len,
        vocab = info.vocab_size,
        device = ?info.device.location(),
        "model and tokenizer loaded"
    );

    Ok((tokenizer, model))
}
