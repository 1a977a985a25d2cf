//! GPT-2 text continuation: configuration loading, a sampling generation
//! service and an interactive shell that shows several variants per prompt.

pub mod core;
pub mod loaders;
pub mod models;
pub mod pipelines;
pub mod shell;

pub use core::{
    load_config, ConfigError, GenerationConfig, GenerationError, InvalidParameter,
    ModelLoadError, DEFAULT_CONFIG_PATH,
};
pub use loaders::load_tokenizer_and_model;
pub use models::{Gpt2Model, ModelInfo};
pub use pipelines::text_generation::{
    generate_text, generate_tokens, LanguageModelContext, TextGenerationModel,
    TextGenerationPipeline,
};
pub use pipelines::utils::DeviceRequest;
pub use shell::{format_variant, AppContext, OutputRegion, Shell, ShellState, TriggerOutcome};
