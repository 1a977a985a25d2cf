pub mod config;
pub mod error;

pub use config::{load_config, GenerationConfig, DEFAULT_CONFIG_PATH};
pub use error::{ConfigError, GenerationError, InvalidParameter, ModelLoadError};
