pub mod model;
pub mod pipeline;

pub use crate::core::{GenerationConfig, GenerationError};
pub use crate::models::generation::GenerationParams;
pub use model::{LanguageModelContext, TextGenerationModel};
pub use pipeline::{generate_text, generate_tokens, TextGenerationPipeline};
