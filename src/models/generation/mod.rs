pub mod params;
pub mod sampling;

pub use candle_transformers::utils::apply_repeat_penalty;
pub use params::GenerationParams;
pub use sampling::{initialize_logits_processor, sampling_for, LogitsProcessor, Sampling};
