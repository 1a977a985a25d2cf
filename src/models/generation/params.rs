use crate::core::GenerationConfig;

/// Sampler-level parameters for one generation request.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f64,
    pub repeat_penalty: f32,
    pub seed: u64,
    pub max_len: usize,
    pub top_p: f64,   // (0.0, 1.0] ; 1 means disabled
    pub top_k: usize, // 0 means disabled
}

impl GenerationParams {
    pub fn new(
        temperature: f64,
        repeat_penalty: f32,
        seed: u64,
        max_len: usize,
        top_p: f64,
        top_k: usize,
    ) -> Self {
        Self {
            temperature,
            repeat_penalty,
            seed,
            max_len,
            top_p,
            top_k,
        }
    }

    /// Derive sampler parameters from the application config, drawing a
    /// random seed when none is configured.
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(
            config.temperature,
            config.repetition_penalty,
            config.seed.unwrap_or_else(rand::random::<u64>),
            config.max_length,
            config.top_p,
            config.top_k,
        )
    }
}
