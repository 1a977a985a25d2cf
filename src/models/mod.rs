pub mod generation;
pub mod implementations;

pub use implementations::{Gpt2Model, ModelInfo};
