//! Interactive front end: a prompt goes in, labelled variants come out.
//!
//! The [`Shell`] owns an [`AppContext`] built once at startup and drives any
//! [`OutputRegion`]. Generation runs on a blocking worker while the model handle
//! stays locked, so a second trigger arriving mid-flight is rejected instead of
//! running against the same model.

pub mod terminal;

pub use terminal::{run_terminal, TerminalSurface};

use crate::core::{GenerationConfig, GenerationError};
use crate::pipelines::text_generation::{TextGenerationModel, TextGenerationPipeline};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Log target carrying the mirrored variants. The binary keeps it at `info`
/// whatever `RUST_LOG` says.
pub const VARIANT_LOG_TARGET: &str = "textgen::variants";

/// Immutable configuration plus the single model handle.
pub struct AppContext<M: TextGenerationModel> {
    pub config: Arc<GenerationConfig>,
    pub engine: Arc<Mutex<TextGenerationPipeline<M>>>,
}

impl<M: TextGenerationModel> AppContext<M> {
    pub fn new(config: GenerationConfig, pipeline: TextGenerationPipeline<M>) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(Mutex::new(pipeline)),
        }
    }
}

/// Read-only display the shell renders into.
pub trait OutputRegion {
    fn clear(&mut self);
    fn append(&mut self, entry: &str);
    fn show_error(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Idle,
    Generating,
}

#[derive(Debug)]
pub enum TriggerOutcome {
    /// The display now holds this many variants.
    Completed(usize),
    /// Generation failed; the error was shown and the display left as it was.
    Failed(GenerationError),
    /// Another generation was still running.
    Rejected,
}

/// `Variant {index}:` header, the text, then a blank line.
pub fn format_variant(index: usize, text: &str) -> String {
    format!("Variant {index}:\n{text}\n\n")
}

pub struct Shell<M: TextGenerationModel> {
    context: AppContext<M>,
}

impl<M> Shell<M>
where
    M: TextGenerationModel + Send + 'static,
{
    pub fn new(context: AppContext<M>) -> Self {
        Self { context }
    }

    /// Snapshot of whether a generation currently holds the model.
    pub fn state(&self) -> ShellState {
        match self.context.engine.try_lock() {
            Ok(_) => ShellState::Idle,
            Err(_) => ShellState::Generating,
        }
    }

    pub async fn trigger<O>(&self, raw_prompt: &str, output: &mut O) -> TriggerOutcome
    where
        O: OutputRegion + ?Sized,
    {
        let prompt = raw_prompt.trim().to_string();

        let Ok(engine) = Arc::clone(&self.context.engine).try_lock_owned() else {
            tracing::warn!("generation already in progress, trigger rejected");
            return TriggerOutcome::Rejected;
        };
        let config = Arc::clone(&self.context.config);

        tracing::debug!(prompt_chars = prompt.len(), "generation started");
        let result = tokio::task::spawn_blocking(move || engine.completion(&prompt, &config))
            .await
            .unwrap_or_else(|join_error| Err(GenerationError::Interrupted(join_error.to_string())));

        match result {
            Ok(variants) => {
                output.clear();
                for (i, text) in variants.iter().enumerate() {
                    let entry = format_variant(i + 1, text);
                    tracing::info!(target: VARIANT_LOG_TARGET, "{entry}");
                    output.append(&entry);
                }
                TriggerOutcome::Completed(variants.len())
            }
            Err(e) => {
                tracing::error!(error = %e, "generation failed");
                output.show_error(&e.to_string());
                TriggerOutcome::Failed(e)
            }
        }
    }
}
