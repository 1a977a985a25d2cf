use super::{OutputRegion, Shell, TriggerOutcome};
use crate::pipelines::text_generation::TextGenerationModel;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const QUIT_COMMAND: &str = ":quit";
const SEPARATOR: &str = "----------------------------------------";

/// Output region rendered on a line-oriented terminal.
pub struct TerminalSurface<W: Write> {
    out: W,
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()).and_then(|_| self.out.flush()) {
            tracing::warn!(error = %e, "failed to write to terminal");
        }
    }

    fn greet(&mut self) {
        self.write(&format!(
            "Enter a prompt. End a line with \\ to continue it, {QUIT_COMMAND} to exit.\n"
        ));
    }

    fn ready(&mut self) {
        self.write("> ");
    }
}

impl<W: Write> OutputRegion for TerminalSurface<W> {
    fn clear(&mut self) {
        self.write(&format!("\n{SEPARATOR}\n"));
    }

    fn append(&mut self, entry: &str) {
        self.write(entry);
    }

    fn show_error(&mut self, message: &str) {
        self.write(&format!("error: {message}\n\n"));
    }
}

/// Read prompts from `input` until EOF or `:quit`, triggering the shell for each.
pub async fn run_terminal<M, R, W>(
    shell: &Shell<M>,
    input: R,
    surface: &mut TerminalSurface<W>,
) -> std::io::Result<()>
where
    M: TextGenerationModel + Send + 'static,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut prompt = String::new();

    surface.greet();
    surface.ready();
    while let Some(line) = lines.next_line().await? {
        if prompt.is_empty() && line.trim() == QUIT_COMMAND {
            break;
        }

        if let Some(continued) = line.strip_suffix('\\') {
            prompt.push_str(continued);
            prompt.push('\n');
            continue;
        }
        prompt.push_str(&line);

        if let TriggerOutcome::Rejected = shell.trigger(&prompt, surface).await {
            surface.show_error("a generation is already running");
        }
        prompt.clear();
        surface.ready();
    }

    tracing::info!("input closed, leaving shell");
    Ok(())
}
