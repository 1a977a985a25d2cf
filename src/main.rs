use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use textgen::shell::{run_terminal, TerminalSurface, VARIANT_LOG_TARGET};
use textgen::{
    load_config, load_tokenizer_and_model, AppContext, DeviceRequest, ModelLoadError, Shell,
    TextGenerationPipeline, DEFAULT_CONFIG_PATH,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "textgen")]
#[command(about = "Interactive GPT-2 text continuation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to the JSON configuration
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run on the CPU even when CUDA is available
    #[arg(long, conflicts_with = "cuda")]
    cpu: bool,

    /// CUDA device index
    #[arg(long)]
    cuda: Option<usize>,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn device_request(&self) -> DeviceRequest {
        match (self.cpu, self.cuda) {
            (true, _) => DeviceRequest::Cpu,
            (false, Some(i)) => DeviceRequest::Cuda(i),
            (false, None) => DeviceRequest::Default,
        }
    }
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("{VARIANT_LOG_TARGET}=info").parse()?);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_ref())?;

    tracing::info!("Starting textgen v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config).context("Failed to load configuration")?;
    let device = args
        .device_request()
        .resolve()
        .map_err(ModelLoadError::Device)
        .context("Failed to initialise device")?;

    let (tokenizer, model) = load_tokenizer_and_model(&config.model_name_or_path, &device)
        .await
        .with_context(|| format!("Failed to load model `{}`", config.model_name_or_path))?;

    let shell = Shell::new(AppContext::new(
        config,
        TextGenerationPipeline::new(model, tokenizer),
    ));
    let mut surface = TerminalSurface::new(std::io::stdout());
    let input = tokio::io::BufReader::new(tokio::io::stdin());

    run_terminal(&shell, input, &mut surface)
        .await
        .context("Failed to read from stdin")?;

    Ok(())
}
