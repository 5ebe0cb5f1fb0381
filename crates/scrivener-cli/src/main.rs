use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scrivener_core::{Prompt, ProviderRotator, SharedRotator, TextGenerator, keys_from_env};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::ScrivenerConfig;

#[derive(Parser)]
#[command(name = "scrivener")]
#[command(version)]
#[command(about = "Rotate text generation across free-tier LLM APIs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration (keys masked)
    Config,

    /// Generate a single response
    Ask {
        /// The prompt to send
        prompt: String,

        /// Optional system instruction
        #[arg(short, long)]
        system: Option<String>,

        /// Override the configured retry budget
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Print per-provider and per-key usage as JSON
    Status,

    /// Answer prompts from stdin, one per line, until EOF or Ctrl+C
    Run {
        /// Optional system instruction applied to every prompt
        #[arg(short, long)]
        system: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins when set
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Ask {
            prompt,
            system,
            max_retries,
        } => cmd_ask(&cli.config, &prompt, system, max_retries).await,
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Run { system } => cmd_run(&cli.config, system).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Scrivener initialized at {}", config_dir.display());
    println!(
        "Edit {} or export GEMINI_API_KEY_1, GROQ_API_KEY_1, ... to add your API keys.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ScrivenerConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.masked())?);
    Ok(())
}

/// Build the rotator from config plus environment keys and restore saved state
async fn load_rotator(cfg: &ScrivenerConfig) -> Result<ProviderRotator> {
    let settings = cfg.rotator_settings(keys_from_env())?;
    let mut rotator =
        ProviderRotator::new(&settings).context("Failed to build HTTP client")?;

    let state_path = cfg.state_path();
    rotator
        .load_state(&state_path)
        .await
        .with_context(|| format!("Failed to load state from {}", state_path.display()))?;
    Ok(rotator)
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    prompt: &str,
    system: Option<String>,
    max_retries: Option<u32>,
) -> Result<()> {
    let cfg = ScrivenerConfig::load(config_path)?;
    let mut rotator = load_rotator(&cfg).await?;

    let prompt = match system {
        Some(system) => Prompt::with_system(system, prompt),
        None => Prompt::new(prompt),
    };
    let max_retries = max_retries.unwrap_or(rotator.max_retries());
    let result = rotator.generate(&prompt, max_retries).await;

    let state_path = cfg.state_path();
    rotator
        .shutdown(Some(&state_path))
        .await
        .with_context(|| format!("Failed to save state to {}", state_path.display()))?;

    match result {
        Ok(generation) => {
            info!("Served by {}", generation.provider);
            println!("{}", generation.text);
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", e.code()),
    }
}

async fn cmd_status(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = ScrivenerConfig::load(config_path)?;
    let mut rotator = load_rotator(&cfg).await?;
    let report = rotator.status_report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_run(config_path: &Option<PathBuf>, system: Option<String>) -> Result<()> {
    let cfg = ScrivenerConfig::load(config_path)?;
    let rotator = SharedRotator::new(load_rotator(&cfg).await?);
    let report = rotator.status_report().await;
    info!(
        "Serving prompts from stdin with {} providers ({} keys available)",
        report.providers.len(),
        report.available_keys()
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            shutdown.cancel();
        }
    });

    let served = serve_prompts(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        &rotator,
        system.as_deref(),
        &cancel,
    )
    .await;
    info!("Answered {} prompts", served);

    save_shared(rotator, &cfg.state_path()).await?;
    println!("Scrivener stopped.");
    Ok(())
}

/// Answer prompts from `reader`, one per line, writing each result to `writer`.
///
/// Returns how many prompts were answered. EOF, cancellation and I/O errors
/// all end the loop; I/O errors are logged, not returned.
async fn serve_prompts<R, W>(
    reader: R,
    mut writer: W,
    generator: &dyn TextGenerator,
    system: Option<&str>,
    cancel: &CancellationToken,
) -> usize
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut served = 0;
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("End of input, shutting down...");
                break;
            }
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let prompt = match system {
            Some(system) => Prompt::with_system(system, line),
            None => Prompt::new(line),
        };
        // Let an in-flight request finish before honouring Ctrl+C
        let output = match generator.generate(&prompt).await {
            Ok(generation) => generation.text,
            Err(e) => {
                error!("Generation failed: {}", e);
                format!("error: {}", e.code())
            }
        };
        served += 1;

        let written = async {
            writer.write_all(output.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            error!("Failed to write response: {}", e);
            break;
        }
    }
    served
}

/// Reclaim the rotator from its shared handle and flush state to `state_path`
async fn save_shared(rotator: SharedRotator, state_path: &Path) -> Result<()> {
    let rotator = rotator
        .try_into_inner()
        .map_err(|_| anyhow::anyhow!("Rotator is still in use, state not saved"))?;
    rotator
        .shutdown(Some(state_path))
        .await
        .with_context(|| format!("Failed to save state to {}", state_path.display()))
}
