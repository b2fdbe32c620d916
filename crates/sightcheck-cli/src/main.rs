//! Sightcheck CLI
//!
//! The `sightcheck` command classifies an image as a real photograph or
//! AI-generated using the providers configured in a TOML file or the
//! environment.
//!
//! ## Commands
//!
//! - `analyze`: Classify a local file or a remote URL
//! - `proxy`: Fetch a remote image and print it as a data URI
//! - `providers`: List configured providers in dispatch order

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sightcheck_core::{
    ClassificationResponse, Classifier, Config, ImageInput, UploadedFile,
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "sightcheck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-vs-generated image classification", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file (default: build from environment variables)
    #[arg(short, long, global = true, env = "SIGHTCHECK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify an image
    Analyze {
        /// Local image file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// MIME type of the file (guessed from the extension if omitted)
        #[arg(long)]
        content_type: Option<String>,

        /// Remote image URL, used when no file is given
        #[arg(short, long)]
        url: Option<String>,
    },

    /// Fetch a remote image and print it as a data URI
    Proxy {
        #[arg(short, long)]
        url: String,
    },

    /// List configured providers
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    sightcheck_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            file,
            content_type,
            url,
        } => {
            let classifier =
                Classifier::from_config(&config).context("Failed to initialise providers")?;
            let input = build_input(file.as_deref(), content_type.as_deref(), url.as_deref())?;
            let response = cmd_analyze(&classifier, input).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                bail!(
                    "classification failed: {}",
                    response.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Commands::Proxy { url } => {
            let classifier =
                Classifier::from_config(&config).context("Failed to initialise providers")?;
            let data_uri = classifier.proxy(&url).await?;
            println!("{data_uri}");
            Ok(())
        }
        Commands::Providers => {
            for line in cmd_providers(&config) {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::from_env().context("Failed to build config from environment"),
    }
}

/// MIME type for common image extensions; empty when unknown.
fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "",
    }
}

fn build_input(
    file: Option<&Path>,
    content_type: Option<&str>,
    url: Option<&str>,
) -> Result<ImageInput> {
    let file = match file {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Some(UploadedFile {
                bytes,
                content_type: content_type.unwrap_or(guess_mime(path)).to_string(),
                file_name,
            })
        }
        None => None,
    };

    Ok(ImageInput {
        file,
        url: url.map(str::to_string),
    })
}

async fn cmd_analyze(classifier: &Classifier, input: ImageInput) -> ClassificationResponse {
    let response = classifier.analyze(input).await;
    info!(success = response.success, "analysis finished");
    response
}

fn cmd_providers(config: &Config) -> Vec<String> {
    config
        .describe()
        .into_iter()
        .enumerate()
        .map(|(i, line)| format!("{}. {}", i + 1, line))
        .collect()
}
