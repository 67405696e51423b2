//! Mask fit pipeline CLI.
//!
//! Thin front end over the service dispatcher: each subcommand builds the
//! matching request envelope, dispatches it, and prints the JSON response to
//! stdout. Logs go to stderr so the output stays machine-readable.
//!
//! # Usage
//!
//! ```bash
//! # Train the configured backend on a local dataset export
//! maskfit train --data-url ./data/fit_tests.json
//!
//! # Rank the whole catalog for one face
//! maskfit infer --measurements '{"nose_mm": 52, "chin_mm": 84,
//!     "top_cheek_mm": 98, "mid_cheek_mm": 74}'
//!
//! # Rank a shortlist only
//! maskfit infer --measurements @face.json --mask-ids 3,7,11
//!
//! # Preload the latest artifact
//! maskfit warmup
//!
//! # Debug logging
//! RUST_LOG=debug maskfit train --data-url ./data/fit_tests.json
//! ```
//!
//! Exit status is 0 when the response status code is 2xx, 1 otherwise.

use std::io;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, EnvFilter};

use maskfit_core::config::{Config, LoggingConfig};
use maskfit_service::{Dispatcher, ServiceContext};

#[derive(Parser)]
#[command(name = "maskfit", version, about = "Respirator fit probability pipeline")]
struct Cli {
    /// Load configuration from this TOML file instead of the config/ lookup
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the configured model backend and publish the artifact
    Train(TrainArgs),
    /// Rank the mask catalog for one set of facial measurements
    Infer(InferArgs),
    /// Preload the latest artifact into the model cache
    Warmup,
}

#[derive(Args)]
struct TrainArgs {
    /// Dataset location: a file:// URL or a local path
    #[arg(long)]
    data_url: Option<String>,

    /// Override the configured epoch budget
    #[arg(long)]
    epochs: Option<usize>,

    /// Pass/fail field probed first in the dataset
    #[arg(long)]
    target_col: Option<String>,
}

#[derive(Args)]
struct InferArgs {
    /// Facial measurements as a JSON object, or @path to read one from a file
    #[arg(long)]
    measurements: String,

    /// Restrict the ranking to these mask ids
    #[arg(long, value_delimiter = ',')]
    mask_ids: Option<Vec<i64>>,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.clone()));
    let builder = fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false);
    if logging.format == "compact" {
        builder.compact().init();
    } else {
        builder.init();
    }
}

/// Turn a subcommand into the dispatcher's request envelope.
fn build_envelope(command: &Commands) -> Result<Value> {
    match command {
        Commands::Train(args) => Ok(json!({
            "method": "train",
            "data_url": args.data_url,
            "epochs": args.epochs,
            "target_col": args.target_col,
        })),
        Commands::Infer(args) => {
            let raw = match args.measurements.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read measurements file {}", path))?,
                None => args.measurements.clone(),
            };
            let measurements: Value = serde_json::from_str(&raw)
                .context("--measurements must be a JSON object")?;
            Ok(json!({
                "method": "infer",
                "facial_measurements": measurements,
                "mask_ids": args.mask_ids,
            }))
        }
        Commands::Warmup => Ok(json!({ "method": "warmup" })),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    init_logging(&config.logging);
    tracing::debug!(
        environment = %config.environment,
        backend = %config.training.backend,
        registry = %config.registry.backend,
        "configuration loaded"
    );

    let envelope = build_envelope(&cli.command)?;
    let dispatcher = Dispatcher::new(ServiceContext::from_config(config)?);
    let response = dispatcher.dispatch(envelope).await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_envelope_carries_overrides() {
        let command = Commands::Train(TrainArgs {
            data_url: Some("./data/fit_tests.json".to_string()),
            epochs: Some(40),
            target_col: None,
        });
        let envelope = build_envelope(&command).unwrap();
        assert_eq!(envelope["method"], "train");
        assert_eq!(envelope["data_url"], "./data/fit_tests.json");
        assert_eq!(envelope["epochs"], 40);
        assert!(envelope["target_col"].is_null());
    }

    #[test]
    fn test_infer_envelope_parses_inline_measurements() {
        let command = Commands::Infer(InferArgs {
            measurements: r#"{"nose_mm": 52.0, "chin_mm": 84.0}"#.to_string(),
            mask_ids: Some(vec![3, 7]),
        });
        let envelope = build_envelope(&command).unwrap();
        assert_eq!(envelope["method"], "infer");
        assert_eq!(envelope["facial_measurements"]["nose_mm"], 52.0);
        assert_eq!(envelope["mask_ids"], json!([3, 7]));
    }

    #[test]
    fn test_infer_envelope_rejects_bad_json() {
        let command = Commands::Infer(InferArgs {
            measurements: "{not json".to_string(),
            mask_ids: None,
        });
        assert!(build_envelope(&command).is_err());
    }

    #[test]
    fn test_infer_envelope_reads_measurements_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"nose_mm": 50.0}}"#).unwrap();

        let command = Commands::Infer(InferArgs {
            measurements: format!("@{}", file.path().display()),
            mask_ids: None,
        });
        let envelope = build_envelope(&command).unwrap();
        assert_eq!(envelope["facial_measurements"]["nose_mm"], 50.0);
    }

    #[test]
    fn test_warmup_envelope() {
        let envelope = build_envelope(&Commands::Warmup).unwrap();
        assert_eq!(envelope["method"], "warmup");
        assert!(envelope.get("facial_measurements").is_none());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "maskfit",
            "train",
            "--data-url",
            "./fit_tests.json",
            "--epochs",
            "30",
        ])
        .unwrap();
        match cli.command {
            Commands::Train(args) => {
                assert_eq!(args.data_url.as_deref(), Some("./fit_tests.json"));
                assert_eq!(args.epochs, Some(30));
            }
            _ => panic!("expected train subcommand"),
        }

        let cli = Cli::try_parse_from([
            "maskfit",
            "infer",
            "--measurements",
            "{}",
            "--mask-ids",
            "1,2,3",
        ])
        .unwrap();
        match cli.command {
            Commands::Infer(args) => {
                assert_eq!(args.mask_ids, Some(vec![1, 2, 3]));
            }
            _ => panic!("expected infer subcommand"),
        }
    }
}
