//! Edge Perception - Main Entry Point

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use edge_perception::constants;
use edge_perception::logic::config::Settings;
use edge_perception::logic::inference_loop::{InferenceLoop, ShutdownSignal};
use edge_perception::logic::model::validate_model;

#[derive(Debug, Parser)]
#[command(name = "edge-perception", version, about = "Acquire, infer and publish on a fixed interval")]
struct Cli {
    /// Settings file (defaults to $EDGE_SETTINGS_PATH or config/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the acquisition loop until Ctrl-C
    Run,
    /// Load the configured model and run it once on synthetic input
    Validate,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cli.config),
        Command::Validate => validate(cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_settings(path: Option<PathBuf>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => Settings::load(&path).with_context(|| format!("loading settings from {}", path.display())),
        None => Settings::from_env()
            .with_context(|| format!("loading settings from {}", constants::get_settings_path())),
    }
}

fn run(config: Option<PathBuf>) -> anyhow::Result<()> {
    log::info!("Starting {} v{}...", constants::APP_NAME, constants::APP_VERSION);

    let settings = load_settings(config)?;
    let shutdown = ShutdownSignal::new();

    let mut inference_loop =
        InferenceLoop::from_settings(&settings, shutdown.clone()).context("startup failed")?;

    spawn_signal_listener(shutdown);

    inference_loop.run();
    Ok(())
}

fn validate(config: Option<PathBuf>) -> anyhow::Result<()> {
    let settings = load_settings(config)?;

    let report = validate_model(&settings.model)
        .with_context(|| format!("validating {}", settings.model.path))?;

    if !report.shapes_agree() {
        log::warn!(
            "Configured input shape {:?} differs from model's {:?}",
            report.configured_input_shape,
            report.declared_input_shape
        );
    }
    log::info!(
        "Validation passed ({} backend, output shape {:?})",
        report.backend.as_str(),
        report.output_shape
    );
    Ok(())
}

/// Ctrl-C on a dedicated runtime thread; the loop sees it at its next sleep.
fn spawn_signal_listener(shutdown: ShutdownSignal) {
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                log::warn!("Failed to create tokio runtime for signal handling: {}", e);
                return;
            }
        };

        rt.block_on(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Ctrl-C received, stopping after the current cycle");
                    shutdown.trigger();
                }
                Err(e) => log::warn!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    });
}
