//! File intake service.
//!
//! Usage: `file-intake [config.yaml]`
//!
//! Watches the configured directory, renames each new file to
//! `<timestamp>-latest<ext>` (stripping the marker from the previous one),
//! and runs the configured analysis command on it.

use anyhow::Result;
use file_intake::prelude::*;
use file_intake::logging;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG: &str = "config.yaml";

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        eprintln!("\nUsage: file-intake [config_path]");
        eprintln!("Default: file-intake {}\n", DEFAULT_CONFIG);
        std::process::exit(1);
    }

    if let Err(e) = run(config_path).await {
        tracing::error!("Fatal error: {:#}", e);
        eprintln!("\nFATAL ERROR: {:#}\n", e);
        std::process::exit(1);
    }
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = ServiceConfig::load(&config_path)?;
    logging::init(config.log_level, config.log_file.as_deref())?;

    tracing::info!("Configuration loaded from: {}", config_path.display());
    tracing::info!(
        watch_path = %config.watch_path.display(),
        extensions = ?config.file_extensions,
        dry_run = config.dry_run,
        timestamp_format = %config.timestamp_format,
        process_existing_files = config.process_existing_files,
        "Initializing file intake service"
    );

    let mut service = IntakeService::new(config);
    let mut console = ConsoleReporter::new();

    if service.config().dry_run {
        tracing::info!("Dry run mode enabled - skipping trigger availability check");
    } else if service.trigger_available().await {
        tracing::info!("{} is available", service.config().trigger_command);
    } else {
        tracing::warn!("{} not found or not available", service.config().trigger_command);
        console.print(&format!(
            "\nWARNING: {} is not available!\nThe service will run, but triggering will fail.\n",
            service.config().trigger_command
        ));
    }

    print_banner(&console, service.config());
    console.listen(service.subscribe());

    service.start()?;
    if service.is_using_polling() {
        console.print("Note: using polling fallback for this directory");
    }
    console.print("\nWaiting for new files...\nPress Ctrl+C to stop the service\n");

    let (reason, report) = service
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    if reason == StopReason::WatchDirectoryGone {
        console.print("\nERROR: Watch directory was deleted or is no longer accessible");
    }
    if !report.abandoned.is_empty() {
        console.print(&format!(
            "{} queued file(s) were not processed",
            report.abandoned.len()
        ));
    }

    drop(service);
    console.finish(Duration::from_secs(1)).await;
    console.print("Service stopped");
    Ok(())
}

fn print_banner(console: &ConsoleReporter, config: &ServiceConfig) {
    let rule = "=".repeat(80);
    let extensions = if config.file_extensions.is_empty() {
        "ALL file types".to_string()
    } else {
        config.file_extensions.join(", ")
    };

    console.print(&format!(
        "\n{rule}\nFILE INTAKE SERVICE STARTED\n{rule}\n\
         Watching directory: {}\n\
         Prompt: {}\n\
         Extensions: {}\n\
         Timestamp format: {}\n\
         Dry run mode: {}\n\
         Log level: {}\n\
         {rule}",
        config.watch_path.display(),
        config.claude_prompt,
        extensions,
        config.timestamp_format,
        if config.dry_run { "ENABLED" } else { "DISABLED" },
        config.log_level,
    ));
}
