//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if let Some(workers) = args.workers {
        info!(workers, "Overriding worker count from CLI");
        config = config.with_num_workers(workers);
        config.check().context("Invalid worker override")?;
    }

    info!(
        uri = %config.uri,
        targets = config.targets.len(),
        workers = config.num_workers,
        mailbox_capacity = config.mailbox_capacity,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    let pipeline = Pipeline::new(PipelineConfig {
        sink: config,
        rows: args.rows,
        keys: args.keys,
        flush_every: args.flush_every,
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    })?;

    // The pipeline closes the sink itself once the token fires.
    let shutdown = CancellationToken::new();
    let signal_guard = shutdown.clone();
    let signal_task = tokio::spawn(async move {
        if wait_for_shutdown_signal().await {
            warn!("Received shutdown signal, stopping pipeline...");
            signal_guard.cancel();
        }
    });

    info!("Starting pipeline...");
    let result = pipeline.run(shutdown).await;
    signal_task.abort();

    let stats = result.context("Pipeline execution failed")?;
    info!(
        rows_emitted = stats.rows_emitted,
        flushes = stats.flushes,
        duration_secs = stats.duration.as_secs_f64(),
        rows_per_sec = format!("{:.2}", stats.rows_per_sec()),
        "Pipeline completed successfully"
    );
    stats.print_summary();

    info!("cdc-pubsub finished");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// Returns `false` if no handler could be installed.
async fn wait_for_shutdown_signal() -> bool {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => true,
        _ = terminate => true,
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &contracts::SinkConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Sink:");
    println!("  URI: {}", config.uri);
    println!("  Workers: {}", config.num_workers);
    println!("  Mailbox capacity: {}", config.mailbox_capacity);
    println!("  Format: {} / envelope {}", config.format, config.envelope);

    println!("\nTopics ({}):", config.targets.len());
    for (source_id, topic) in config.topic_names() {
        println!("  - source {} -> {}", source_id, topic);
    }

    println!();
}
