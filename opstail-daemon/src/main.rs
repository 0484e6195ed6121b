//! opstail-daemon entry point.
//!
//! Loads configuration, initializes logging and metric descriptions,
//! then runs the tail pipeline until a shutdown signal arrives.

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use opstail_core::config::OpstailConfig;
use opstail_core::error::{ConfigError, OpstailError};
use opstail_ingest::{IngestConfig, TailPipelineBuilder};

use crate::cli::DaemonCli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonCli::parse();

    // Configuration: file -> env overrides -> CLI overrides
    let mut config = match OpstailConfig::load(&args.config).await {
        Ok(config) => config,
        Err(OpstailError::Config(ConfigError::FileNotFound { path })) => {
            // Missing config file is not fatal: defaults plus env/CLI
            // overrides are a valid deployment.
            let mut config = OpstailConfig::default();
            config.apply_env_overrides();
            eprintln!("config file {path} not found, using defaults");
            config
        }
        Err(e) => return Err(e).context("failed to load configuration"),
    };

    if let Some(source) = args.source {
        config.tail.source_path = source;
    }
    if let Some(level) = args.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.general.log_format = format;
    }
    config.validate().context("invalid configuration")?;

    if args.validate {
        println!("configuration OK: {}", args.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    opstail_core::metrics::describe_all();

    tracing::info!(
        source = config.tail.source_path.as_str(),
        event_url = config.forward.event_url.as_str(),
        "opstail-daemon starting"
    );

    let ingest_config = IngestConfig::from_core(&config)
        .map_err(|e| anyhow::anyhow!("failed to derive ingest config: {}", e))?;

    let mut pipeline = TailPipelineBuilder::new()
        .config(ingest_config)
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("failed to build tail pipeline: {}", e))?;

    let cancel = CancellationToken::new();
    let pipeline_cancel = cancel.clone();

    let pipeline_task = tokio::spawn(async move {
        if let Err(e) = pipeline.run(pipeline_cancel).await {
            tracing::error!(error = %e, "tail pipeline exited with error");
        }
        pipeline
    });

    tracing::info!("opstail-daemon running — press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    cancel.cancel();
    let pipeline = pipeline_task
        .await
        .map_err(|e| anyhow::anyhow!("pipeline task panicked: {}", e))?;

    tracing::info!(
        lines = pipeline.lines_read(),
        forwarded = pipeline.forwarded_count(),
        failures = pipeline.failure_count(),
        "opstail-daemon shut down"
    );
    Ok(())
}
