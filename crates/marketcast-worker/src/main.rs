use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marketcast_core::WorkerConfig;
use marketcast_worker::{build_dispatcher, init_tracing, SqsConsumer};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "marketcast-worker")]
#[command(about = "Validate, convert and promote uploaded marketplace assets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume the notification queue until interrupted
    Run,
    /// Process one notification body read from a file, then exit
    Replay {
        /// Path to a JSON notification (S3 event or SNS envelope)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    tracing::info!(
        environment = %config.environment,
        production = config.is_production(),
        "Starting marketcast-worker"
    );

    let dispatcher = build_dispatcher(&config).await?;

    match cli.command {
        Command::Run => {
            let consumer = SqsConsumer::new(&config, dispatcher).await?;

            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    return;
                }
                tracing::info!("Shutdown signal received");
                signal.cancel();
            });

            consumer.run(shutdown).await
        }
        Command::Replay { file } => {
            let body = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let invocation = CancellationToken::new();
            let deadline = invocation.clone();
            let timeout = config.batch_timeout();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline.cancel();
            });

            let result = dispatcher.dispatch(&[body], &invocation).await;
            timer.abort();

            let report = result.context("Replay failed with a retryable error")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
