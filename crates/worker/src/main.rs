//! Remote worker for distributed stage execution.
//!
//! Pops task envelopes from `<queue_name>:tasks`, runs the named stage with
//! the same registry the controller uses and pushes the reply. Runs until
//! SIGINT or SIGTERM; a task already taken is finished and answered first.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seqrun_core::PipelineConfig;
use seqrun_dispatch::{MessageQueue, QueueWorker, RedisQueue};

#[derive(Parser, Debug)]
#[command(name = "seqrun-worker", about = "Consume pipeline stage tasks from the message queue")]
struct Cli {
    /// Pipeline configuration file (stage programs, queue settings).
    config: PathBuf,

    /// Number of tasks executed concurrently by this process.
    #[arg(short = 'n', long = "concurrency", default_value_t = 1)]
    concurrency: usize,

    /// Overrides `distributed.queue_url`.
    #[arg(long = "queue-url")]
    queue_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seqrun_worker=info,seqrun_dispatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(url) = cli.queue_url {
        config.distributed.queue_url = url;
    }

    let registry = Arc::new(seqrun_pipeline::stages::registry()?);
    let queue: Arc<dyn MessageQueue> = Arc::new(
        RedisQueue::connect(&config.distributed.queue_url)
            .await
            .with_context(|| format!("connecting to {}", config.distributed.queue_url))?,
    );
    let config = Arc::new(config);

    tracing::info!(
        queue_url = %config.distributed.queue_url,
        queue_name = %config.distributed.queue_name,
        concurrency = cli.concurrency,
        "Worker starting",
    );

    let cancel = CancellationToken::new();
    let mut handles = Vec::with_capacity(cli.concurrency.max(1));
    for _ in 0..cli.concurrency.max(1) {
        let worker = QueueWorker::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&config),
            &config.distributed.queue_name,
        );
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { worker.serve(cancel).await }));
    }

    shutdown_signal().await;
    cancel.cancel();

    let mut handled = 0;
    for handle in handles {
        match handle.await {
            Ok(n) => handled += n,
            Err(e) => tracing::error!(error = %e, "Worker task panicked"),
        }
    }
    tracing::info!(handled, "Worker stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), finishing in-flight tasks");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing in-flight tasks");
        }
    }
}
