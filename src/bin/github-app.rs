//! GitOps worker process: polls for remediations awaiting GitHub
//! handling and turns each one into a pull request against the manifest
//! repository.

use anyhow::Context as AnyhowContext;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use heal8s::config::WorkerConfig;
use heal8s::gitops::{GitHubClient, Processor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,heal8s=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting heal8s GitHub App service v{}", env!("CARGO_PKG_VERSION"));

    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => {
            let config = WorkerConfig::from_file(&path)
                .with_context(|| format!("failed to load configuration from {path}"))?;
            info!(%path, "loaded configuration from file");
            config
        }
        Err(_) => {
            let config = WorkerConfig::from_env()
                .context("failed to load configuration from environment")?;
            info!("loaded configuration from environment");
            config
        }
    };

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Kubernetes client created successfully");

    let github = GitHubClient::new_app(
        config.github.app_id,
        config.github.installation_id,
        &config.github.private_key_path,
    )
    .context("failed to create GitHub client")?;
    info!("GitHub client created successfully");

    let poll_interval = config.poll_interval()?;
    let processor = Processor::new(
        client,
        github,
        config.kubernetes.namespace.clone(),
        config.processor.batch_size,
    );

    info!(?poll_interval, "heal8s GitHub App service started");

    tokio::select! {
        result = processor.run(poll_interval) => {
            if let Err(err) = result {
                error!(error = %err, "processor error");
                anyhow::bail!("processor error: {err}");
            }
        }
        () = shutdown_signal() => {
            // Give in-flight work a moment to settle before exiting.
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    info!("heal8s GitHub App service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("received SIGTERM, shutting down gracefully");
        },
    }
}
