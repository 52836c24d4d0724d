use clap::Parser;
use pagefetch::{setup_logging, Cli, CliRunner, EngineConfig, PolicyStore};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose).map_err(|e| anyhow::anyhow!("logging setup: {e}"))?;

    info!("Starting pagefetch v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args).await?;
    let policies = load_policies(&args).await?;

    let runner = CliRunner::new(config, policies)?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx.clone());

    let result = tokio::select! {
        result = runner.run(args.command) => {
            info!("Run completed");
            result
        }
        _ = shutdown_rx.recv() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    // Deterministic release: contexts, then browser, then handler, even on signal.
    info!("Shutting down...");
    runner.engine.shutdown().await;

    if let Err(e) = result {
        error!("Application error: {e}");
        std::process::exit(1);
    }

    info!("pagefetch stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = if let Some(config_path) = &args.config {
        let content = tokio::fs::read_to_string(config_path).await?;
        serde_json::from_str(&content)?
    } else {
        EngineConfig::default()
    };

    // Override with CLI arguments
    if let Some(timeout) = args.timeout {
        config.timeout = std::time::Duration::from_secs(timeout);
    }
    if let Some(retries) = args.retries {
        config.max_retries = retries;
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }

    config.validate()?;

    info!("Configuration loaded");
    info!("Per-attempt timeout: {:?}", config.timeout);
    info!("Retry ceiling: {}", config.max_retries);
    info!("Backoff base: {}s", config.backoff_base_s);

    Ok(config)
}

async fn load_policies(args: &Cli) -> anyhow::Result<PolicyStore> {
    match &args.policies {
        Some(path) => {
            let content = tokio::fs::read_to_string(path).await?;
            let store: PolicyStore = serde_json::from_str(&content)?;
            info!(
                "Policy table loaded from {} ({} explicit domains)",
                path.display(),
                store.len()
            );
            Ok(store)
        }
        None => Ok(PolicyStore::default()),
    }
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to create SIGINT handler");
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to create SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        let _ = shutdown_tx.send(());
    })
}
