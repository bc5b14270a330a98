use clap::Parser;
use page_scraper::{
    install_prometheus_exporter, load_config, setup_logging, validate_config_file, Cli,
    CliRunner, Commands,
};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting page-scraper v{}", env!("CARGO_PKG_VERSION"));

    // Validation never needs a browser
    if let Commands::Validate = args.command {
        let path = args
            .config
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("validate needs --config <FILE>"))?;
        return validate_config_file(path).await;
    }

    let config = load_config(&args).await?;

    if let Some(addr) = args.metrics_addr {
        install_prometheus_exporter(addr)?;
    }

    let cli_runner = CliRunner::new(config).await?;

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx);

    let result = tokio::select! {
        result = cli_runner.run(args.command) => {
            info!("Application completed");
            result
        }
        _ = shutdown_rx.recv() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    info!("Shutting down...");
    cli_runner.scraper.shutdown().await;

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("page-scraper stopped");
    Ok(())
}

fn setup_shutdown_handler(shutdown_tx: broadcast::Sender<()>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use signal::unix::{signal as unix_signal, SignalKind};

    let mut sigterm = match unix_signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to create SIGTERM handler: {}", e);
            if signal::ctrl_c().await.is_ok() {
                info!("Received SIGINT");
            }
            return;
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
    }
}
