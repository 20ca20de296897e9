use fleet_server::config::ServerConfig;
use fleet_server::node::Node;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args for config file path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "fleet.yaml".to_string());

    // Load configuration (try file first, fall back to env)
    let from_file = std::path::Path::new(&config_path).exists();
    let config = if from_file {
        ServerConfig::load_from_file(&config_path)?
    } else {
        ServerConfig::load_from_env()?
    };

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level()?)
        .init();

    if from_file {
        tracing::info!("Loaded configuration from: {}", config_path);
    } else {
        tracing::warn!("Config file {} not found, loaded from environment variables", config_path);
    }
    tracing::info!("HTTP address: {}", config.http_addr);
    tracing::info!("gRPC address: {}", config.grpc_addr);

    let mut node = Node::new(config).await?;
    node.start().await?;

    tracing::info!("Fleet server is ready");

    let signal = shutdown_signal().await?;
    tracing::info!(signal, "Received shutdown signal, gracefully shutting down...");

    node.shutdown().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
