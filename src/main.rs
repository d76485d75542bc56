use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hostop_engine::{
    InstanceManager, LaunchCvdProcedureBuilder, OperationRegistry, SignedUrlArtifactDownloader,
    TokioProcessRunner,
};
use hostop_server::{AppState, ServerConfig};
use hostop_telemetry::TelemetryConfig;
use tracing::{info, warn, Level};

/// Host orchestrator: device signaling broker and CVD instance manager.
#[derive(Debug, Parser)]
#[command(name = "hostop", version)]
struct Cli {
    /// JSON settings file, merged over the built-in defaults.
    #[arg(long, env = "HOSTOP_SETTINGS")]
    settings: Option<PathBuf>,

    /// Override `server.http_port`.
    #[arg(long)]
    http_port: Option<u16>,

    /// Override `device.socket_path`.
    #[arg(long)]
    socket_path: Option<String>,

    /// Default log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    hostop_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        module_levels: Vec::new(),
        json: cli.log_json,
    })?;

    let mut settings =
        hostop_settings::load_settings(cli.settings.as_deref()).context("loading settings")?;
    if let Some(port) = cli.http_port {
        settings.server.http_port = port;
    }
    if let Some(path) = cli.socket_path {
        settings.device.socket_path = path;
    }

    info!("Starting host orchestrator");

    let downloader = SignedUrlArtifactDownloader::new(
        reqwest::Client::new(),
        settings.orchestrator.artifact_service_url.clone(),
    );
    let builder = LaunchCvdProcedureBuilder::new(
        &settings.orchestrator,
        Arc::new(downloader),
        Arc::new(TokioProcessRunner),
    );
    let instances = Arc::new(InstanceManager::new(
        Arc::new(OperationRegistry::new()),
        Arc::new(builder),
    ));

    let state = AppState::new(&settings, instances);
    let handle = hostop_server::start(ServerConfig::from_settings(&settings), state)
        .await
        .context("starting server")?;

    info!(
        addr = %handle.addr,
        socket = %handle.socket_path.display(),
        "Host orchestrator ready"
    );
    if let Some(port) = settings.server.https_port {
        warn!(
            https_port = port,
            tls_cert_dir = ?settings.server.tls_cert_dir,
            "HTTPS is expected to be terminated by a fronting proxy"
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;

    info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
