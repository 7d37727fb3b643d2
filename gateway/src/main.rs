mod config;

use clap::Parser;
use config::Config;
use directory::Directory;
use metrics_exporter_statsd::StatsdBuilder;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(about = "API gateway: composite transactions and response caching")]
struct Cli {
    /// Path to the gateway YAML config file
    #[arg(long)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum GatewayStartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("could not load endpoint definitions: {0}")]
    Directory(#[from] directory::DirectoryError),
    #[error("could not install statsd exporter: {0}")]
    Statsd(String),
    #[error(transparent)]
    Dispatcher(#[from] dispatcher::GatewayError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), GatewayStartupError> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_file(&cli.config)?;

    if let Some(statsd) = &config.statsd {
        let recorder = StatsdBuilder::from(&statsd.host, statsd.port)
            .build(Some("gateway"))
            .map_err(|e| GatewayStartupError::Statsd(e.to_string()))?;
        metrics::set_global_recorder(recorder)
            .map_err(|e| GatewayStartupError::Statsd(e.to_string()))?;
    }

    let directory = Arc::new(Directory::load(&config.endpoints_file)?);
    tracing::info!(
        endpoints = directory.definitions().len(),
        file = %config.endpoints_file.display(),
        "Endpoint directory loaded"
    );

    spawn_reload_handler(directory.clone());

    let admin_directory = directory.clone();
    let admin_listener = config.admin_listener.clone();
    tokio::spawn(async move {
        let service =
            AdminService::<_, std::io::Error>::new(move || admin_directory.is_ready());
        if let Err(e) =
            run_http_service(&admin_listener.host, admin_listener.port, service).await
        {
            tracing::error!(error = %e, "Admin service failed");
        }
    });

    dispatcher::run(
        &config.listener.host,
        config.listener.port,
        directory,
        &config.backend,
        config.cache,
    )
    .await?;

    Ok(())
}

/// Re-reads the endpoint definition file on SIGHUP. A failed reload keeps
/// the previous definition set.
#[cfg(unix)]
fn spawn_reload_handler(directory: Arc<Directory>) {
    tokio::spawn(async move {
        let Ok(mut hangup) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        else {
            tracing::warn!("Could not install SIGHUP handler, reload disabled");
            return;
        };
        while hangup.recv().await.is_some() {
            match directory.reload() {
                Ok(()) => tracing::info!("Endpoint directory reloaded"),
                Err(e) => tracing::error!(error = %e, "Endpoint directory reload failed"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_handler(_directory: Arc<Directory>) {}
