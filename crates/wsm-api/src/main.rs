use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wsm_api::Server;
use wsm_core::{ConfigManager, LoggingConfig};
use wsm_daemon::WorkspaceManager;

#[derive(Parser)]
#[command(name = "workspace-manager")]
#[command(about = "Watches a workspace, tracks its import graph and serves live status", long_about = None)]
#[command(version)]
struct Cli {
    /// Workspace root to watch
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Configuration file (TOML)
    #[arg(short, long, env = "WSM_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address, overrides server.host
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overrides server.port
    #[arg(short, long)]
    port: Option<u16>,

    /// Write the default configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = cli.init_config {
        ConfigManager::create_default_config(&path)
            .with_context(|| format!("writing default configuration to {}", path.display()))?;
        println!("Default configuration written to {}", path.display());
        return Ok(());
    }

    let manager_config = ConfigManager::load(cli.config.as_deref()).context("loading configuration")?;
    let config_path = manager_config.config_path().map(|p| p.display().to_string());
    let mut config = manager_config.into_config();
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_logging(&config.logging);
    info!(
        target: "wsm::main",
        config_file = config_path.as_deref().unwrap_or("<defaults>"),
        root = %cli.root.display(),
        "Starting workspace manager"
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let manager = Arc::new(WorkspaceManager::new(config).context("building workspace manager")?);
    manager
        .start(&cli.root)
        .await
        .with_context(|| format!("starting workspace manager for {}", cli.root.display()))?;

    let served = Server::new(manager.clone(), addr).run().await;
    manager.stop().await.context("stopping workspace manager")?;
    served.context("serving HTTP")?;

    info!(target: "wsm::main", "Workspace manager exited");
    Ok(())
}
