use anyhow::{Context, Result};
use apollo_hub_rs::broadcast::MagicHomeDispatcher;
use apollo_hub_rs::color::ColorState;
use apollo_hub_rs::devices::DeviceRegistry;
use apollo_hub_rs::logging::{LogConfig, RotationPeriod, install_panic_hook, setup_logging};
use apollo_hub_rs::settings::Settings;
use apollo_hub_rs::web::{self, AppState, AuthGate};
use apollo_hub_rs::Scanner;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "HTTP control surface for Magic Home RGB bulbs")]
struct Params {
    /// The port on which the API should be hosted.
    #[arg(short, long, default_value_t = 80, value_parser = clap::value_parser!(u16).range(1..=65535))]
    port: u16,
    /// Settings file path (if not set, default settings are used)
    #[arg(long, env = "APOLLO_SETTINGS")]
    settings: Option<PathBuf>,
    /// Directory for rotating log files (if not set, logs go to stdout only)
    #[arg(long)]
    log_dir: Option<String>,
    /// Log rotation period: minutely, hourly, daily or never
    #[arg(long, default_value = "daily")]
    log_rotation: RotationPeriod,
}

#[tokio::main]
async fn main() -> Result<()> {
    let params = Params::parse();

    let _log_guard = setup_logging(params.log_dir.as_ref().map(|dir| LogConfig {
        log_dir: dir.clone(),
        rotation: params.log_rotation,
        ..LogConfig::default()
    }))
    .context("Failed to set up logging")?;
    install_panic_hook();

    let settings = match &params.settings {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Invalid settings file {}", path.display()))?
            .unwrap_or_else(|| {
                warn!("Failed to read settings file, using default settings");
                Settings::default()
            }),
        None => Settings::default(),
    };

    let devices = Arc::new(DeviceRegistry::open(
        &settings.devices_path,
        Arc::new(Scanner::new()),
        settings.scan_timeout(),
    ));
    let color = Arc::new(ColorState::open(
        &settings.color_path,
        devices.clone(),
        Arc::new(MagicHomeDispatcher::new(settings.control_options())),
    ));
    let discovery = devices.start_discovery(settings.discovery_interval());

    let state = AppState {
        devices,
        color,
        auth: AuthGate::new(settings.auth_token.clone()),
    };
    let listener = web::bind(params.port)
        .await
        .with_context(|| format!("Failed to bind port {}", params.port))?;

    let served = web::serve(listener, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    })
    .await;

    discovery.stop().await;
    served.context("Web server error")
}
