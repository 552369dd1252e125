use bridge_host::error::BridgeHostError;
use bridge_host::logger::initialize as LoggerInitialize;
use bridge_host::relay;

use bridge_core::GATEWAY_LOGS_DIR;
use bridge_core::config::BridgeConfig;
use bridge_core::paths::detect_gateway_paths;
use bridge_core::{ConnectionState, GatewayBridge};

use std::env;
use std::fs::create_dir_all;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use log::{error, info};
use tokio::io::{BufReader, stdin, stdout};
use tokio::signal::ctrl_c;
use tokio::time::timeout;

/// Overrides the directory holding `bridge.json` (defaults to the gateway directory).
const CONFIG_DIR_ENV: &str = "BRIDGE_CONFIG_DIR";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BridgeHostError> {
    let paths = detect_gateway_paths()?;

    let log_dir = paths.base_dir.join(GATEWAY_LOGS_DIR);
    create_dir_all(&log_dir)?;

    // Initialize logger FIRST
    LoggerInitialize(&log_dir)?;

    info!("Bridge host starting");
    info!("Gateway directory: {} (from {})", paths.base_dir.display(), paths.source);

    let config_dir = env::var_os(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.base_dir.clone());
    let config = BridgeConfig::load(&config_dir)?;

    let (bridge, events) = GatewayBridge::spawn_with_paths(config, &paths);
    bridge.connect();

    let shutdown = bridge.clone();
    tokio::select! {
        result = relay::run(bridge, events, BufReader::new(stdin()), stdout()) => result?,
        _ = ctrl_c() => {
            info!("Interrupted, disconnecting");
            shutdown.disconnect();
            let mut state = shutdown.watch_state();
            let _ = timeout(
                SHUTDOWN_GRACE,
                state.wait_for(|s| s.state == ConnectionState::Disconnected),
            )
            .await;
        }
    }

    info!("Bridge host stopped");
    Ok(())
}
