// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod bus_client;
mod bus_task;
mod config;
mod console;
mod dispatcher;
mod game_task;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use pinball_app::{init_logging, normalize_name, ConfigFile};
use pinball_backend::{register_builtin_backends_on, BusAccess, RegistrationContext};
use pinball_core::{DynResult, GameStateMachine, GameView};
use pinball_scores::HighScoreStore;

use bus_client::BusClient;
use config::ServerConfig;
use console::{ConsoleRenderer, LogAudio};
use dispatcher::EdgeEventDispatcher;
use game_task::{route_events, GameExecutor, GameIo, GAME_EVENT_CHANNEL_BUFFER};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - pinball cabinet bridge");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Bus backend to use (modbus, sim)
    #[arg(short = 'b', long = "bus")]
    bus: Option<String>,
    /// Controller host name or IP
    #[arg(long = "host")]
    host: Option<String>,
    /// Controller TCP port
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// JSON device table, overrides `devices_file`
    #[arg(short = 'd', long = "devices", value_name = "FILE")]
    devices: Option<PathBuf>,
}

/// Resolved bus settings after merging config file and CLI arguments.
struct ResolvedBus {
    backend: String,
    access: BusAccess,
}

fn resolve_bus(
    cli: &Cli,
    cfg: &ServerConfig,
    registry: &RegistrationContext,
) -> DynResult<ResolvedBus> {
    let backend = normalize_name(cli.bus.as_deref().unwrap_or(&cfg.bus.bus_type));
    if !registry.is_backend_registered(&backend) {
        return Err(format!(
            "Unknown bus backend '{}' (available: {})",
            backend,
            registry.registered_backends().join(", ")
        )
        .into());
    }

    let access = if backend == "sim" {
        BusAccess::Sim
    } else {
        let host = cli.host.as_deref().unwrap_or(&cfg.bus.host);
        let port = cli.port.unwrap_or(cfg.bus.port);
        BusAccess::Tcp {
            addr: format!("{}:{}", host, port),
            unit_id: cfg.bus.unit_id,
            timeout: Duration::from_millis(cfg.bus.timeout_ms),
        }
    };
    Ok(ResolvedBus { backend, access })
}

fn tick_interval(tick_rate_hz: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(tick_rate_hz.max(1)))
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut backends = RegistrationContext::new();
    register_builtin_backends_on(&mut backends);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_toml());
        return Ok(());
    }

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let devices = cfg.device_registry(cli.devices.as_deref())?;
    info!(
        "Loaded {} devices ({} polled, {} scoring)",
        devices.len(),
        devices.inputs().count(),
        devices.scoring().count()
    );
    for problem in cfg.check_game_devices(&devices) {
        warn!("{}", problem);
    }
    let devices = Arc::new(devices);

    let resolved = resolve_bus(&cli, &cfg, &backends)?;
    match &resolved.access {
        BusAccess::Tcp { addr, unit_id, .. } => info!(
            "Starting pinball-server (bus: {}, controller {} unit {})",
            resolved.backend, addr, unit_id
        ),
        BusAccess::Sim => info!("Starting pinball-server (bus: {})", resolved.backend),
    }
    let bus = backends.build_bus(&resolved.backend, resolved.access)?;

    let scores = HighScoreStore::open(&cfg.scores.path, cfg.scores.max_entries);

    let bus_client = Arc::new(BusClient::start(
        bus,
        devices.clone(),
        Duration::from_millis(cfg.behavior.poll_interval_ms),
    ));
    let dispatcher = Arc::new(EdgeEventDispatcher::start(bus_client.subscribe()));

    let (events_tx, events_rx) = mpsc::channel::<String>(GAME_EVENT_CHANNEL_BUFFER);
    route_events(&dispatcher, &devices, events_tx);

    let console_dispatcher = dispatcher.clone();
    let render = ConsoleRenderer::spawn(move |event| {
        let handled = console_dispatcher.emit(event);
        info!("console event '{}' ({} handlers)", event, handled);
    });

    let machine = GameStateMachine::new(cfg.game.clone(), &devices);
    let io = GameIo {
        render: Box::new(render),
        audio: Box::new(LogAudio::new()),
        scores: Box::new(scores),
    };
    let (view_tx, view_rx) = watch::channel(GameView::default());
    // Keep receivers alive so channels don't close prematurely
    let _view_rx = view_rx;
    let executor = GameExecutor::new(machine, bus_client.clone(), io, view_tx);

    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tick = tick_interval(cfg.behavior.tick_rate_hz);
    task_handles.push(tokio::spawn(async move {
        executor.run(tick, events_rx, shutdown_rx).await;
    }));

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);

    for handle in task_handles {
        if let Err(e) = handle.await {
            error!("Task ended abnormally: {}", e);
        }
    }
    dispatcher.stop().await;
    bus_client.stop().await;
    info!("pinball-server stopped");
    Ok(())
}
