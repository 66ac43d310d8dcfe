// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Modbus-TCP stand-in for the cabinet controller, driven from the terminal.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use pinball_app::init_logging;
use pinball_backend::{serve_sim, SimController};
use pinball_core::{DeviceRegistry, DynResult};

use commands::{execute, parse_command, Command, HELP};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - simulated cabinet controller");

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Address to accept Modbus-TCP clients on
    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0:5020")]
    listen: String,
    /// JSON device table (`{"devices": {...}}`)
    #[arg(short = 'd', long = "devices", value_name = "FILE")]
    devices: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let content = std::fs::read_to_string(&cli.devices)
        .map_err(|e| format!("Failed to read {}: {}", cli.devices.display(), e))?;
    let registry = DeviceRegistry::from_json_str(&content)
        .map_err(|e| format!("Invalid device table {}: {}", cli.devices.display(), e))?;
    info!(
        "Loaded {} devices from {}",
        registry.len(),
        cli.devices.display()
    );

    let controller = SimController::new();
    let listener = TcpListener::bind(&cli.listen).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(serve_sim(listener, controller.clone(), shutdown_rx));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => match execute(&controller, &registry, &command) {
                        Ok(out) => println!("{}", out),
                        Err(e) => println!("error: {}", e),
                    },
                    Err(e) => println!("error: {}", e),
                },
                Ok(None) => {
                    info!("stdin closed; serving until Ctrl+C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("stdin read failed: {}", e);
                    stdin_open = false;
                }
            },
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                break;
            }
        }
    }

    info!("Stopping simulator");
    let _ = shutdown_tx.send(true);
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Simulator server error: {}", e),
        Err(e) => error!("Simulator server task failed: {}", e),
    }
    Ok(())
}
