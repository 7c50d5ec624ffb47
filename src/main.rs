use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use microbit_uart_bridge_lib::commands::LinkHandle;
use microbit_uart_bridge_lib::config::{AppConfig, default_config_path};
use microbit_uart_bridge_lib::core::BluetoothManager;
use microbit_uart_bridge_lib::core::controller::Role;
use microbit_uart_bridge_lib::core::gpio::SharedLevel;
use microbit_uart_bridge_lib::core::protocol::Command;
use microbit_uart_bridge_lib::logging::{TelemetryLogger, parse_level};
use microbit_uart_bridge_lib::state::{AppState, ButtonEdges};

#[derive(Parser)]
#[command(name = "microbit-uart-bridge")]
#[command(about = "Keeps a BLE UART link to a micro:bit and mirrors its LED", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Advertised name to look for
    #[arg(long)]
    name: Option<String>,
    /// MAC address of the peer
    #[arg(long)]
    address: Option<String>,
    #[arg(long, value_enum)]
    role: Option<Role>,
    /// error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<String>,
    /// Write the effective config to the config path and exit
    #[arg(long)]
    write_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let mut config = AppConfig::load_config(&config_path).await?;
    if let Some(name) = cli.name {
        config.link.target_name = name;
    }
    if let Some(address) = cli.address {
        config.link.target_address = Some(address);
    }
    if let Some(role) = cli.role {
        config.link.role = role;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    TelemetryLogger::init_or_fallback(parse_level(&config.log_level));

    if cli.write_default_config {
        config.save_config(&config_path).await?;
        return Ok(());
    }

    info!("Starting AppState initialization as {:?}.", config.link.role);
    let central = Arc::new(BluetoothManager::new(config.link.show_advertisements).await?);
    let mut state = AppState::new(config.link.clone(), central);
    let cancel = CancellationToken::new();

    let button = SharedLevel::new(config.link.button_active_low);
    let button_task = state.spawn_button(button.clone(), cancel.clone());
    let link_task = state.spawn_link(cancel.clone());
    let printer = state.link.on_command_received(|command| async move {
        println!("<- {}", command);
    });

    let console = tokio::spawn(console(state.link.clone(), button, state.button_edges(), cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();
    button_task.await?;
    if let Some(link_task) = link_task {
        link_task.await?;
    }
    printer.abort();
    console.abort();
    Ok(())
}

/// Reads stdin lines: `press`/`release` drive the button, anything else is
/// sent to the peer as a command token.
async fn console(
    link: LinkHandle,
    button: SharedLevel,
    edges: ButtonEdges,
    cancel: CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = cancel.cancelled() => break,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => {}
            "press" | "release" => {
                let pressed = line == "press";
                let level = pressed != edges.active_low;
                button.set(level);
                edges.record(level);
            }
            "state" => println!("link: {}", link.current_link_state()),
            token => match Command::decode(token.as_bytes()) {
                Some(command) => {
                    if let Err(e) = link.send_command(command) {
                        warn!("Not sent: {}", e);
                    }
                }
                None => warn!("Unknown input: {}", token),
            },
        }
    }
    Ok(())
}
