//! `brickd` – the brick controller daemon.
//!
//! 1. Loads `~/.brick/config.toml` (or the file given with `--config`),
//!    writing a default one on first start.
//! 2. Builds the brick from the hardware description it names.
//! 3. Serves the command and telemetry sockets until Ctrl-C or a script
//!    calls `quit`.

mod config;
mod controller;
mod telemetry_server;

use std::path::PathBuf;

use brick_hal::BrickConfig;
use colored::Colorize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::config::Config;
use crate::controller::Controller;

fn main() {
    // The tracer provider must outlive the runtime.
    let _telemetry = brick_runtime::init_tracing("brickd");

    print_banner();

    let config_path = match config_override(std::env::args().skip(1)) {
        Ok(path) => path.unwrap_or_else(config::config_path),
        Err(message) => {
            eprintln!("{}: {}", "Usage error".red(), message);
            eprintln!("  brickd [--config <path>]");
            std::process::exit(2);
        }
    };
    let cfg = load_config(&config_path);
    let hardware = load_hardware(&cfg);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot start async runtime");
            std::process::exit(1);
        }
    };

    let controller = match Controller::new(&cfg, hardware) {
        Ok(controller) => controller,
        Err(e) => {
            error!(error = %e, "cannot start brick");
            std::process::exit(1);
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let (interrupt_tx, mut interrupt_rx) = mpsc::unbounded_channel::<()>();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the brick …".yellow().bold());
        let _ = interrupt_tx.send(());
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    println!(
        "  Command socket on port {}",
        cfg.communicator_port.to_string().bold()
    );
    println!(
        "  Telemetry socket on port {}",
        cfg.telemetry_port.to_string().bold()
    );
    println!("  Scripts in {}", cfg.scripts_dir.display().to_string().dimmed());
    println!();

    let outcome = runtime.block_on(controller.run(async move {
        interrupt_rx.recv().await;
    }));
    match outcome {
        Ok(()) => println!("{}", "  ✓ Brick stopped.".green()),
        Err(e) => {
            error!(error = %e, "server failed");
            std::process::exit(1);
        }
    }
}

/// Parse `--config <path>` / `--config=<path>`; nothing else is accepted.
fn config_override(args: impl IntoIterator<Item = String>) -> Result<Option<PathBuf>, String> {
    let mut args = args.into_iter();
    let mut path = None;
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let value = args
                .next()
                .ok_or_else(|| "--config needs a path".to_string())?;
            path = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--config=") {
            path = Some(PathBuf::from(value));
        } else {
            return Err(format!("unexpected argument {arg:?}"));
        }
    }
    Ok(path)
}

fn load_config(path: &std::path::Path) -> Config {
    match config::load_from(path) {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let defaults = Config::default();
            match config::save_to(&defaults, path) {
                Ok(()) => println!(
                    "  Wrote default config to {}",
                    path.display().to_string().bold()
                ),
                Err(e) => warn!(error = %e, "cannot write default config"),
            }
            let mut cfg = defaults;
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

/// A broken hardware file leaves the brick without devices rather than
/// refusing to start, so scripts can still be uploaded and fixed.
fn load_hardware(cfg: &Config) -> BrickConfig {
    let Some(path) = &cfg.hardware_config else {
        warn!("no hardware_config set; starting without devices");
        return BrickConfig::default();
    };
    match BrickConfig::load(path) {
        Ok(hardware) => hardware,
        Err(e) => {
            error!(path = %path.display(), error = %e, "hardware config rejected");
            BrickConfig::default()
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___       _      __     "#.bold().cyan());
    println!("{}", r#"  / _ )____(_)____/ /__   "#.bold().cyan());
    println!("{}", r#" / _  / __/ / __/  '_/   "#.bold().cyan());
    println!("{}", r#"/____/_/ /_/\__/_/\_\    "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "brickd".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot controller daemon");
    println!();
}
