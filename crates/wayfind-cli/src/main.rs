//! `wayfind-cli` – wayfind Command Line Interface
//!
//! Runs the whole navigation stack in one process:
//!
//! 1. Loads `~/.wayfind/config.toml`, writing a default one on first run.
//! 2. Opens the SQLite store and reloads remembered objects.
//! 3. Spawns the fusion worker, the guidance loop, the simulated sensor feed
//!    and the guidance event printer on a Tokio runtime.
//! 4. Drops the user into an **interactive REPL** (`/remember`, `/where`,
//!    `/list`, `/cancel`, ...).
//! 5. Intercepts **Ctrl-C** to stop every task and exit cleanly.

mod config;
mod events;
mod repl;
mod routes;
mod sim;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::watch;
use tracing::{info, warn};

use wayfind_memory::{AnchorLog, SpatialMemory, SqliteSink, StorageSink};
use wayfind_middleware::{GuidanceBus, SensorBus};
use wayfind_perception::{MapAnchorStore, PoseFusionEngine};
use wayfind_runtime::{Assistant, FusionWorker, GuidanceLoop, SessionSlot, init_tracing};

use crate::routes::DirectRouteService;
use crate::sim::SimulatedFeed;

fn main() {
    // Must run before the runtime exists; see telemetry::build_provider.
    let _telemetry = init_tracing("wayfind");

    print_banner();

    let cfg = load_or_create_config();

    let runtime = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Shutdown plumbing ─────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop_tx = Arc::new(stop_tx);

    let shutdown_ctrlc = shutdown.clone();
    let stop_ctrlc = stop_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping guidance …".yellow().bold());
        stop_ctrlc.send_replace(true);
        shutdown_ctrlc.store(true, Ordering::SeqCst);
        println!("{}", "  ✓ Press Enter to leave wayfind.".green());
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Components ────────────────────────────────────────────────────────
    let assistant = match runtime.block_on(async { start_services(&cfg, stop_rx) }) {
        Ok(assistant) => assistant,
        Err(e) => {
            eprintln!("{}: {}", "Startup failed".red(), e);
            std::process::exit(1);
        }
    };

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(shutdown, runtime.handle().clone(), assistant);

    stop_tx.send_replace(true);
    runtime.shutdown_timeout(Duration::from_secs(2));
    info!("wayfind exited");
}

/// Build every component and spawn the background tasks onto the current
/// runtime. Returns the command surface for the REPL.
fn start_services(cfg: &config::Config, stop: watch::Receiver<bool>) -> Result<Arc<Assistant>, String> {
    if let Some(dir) = cfg.database_path.parent() {
        config::ensure_private_dir(dir)?;
    }
    let sink: Arc<dyn StorageSink> = Arc::new(
        SqliteSink::open(&cfg.database_path)
            .map_err(|e| format!("Failed to open {}: {}", cfg.database_path.display(), e))?,
    );
    let memory = SpatialMemory::open(sink.clone(), cfg.memory.clone()).map_err(|e| e.to_string())?;
    println!(
        "  Memory loaded from {} ({} object(s))",
        cfg.database_path.display().to_string().bold(),
        memory.list_all().len()
    );

    let sensors = SensorBus::default();
    let guidance = GuidanceBus::default();
    let session = SessionSlot::new();

    let worker = FusionWorker::new(
        PoseFusionEngine::new(cfg.fusion.clone()),
        MapAnchorStore::new(cfg.anchors.clone()),
        AnchorLog::new(sink),
        sensors.active_map(),
        &cfg.watchdog,
    );
    let pose = worker.handle();

    let assistant = Arc::new(Assistant::new(
        cfg.assistant(),
        Arc::new(memory),
        pose.clone(),
        sensors.clone(),
        Arc::new(DirectRouteService::default()),
        session.clone(),
        guidance.clone(),
    ));
    let guidance_loop = GuidanceLoop::new(
        cfg.guidance.clone(),
        cfg.mode.clone(),
        cfg.audio.clone(),
        pose,
        sensors.clone(),
        session,
        guidance.clone(),
    );

    let printer = events::print_events(guidance.subscribe(), assistant.clone(), stop.clone());
    tokio::spawn(printer);
    tokio::spawn(worker.run(sensors.subscribe(), stop.clone()));
    tokio::spawn(guidance_loop.run(stop.clone()));

    if cfg.sim.enabled {
        println!(
            "  Simulated sensors at {:.5}, {:.5} ({} m/s)",
            cfg.sim.origin_lat_deg, cfg.sim.origin_lon_deg, cfg.sim.walk_speed_m_s
        );
        tokio::spawn(SimulatedFeed::new(cfg.sim.clone(), sensors).run(stop));
    } else {
        println!("  {}", "Simulated sensors disabled; waiting for a sensor bridge.".dimmed());
    }

    Ok(assistant)
}

fn load_or_create_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"                      ____ _         __"#.bold().cyan());
    println!("{}", r#"  _    _____ ___ __  / _(_)__  ___/ /"#.bold().cyan());
    println!("{}", r#" | |/|/ / _ `/ // / / _/ / _ \/ _  / "#.bold().cyan());
    println!("{}", r#" |__,__/\_,_/\_, / /_//_/_//_/\_,_/  "#.bold().cyan());
    println!("{}", r#"            /___/                    "#.bold().cyan());
    println!();
    println!("  {} {}", "wayfind".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Spatial memory and audio guidance");
    println!();
}
