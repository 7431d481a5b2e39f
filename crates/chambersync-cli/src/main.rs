//! `chambersync` – demo and operations binary.
//!
//! Wires the reactive engine to an in-process [`SimBus`]:
//!
//! 1. Loads `~/.chambersync/config.toml` (every field has a default) and
//!    applies `CHAMBERSYNC_*` env overrides.
//! 2. Seeds a simulated motor and chamber device and connects a
//!    [`Coordinator`] over them.
//! 3. Sweeps the motor position on a timer so the loop has something to
//!    chase, and injects one third-party write to the chamber target to
//!    demonstrate the self-healing correction.
//! 4. Prints a status line every two seconds until Ctrl-C.

mod config;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use chambersync_engine::Coordinator;
use chambersync_remote::{RemoteBus, SimBus};
use chambersync_types::{AttrAddress, CoordinatorState, DebounceConfig};

/// Tick on which the scripted third-party interference fires.
const INTERFERENCE_TICK: u64 = 20;

fn init_tracing() {
    // Initialise tracing-subscriber using RUST_LOG (defaults to "info").
    // Set CHAMBERSYNC_LOG_FORMAT=json to emit newline-delimited JSON logs
    // suitable for log aggregators.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    if std::env::var("CHAMBERSYNC_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}

fn parse_address(label: &str, raw: &str) -> AttrAddress {
    match raw.parse::<AttrAddress>() {
        Ok(addr) => addr,
        Err(e) => {
            let state = CoordinatorState::Faulted {
                reason: e.to_string(),
            };
            error!(state = %state, "bad {label} address");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cfg = match config::load_or_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let motor = parse_address("motor", &cfg.motor);
    let chamber = parse_address("chamber", &cfg.chamber);

    // Simulated remote world: both devices exist but hold no value until
    // the sweep starts moving the motor.
    let bus = Arc::new(SimBus::new());
    bus.seed(&motor, None);
    bus.seed(&chamber, None);

    let coordinator = match Coordinator::connect(
        bus.clone() as Arc<dyn RemoteBus>,
        motor.clone(),
        chamber.clone(),
        &cfg.formula,
        DebounceConfig {
            min_period: cfg.min_period,
            min_change: cfg.min_change,
        },
    ) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            let state = CoordinatorState::Faulted {
                reason: e.to_string(),
            };
            error!(state = %state, "construction failed");
            std::process::exit(1);
        }
    };
    coordinator.set_offset(cfg.offset);
    info!(state = %coordinator.state(), formula = %coordinator.formula(), "device up");

    // Motor sweep: a slow sinusoid, plus one scripted rogue write to the
    // chamber target so the corrective path shows up in the logs.
    let feed_bus = bus.clone();
    let feed_motor = motor.clone();
    let feed_chamber = chamber.clone();
    let amplitude = cfg.sweep_amplitude;
    let period = Duration::from_millis(cfg.feed_period_ms.max(1));
    let feed = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut tick: u64 = 0;
        loop {
            interval.tick().await;
            tick += 1;
            let value = amplitude * (tick as f64 * 0.2).sin();
            feed_bus.push(&feed_motor, (value * 1000.0).round() / 1000.0);
            if tick == INTERFERENCE_TICK {
                warn!("injecting a third-party write to the chamber target");
                feed_bus.push(&feed_chamber, 99.9);
            }
        }
    });

    let mut status = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            _ = status.tick() => {
                info!(
                    position = ?coordinator.position_sample().map(|s| s.value),
                    chamber = ?coordinator.target_sample().map(|s| s.value),
                    offset = coordinator.offset(),
                    formula = %coordinator.expanded_formula().unwrap_or_default(),
                    "status"
                );
            }
        }
    }

    feed.abort();
    coordinator.shutdown();
    info!(state = %coordinator.state(), "device down");
}
