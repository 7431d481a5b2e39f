//! Runtime configuration – reads `~/.chambersync/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted configuration. Every field has a default so a missing file or
/// a partial file both work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Attribute path of the monitored motor position.
    #[serde(default = "default_motor")]
    pub motor: String,

    /// Attribute path of the chamber offset write target.
    #[serde(default = "default_chamber")]
    pub chamber: String,

    /// Formula template over the OFFSET and POSITION operands.
    #[serde(default = "default_formula")]
    pub formula: String,

    /// Initial offset applied after the coordinator comes up.
    #[serde(default)]
    pub offset: f64,

    /// Minimum seconds between accepted position samples.
    #[serde(default = "default_min_period")]
    pub min_period: f64,

    /// Minimum absolute position delta between accepted samples.
    #[serde(default = "default_min_change")]
    pub min_change: f64,

    /// Period of the simulated motor sweep, in milliseconds.
    #[serde(default = "default_feed_period_ms")]
    pub feed_period_ms: u64,

    /// Amplitude of the simulated motor sweep.
    #[serde(default = "default_sweep_amplitude")]
    pub sweep_amplitude: f64,
}

fn default_motor() -> String {
    "sim/motor/1/Position".to_string()
}
fn default_chamber() -> String {
    "sim/chamber/1/ChamberOffsetX".to_string()
}
fn default_formula() -> String {
    "OFFSET-POSITION".to_string()
}
fn default_min_period() -> f64 {
    0.1
}
fn default_min_change() -> f64 {
    0.001
}
fn default_feed_period_ms() -> u64 {
    500
}
fn default_sweep_amplitude() -> f64 {
    5.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            motor: default_motor(),
            chamber: default_chamber(),
            formula: default_formula(),
            offset: 0.0,
            min_period: default_min_period(),
            min_change: default_min_change(),
            feed_period_ms: default_feed_period_ms(),
            sweep_amplitude: default_sweep_amplitude(),
        }
    }
}

/// Return the path to `~/.chambersync/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".chambersync").join("config.toml")
}

/// Load the config, falling back to defaults when the file is absent, and
/// apply `CHAMBERSYNC_*` overrides on top.
pub fn load_or_default() -> Result<Config, String> {
    let mut cfg = match load_from(&config_path())? {
        Some(cfg) => cfg,
        None => Config::default(),
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path. Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `CHAMBERSYNC_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `CHAMBERSYNC_MOTOR` | `motor` |
/// | `CHAMBERSYNC_CHAMBER` | `chamber` |
/// | `CHAMBERSYNC_FORMULA` | `formula` |
/// | `CHAMBERSYNC_OFFSET` | `offset` |
/// | `CHAMBERSYNC_FEED_PERIOD_MS` | `feed_period_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("CHAMBERSYNC_MOTOR") {
        cfg.motor = v;
    }
    if let Ok(v) = std::env::var("CHAMBERSYNC_CHAMBER") {
        cfg.chamber = v;
    }
    if let Ok(v) = std::env::var("CHAMBERSYNC_FORMULA") {
        cfg.formula = v;
    }
    if let Ok(v) = std::env::var("CHAMBERSYNC_OFFSET")
        && let Ok(offset) = v.parse::<f64>()
    {
        cfg.offset = offset;
    }
    if let Ok(v) = std::env::var("CHAMBERSYNC_FEED_PERIOD_MS")
        && let Ok(period) = v.parse::<u64>()
    {
        cfg.feed_period_ms = period;
    }
}
