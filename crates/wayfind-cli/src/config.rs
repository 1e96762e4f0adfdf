//! Configuration Vault – reads/writes `~/.wayfind/config.toml`.
//!
//! Every section is optional; a missing key takes its default, so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use wayfind_memory::MemoryConfig;
use wayfind_perception::{AnchorConfig, FusionConfig};
use wayfind_runtime::{
    AssistantConfig, AudioConfig, GuidanceConfig, IndoorConfig, ModeConfig, OutdoorConfig, WatchdogConfig,
};

use crate::sim::SimConfig;

/// Persisted user configuration stored in `~/.wayfind/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite file holding remembered objects and map anchors.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub anchors: AnchorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub mode: ModeConfig,
    #[serde(default)]
    pub indoor: IndoorConfig,
    #[serde(default)]
    pub outdoor: OutdoorConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub guidance: GuidanceConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

impl Config {
    /// Command-surface settings assembled from the navigator sections.
    pub fn assistant(&self) -> AssistantConfig {
        AssistantConfig {
            indoor: self.indoor.clone(),
            outdoor: self.outdoor.clone(),
            max_fix_age_secs: self.guidance.gps_max_age_secs,
        }
    }
}

fn default_database_path() -> PathBuf {
    wayfind_dir(&home_dir()).join("wayfind.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            fusion: FusionConfig::default(),
            anchors: AnchorConfig::default(),
            memory: MemoryConfig::default(),
            mode: ModeConfig::default(),
            indoor: IndoorConfig::default(),
            outdoor: OutdoorConfig::default(),
            audio: AudioConfig::default(),
            guidance: GuidanceConfig::default(),
            watchdog: WatchdogConfig::default(),
            sim: SimConfig::default(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn wayfind_dir(home: &str) -> PathBuf {
    PathBuf::from(home).join(".wayfind")
}

/// Return the path to `~/.wayfind/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    wayfind_dir(home).join("config.toml")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `WAYFIND_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `WAYFIND_DB_PATH` | `database_path` |
/// | `WAYFIND_TICK_HZ` | `guidance.tick_hz` |
/// | `WAYFIND_SIM_LAT` | `sim.origin_lat_deg` |
/// | `WAYFIND_SIM_LON` | `sim.origin_lon_deg` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WAYFIND_DB_PATH")
        && !v.trim().is_empty()
    {
        cfg.database_path = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("WAYFIND_TICK_HZ")
        && let Ok(hz) = v.parse::<f64>()
        && hz > 0.0
    {
        cfg.guidance.tick_hz = hz;
    }
    if let Ok(v) = std::env::var("WAYFIND_SIM_LAT")
        && let Ok(lat) = v.parse::<f64>()
        && (-90.0..=90.0).contains(&lat)
    {
        cfg.sim.origin_lat_deg = lat;
    }
    if let Ok(v) = std::env::var("WAYFIND_SIM_LON")
        && let Ok(lon) = v.parse::<f64>()
        && (-180.0..=180.0).contains(&lon)
    {
        cfg.sim.origin_lon_deg = lon;
    }
}

/// Save the config to disk, creating `~/.wayfind/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write (rw-------) on Unix; the file reveals where the
    // user keeps their belongings.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

/// Create `dir` (and parents) restricted to the owner (rwx------) on Unix.
pub fn ensure_private_dir(dir: &Path) -> Result<(), String> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| format!("Failed to create directory {}: {}", dir.display(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| format!("Failed to set permissions on {}: {}", dir.display(), e))?;
    }
    Ok(())
}
