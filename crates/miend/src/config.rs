use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use mien_core::{GateConfig, MatcherConfig};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/mien/config.toml";
pub const DEFAULT_EMBEDDING_DIM: usize = 128;
pub const DEFAULT_SAMPLES_PER_ENROLL: usize = 3;
pub const DEFAULT_MIN_CAPTURE_INTERVAL_MS: u64 = 1500;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Raw TOML configuration file. Every field is optional; omitted fields
/// fall back to environment overrides and then compiled defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub db_path: Option<PathBuf>,
    pub embedding_dim: Option<usize>,
    pub samples_per_enroll: Option<usize>,
    pub min_capture_interval_ms: Option<u64>,
    pub use_system_bus: Option<bool>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub roster: Vec<RosterEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thresholds {
    pub accept_similarity: Option<f32>,
    pub accept_distance: Option<f32>,
    pub sim_high: Option<f32>,
    pub sim_mid: Option<f32>,
    pub sim_confirm: Option<f32>,
    pub dup_distance: Option<f32>,
}

/// Pre-provisioned roster member, enrolled later by capture.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
}

/// Daemon configuration: compiled defaults, overridden by the TOML file,
/// overridden by `MIEN_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite roster database.
    pub db_path: PathBuf,
    /// Embedding length the deployment's extractor produces.
    pub embedding_dim: usize,
    /// Samples accumulated per enrollment.
    pub samples_per_enroll: usize,
    /// Minimum spacing between accepted captures.
    pub min_capture_interval: Duration,
    /// Serve on the system bus instead of the session bus.
    pub use_system_bus: bool,
    pub matcher: MatcherConfig,
    pub gate: GateConfig,
    /// Roster seeded into an empty database at startup.
    pub roster: Vec<(String, String)>,
}

impl Config {
    /// Load configuration. `MIEN_CONFIG` selects the TOML file; otherwise
    /// the default path is used when it exists.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("MIEN_CONFIG") {
            Ok(path) => Some(Self::read_file(Path::new(&path))?),
            Err(_) => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Some(Self::read_file(default)?)
                } else {
                    None
                }
            }
        };
        Ok(Self::resolve(file.unwrap_or_default()))
    }

    fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Apply environment overrides on top of the raw file.
    pub fn resolve(raw: ConfigFile) -> Self {
        let matcher_defaults = MatcherConfig::default();
        let gate_defaults = GateConfig::default();

        let db_path = std::env::var("MIEN_DB_PATH")
            .map(PathBuf::from)
            .ok()
            .or(raw.db_path)
            .unwrap_or_else(default_db_path);

        Self {
            db_path,
            embedding_dim: env_usize(
                "MIEN_EMBEDDING_DIM",
                raw.embedding_dim.unwrap_or(DEFAULT_EMBEDDING_DIM),
            ),
            samples_per_enroll: env_usize(
                "MIEN_SAMPLES_PER_ENROLL",
                raw.samples_per_enroll.unwrap_or(DEFAULT_SAMPLES_PER_ENROLL),
            ),
            min_capture_interval: Duration::from_millis(env_u64(
                "MIEN_MIN_CAPTURE_INTERVAL_MS",
                raw.min_capture_interval_ms
                    .unwrap_or(DEFAULT_MIN_CAPTURE_INTERVAL_MS),
            )),
            use_system_bus: std::env::var("MIEN_SYSTEM_BUS")
                .map(|v| v != "0")
                .unwrap_or(raw.use_system_bus.unwrap_or(false)),
            matcher: MatcherConfig {
                accept_similarity: env_f32(
                    "MIEN_ACCEPT_SIMILARITY",
                    raw.thresholds
                        .accept_similarity
                        .unwrap_or(matcher_defaults.accept_similarity),
                ),
                accept_distance: env_f32(
                    "MIEN_ACCEPT_DISTANCE",
                    raw.thresholds
                        .accept_distance
                        .unwrap_or(matcher_defaults.accept_distance),
                ),
            },
            gate: GateConfig {
                sim_high: env_f32(
                    "MIEN_SIM_HIGH",
                    raw.thresholds.sim_high.unwrap_or(gate_defaults.sim_high),
                ),
                sim_mid: env_f32(
                    "MIEN_SIM_MID",
                    raw.thresholds.sim_mid.unwrap_or(gate_defaults.sim_mid),
                ),
                sim_confirm: env_f32(
                    "MIEN_SIM_CONFIRM",
                    raw.thresholds
                        .sim_confirm
                        .unwrap_or(gate_defaults.sim_confirm),
                ),
                dup_distance: env_f32(
                    "MIEN_DUP_DISTANCE",
                    raw.thresholds
                        .dup_distance
                        .unwrap_or(gate_defaults.dup_distance),
                ),
            },
            roster: raw
                .roster
                .into_iter()
                .map(|entry| (entry.id, entry.name))
                .collect(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::resolve(ConfigFile::default())
    }
}

fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("mien/roster.db")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
