//! Application-level configuration loading for the pool, session dedup, and
//! history store sections.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZDECK_BACK_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Question pool cache settings.
    pub pool: PoolConfig,
    /// Session deduplication settings.
    pub session: SessionConfig,
    /// Game history store selection.
    pub history: HistoryConfig,
}

/// Settings driving the per-key question pool cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Master switch; when off every request uses the database fallback.
    pub enabled: bool,
    /// Bank size below which a refill logs a low-bank warning.
    pub minimum_per_key: u64,
    /// Queue size below which a background refill is triggered.
    pub low_watermark_per_key: usize,
    /// Target queue size a refill fills up to.
    pub refill_target_per_key: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_per_key: 10,
            low_watermark_per_key: 5,
            refill_target_per_key: 30,
        }
    }
}

/// Settings driving per-session served-card tracking.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// When off, no tracking happens and every reservation succeeds.
    pub enabled: bool,
    /// Minutes after the last write before a session's served-set expires.
    pub ttl_minutes: u64,
    /// Maximum number of tracked sessions; oldest evicted beyond this.
    pub max_sessions: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_minutes: 120,
            max_sessions: 100_000,
        }
    }
}

/// Which [`GameHistoryStore`](crate::dao::history_store::GameHistoryStore)
/// implementation serves live games.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HistoryConfig {
    /// Selected backend for per-game history.
    pub store: HistoryStoreKind,
}

/// Backend choices for the game history store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStoreKind {
    /// In-process bounded deques; history is lost on restart.
    #[default]
    Memory,
    /// Database-backed rows; requires a connected storage backend.
    Durable,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to the
    /// baked-in defaults when the file is missing or unparsable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration from file");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    pool: PoolConfig,
    session: SessionConfig,
    history: HistoryConfig,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            pool: value.pool,
            session: value.session,
            history: value.history,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
