//! Configuration management

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::dispatcher::DEFAULT_LONG_RUNNING_THRESHOLD;
use crate::health::BreakerConfig;
use crate::maintenance::{MaintenanceConfig, DEFAULT_AUTOSAVE_INTERVAL, DEFAULT_SWEEP_INTERVAL};
use crate::scheduler::DEFAULT_WORKERS;

/// Gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum cached replies before the oldest is evicted
    pub cache_max_entries: usize,

    /// How often expired cache entries are swept
    pub sweep_interval: Duration,

    /// Handler worker pool size
    pub workers: usize,

    /// Timeouts at or above this count from worker pickup
    pub long_running_threshold: Duration,

    pub admin_users: Vec<String>,
    pub allowed_rooms: Vec<String>,

    /// Optional TOML policy table; built-in policies otherwise
    pub policy_file: Option<PathBuf>,

    /// Optional JSON file for health/usage persistence
    pub stats_path: Option<PathBuf>,
    pub autosave_interval: Duration,

    pub breaker: BreakerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            workers: DEFAULT_WORKERS,
            long_running_threshold: DEFAULT_LONG_RUNNING_THRESHOLD,
            admin_users: Vec::new(),
            allowed_rooms: Vec::new(),
            policy_file: None,
            stats_path: None,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
            breaker: BreakerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let cache_max_entries = parse_var("CMDGATE_CACHE_MAX_ENTRIES")
            .unwrap_or(defaults.cache_max_entries);

        let sweep_interval =
            interval_secs(parse_var("CMDGATE_SWEEP_INTERVAL_SECS"), defaults.sweep_interval);

        let workers = parse_var("CMDGATE_WORKERS").unwrap_or(defaults.workers);

        let long_running_threshold = parse_var("CMDGATE_LONG_RUNNING_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.long_running_threshold);

        let admin_users = std::env::var("CMDGATE_ADMIN_USERS")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let allowed_rooms = std::env::var("CMDGATE_ALLOWED_ROOMS")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let policy_file = std::env::var("CMDGATE_POLICY_FILE").ok().map(PathBuf::from);
        let stats_path = std::env::var("CMDGATE_STATS_PATH").ok().map(PathBuf::from);

        let autosave_interval =
            interval_secs(parse_var("CMDGATE_AUTOSAVE_SECS"), defaults.autosave_interval);

        Ok(Self {
            cache_max_entries,
            sweep_interval,
            workers,
            long_running_threshold,
            admin_users,
            allowed_rooms,
            policy_file,
            stats_path,
            autosave_interval,
            breaker: defaults.breaker,
        })
    }

    pub fn maintenance(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            sweep_interval: self.sweep_interval,
            stats_path: self.stats_path.clone(),
            autosave_interval: self.autosave_interval,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Periods must be positive; zero keeps the default
fn interval_secs(secs: Option<u64>, default: Duration) -> Duration {
    secs.filter(|&s| s > 0).map(Duration::from_secs).unwrap_or(default)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
