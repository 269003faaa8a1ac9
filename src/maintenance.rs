//! Background Maintenance
//!
//! Periodic housekeeping that runs beside the dispatcher:
//! - **Cache sweep**: drop entries whose command TTL has elapsed
//! - **Stats autosave**: persist health and usage counters to disk
//!
//! Both loops only use the public APIs of the cache and the monitor and
//! stop through a shutdown channel.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::health::HealthMonitor;
use crate::policy::PolicyTable;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(300);

/// Maintenance configuration
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    pub sweep_interval: Duration,
    /// No autosave when unset
    pub stats_path: Option<PathBuf>,
    pub autosave_interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stats_path: None,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }
}

/// Owner of the background loops
pub struct Maintenance {
    config: MaintenanceConfig,
    shutdown_txs: Vec<mpsc::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Maintenance {
    pub fn new(config: MaintenanceConfig) -> Self {
        Self {
            config,
            shutdown_txs: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Start the sweeper, and the autosave loop if a stats path is set
    pub fn start(
        &mut self,
        cache: ResponseCache,
        policies: Arc<PolicyTable>,
        health: Arc<HealthMonitor>,
    ) {
        if self.is_running() {
            return;
        }

        let (tx, mut rx) = mpsc::channel::<()>(1);
        self.shutdown_txs.push(tx);
        let sweep_interval = non_zero(self.config.sweep_interval, DEFAULT_SWEEP_INTERVAL, "sweep");
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            // The first tick fires immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_once(&cache, &policies);
                    }
                    _ = rx.recv() => {
                        info!("Cache sweeper shutting down");
                        break;
                    }
                }
            }
        }));
        info!("Cache sweeper started ({}s interval)", sweep_interval.as_secs());

        if let Some(path) = self.config.stats_path.clone() {
            let (tx, mut rx) = mpsc::channel::<()>(1);
            self.shutdown_txs.push(tx);
            let autosave_interval = non_zero(
                self.config.autosave_interval,
                DEFAULT_AUTOSAVE_INTERVAL,
                "autosave",
            );
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(autosave_interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = health.save(&path) {
                                warn!("Stats autosave failed: {}", e);
                            }
                        }
                        _ = rx.recv() => {
                            // Final save on the way out
                            if let Err(e) = health.save(&path) {
                                warn!("Final stats save failed: {}", e);
                            }
                            info!("Stats autosave shutting down");
                            break;
                        }
                    }
                }
            }));
            info!("Stats autosave started ({}s interval)", autosave_interval.as_secs());
        }
    }

    /// Stop all loops and wait for them to finish
    pub async fn stop(&mut self) {
        for tx in self.shutdown_txs.drain(..) {
            let _ = tx.send(()).await;
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Maintenance task ended abnormally: {}", e);
            }
        }
        info!("Maintenance stopped");
    }
}

/// `tokio::time::interval` rejects a zero period
fn non_zero(interval: Duration, default: Duration, name: &str) -> Duration {
    if interval.is_zero() {
        warn!("Zero {} interval, using {}s", name, default.as_secs());
        return default;
    }
    interval
}

/// One sweep pass, using each command's TTL
pub fn sweep_once(cache: &ResponseCache, policies: &PolicyTable) -> usize {
    let removed = cache.sweep(Utc::now(), |command_id| policies.cache_ttl(command_id));
    if removed > 0 {
        info!("Swept {} expired cache entries", removed);
    } else {
        debug!("Cache sweep found nothing to remove");
    }
    removed
}
