//! Command Health Monitor
//!
//! Per-command circuit breaker and usage statistics:
//! - **Consecutive failures**: an informational alert once a command fails
//!   `consecutive_alert_threshold` times in a row
//! - **Error rate**: once a command has enough calls and its error rate
//!   reaches `disable_error_rate`, it is disabled
//! - **Manual recovery**: a disabled command stays disabled until an admin
//!   calls [`HealthMonitor::enable`]
//!
//! Timeouts are not errors here. A slow dependency is not necessarily a
//! broken one; only handler failures move the breaker.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub consecutive_alert_threshold: u64,
    /// Minimum sample size before the error rate can disable a command
    pub min_calls_for_disable: u64,
    pub disable_error_rate: f64,
    pub error_log_capacity: usize,
    pub alert_capacity: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            consecutive_alert_threshold: 5,
            min_calls_for_disable: 10,
            disable_error_rate: 0.5,
            error_log_capacity: 100,
            alert_capacity: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Breaker counters for one command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandHealth {
    pub command_id: String,
    pub total_calls: u64,
    pub error_count: u64,
    pub consecutive_errors: u64,
    pub error_rate: f64,
    pub last_error: Option<LastError>,
    pub status: CommandStatus,
}

impl CommandHealth {
    fn new(command_id: &str) -> Self {
        Self {
            command_id: command_id.to_string(),
            total_calls: 0,
            error_count: 0,
            consecutive_errors: 0,
            error_rate: 0.0,
            last_error: None,
            status: CommandStatus::Enabled,
        }
    }

    fn recompute_rate(&mut self) {
        self.error_rate = if self.total_calls == 0 {
            0.0
        } else {
            self.error_count as f64 / self.total_calls as f64
        };
    }
}

/// Usage statistics for one command. Reporting only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub command_id: String,
    pub call_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub total_response_time: Duration,
    pub avg_response_time: Duration,
}

impl UsageStats {
    fn new(command_id: &str) -> Self {
        Self {
            command_id: command_id.to_string(),
            call_count: 0,
            last_used_at: None,
            total_response_time: Duration::ZERO,
            avg_response_time: Duration::ZERO,
        }
    }
}

/// Returned by [`HealthMonitor::record_start`]
#[derive(Debug, Clone, Copy)]
pub enum CallToken {
    Started { at: Instant },
    /// The command is disabled and must not run
    Disabled,
}

impl CallToken {
    pub fn is_disabled(&self) -> bool {
        matches!(self, CallToken::Disabled)
    }

    fn elapsed(&self) -> Option<Duration> {
        match self {
            CallToken::Started { at } => Some(at.elapsed()),
            CallToken::Disabled => None,
        }
    }
}

/// Where a failed call came from and what went wrong
#[derive(Debug, Clone, Copy)]
pub struct ErrorDetail<'a> {
    pub room: &'a str,
    pub sender: &'a str,
    pub message: &'a str,
}

/// Result of recording a handler error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorOutcome {
    pub should_alert: bool,
    /// The command is disabled after this error
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AlertKind {
    ConsecutiveFailures { count: u64 },
    CommandDisabled { error_rate: f64 },
}

/// Admin notification raised by the breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub command_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub at: DateTime<Utc>,
    pub command_id: String,
    pub room: String,
    pub sender: String,
    pub detail: String,
    pub response_time: Duration,
}

/// Caching and optimization hints derived from usage
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendations {
    /// More than 5% of all calls
    pub high_priority_cache: Vec<String>,
    /// Less than 1% of all calls
    pub low_priority_cache: Vec<String>,
    /// Average response above 5 seconds
    pub needs_optimization: Vec<(String, Duration)>,
}

impl Recommendations {
    pub fn is_empty(&self) -> bool {
        self.high_priority_cache.is_empty()
            && self.low_priority_cache.is_empty()
            && self.needs_optimization.is_empty()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedStats {
    health: Vec<CommandHealth>,
    usage: Vec<UsageStats>,
    error_log: Vec<ErrorLogEntry>,
    saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MonitorState {
    health: HashMap<String, CommandHealth>,
    usage: HashMap<String, UsageStats>,
    error_log: VecDeque<ErrorLogEntry>,
    alerts: VecDeque<HealthAlert>,
}

/// Shared health monitor. All counters sit behind one lock so updates
/// for a command are never lost under concurrent success/error recording.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    config: BreakerConfig,
    state: Mutex<MonitorState>,
}

impl HealthMonitor {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn is_disabled(&self, command_id: &str) -> bool {
        self.state
            .lock()
            .health
            .get(command_id)
            .map(|h| h.status == CommandStatus::Disabled)
            .unwrap_or(false)
    }

    /// Count a call. Returns [`CallToken::Disabled`] if the command must not run.
    pub fn record_start(&self, command_id: &str, now: DateTime<Utc>) -> CallToken {
        let mut state = self.state.lock();

        let health = state
            .health
            .entry(command_id.to_string())
            .or_insert_with(|| CommandHealth::new(command_id));
        if health.status == CommandStatus::Disabled {
            return CallToken::Disabled;
        }
        health.total_calls += 1;
        health.recompute_rate();

        let usage = state
            .usage
            .entry(command_id.to_string())
            .or_insert_with(|| UsageStats::new(command_id));
        usage.call_count += 1;
        usage.last_used_at = Some(now);

        CallToken::Started { at: Instant::now() }
    }

    pub fn record_success(&self, command_id: &str, token: CallToken) {
        let Some(elapsed) = token.elapsed() else {
            return;
        };
        let mut state = self.state.lock();

        let usage = state
            .usage
            .entry(command_id.to_string())
            .or_insert_with(|| UsageStats::new(command_id));
        usage.total_response_time += elapsed;
        usage.avg_response_time = average(usage.total_response_time, usage.call_count);

        if let Some(health) = state.health.get_mut(command_id) {
            health.consecutive_errors = 0;
        }
        debug!("{} succeeded in {}ms", command_id, elapsed.as_millis());
    }

    pub fn record_error(
        &self,
        command_id: &str,
        token: CallToken,
        detail: ErrorDetail<'_>,
        now: DateTime<Utc>,
    ) -> ErrorOutcome {
        let Some(elapsed) = token.elapsed() else {
            return ErrorOutcome::default();
        };
        let mut state = self.state.lock();

        state.error_log.push_back(ErrorLogEntry {
            at: now,
            command_id: command_id.to_string(),
            room: detail.room.to_string(),
            sender: detail.sender.to_string(),
            detail: detail.message.to_string(),
            response_time: elapsed,
        });
        while state.error_log.len() > self.config.error_log_capacity {
            state.error_log.pop_front();
        }

        let health = state
            .health
            .entry(command_id.to_string())
            .or_insert_with(|| CommandHealth::new(command_id));
        health.error_count += 1;
        health.consecutive_errors += 1;
        // A reset between start and error can leave total_calls behind
        health.total_calls = health.total_calls.max(health.error_count);
        health.recompute_rate();
        health.last_error = Some(LastError {
            message: detail.message.to_string(),
            at: now,
        });

        let mut alert = None;
        if health.consecutive_errors >= self.config.consecutive_alert_threshold {
            alert = Some(AlertKind::ConsecutiveFailures {
                count: health.consecutive_errors,
            });
        }

        if health.status == CommandStatus::Enabled
            && health.total_calls >= self.config.min_calls_for_disable
            && health.error_rate >= self.config.disable_error_rate
        {
            health.status = CommandStatus::Disabled;
            alert = Some(AlertKind::CommandDisabled {
                error_rate: health.error_rate,
            });
        }

        let outcome = ErrorOutcome {
            should_alert: alert.is_some(),
            disabled: health.status == CommandStatus::Disabled,
        };

        if let Some(kind) = alert {
            let message = match &kind {
                AlertKind::ConsecutiveFailures { count } => {
                    format!("⚠️ {} failed {} times in a row", command_id, count)
                }
                AlertKind::CommandDisabled { error_rate } => format!(
                    "🚨 {} error rate {:.1}% exceeded the limit\n\
                     🔒 The command was disabled automatically",
                    command_id,
                    error_rate * 100.0
                ),
            };
            warn!("Health alert: {}", message.replace('\n', " "));
            state.alerts.push_back(HealthAlert {
                command_id: command_id.to_string(),
                kind,
                message,
                at: now,
            });
            while state.alerts.len() > self.config.alert_capacity {
                state.alerts.pop_front();
            }
        }

        outcome
    }

    /// Re-enable a disabled command. Returns false if it was already enabled.
    pub fn enable(&self, command_id: &str) -> bool {
        let mut state = self.state.lock();
        match state.health.get_mut(command_id) {
            Some(health) if health.status == CommandStatus::Disabled => {
                health.status = CommandStatus::Enabled;
                health.consecutive_errors = 0;
                info!("Command re-enabled: {}", command_id);
                true
            }
            _ => false,
        }
    }

    /// Zero all counters for a command. The enabled/disabled status is kept.
    pub fn reset_stats(&self, command_id: &str) {
        let mut state = self.state.lock();
        if let Some(health) = state.health.get_mut(command_id) {
            let status = health.status;
            *health = CommandHealth::new(command_id);
            health.status = status;
        }
        if let Some(usage) = state.usage.get_mut(command_id) {
            *usage = UsageStats::new(command_id);
        }
        info!("Stats reset: {}", command_id);
    }

    pub fn health(&self, command_id: &str) -> Option<CommandHealth> {
        self.state.lock().health.get(command_id).cloned()
    }

    pub fn usage(&self, command_id: &str) -> Option<UsageStats> {
        self.state.lock().usage.get(command_id).cloned()
    }

    /// All health records, highest error rate first
    pub fn health_snapshot(&self) -> Vec<CommandHealth> {
        let mut all: Vec<_> = self.state.lock().health.values().cloned().collect();
        all.sort_by(|a, b| {
            b.error_rate
                .total_cmp(&a.error_rate)
                .then_with(|| a.command_id.cmp(&b.command_id))
        });
        all
    }

    /// All usage records, most used first
    pub fn usage_snapshot(&self) -> Vec<UsageStats> {
        let mut all: Vec<_> = self.state.lock().usage.values().cloned().collect();
        all.sort_by(|a, b| {
            b.call_count
                .cmp(&a.call_count)
                .then_with(|| a.command_id.cmp(&b.command_id))
        });
        all
    }

    pub fn disabled_commands(&self) -> Vec<String> {
        let mut disabled: Vec<_> = self
            .state
            .lock()
            .health
            .values()
            .filter(|h| h.status == CommandStatus::Disabled)
            .map(|h| h.command_id.clone())
            .collect();
        disabled.sort();
        disabled
    }

    /// Most recent errors, oldest first
    pub fn error_log(&self, limit: usize) -> Vec<ErrorLogEntry> {
        let state = self.state.lock();
        let skip = state.error_log.len().saturating_sub(limit);
        state.error_log.iter().skip(skip).cloned().collect()
    }

    /// Take all pending alerts
    pub fn drain_alerts(&self) -> Vec<HealthAlert> {
        self.state.lock().alerts.drain(..).collect()
    }

    pub fn recommendations(&self) -> Recommendations {
        let usage = self.usage_snapshot();
        let total: u64 = usage.iter().map(|u| u.call_count).sum();
        let mut recs = Recommendations::default();
        if total == 0 {
            return recs;
        }

        for stats in usage {
            let ratio = stats.call_count as f64 / total as f64;
            if ratio > 0.05 {
                recs.high_priority_cache.push(stats.command_id.clone());
            } else if ratio < 0.01 {
                recs.low_priority_cache.push(stats.command_id.clone());
            }
            if stats.avg_response_time > Duration::from_secs(5) {
                recs.needs_optimization
                    .push((stats.command_id, stats.avg_response_time));
            }
        }
        recs
    }

    /// Write health, usage and the error log to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let persisted = {
            let state = self.state.lock();
            PersistedStats {
                health: state.health.values().cloned().collect(),
                usage: state.usage.values().cloned().collect(),
                error_log: state.error_log.iter().cloned().collect(),
                saved_at: Some(Utc::now()),
            }
        };

        let json = serde_json::to_string_pretty(&persisted)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!("Health stats saved to {}", path.display());
        Ok(())
    }

    /// Load previously saved stats, replacing current records for the same
    /// commands. Returns false when the file does not exist.
    pub fn restore(&self, path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let raw = std::fs::read_to_string(path)?;
        let persisted: PersistedStats = serde_json::from_str(&raw)?;

        let mut state = self.state.lock();
        let commands = persisted.health.len();
        for health in persisted.health {
            state.health.insert(health.command_id.clone(), health);
        }
        for usage in persisted.usage {
            state.usage.insert(usage.command_id.clone(), usage);
        }
        state.error_log.extend(persisted.error_log);
        while state.error_log.len() > self.config.error_log_capacity {
            state.error_log.pop_front();
        }

        info!(
            "Restored health stats for {} commands from {}",
            commands,
            path.display()
        );
        Ok(true)
    }
}

/// Mean of `count` samples summing to `total`; zero when there are none
fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(total.as_secs_f64() / count as f64)
}
