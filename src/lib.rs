//! cmdgate
//!
//! Command-dispatch resilience layer for chat bots.
//!
//! # Features
//!
//! - **Response Cache**: per-command TTL, bounded size, oldest-first eviction
//! - **Execution Scheduler**: blocking handlers on a bounded worker pool with deadlines
//! - **Circuit Breaker**: per-command error rates, alerts and auto-disable
//! - **Stale Fallback**: serve the last good reply when a fresh fetch times out
//! - **Admin Commands**: cache, health and usage reports, manual recovery
//!
//! # Architecture
//!
//! ```text
//! message ──► Dispatcher ──► Registry (resolve)
//!                 │
//!                 ├── Permissions (admin / room)
//!                 ├── Health Monitor (disabled?)
//!                 ├── Response Cache ──► hit: reply
//!                 └── Scheduler ──► Handler ──► record + cache ──► reply
//!                                      │
//!                                   timeout ──► stale reply or fallback
//! ```

pub mod admin;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod maintenance;
pub mod permissions;
pub mod policy;
pub mod registry;
pub mod report;
pub mod scheduler;

pub use admin::{register_admin_commands, AdminContext};
pub use cache::{CacheKey, CacheSnapshot, CacheStats, ResponseCache};
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use error::{GateError, Result};
pub use health::{
    BreakerConfig, CallToken, CommandHealth, CommandStatus, ErrorOutcome, HealthAlert,
    HealthMonitor, Recommendations, UsageStats,
};
pub use maintenance::{Maintenance, MaintenanceConfig};
pub use permissions::{AccessControl, StaticAccessList};
pub use policy::{CommandPolicy, PolicyTable};
pub use registry::{CommandHandler, CommandRegistry, CommandResolver, CommandSpec};
pub use scheduler::{Outcome, PendingReply, Scheduler};
