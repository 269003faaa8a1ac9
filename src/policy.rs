//! Command Policies
//!
//! Per-command cache TTL, execution timeout and fallback message.
//! The table is loaded once at startup and never mutated afterwards.
//!
//! ```toml
//! [defaults]
//! cache_ttl_secs = 30
//! timeout_secs = 4.0
//!
//! [commands."/stocks"]
//! cache_ttl_secs = 60
//! timeout_secs = 4.0
//! fallback_message = "📈 Market data is slow right now. (limit: {timeout}s)"
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{GateError, Result};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);
pub const DEFAULT_FALLBACK: &str =
    "⏱️ The response took too long.\nPlease try again in a moment.\n\n(limit: {timeout}s)";

/// Static policy for one command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPolicy {
    pub command_id: String,
    /// Zero disables caching for the command
    pub cache_ttl: Duration,
    pub execution_timeout: Duration,
    /// Template; `{command}` and `{timeout}` are substituted on render
    pub fallback_message: String,
}

impl CommandPolicy {
    pub fn new(command_id: &str, cache_ttl: Duration, execution_timeout: Duration) -> Self {
        Self {
            command_id: command_id.to_string(),
            cache_ttl,
            execution_timeout,
            fallback_message: DEFAULT_FALLBACK.to_string(),
        }
    }

    pub fn with_fallback(mut self, message: &str) -> Self {
        self.fallback_message = message.to_string();
        self
    }

    pub fn is_cacheable(&self) -> bool {
        !self.cache_ttl.is_zero()
    }

    /// Fallback text shown to the user on a hard failure
    pub fn render_fallback(&self) -> String {
        self.fallback_message
            .replace("{command}", &self.command_id)
            .replace("{timeout}", &format_secs(self.execution_timeout))
    }
}

/// Format a duration as seconds, dropping the fraction when it is whole
pub fn format_secs(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}", duration.as_secs())
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}

#[derive(Debug, Clone)]
struct PolicyDefaults {
    cache_ttl: Duration,
    execution_timeout: Duration,
    fallback_message: String,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            execution_timeout: DEFAULT_TIMEOUT,
            fallback_message: DEFAULT_FALLBACK.to_string(),
        }
    }
}

/// Lookup table of command policies with documented defaults
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    defaults: PolicyDefaults,
    policies: HashMap<String, CommandPolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, policy: CommandPolicy) {
        self.policies.insert(policy.command_id.clone(), policy);
    }

    pub fn with(mut self, policy: CommandPolicy) -> Self {
        self.insert(policy);
        self
    }

    /// Policy for a command, falling back to the defaults when unlisted
    pub fn get(&self, command_id: &str) -> CommandPolicy {
        match self.policies.get(command_id) {
            Some(policy) => policy.clone(),
            None => CommandPolicy {
                command_id: command_id.to_string(),
                cache_ttl: self.defaults.cache_ttl,
                execution_timeout: self.defaults.execution_timeout,
                fallback_message: self.defaults.fallback_message.clone(),
            },
        }
    }

    pub fn cache_ttl(&self, command_id: &str) -> Duration {
        self.policies
            .get(command_id)
            .map(|p| p.cache_ttl)
            .unwrap_or(self.defaults.cache_ttl)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Load a policy table from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(raw)?;

        let mut defaults = PolicyDefaults::default();
        if let Some(d) = file.defaults {
            if let Some(ttl) = d.cache_ttl_secs {
                defaults.cache_ttl = Duration::from_secs(ttl);
            }
            if let Some(secs) = d.timeout_secs {
                defaults.execution_timeout = parse_timeout("defaults", secs)?;
            }
            if let Some(msg) = d.fallback_message {
                defaults.fallback_message = msg;
            }
        }

        let mut table = Self {
            defaults,
            policies: HashMap::new(),
        };

        for (command_id, raw) in file.commands {
            let execution_timeout = match raw.timeout_secs {
                Some(secs) => parse_timeout(&command_id, secs)?,
                None => table.defaults.execution_timeout,
            };
            table.insert(CommandPolicy {
                cache_ttl: raw
                    .cache_ttl_secs
                    .map(Duration::from_secs)
                    .unwrap_or(table.defaults.cache_ttl),
                execution_timeout,
                fallback_message: raw
                    .fallback_message
                    .unwrap_or_else(|| table.defaults.fallback_message.clone()),
                command_id,
            });
        }

        Ok(table)
    }

    /// Built-in table tuned for the usual scraping commands
    pub fn builtin() -> Self {
        let secs = Duration::from_secs;
        let entry = |id: &str, ttl: u64, timeout: f64, fallback: Option<&str>| {
            let policy = CommandPolicy::new(id, secs(ttl), Duration::from_secs_f64(timeout));
            match fallback {
                Some(msg) => policy.with_fallback(msg),
                None => policy,
            }
        };

        let mut table = Self::new();
        for policy in [
            // Rarely changing data
            entry(
                "/movies",
                86_400,
                15.0,
                Some(
                    "🎬 Movie rankings are delayed.\nPlease try again shortly.\n\n\
                     (limit: {timeout}s)",
                ),
            ),
            entry("/lotto-results", 86_400, 4.0, None),
            entry("/quote", 3_600, 4.0, None),
            entry("/help", 3_600, 1.0, None),
            entry("/commands", 3_600, 1.0, None),
            // Moderately changing data
            entry("/exchange", 300, 3.0, None),
            entry("/gold", 300, 5.0, None),
            entry("/coin", 180, 5.0, None),
            entry("/upper-limit", 300, 6.0, None),
            entry("/lower-limit", 300, 6.0, None),
            entry(
                "/trending-videos",
                1_800,
                8.0,
                Some("📺 Trending videos are taking a while to load.\n\n(limit: {timeout}s)"),
            ),
            // Near-realtime data
            entry(
                "/stocks",
                60,
                4.0,
                Some(
                    "📈 Market data lookup is delayed.\nThe market may be closed.\n\n\
                     (limit: {timeout}s)",
                ),
            ),
            entry("/weather", 600, 4.0, None),
            entry("/trending", 600, 6.0, None),
            entry("/news", 300, 6.0, None),
            entry(
                "/blog",
                30,
                8.0,
                Some("📝 Blog search is delayed.\nTry a simpler query.\n\n(limit: {timeout}s)"),
            ),
            entry("/real-estate", 30, 10.0, None),
            entry("/lotto", 30, 2.0, None),
            // AI answers are never cached
            entry(
                "?",
                0,
                8.0,
                Some(
                    "🤖 The AI answer is taking too long.\nTry a shorter question.\n\n\
                     (limit: {timeout}s)",
                ),
            ),
        ] {
            table.insert(policy);
        }
        table
    }
}

fn parse_timeout(command: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(GateError::InvalidPolicy {
            command: command.to_string(),
            reason: format!("timeout_secs must be positive, got {}", secs),
        });
    }
    Duration::try_from_secs_f64(secs).map_err(|e| GateError::InvalidPolicy {
        command: command.to_string(),
        reason: format!("timeout_secs out of range: {}", e),
    })
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    defaults: Option<RawPolicy>,
    #[serde(default)]
    commands: HashMap<String, RawPolicy>,
}

#[derive(Debug, Deserialize)]
struct RawPolicy {
    cache_ttl_secs: Option<u64>,
    timeout_secs: Option<f64>,
    fallback_message: Option<String>,
}
