//! Command Dispatcher
//!
//! Entry point for inbound chat messages. For each message:
//! 1. Resolve the command; non-commands get an empty reply
//! 2. Check admin and room permissions
//! 3. Refuse disabled commands
//! 4. Serve a fresh cache entry if there is one
//! 5. Otherwise run the handler on the worker pool under the command's
//!    deadline, record the outcome, and cache the reply
//!
//! On a timeout the last cached reply is served with a stale notice, even
//! past its TTL. No error crosses this boundary; every path yields a reply.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::health::{ErrorDetail, HealthMonitor};
use crate::permissions::{self, AccessControl};
use crate::policy::{CommandPolicy, PolicyTable};
use crate::registry::{CommandResolver, ResolvedCommand};
use crate::scheduler::{Outcome, PendingReply, Scheduler};

pub const DISABLED_MESSAGE: &str =
    "🔒 This command is temporarily disabled.\nPlease try again later.";
pub const AUTO_DISABLED_MESSAGE: &str = "🚨 This command failed repeatedly and has been \
     disabled.\nAn administrator has been notified.";

pub const DEFAULT_LONG_RUNNING_THRESHOLD: Duration = Duration::from_secs(10);

/// Reply served when a fresh fetch timed out but older data exists
pub fn stale_notice(age: Duration, payload: &str) -> String {
    format!(
        "⏱️ Latest fetch timed out (showing data from {}s ago)\n\n{}",
        age.as_secs(),
        payload
    )
}

pub struct Dispatcher {
    resolver: Arc<dyn CommandResolver>,
    access: Arc<dyn AccessControl>,
    policies: Arc<PolicyTable>,
    cache: ResponseCache,
    scheduler: Scheduler,
    health: Arc<HealthMonitor>,
    long_running_threshold: Duration,
}

impl Dispatcher {
    pub fn new(
        resolver: Arc<dyn CommandResolver>,
        access: Arc<dyn AccessControl>,
        policies: Arc<PolicyTable>,
    ) -> Self {
        Self {
            resolver,
            access,
            policies,
            cache: ResponseCache::default(),
            scheduler: Scheduler::default(),
            health: Arc::new(HealthMonitor::default()),
            long_running_threshold: DEFAULT_LONG_RUNNING_THRESHOLD,
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = health;
        self
    }

    /// Commands with a timeout at or above this get the budget once for the
    /// wait for a worker and once more from pickup
    pub fn with_long_running_threshold(mut self, threshold: Duration) -> Self {
        self.long_running_threshold = threshold;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Handle a message using the wall clock
    pub async fn handle(&self, room: &str, sender: &str, message: &str) -> String {
        self.handle_at(room, sender, message, Utc::now()).await
    }

    pub async fn handle_at(
        &self,
        room: &str,
        sender: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> String {
        let Some(command) = self.resolver.resolve(message) else {
            return String::new();
        };
        let id = command.command_id.as_str();

        if let Err(denial) = permissions::check(
            self.access.as_ref(),
            room,
            sender,
            command.requires_admin,
            command.requires_enabled_room,
        ) {
            debug!("{} denied for {} in {}: {:?}", id, sender, room, denial);
            return denial.message().to_string();
        }

        if self.health.is_disabled(id) {
            debug!("{} is disabled", id);
            return DISABLED_MESSAGE.to_string();
        }

        let policy = self.policies.get(id);
        let key = CacheKey::new(room, sender, message);

        if policy.is_cacheable() {
            if let Some(hit) = self.cache.get(&key, policy.cache_ttl, now) {
                debug!("Cache hit: {} ({}s old)", key, hit.age.as_secs());
                return hit.payload;
            }
        }

        let token = self.health.record_start(id, now);
        if token.is_disabled() {
            return DISABLED_MESSAGE.to_string();
        }

        let dispatched = Instant::now();
        match self.execute(&command, &policy, room, sender, message).await {
            Outcome::Completed(Ok(reply)) => {
                self.health.record_success(id, token);
                if policy.is_cacheable() && !reply.is_empty() {
                    self.cache.put(key, id, &reply, now);
                }
                reply
            }
            Outcome::Completed(Err(e)) => {
                let detail = format!("{:#}", e);
                warn!("{} failed for {} in {}: {}", id, sender, room, detail);
                let outcome = self.health.record_error(
                    id,
                    token,
                    ErrorDetail {
                        room,
                        sender,
                        message: &detail,
                    },
                    now,
                );
                if outcome.disabled {
                    AUTO_DISABLED_MESSAGE.to_string()
                } else {
                    policy.render_fallback()
                }
            }
            Outcome::TimedOut(pending) => {
                warn!(
                    "{} timed out after {}s",
                    id,
                    crate::policy::format_secs(policy.execution_timeout)
                );
                if policy.is_cacheable() {
                    self.collect_late(pending, key.clone(), &policy, now, dispatched);
                }
                match self.cache.get_stale(&key, now) {
                    Some(stale) => {
                        info!("Serving stale reply for {} ({}s old)", id, stale.age.as_secs());
                        stale_notice(stale.age, &stale.payload)
                    }
                    None => policy.render_fallback(),
                }
            }
        }
    }

    /// Run listed commands once and seed the cache with their replies.
    /// Permissions and health are bypassed. Returns how many were cached.
    pub async fn preload(&self, room: &str, sender: &str, messages: &[&str]) -> usize {
        let mut cached = 0;
        for message in messages {
            let Some(command) = self.resolver.resolve(message) else {
                warn!("Preload skipped, not a command: {}", message);
                continue;
            };
            let policy = self.policies.get(&command.command_id);
            if !policy.is_cacheable() {
                continue;
            }

            let result = match self.execute(&command, &policy, room, sender, message).await {
                Outcome::Completed(result) => result,
                Outcome::TimedOut(pending) => pending.wait().await,
            };
            match result {
                Ok(reply) if !reply.is_empty() => {
                    let key = CacheKey::new(room, sender, message);
                    self.cache.put(key, &command.command_id, &reply, Utc::now());
                    info!(
                        "Preloaded {} (cached for {}s)",
                        message,
                        policy.cache_ttl.as_secs()
                    );
                    cached += 1;
                }
                Ok(_) => debug!("Preload of {} returned nothing", message),
                Err(e) => warn!("Preload of {} failed: {:#}", message, e),
            }
        }
        cached
    }

    async fn execute(
        &self,
        command: &ResolvedCommand,
        policy: &CommandPolicy,
        room: &str,
        sender: &str,
        message: &str,
    ) -> Outcome {
        let handler = Arc::clone(&command.handler);
        let (room, sender, message) = (room.to_string(), sender.to_string(), message.to_string());
        let job = move || handler.handle(&room, &sender, &message);

        if policy.execution_timeout >= self.long_running_threshold {
            self.scheduler.run_long(job, policy.execution_timeout).await
        } else {
            self.scheduler.run(job, policy.execution_timeout).await
        }
    }

    /// Cache the reply of a handler that finished after its deadline.
    /// Late results are not counted against the command's health.
    fn collect_late(
        &self,
        pending: PendingReply,
        key: CacheKey,
        policy: &CommandPolicy,
        now: DateTime<Utc>,
        dispatched: Instant,
    ) {
        let cache = self.cache.clone();
        let command_id = policy.command_id.clone();

        tokio::spawn(async move {
            match pending.wait().await {
                Ok(reply) if !reply.is_empty() => {
                    let finished = chrono::Duration::from_std(dispatched.elapsed())
                        .map(|elapsed| now + elapsed)
                        .unwrap_or(now);
                    debug!("Late reply cached for {}", key);
                    cache.put(key, &command_id, &reply, finished);
                }
                Ok(_) => {}
                Err(e) => warn!("{} failed after timing out: {:#}", command_id, e),
            }
        });
    }
}
