//! Built-in admin commands
//!
//! Reporting and recovery commands backed by the cache, the health monitor
//! and the access list. They are admin-only and never cached.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ResponseCache;
use crate::health::HealthMonitor;
use crate::permissions::StaticAccessList;
use crate::policy::{CommandPolicy, PolicyTable};
use crate::registry::{CommandRegistry, CommandSpec};
use crate::report;

const DEFAULT_LOG_LIMIT: usize = 20;
const MAX_LOG_LIMIT: usize = 100;
const ADMIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state the admin commands operate on
#[derive(Clone)]
pub struct AdminContext {
    pub cache: ResponseCache,
    pub health: Arc<HealthMonitor>,
    pub access: Arc<StaticAccessList>,
}

/// Register admin commands and give each a zero-TTL policy
pub fn register_admin_commands(
    registry: &mut CommandRegistry,
    policies: &mut PolicyTable,
    ctx: AdminContext,
) {
    let AdminContext {
        cache,
        health,
        access,
    } = ctx;

    let c = cache.clone();
    registry.register(
        CommandSpec::new("/cache-status", move |_: &str, _: &str, _: &str| {
            Ok(report::cache_status(&c.snapshot(Utc::now(), report::TOP_N)))
        })
        .admin_only(),
    );

    let c = cache;
    registry.register(
        CommandSpec::new("/cache-clear", move |_: &str, _: &str, _: &str| {
            let removed = c.clear();
            Ok(format!("✅ Cache cleared.\n📊 Removed entries: {}", removed))
        })
        .admin_only(),
    );

    let h = Arc::clone(&health);
    registry.register(
        CommandSpec::new("/error-log", move |_: &str, _: &str, msg: &str| {
            let limit = argument(msg)
                .and_then(|arg| arg.parse::<usize>().ok())
                .map(|n| n.clamp(1, MAX_LOG_LIMIT))
                .unwrap_or(DEFAULT_LOG_LIMIT);
            Ok(report::error_log(&h.error_log(limit), limit))
        })
        .prefix()
        .admin_only(),
    );

    let h = Arc::clone(&health);
    registry.register(
        CommandSpec::new("/error-stats", move |_: &str, _: &str, _: &str| {
            Ok(report::error_stats(&h.health_snapshot(), &h.disabled_commands()))
        })
        .admin_only(),
    );

    let h = Arc::clone(&health);
    registry.register(
        CommandSpec::new("/usage-stats", move |_: &str, _: &str, _: &str| {
            Ok(report::usage_stats(&h.usage_snapshot()))
        })
        .admin_only(),
    );

    let h = Arc::clone(&health);
    registry.register(
        CommandSpec::new("/enable", move |_: &str, _: &str, msg: &str| {
            let Some(command) = argument(msg) else {
                return Ok("Usage: /enable <command>".to_string());
            };
            Ok(if h.enable(command) {
                format!("✅ {} has been enabled.", command)
            } else {
                format!("ℹ️ {} is already enabled.", command)
            })
        })
        .prefix()
        .admin_only(),
    );

    let h = Arc::clone(&health);
    registry.register(
        CommandSpec::new("/reset-stats", move |_: &str, _: &str, msg: &str| {
            let Some(command) = argument(msg) else {
                return Ok("Usage: /reset-stats <command>".to_string());
            };
            h.reset_stats(command);
            Ok(format!("✅ All statistics for {} have been reset.", command))
        })
        .prefix()
        .admin_only(),
    );

    let h = Arc::clone(&health);
    registry.register(
        CommandSpec::new("/recommendations", move |_: &str, _: &str, _: &str| {
            Ok(report::recommendations(&h.recommendations()))
        })
        .admin_only(),
    );

    let h = health;
    registry.register(
        CommandSpec::new("/alerts", move |_: &str, _: &str, _: &str| {
            let alerts = h.drain_alerts();
            if alerts.is_empty() {
                return Ok("🔔 No pending alerts.".to_string());
            }
            let lines: Vec<String> = alerts
                .iter()
                .map(|a| format!("[{}] {}", a.at.format("%H:%M:%S"), a.message))
                .collect();
            Ok(lines.join("\n\n"))
        })
        .admin_only(),
    );

    // Room management works from any room so a room can be enabled from inside it
    let a = Arc::clone(&access);
    registry.register(
        CommandSpec::new("/room-add", move |room: &str, _: &str, msg: &str| {
            let target = argument(msg).unwrap_or(room);
            Ok(if a.add_room(target) {
                format!("✅ Bot enabled in {}.", target)
            } else {
                format!("ℹ️ Bot is already enabled in {}.", target)
            })
        })
        .prefix()
        .admin_only()
        .any_room(),
    );

    let a = Arc::clone(&access);
    registry.register(
        CommandSpec::new("/room-remove", move |room: &str, _: &str, msg: &str| {
            let target = argument(msg).unwrap_or(room);
            Ok(if a.remove_room(target) {
                format!("✅ Bot disabled in {}.", target)
            } else {
                format!("ℹ️ Bot was not enabled in {}.", target)
            })
        })
        .prefix()
        .admin_only()
        .any_room(),
    );

    let a = access;
    registry.register(
        CommandSpec::new("/rooms", move |_: &str, _: &str, _: &str| {
            let rooms = a.rooms();
            if rooms.is_empty() {
                return Ok("No rooms are enabled.".to_string());
            }
            Ok(format!("🏠 Enabled rooms ({})\n{}", rooms.len(), rooms.join("\n")))
        })
        .admin_only()
        .any_room(),
    );

    for id in ADMIN_COMMANDS {
        policies.insert(CommandPolicy::new(id, Duration::ZERO, ADMIN_TIMEOUT));
    }
}

pub const ADMIN_COMMANDS: [&str; 12] = [
    "/cache-status",
    "/cache-clear",
    "/error-log",
    "/error-stats",
    "/usage-stats",
    "/enable",
    "/reset-stats",
    "/recommendations",
    "/alerts",
    "/room-add",
    "/room-remove",
    "/rooms",
];

/// Everything after the command word, trimmed
fn argument(message: &str) -> Option<&str> {
    message
        .trim()
        .split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim())
        .filter(|rest| !rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::health::ErrorDetail;
    use crate::registry::CommandResolver;

    struct Setup {
        registry: CommandRegistry,
        policies: PolicyTable,
        ctx: AdminContext,
    }

    fn setup() -> Setup {
        let ctx = AdminContext {
            cache: ResponseCache::new(10),
            health: Arc::new(HealthMonitor::default()),
            access: Arc::new(StaticAccessList::new(["alice"], ["general"])),
        };
        let mut registry = CommandRegistry::new();
        let mut policies = PolicyTable::new();
        register_admin_commands(&mut registry, &mut policies, ctx.clone());
        Setup {
            registry,
            policies,
            ctx,
        }
    }

    fn run(registry: &CommandRegistry, room: &str, message: &str) -> String {
        let command = registry.resolve(message).unwrap();
        assert!(command.requires_admin);
        command.handler.handle(room, "alice", message).unwrap()
    }

    #[test]
    fn test_all_admin_commands_are_uncached() {
        let s = setup();
        assert_eq!(s.registry.len(), ADMIN_COMMANDS.len());
        for id in ADMIN_COMMANDS {
            assert!(!s.policies.get(id).is_cacheable(), "{} should not be cached", id);
        }
    }

    #[test]
    fn test_enable_command() {
        let s = setup();
        for _ in 0..10 {
            let token = s.ctx.health.record_start("/news", Utc::now());
            let detail = ErrorDetail {
                room: "general",
                sender: "bob",
                message: "boom",
            };
            s.ctx.health.record_error("/news", token, detail, Utc::now());
        }

        assert_eq!(run(&s.registry, "general", "/enable /news"), "✅ /news has been enabled.");
        assert_eq!(
            run(&s.registry, "general", "/enable /news"),
            "ℹ️ /news is already enabled."
        );
        assert_eq!(run(&s.registry, "general", "/enable"), "Usage: /enable <command>");

        let alerts = run(&s.registry, "general", "/alerts");
        assert!(alerts.contains("disabled automatically"));
        assert_eq!(run(&s.registry, "general", "/alerts"), "🔔 No pending alerts.");
    }

    #[test]
    fn test_cache_clear_reports_count() {
        let s = setup();
        for msg in ["/a", "/b", "/c"] {
            s.ctx.cache.put(CacheKey::new("general", "bob", msg), msg, "x", Utc::now());
        }
        assert!(run(&s.registry, "general", "/cache-status").contains("Entries: 3/10"));
        assert!(run(&s.registry, "general", "/cache-clear").ends_with("Removed entries: 3"));
        assert!(s.ctx.cache.is_empty());
    }

    #[test]
    fn test_room_management() {
        let s = setup();
        assert_eq!(run(&s.registry, "lobby", "/room-add"), "✅ Bot enabled in lobby.");
        assert_eq!(
            run(&s.registry, "lobby", "/room-add lobby"),
            "ℹ️ Bot is already enabled in lobby."
        );
        assert!(run(&s.registry, "lobby", "/rooms").contains("general\nlobby"));
        assert_eq!(run(&s.registry, "general", "/room-remove lobby"), "✅ Bot disabled in lobby.");
        assert_eq!(s.ctx.access.rooms(), vec!["general"]);
    }

    #[test]
    fn test_argument_parsing() {
        assert_eq!(argument("/error-log 50"), Some("50"));
        assert_eq!(argument("  /enable   /stocks  "), Some("/stocks"));
        assert_eq!(argument("/error-log"), None);
    }
}
