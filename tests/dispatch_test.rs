//! Dispatcher Integration Tests
//!
//! End-to-end behaviour through the public API: caching, stale rescue on
//! timeouts, auto-disable and admin recovery, persistence.

use chrono::{DateTime, TimeZone, Utc};
use cmdgate::dispatcher::{AUTO_DISABLED_MESSAGE, DISABLED_MESSAGE};
use cmdgate::{
    register_admin_commands, AdminContext, CacheKey, CommandPolicy, CommandRegistry, CommandSpec,
    CommandStatus, Dispatcher, HealthMonitor, PolicyTable, ResponseCache, Scheduler,
    StaticAccessList,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(secs)
}

/// Quote service whose latency and price can be changed mid-test
struct QuoteService {
    delay_ms: AtomicU64,
    price: AtomicU64,
    calls: AtomicUsize,
}

impl QuoteService {
    fn new(delay_ms: u64, price: u64) -> Arc<Self> {
        Arc::new(Self {
            delay_ms: AtomicU64::new(delay_ms),
            price: AtomicU64::new(price),
            calls: AtomicUsize::new(0),
        })
    }

    fn quote(&self, message: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(self.delay_ms.load(Ordering::SeqCst)));
        let symbol = message
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| anyhow::anyhow!("missing symbol"))?;
        Ok(format!("{}: {}", symbol, self.price.load(Ordering::SeqCst)))
    }
}

struct Harness {
    dispatcher: Dispatcher,
    quotes: Arc<QuoteService>,
    health: Arc<HealthMonitor>,
    cache: ResponseCache,
}

/// `/stocks` with a 60s TTL and a 400ms budget (the 4s budget scaled down)
fn harness() -> Harness {
    let quotes = QuoteService::new(100, 150);
    let cache = ResponseCache::new(100);
    let health = Arc::new(HealthMonitor::default());
    let access = Arc::new(StaticAccessList::new(["admin"], ["markets"]));

    let mut registry = CommandRegistry::new();
    let q = Arc::clone(&quotes);
    registry.register(
        CommandSpec::new("/stocks", move |_: &str, _: &str, msg: &str| q.quote(msg)).prefix(),
    );
    registry.register(CommandSpec::new("/outage", |_: &str, _: &str, _: &str| {
        Err(anyhow::anyhow!("HTTP 502 from upstream"))
    }));

    let mut policies = PolicyTable::new()
        .with(
            CommandPolicy::new("/stocks", Duration::from_secs(60), Duration::from_millis(400))
                .with_fallback("📈 Market data is delayed. (limit: {timeout}s)"),
        )
        .with(CommandPolicy::new("/outage", Duration::from_secs(60), Duration::from_secs(1)));
    register_admin_commands(
        &mut registry,
        &mut policies,
        AdminContext {
            cache: cache.clone(),
            health: Arc::clone(&health),
            access: Arc::clone(&access),
        },
    );

    let dispatcher = Dispatcher::new(Arc::new(registry), access, Arc::new(policies))
        .with_cache(cache.clone())
        .with_scheduler(Scheduler::new(3))
        .with_health(Arc::clone(&health));

    Harness {
        dispatcher,
        quotes,
        health,
        cache,
    }
}

#[tokio::test]
async fn test_stocks_scenario_cache_then_stale_rescue() {
    let h = harness();

    // First call: cache empty, handler answers within budget
    let reply = h.dispatcher.handle_at("markets", "kim", "/stocks AAPL", t0()).await;
    assert_eq!(reply, "AAPL: 150");
    assert_eq!(h.quotes.calls.load(Ordering::SeqCst), 1);

    // +30s: served from cache, handler untouched
    let reply = h.dispatcher.handle_at("markets", "kim", "/stocks AAPL", at(30)).await;
    assert_eq!(reply, "AAPL: 150");
    assert_eq!(h.quotes.calls.load(Ordering::SeqCst), 1);

    // +90s: expired, and the upstream is now slower than the budget
    h.quotes.delay_ms.store(600, Ordering::SeqCst);
    h.quotes.price.store(151, Ordering::SeqCst);
    let started = Instant::now();
    let reply = h.dispatcher.handle_at("markets", "kim", "/stocks AAPL", at(90)).await;
    assert!(started.elapsed() < Duration::from_millis(580), "dispatcher blocked on slow handler");
    assert!(reply.contains("90s"), "missing age annotation: {}", reply);
    assert!(reply.ends_with("AAPL: 150"));
    assert_eq!(h.quotes.calls.load(Ordering::SeqCst), 2);

    // The timed out call is not a breaker error
    let health = h.health.health("/stocks").unwrap();
    assert_eq!(health.total_calls, 2);
    assert_eq!(health.error_count, 0);

    // The slow call still finishes and refreshes the cache
    tokio::time::sleep(Duration::from_millis(600)).await;
    let key = CacheKey::new("markets", "kim", "/stocks AAPL");
    let fresh = h.cache.get(&key, Duration::from_secs(60), at(91)).unwrap();
    assert_eq!(fresh.payload, "AAPL: 151");
}

#[tokio::test]
async fn test_timeout_without_cached_data_uses_fallback() {
    let h = harness();
    h.quotes.delay_ms.store(600, Ordering::SeqCst);

    let reply = h.dispatcher.handle_at("markets", "kim", "/stocks TSLA", t0()).await;
    assert_eq!(reply, "📈 Market data is delayed. (limit: 0.4s)");
}

#[tokio::test]
async fn test_cache_keys_are_per_room_and_sender() {
    let h = harness();
    h.dispatcher.handle_at("markets", "kim", "/stocks AAPL", t0()).await;
    h.dispatcher.handle_at("markets", "lee", "/stocks AAPL", t0()).await;
    assert_eq!(h.quotes.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.cache.len(), 2);
}

#[tokio::test]
async fn test_auto_disable_and_admin_recovery() {
    let h = harness();

    for _ in 0..9 {
        let reply = h.dispatcher.handle("markets", "kim", "/outage").await;
        assert!(reply.contains("took too long") || reply.contains("limit"));
    }
    assert_eq!(h.dispatcher.handle("markets", "kim", "/outage").await, AUTO_DISABLED_MESSAGE);
    assert_eq!(h.dispatcher.handle("markets", "kim", "/outage").await, DISABLED_MESSAGE);

    // Non-admins cannot re-enable
    let reply = h.dispatcher.handle("markets", "kim", "/enable /outage").await;
    assert!(reply.contains("administrators"));
    assert_eq!(h.health.health("/outage").unwrap().status, CommandStatus::Disabled);

    let reply = h.dispatcher.handle("markets", "admin", "/enable /outage").await;
    assert_eq!(reply, "✅ /outage has been enabled.");
    assert!(!h.health.is_disabled("/outage"));

    // Admin replies are never cached
    let reply = h.dispatcher.handle("markets", "admin", "/enable /outage").await;
    assert_eq!(reply, "ℹ️ /outage is already enabled.");

    let stats = h.dispatcher.handle("markets", "admin", "/error-stats").await;
    assert!(stats.contains("【/outage】 ✅ enabled"));
    assert!(stats.contains("errors: 10 (100.0%)"));

    let alerts = h.health.drain_alerts();
    assert!(alerts.iter().any(|a| a.message.contains("disabled automatically")));
}

#[tokio::test]
async fn test_concurrent_requests_share_bounded_pool() {
    let h = Arc::new(harness());
    let mut tasks = Vec::new();
    for i in 0..12 {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let message = format!("/stocks SYM{}", i);
            h.dispatcher.handle_at("markets", "kim", &message, t0()).await
        }));
    }

    let mut fresh = 0;
    for task in tasks {
        let reply = task.await.unwrap();
        if reply.ends_with(": 150") && !reply.contains("limit") {
            fresh += 1;
        }
        assert!(h.dispatcher.scheduler().stats().busy <= 3);
    }
    // 12 jobs of 100ms on 3 workers need ~400ms; early ones must finish in budget
    assert!(fresh >= 3);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.cache.len(), 12);
    assert_eq!(h.quotes.calls.load(Ordering::SeqCst), 12);
}

#[tokio::test]
async fn test_stats_survive_restart() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("command_stats.json");

    let h = harness();
    for _ in 0..10 {
        h.dispatcher.handle("markets", "kim", "/outage").await;
    }
    h.dispatcher.handle("markets", "kim", "/stocks AAPL").await;
    h.health.save(&path).unwrap();

    let restored = HealthMonitor::default();
    assert!(restored.restore(&path).unwrap());
    assert_eq!(restored.disabled_commands(), vec!["/outage"]);
    assert_eq!(restored.usage("/stocks").unwrap().call_count, 1);
    assert_eq!(restored.error_log(5).len(), 5);
    assert_eq!(restored.error_log(5)[0].detail, "HTTP 502 from upstream");
}
