//! cmdgate - Entry Point
//!
//! Reads `room<TAB>sender<TAB>message` lines from stdin and prints each reply.
//! A few local demo handlers are registered next to the admin commands.

use anyhow::Context;
use cmdgate::{
    register_admin_commands, AdminContext, CommandRegistry, CommandSpec, Config, Dispatcher,
    HealthMonitor, Maintenance, PolicyTable, ResponseCache, Scheduler, StaticAccessList,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Commands warmed into the cache at startup
const PRELOAD: [&str; 2] = ["/help", "/time"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let json_logs = args.iter().any(|a| a == "--json" || a == "-j");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("cmdgate v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: cmdgate [OPTIONS] < messages.tsv");
        println!();
        println!("Reads room<TAB>sender<TAB>message lines from stdin.");
        println!();
        println!("Options:");
        println!("  --json, -j   Log to stderr as JSON");
        println!("  --help, -h   Show this help");
        println!();
        println!("Environment variables:");
        println!("  CMDGATE_ADMIN_USERS          Comma separated admin senders");
        println!("  CMDGATE_ALLOWED_ROOMS        Comma separated enabled rooms");
        println!("  CMDGATE_POLICY_FILE          TOML policy table");
        println!("  CMDGATE_STATS_PATH           JSON file for health stats");
        println!("  CMDGATE_CACHE_MAX_ENTRIES    Cache size limit (default: 100)");
        println!("  CMDGATE_WORKERS              Handler pool size (default: 3)");
        println!("  CMDGATE_SWEEP_INTERVAL_SECS  Cache sweep period (default: 300)");
        println!("  CMDGATE_AUTOSAVE_SECS        Stats autosave period (default: 300)");
        println!("  CMDGATE_LONG_RUNNING_SECS    Long-running threshold (default: 10)");
        return Ok(());
    }

    // Replies go to stdout, so logs always go to stderr
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("cmdgate v{}", env!("CARGO_PKG_VERSION"));
    let config = Config::from_env()?;

    let mut policies = match &config.policy_file {
        Some(path) => PolicyTable::load(path)
            .with_context(|| format!("loading policy file {}", path.display()))?,
        None => PolicyTable::builtin(),
    };

    let cache = ResponseCache::new(config.cache_max_entries);
    let health = Arc::new(HealthMonitor::new(config.breaker.clone()));
    if let Some(path) = &config.stats_path {
        if let Err(e) = health.restore(path) {
            warn!("Could not restore stats from {}: {}", path.display(), e);
        }
    }
    let access = Arc::new(StaticAccessList::new(
        config.admin_users.clone(),
        config.allowed_rooms.clone(),
    ));

    let mut registry = CommandRegistry::new();
    register_demo_commands(&mut registry);
    register_admin_commands(
        &mut registry,
        &mut policies,
        AdminContext {
            cache: cache.clone(),
            health: Arc::clone(&health),
            access: Arc::clone(&access),
        },
    );
    let policies = Arc::new(policies);

    info!("Configuration:");
    info!("  · Commands: {}", registry.len());
    info!("  · Enabled rooms: {}", access.rooms().join(", "));
    info!("  · Admins: {}", access.admins().len());
    info!("  · Cache limit: {} entries", cache.max_entries());
    info!("  · Workers: {}", config.workers);

    let dispatcher = Dispatcher::new(Arc::new(registry), access.clone(), Arc::clone(&policies))
        .with_cache(cache.clone())
        .with_scheduler(Scheduler::new(config.workers))
        .with_health(Arc::clone(&health))
        .with_long_running_threshold(config.long_running_threshold);

    let mut maintenance = Maintenance::new(config.maintenance());
    maintenance.start(cache, Arc::clone(&policies), Arc::clone(&health));

    let (rooms, admins) = (access.rooms(), access.admins());
    if let (Some(room), Some(admin)) = (rooms.first(), admins.first()) {
        let warmed = dispatcher.preload(room, admin, &PRELOAD).await;
        info!("Preloaded {}/{} commands", warmed, PRELOAD.len());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut fields = line.splitn(3, '\t');
        let (Some(room), Some(sender), Some(message)) =
            (fields.next(), fields.next(), fields.next())
        else {
            warn!("Skipping malformed line: {}", line);
            continue;
        };

        let reply = dispatcher.handle(room, sender, message).await;
        if !reply.is_empty() {
            println!("[{}] {}", room, reply);
        }
        for alert in dispatcher.health().drain_alerts() {
            warn!("ADMIN ALERT: {}", alert.message);
        }
    }

    maintenance.stop().await;
    if let Some(path) = &config.stats_path {
        health.save(path)?;
    }
    info!("Input closed, shutting down");
    Ok(())
}

fn register_demo_commands(registry: &mut CommandRegistry) {
    registry
        .register(
            CommandSpec::new("/help", |_: &str, _: &str, _: &str| {
                Ok("📖 Commands: /echo <text>, /time, /slow, /flaky".to_string())
            })
            .alias("/commands"),
        )
        .register(
            CommandSpec::new("/echo", |_: &str, sender: &str, msg: &str| {
                let text = msg.trim_start_matches("/echo").trim();
                Ok(format!("{} said: {}", sender, text))
            })
            .prefix(),
        )
        .register(CommandSpec::new("/time", |_: &str, _: &str, _: &str| {
            Ok(chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string())
        }))
        // Slower than the default 4s budget; exercises the stale fallback
        .register(CommandSpec::new("/slow", |_: &str, _: &str, _: &str| {
            std::thread::sleep(Duration::from_secs(6));
            Ok(format!("slow result at {}", chrono::Utc::now().format("%H:%M:%S")))
        }));

    // Fails every other call; exercises the circuit breaker
    let calls = AtomicU64::new(0);
    registry.register(CommandSpec::new("/flaky", move |_: &str, _: &str, _: &str| {
        let n = calls.fetch_add(1, Ordering::Relaxed);
        if n % 2 == 1 {
            anyhow::bail!("upstream returned 503 on call {}", n + 1);
        }
        Ok(format!("flaky ok (call {})", n + 1))
    }));
}
