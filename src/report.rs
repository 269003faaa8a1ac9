//! Admin report rendering
//!
//! Turns monitor and cache snapshots into chat-sized text.

use std::fmt::Write;

use crate::cache::CacheSnapshot;
use crate::health::{CommandHealth, CommandStatus, ErrorLogEntry, Recommendations, UsageStats};

/// Rows shown in ranked reports
pub const TOP_N: usize = 10;
const MAX_DETAIL_CHARS: usize = 100;

pub fn error_log(entries: &[ErrorLogEntry], limit: usize) -> String {
    if entries.is_empty() {
        return "📋 No recent errors.".to_string();
    }

    let mut out = format!("🔴 Recent errors (up to {})\n\n", limit);
    for entry in entries {
        let _ = writeln!(out, "⏰ {}", entry.at.format("%H:%M:%S"));
        let _ = writeln!(out, "📍 {} ({})", entry.command_id, entry.room);
        let _ = writeln!(out, "👤 {}", entry.sender);
        let _ = writeln!(out, "❌ {}", truncate(&entry.detail, MAX_DETAIL_CHARS));
        let _ = writeln!(out, "⏱️ {:.2}s\n", entry.response_time.as_secs_f64());
    }
    out
}

/// Error statistics, highest error rate first. Expects the monitor's
/// snapshot ordering.
pub fn error_stats(health: &[CommandHealth], disabled: &[String]) -> String {
    if health.is_empty() {
        return "📊 No error statistics yet.".to_string();
    }

    let mut out = String::from("📊 Errors by command\n\n");
    for h in health.iter().take(TOP_N) {
        let status = match h.status {
            CommandStatus::Enabled => "✅ enabled",
            CommandStatus::Disabled => "🔒 disabled",
        };
        let _ = writeln!(out, "【{}】 {}", h.command_id, status);
        let _ = writeln!(out, "  calls: {}", h.total_calls);
        let _ = writeln!(
            out,
            "  errors: {} ({:.1}%)",
            h.error_count,
            h.error_rate * 100.0
        );
        let _ = writeln!(out, "  consecutive: {}\n", h.consecutive_errors);
    }

    if !disabled.is_empty() {
        let _ = write!(out, "\n🔒 Disabled commands: {}", disabled.join(", "));
    }
    out
}

pub fn usage_stats(usage: &[UsageStats]) -> String {
    if usage.is_empty() {
        return "📊 No usage statistics yet.".to_string();
    }

    let mut out = format!("📊 Command usage TOP {}\n\n", TOP_N);
    for (rank, u) in usage.iter().take(TOP_N).enumerate() {
        let _ = writeln!(out, "{}. {}: {} calls", rank + 1, u.command_id, u.call_count);
        let _ = writeln!(
            out,
            "   avg response: {:.2}s",
            u.avg_response_time.as_secs_f64()
        );
    }
    out
}

pub fn cache_status(snapshot: &CacheSnapshot) -> String {
    let stats = &snapshot.stats;
    let mut out = String::from("📊 Cache status\n\n");
    let _ = writeln!(out, "Entries: {}/{}", stats.entries, stats.max_entries);
    let _ = writeln!(
        out,
        "Hits: {} / misses: {} ({:.1}% hit rate)",
        stats.hits, stats.misses, stats.hit_rate_percent
    );
    if stats.entries == 0 {
        return out;
    }
    let _ = writeln!(out, "Average age: {:.0}s", snapshot.avg_age_secs);

    out.push_str("\n【By command】\n");
    for (command, count) in &snapshot.by_command {
        let _ = writeln!(out, "  • {}: {}", command, count);
    }

    if !snapshot.recent.is_empty() {
        out.push_str("\n【Most recent】\n");
        for entry in &snapshot.recent {
            let _ = writeln!(
                out,
                "  • {}: {}s ago",
                truncate(&entry.key, 40),
                entry.age_secs
            );
        }
    }
    out
}

pub fn recommendations(recs: &Recommendations) -> String {
    let mut out = String::from("⚡ Performance recommendations\n\n");
    if recs.is_empty() {
        out.push_str("Everything looks healthy.");
        return out;
    }

    if !recs.high_priority_cache.is_empty() {
        out.push_str("【Cache aggressively】\n");
        for command in &recs.high_priority_cache {
            let _ = writeln!(out, "  • {}", command);
        }
        out.push('\n');
    }
    if !recs.low_priority_cache.is_empty() {
        out.push_str("【Shorten cache TTL】\n");
        for command in &recs.low_priority_cache {
            let _ = writeln!(out, "  • {}", command);
        }
        out.push('\n');
    }
    if !recs.needs_optimization.is_empty() {
        out.push_str("【Needs optimization】\n");
        for (command, avg) in &recs.needs_optimization {
            let _ = writeln!(out, "  • {} (avg {:.1}s)", command, avg.as_secs_f64());
        }
        out.push('\n');
    }
    out
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, ResponseCache};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn health(id: &str, calls: u64, errors: u64, status: CommandStatus) -> CommandHealth {
        CommandHealth {
            command_id: id.to_string(),
            total_calls: calls,
            error_count: errors,
            consecutive_errors: errors,
            error_rate: errors as f64 / calls as f64,
            last_error: None,
            status,
        }
    }

    #[test]
    fn test_empty_reports() {
        assert!(error_log(&[], 20).contains("No recent errors"));
        assert!(error_stats(&[], &[]).contains("No error statistics"));
        assert!(usage_stats(&[]).contains("No usage statistics"));
        assert!(recommendations(&Recommendations::default()).contains("healthy"));
    }

    #[test]
    fn test_error_stats_lists_disabled() {
        let rows = vec![
            health("/news", 10, 6, CommandStatus::Disabled),
            health("/coin", 20, 1, CommandStatus::Enabled),
        ];
        let text = error_stats(&rows, &["/news".to_string()]);

        assert!(text.contains("【/news】 🔒 disabled"));
        assert!(text.contains("errors: 6 (60.0%)"));
        assert!(text.contains("【/coin】 ✅ enabled"));
        assert!(text.ends_with("Disabled commands: /news"));
    }

    #[test]
    fn test_usage_stats_caps_at_top_n() {
        let rows: Vec<UsageStats> = (0..15)
            .map(|i| UsageStats {
                command_id: format!("/cmd{}", i),
                call_count: 100 - i,
                last_used_at: None,
                total_response_time: Duration::from_secs(1),
                avg_response_time: Duration::from_millis(250),
            })
            .collect();
        let text = usage_stats(&rows);

        assert!(text.contains("1. /cmd0: 100 calls"));
        assert!(text.contains("10. /cmd9"));
        assert!(!text.contains("/cmd10"));
        assert!(text.contains("avg response: 0.25s"));
    }

    #[test]
    fn test_error_log_truncates_detail() {
        let entry = ErrorLogEntry {
            at: Utc.with_ymd_and_hms(2024, 3, 1, 14, 5, 9).unwrap(),
            command_id: "/blog".to_string(),
            room: "general".to_string(),
            sender: "bob".to_string(),
            detail: "x".repeat(150),
            response_time: Duration::from_millis(1234),
        };
        let text = error_log(&[entry], 20);

        assert!(text.contains("⏰ 14:05:09"));
        assert!(text.contains("📍 /blog (general)"));
        assert!(text.contains(&format!("❌ {}…", "x".repeat(100))));
        assert!(text.contains("⏱️ 1.23s"));
    }

    #[test]
    fn test_cache_status() {
        let cache = ResponseCache::new(100);
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        cache.put(CacheKey::new("general", "bob", "/stocks AAPL"), "/stocks", "AAPL: 150", t0);

        let now = t0 + chrono::Duration::seconds(42);
        let text = cache_status(&cache.snapshot(now, 10));
        assert!(text.contains("Entries: 1/100"));
        assert!(text.contains("• /stocks: 1"));
        assert!(text.contains("general:bob:/stocks AAPL: 42s ago"));
    }

    #[test]
    fn test_recommendations_sections() {
        let recs = Recommendations {
            high_priority_cache: vec!["/stocks".to_string()],
            low_priority_cache: vec![],
            needs_optimization: vec![("/movies".to_string(), Duration::from_millis(6500))],
        };
        let text = recommendations(&recs);
        assert!(text.contains("【Cache aggressively】\n  • /stocks"));
        assert!(!text.contains("Shorten cache TTL"));
        assert!(text.contains("/movies (avg 6.5s)"));
    }
}
