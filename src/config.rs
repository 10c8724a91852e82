//! Application configuration, loaded from environment variables with
//! the defaults named throughout the spec.
//!
//! Every tunable here has a canonical default; explicit env vars override it.
//! Grounded on `ApiServerConfig::from_env_or_default` / `WebPushConfig::from_env`
//! in the teacher repo.

use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub port: u16,
    pub database_url: String,
    pub processor_base_url: String,

    /// §4.B — worker pool size.
    pub max_concurrent_conversions: usize,
    /// §4.B — admission control ceiling (queued + processing).
    pub hard_cap: usize,
    /// §4.B — reapTimeouts threshold, end-to-end per job.
    pub processing_timeout: Duration,

    /// §3 / §4.C — result retention before the reaper deletes the row.
    pub result_ttl: Duration,
    /// §4.C — presigned URL is refreshed when within this window of expiry.
    pub refresh_window: Duration,
    /// §4.C — TTL assigned to a freshly issued presigned URL.
    pub presigned_url_ttl: Duration,

    /// §4.C — progress is considered stale (poll fallback kicks in) after this.
    pub progress_stale_after: Duration,
    /// §4.C — poll interval once the poll fallback is active.
    pub poll_interval: Duration,

    /// §4.D — Monitor sweep interval.
    pub monitor_tick_interval: Duration,
    /// §4.D / GLOSSARY — a job is "stuck" once processing has been silent this long.
    pub stuck_threshold: Duration,
    /// §3 / §4.D — attempt ceiling before STUCK_RECOVERY_FAILED.
    pub max_attempts: u32,

    /// §4.E — per-connection outbound queue depth.
    pub push_queue_capacity: usize,
    /// §4.E — heartbeat ping interval.
    pub push_heartbeat_interval: Duration,
    /// §4.E — time to wait for a pong before closing.
    pub push_heartbeat_timeout: Duration,
    /// §4.E — grace period after a terminal status before closing.
    pub push_terminal_grace: Duration,
    /// §4.E — allowed WebSocket origins (exact strings).
    pub allowed_origins: Vec<String>,
    /// §4.E — allowed WebSocket origins (regex patterns).
    pub allowed_origin_patterns: Vec<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_or(key, default_secs))
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            database_url: "sqlite:orchestrator.db?mode=rwc".to_string(),
            processor_base_url: "http://127.0.0.1:9000".to_string(),

            max_concurrent_conversions: 8,
            hard_cap: 200,
            processing_timeout: Duration::from_secs(10 * 60),

            result_ttl: Duration::from_secs(24 * 60 * 60),
            refresh_window: Duration::from_secs(60 * 60),
            presigned_url_ttl: Duration::from_secs(24 * 60 * 60),

            progress_stale_after: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),

            monitor_tick_interval: Duration::from_secs(2 * 60),
            stuck_threshold: Duration::from_secs(10 * 60),
            max_attempts: 3,

            push_queue_capacity: 100,
            push_heartbeat_interval: Duration::from_secs(30),
            push_heartbeat_timeout: Duration::from_secs(30),
            push_terminal_grace: Duration::from_secs(12),
            allowed_origins: Vec::new(),
            allowed_origin_patterns: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults named in the spec for anything unset.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or(default.bind_address),
            port: env_or("PORT", default.port),
            database_url: std::env::var("DATABASE_URL").unwrap_or(default.database_url),
            processor_base_url: std::env::var("PROCESSOR_BASE_URL")
                .unwrap_or(default.processor_base_url),

            max_concurrent_conversions: env_or(
                "MAX_CONCURRENT_CONVERSIONS",
                default.max_concurrent_conversions,
            ),
            hard_cap: env_or("HARD_CAP", default.hard_cap),
            processing_timeout: env_secs(
                "PROCESSING_TIMEOUT_SECS",
                default.processing_timeout.as_secs(),
            ),

            result_ttl: env_secs("RESULT_TTL_SECS", default.result_ttl.as_secs()),
            refresh_window: env_secs("REFRESH_WINDOW_SECS", default.refresh_window.as_secs()),
            presigned_url_ttl: env_secs(
                "PRESIGNED_URL_TTL_SECS",
                default.presigned_url_ttl.as_secs(),
            ),

            progress_stale_after: env_secs(
                "PROGRESS_STALE_AFTER_SECS",
                default.progress_stale_after.as_secs(),
            ),
            poll_interval: env_secs("POLL_INTERVAL_SECS", default.poll_interval.as_secs()),

            monitor_tick_interval: env_secs(
                "MONITOR_TICK_INTERVAL_SECS",
                default.monitor_tick_interval.as_secs(),
            ),
            stuck_threshold: env_secs("STUCK_THRESHOLD_SECS", default.stuck_threshold.as_secs()),
            max_attempts: env_or("MAX_ATTEMPTS", default.max_attempts),

            push_queue_capacity: env_or("PUSH_QUEUE_CAPACITY", default.push_queue_capacity),
            push_heartbeat_interval: env_secs(
                "PUSH_HEARTBEAT_INTERVAL_SECS",
                default.push_heartbeat_interval.as_secs(),
            ),
            push_heartbeat_timeout: env_secs(
                "PUSH_HEARTBEAT_TIMEOUT_SECS",
                default.push_heartbeat_timeout.as_secs(),
            ),
            push_terminal_grace: env_secs(
                "PUSH_TERMINAL_GRACE_SECS",
                default.push_terminal_grace.as_secs(),
            ),
            allowed_origins: {
                let v = env_list("PUSH_ALLOWED_ORIGINS");
                if v.is_empty() { default.allowed_origins } else { v }
            },
            allowed_origin_patterns: {
                let v = env_list("PUSH_ALLOWED_ORIGIN_PATTERNS");
                if v.is_empty() {
                    default.allowed_origin_patterns
                } else {
                    v
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_canonical_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.max_concurrent_conversions, 8);
        assert_eq!(cfg.hard_cap, 200);
        assert_eq!(cfg.processing_timeout, Duration::from_secs(600));
        assert_eq!(cfg.stuck_threshold, Duration::from_secs(600));
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.push_queue_capacity, 100);
    }

    #[test]
    fn env_list_splits_and_trims() {
        // SAFETY: test-only, single-threaded access to this specific var.
        unsafe { std::env::set_var("PUSH_ALLOWED_ORIGINS_TEST", "a.com, b.com ,c.com") };
        let v = env_list("PUSH_ALLOWED_ORIGINS_TEST");
        assert_eq!(v, vec!["a.com", "b.com", "c.com"]);
        unsafe { std::env::remove_var("PUSH_ALLOWED_ORIGINS_TEST") };
    }
}
