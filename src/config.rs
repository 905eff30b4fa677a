use std::{env, str::FromStr, time::Duration};

use crate::{
    middleware::client_ip::ForwardedPolicy, rate_limit::RateLimitPolicy, services::reconciler::ReconcilerConfig,
    services::stock_ledger::LedgerMode,
};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub ledger_mode: LedgerMode,
    pub reconciler: ReconcilerConfig,
    pub coupon_limits: RateLimitPolicy,
    pub forwarded: ForwardedPolicy,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_or("APP_PORT", 3000);
        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        let ledger_mode = match env::var("LEDGER_MODE") {
            Ok(raw) => raw.parse()?,
            Err(_) => LedgerMode::default(),
        };

        let defaults = ReconcilerConfig::default();
        let reconciler = ReconcilerConfig {
            interval: secs_or("RECONCILE_INTERVAL_SECS", defaults.interval),
            grace_period: secs_or("ABANDON_GRACE_SECS", defaults.grace_period),
        };

        let defaults = RateLimitPolicy::default();
        let coupon_limits = RateLimitPolicy {
            attempts_per_window: parse_or("COUPON_ATTEMPTS_PER_HOUR", defaults.attempts_per_window),
            attempt_window: defaults.attempt_window,
            max_failures: parse_or("COUPON_MAX_FAILURES", defaults.max_failures),
            failure_window: secs_or("COUPON_FAILURE_WINDOW_SECS", defaults.failure_window),
            cooldown: secs_or("COUPON_COOLDOWN_SECS", defaults.cooldown),
        };

        // Only set behind a proxy that overwrites X-Forwarded-For.
        let forwarded = ForwardedPolicy {
            trust_forwarded_for: parse_or("TRUST_FORWARDED_FOR", false),
        };

        Ok(Self {
            port,
            database_url,
            host,
            redis_url,
            ledger_mode,
            reconciler,
            coupon_limits,
            forwarded,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn secs_or(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
