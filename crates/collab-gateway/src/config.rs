//! Environment-sourced gateway configuration (§6). Every key has a sane
//! default so the gateway starts in a bare environment with whatever
//! provider keys happen to be exported.

use std::env;
use std::str::FromStr;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_COST_CAP_USD: f64 = 1.00;
const DEFAULT_DAILY_CAP_USD: f64 = 20.00;
const DEFAULT_DEADLINE_SECONDS: u64 = 120;
const DEFAULT_MAX_CONTEXT_SIZE: usize = 8000;
const DEFAULT_PER_PROVIDER_CONCURRENCY: usize = 3;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub default_cost_cap_usd: f64,
    pub default_daily_cap_usd: f64,
    pub default_deadline_seconds: u64,
    pub default_max_context_size: usize,
    pub per_provider_concurrency: usize,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            listen_addr: env::var("COLLAB_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
            default_cost_cap_usd: env_parsed("COLLAB_DEFAULT_COST_CAP_USD", DEFAULT_COST_CAP_USD),
            default_daily_cap_usd: env_parsed("COLLAB_DEFAULT_DAILY_CAP_USD", DEFAULT_DAILY_CAP_USD),
            default_deadline_seconds: env_parsed("COLLAB_DEFAULT_DEADLINE_SECONDS", DEFAULT_DEADLINE_SECONDS),
            default_max_context_size: env_parsed("COLLAB_DEFAULT_MAX_CONTEXT_SIZE", DEFAULT_MAX_CONTEXT_SIZE),
            per_provider_concurrency: env_parsed("COLLAB_PER_PROVIDER_CONCURRENCY", DEFAULT_PER_PROVIDER_CONCURRENCY),
        }
    }
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_unset() {
        // SAFETY: test-only env var scoped to this key name.
        unsafe { std::env::remove_var("COLLAB_DEFAULT_COST_CAP_USD") };
        let config = GatewayConfig::from_env();
        assert_eq!(config.default_cost_cap_usd, DEFAULT_COST_CAP_USD);
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
    }
}
