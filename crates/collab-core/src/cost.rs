use crate::provider::Provider;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Per-session cost accumulator (C3). `totalCostUSD` is monotonically
/// non-decreasing; `shouldAbort` is a pure predicate callers check before
/// every new provider call and after every streamed chunk.
pub struct CostTracker {
    cap_usd: f64,
    input_tokens_by_provider: RwLock<HashMap<Provider, u64>>,
    output_tokens_by_provider: RwLock<HashMap<Provider, u64>>,
    total_cost_micros: AtomicU64,
}

impl CostTracker {
    pub fn new(cap_usd: f64) -> Self {
        Self {
            cap_usd,
            input_tokens_by_provider: RwLock::new(HashMap::new()),
            output_tokens_by_provider: RwLock::new(HashMap::new()),
            total_cost_micros: AtomicU64::new(0),
        }
    }

    pub fn cap_usd(&self) -> f64 {
        self.cap_usd
    }

    pub fn add_input_tokens(&self, provider: Provider, n: u32) {
        *self.input_tokens_by_provider.write().unwrap().entry(provider).or_insert(0) += n as u64;
        let (price_in, _) = provider.price_per_1k_usd();
        self.bump_cost(price_in * n as f64 / 1000.0);
    }

    pub fn add_output_tokens(&self, provider: Provider, n: u32) {
        *self.output_tokens_by_provider.write().unwrap().entry(provider).or_insert(0) += n as u64;
        let (_, price_out) = provider.price_per_1k_usd();
        self.bump_cost(price_out * n as f64 / 1000.0);
    }

    fn bump_cost(&self, delta_usd: f64) {
        if delta_usd <= 0.0 {
            return;
        }
        let delta_micros = (delta_usd * 1_000_000.0).round() as u64;
        self.total_cost_micros.fetch_add(delta_micros, Ordering::Relaxed);
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.total_cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn should_abort(&self) -> bool {
        self.total_cost_usd() >= self.cap_usd
    }

    pub fn input_tokens(&self, provider: Provider) -> u64 {
        *self.input_tokens_by_provider.read().unwrap().get(&provider).unwrap_or(&0)
    }

    pub fn output_tokens(&self, provider: Provider) -> u64 {
        *self.output_tokens_by_provider.read().unwrap().get(&provider).unwrap_or(&0)
    }

    /// Heuristic pre-flight estimate in USD: assumes the prompt is sent to
    /// every agent once and each responds with a comparable volume of text.
    /// Used to refuse work whose minimum plausible cost already exceeds the cap.
    pub fn estimate(agents: &[Provider], prompt_len: usize, mode_fan_out: u32) -> f64 {
        let approx_input_tokens = (prompt_len as f64 / 4.0).ceil().max(1.0);
        let approx_output_tokens = 500.0;
        agents
            .iter()
            .map(|p| {
                let (price_in, price_out) = p.price_per_1k_usd();
                let calls = mode_fan_out.max(1) as f64;
                calls * (price_in * approx_input_tokens / 1000.0 + price_out * approx_output_tokens / 1000.0)
            })
            .sum()
    }
}

/// Process-wide per-user daily cost aggregate, keyed `(userId, calendarDay-UTC)`.
/// Updates use a compare-and-add loop so concurrent requests from the same
/// user never lose an update.
pub struct DailyCostAggregate {
    totals_micros: RwLock<HashMap<(String, String), u64>>,
}

impl Default for DailyCostAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl DailyCostAggregate {
    pub fn new() -> Self {
        Self {
            totals_micros: RwLock::new(HashMap::new()),
        }
    }

    fn key(user_id: &str, at: DateTime<Utc>) -> (String, String) {
        (user_id.to_string(), at.format("%Y-%m-%d").to_string())
    }

    pub fn add(&self, user_id: &str, delta_usd: f64, at: DateTime<Utc>) {
        let delta_micros = (delta_usd * 1_000_000.0).round() as u64;
        let key = Self::key(user_id, at);
        let mut totals = self.totals_micros.write().unwrap();
        *totals.entry(key).or_insert(0) += delta_micros;
    }

    pub fn total_usd(&self, user_id: &str, at: DateTime<Utc>) -> f64 {
        let key = Self::key(user_id, at);
        *self.totals_micros.read().unwrap().get(&key).unwrap_or(&0) as f64 / 1_000_000.0
    }

    /// Returns `true` (rejects new work) once the user's running total for
    /// `at`'s calendar day meets or exceeds `daily_cap_usd`.
    pub fn enforce_budget_limit(&self, user_id: &str, daily_cap_usd: f64, at: DateTime<Utc>) -> bool {
        self.total_usd(user_id, at) >= daily_cap_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_abort_once_cap_reached() {
        let tracker = CostTracker::new(0.01);
        assert!(!tracker.should_abort());
        // Claude output price is $0.015/1k; 1000 tokens = $0.015 > cap.
        tracker.add_output_tokens(Provider::Claude, 1000);
        assert!(tracker.should_abort());
    }

    #[test]
    fn total_cost_is_monotonic() {
        let tracker = CostTracker::new(100.0);
        tracker.add_input_tokens(Provider::Gemini, 100);
        let after_first = tracker.total_cost_usd();
        tracker.add_output_tokens(Provider::Gemini, 50);
        assert!(tracker.total_cost_usd() >= after_first);
    }

    #[test]
    fn daily_aggregate_keys_by_calendar_day() {
        let agg = DailyCostAggregate::new();
        let day1 = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let day2 = "2026-01-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        agg.add("u1", 5.0, day1);
        assert_eq!(agg.total_usd("u1", day1), 5.0);
        assert_eq!(agg.total_usd("u1", day2), 0.0);
    }

    #[test]
    fn enforce_budget_limit_rejects_once_met() {
        let agg = DailyCostAggregate::new();
        let now = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        agg.add("u1", 10.0, now);
        assert!(agg.enforce_budget_limit("u1", 10.0, now));
        assert!(!agg.enforce_budget_limit("u2", 10.0, now));
    }
}
