//! RateLimiter - admission control for captured network calls
//!
//! Keys are network-call domains. The first time a key is seen its limit is
//! resolved against the configured suffix table (longest matching suffix
//! wins) and cached for that exact key. All keys resolving to the same
//! suffix share one counter; keys with no matching suffix are counted on
//! their own against the default limit. IP literals share one counter.
//!
//! At most [`MAX_TRACKED_KEYS`] keys are cached per session. Past that,
//! suffix and IP-literal keys are resolved on every call, and keys that
//! would need a counter of their own share the untracked counter until the
//! next [`RateLimiter::reset`].
//!
//! Every `admit` call counts, admitted or not, so callers must call it
//! exactly once per candidate event.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{ConfigSource, NetworkLimits};
use serde::Serialize;
use tracing::{debug, trace};

/// Distinct keys cached between two resets
pub const MAX_TRACKED_KEYS: usize = 10_000;

/// Count and limit of one counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DomainRateState {
    pub count: u32,
    pub limit: u32,
}

impl DomainRateState {
    fn new(limit: u32) -> Self {
        Self { count: 0, limit }
    }

    /// Count one check, return whether it was within the limit
    fn check(&mut self) -> bool {
        let admitted = self.count < self.limit;
        self.count = self.count.saturating_add(1);
        admitted
    }
}

/// Which counter a key resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolved {
    /// Configured suffix
    Suffix { suffix: String, limit: u32 },
    /// No suffix matched; the key has its own counter under the default limit
    Key { limit: u32 },
    IpLiteral,
    Untracked,
}

#[derive(Debug)]
struct LimiterState {
    limits: NetworkLimits,
    max_keys: usize,
    resolved: HashMap<String, Resolved>,
    per_suffix: HashMap<String, DomainRateState>,
    ip_literal: DomainRateState,
    untracked: DomainRateState,
}

impl LimiterState {
    fn new(limits: NetworkLimits, max_keys: usize) -> Self {
        let default_limit = limits.default_limit;
        Self {
            limits,
            max_keys,
            resolved: HashMap::new(),
            per_suffix: HashMap::new(),
            ip_literal: DomainRateState::new(default_limit),
            untracked: DomainRateState::new(default_limit),
        }
    }

    fn resolve(&self, key: &str) -> Resolved {
        if key.trim().is_empty() {
            return Resolved::Untracked;
        }
        if is_ip_literal(key) {
            return Resolved::IpLiteral;
        }

        self.limits
            .domain_suffix_limits
            .iter()
            .filter(|(suffix, _)| key.ends_with(suffix.as_str()))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(suffix, limit)| Resolved::Suffix {
                suffix: suffix.clone(),
                limit: *limit,
            })
            .unwrap_or(Resolved::Key {
                limit: self.limits.default_limit,
            })
    }
}

fn is_ip_literal(key: &str) -> bool {
    let host = key
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(key);
    host.parse::<IpAddr>().is_ok()
}

pub struct RateLimiter {
    config: Arc<dyn ConfigSource>,
    max_keys: usize,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter, pulling the current limits from `config`
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self::with_max_keys(config, MAX_TRACKED_KEYS)
    }

    /// Like [`Self::new`], caching at most `max_keys` keys per session
    pub fn with_max_keys(config: Arc<dyn ConfigSource>, max_keys: usize) -> Self {
        let limits = config.network_limits();
        Self {
            config,
            max_keys,
            state: Mutex::new(LimiterState::new(limits, max_keys)),
        }
    }

    /// Count one candidate event for `key` and decide whether to capture it
    pub fn admit(&self, key: &str) -> bool {
        let mut state = self.lock();

        let cached = state.resolved.get(key).cloned();
        let resolved = match cached {
            Some(resolved) => resolved,
            None if state.resolved.len() >= state.max_keys => match state.resolve(key) {
                Resolved::Key { .. } => {
                    trace!(key, "Key cache full, counting as untracked");
                    Resolved::Untracked
                }
                resolved => resolved,
            },
            None => {
                let resolved = state.resolve(key);
                trace!(key, ?resolved, "Resolved admission limit");
                state.resolved.insert(key.to_string(), resolved.clone());
                resolved
            }
        };

        let admitted = match resolved {
            Resolved::Suffix { suffix, limit } => state
                .per_suffix
                .entry(suffix)
                .or_insert_with(|| DomainRateState::new(limit))
                .check(),
            Resolved::Key { limit } => state
                .per_suffix
                .entry(key.to_string())
                .or_insert_with(|| DomainRateState::new(limit))
                .check(),
            Resolved::IpLiteral => state.ip_literal.check(),
            Resolved::Untracked => state.untracked.check(),
        };

        observability::record_admission(admitted);
        admitted
    }

    /// Clear all counts and re-read limits (session boundary)
    pub fn reset(&self) {
        let limits = self.config.network_limits();
        debug!(
            default_limit = limits.default_limit,
            suffixes = limits.domain_suffix_limits.len(),
            "Rate limiter reset"
        );
        *self.lock() = LimiterState::new(limits, self.max_keys);
    }

    /// Per-counter state, keyed by suffix (or exact key under the default limit)
    pub fn domain_counts(&self) -> HashMap<String, DomainRateState> {
        self.lock().per_suffix.clone()
    }

    /// Counter shared by IP-literal keys
    pub fn ip_literal_count(&self) -> DomainRateState {
        self.lock().ip_literal
    }

    /// Counter for keys whose limit could not be resolved
    pub fn untracked_count(&self) -> DomainRateState {
        self.lock().untracked
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{DeliveryConfig, StaticConfigSource};

    fn source(default_limit: u32, suffixes: &[(&str, u32)]) -> Arc<StaticConfigSource> {
        let mut config = DeliveryConfig::default();
        config.rate_limits = NetworkLimits {
            default_limit,
            domain_suffix_limits: suffixes
                .iter()
                .map(|(suffix, limit)| (suffix.to_string(), *limit))
                .collect(),
        };
        Arc::new(StaticConfigSource::new(config))
    }

    fn limiter(default_limit: u32, suffixes: &[(&str, u32)]) -> RateLimiter {
        RateLimiter::new(source(default_limit, suffixes))
    }

    #[test]
    fn test_implicit_default_limit() {
        let limiter = RateLimiter::new(Arc::new(StaticConfigSource::default()));
        let mut last = true;
        for _ in 0..1005 {
            last = limiter.admit("www.overLimit1.com");
        }
        assert!(!last);
        assert!(limiter.admit("www.overLimit2.com"));
    }

    #[test]
    fn test_exactly_limit_calls_admitted() {
        let limiter = limiter(1000, &[("example.com", 10)]);
        let admitted = (0..25).filter(|_| limiter.admit("api.example.com")).count();
        assert_eq!(admitted, 10);
        assert_eq!(
            limiter.domain_counts()["example.com"],
            DomainRateState { count: 25, limit: 10 }
        );
    }

    #[test]
    fn test_default_limit_counts_each_key_separately() {
        let limiter = limiter(2, &[]);
        assert!(limiter.admit("www.overLimit1.com"));
        assert!(limiter.admit("www.overLimit1.com"));
        assert!(!limiter.admit("www.overLimit1.com"));
        assert!(limiter.admit("www.overLimit2.com"));
    }

    #[test]
    fn test_suffix_and_default_limits_together() {
        let limiter = limiter(2, &[("overLimit1.com", 3)]);
        for _ in 0..3 {
            assert!(limiter.admit("www.overLimit1.com"));
        }
        assert!(!limiter.admit("www.overLimit1.com"));
        for _ in 0..2 {
            assert!(limiter.admit("www.overLimit2.com"));
        }
        assert!(!limiter.admit("www.overLimit2.com"));
    }

    #[test]
    fn test_suffix_counter_is_shared_across_domains() {
        let limiter = limiter(3, &[("limited.org", 4)]);
        for _ in 0..2 {
            assert!(limiter.admit("www.limited.org"));
            assert!(limiter.admit("admin.limited.org"));
        }
        // Plain string suffix: verylimited.org matches limited.org
        assert!(!limiter.admit("verylimited.org"));
        assert!(limiter.admit("admin.limited.com"));
    }

    #[test]
    fn test_longest_suffix_wins() {
        let limiter = limiter(100, &[("example.com", 5), ("api.example.com", 1)]);
        assert!(limiter.admit("v1.api.example.com"));
        assert!(!limiter.admit("v1.api.example.com"));
        assert!(limiter.admit("www.example.com"));
    }

    #[test]
    fn test_zero_limit_disables_capture() {
        let limiter = limiter(100, &[("blocked.io", 0)]);
        assert!(!limiter.admit("cdn.blocked.io"));
    }

    #[test]
    fn test_ip_literals_share_one_counter() {
        let limiter = limiter(2, &[]);
        assert!(limiter.admit("10.0.0.1"));
        assert!(limiter.admit("192.168.1.20"));
        assert!(!limiter.admit("[::1]"));
        assert_eq!(limiter.ip_literal_count(), DomainRateState { count: 3, limit: 2 });
        assert!(limiter.admit("internal.service"));
    }

    #[test]
    fn test_blank_key_is_untracked() {
        let limiter = limiter(1, &[]);
        assert!(limiter.admit(""));
        assert!(!limiter.admit("  "));
        assert_eq!(limiter.untracked_count().count, 2);
    }

    #[test]
    fn test_reset_clears_counts() {
        let limiter = limiter(5, &[]);
        for _ in 0..5 {
            assert!(limiter.admit("www.overLimit1.com"));
        }
        assert!(!limiter.admit("www.overLimit1.com"));

        limiter.reset();
        for _ in 0..5 {
            assert!(limiter.admit("www.overLimit1.com"));
        }
        assert!(!limiter.admit("www.overLimit1.com"));
    }

    #[test]
    fn test_reset_rereads_limits() {
        let config = source(1000, &[("example.com", 10)]);
        let limiter = RateLimiter::new(config.clone());
        for _ in 0..10 {
            assert!(limiter.admit("api.example.com"));
        }
        assert!(!limiter.admit("api.example.com"));

        config.set_network_limits(NetworkLimits {
            default_limit: 1000,
            domain_suffix_limits: [("example.com".to_string(), 2)].into(),
        });
        // Cached limit stays until the session boundary
        assert!(!limiter.admit("api.example.com"));

        limiter.reset();
        assert!(limiter.admit("api.example.com"));
        assert!(limiter.admit("api.example.com"));
        assert!(!limiter.admit("api.example.com"));
    }

    #[test]
    fn test_key_cache_is_bounded() {
        let limiter = RateLimiter::with_max_keys(source(1, &[("example.com", 5)]), 2);
        assert!(limiter.admit("a.test"));
        assert!(limiter.admit("b.test"));

        // New per-key domains overflow into the untracked counter
        assert!(limiter.admit("c.test"));
        assert!(!limiter.admit("d.test"));
        assert_eq!(limiter.untracked_count(), DomainRateState { count: 2, limit: 1 });
        assert!(!limiter.domain_counts().contains_key("c.test"));

        // Cached keys and configured suffixes keep their own counters
        assert!(!limiter.admit("a.test"));
        assert!(limiter.admit("api.example.com"));
        assert!(limiter.admit("127.0.0.1"));
        assert_eq!(limiter.domain_counts()["example.com"].count, 1);

        limiter.reset();
        assert!(limiter.admit("c.test"));
        assert_eq!(limiter.domain_counts()["c.test"].count, 1);
    }
}
