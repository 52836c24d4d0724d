//! Per-domain fetch policies
//!
//! A policy decides how aggressively a domain is fetched: plain HTTP only,
//! plain HTTP with escalation to browser rendering once responses look like
//! shells, or immediate escalation on the first 403.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::utils::normalize_domain;

/// Fetch strategy governing whether and when a domain escalates from the
/// plain HTTP transport to browser rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FetchStrategy {
    /// Plain HTTP only, never render. Blocked responses are returned as-is.
    RequestsOnly,
    /// Try plain HTTP first; escalate once `fail_threshold` consecutive
    /// responses look like shell/challenge pages.
    JsIfShell,
    /// Known-hostile domain: a single 403 escalates immediately.
    JsRequired,
}

/// Immutable per-domain fetch configuration.
///
/// Fields mirror the operator-facing policy table; anything unset falls back
/// to the global defaults in [`crate::EngineConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchPolicy {
    pub strategy: FetchStrategy,

    /// Per-attempt timeout in seconds. Global default applies when absent.
    #[serde(default)]
    pub timeout_s: Option<u64>,

    /// Bodies shorter than this count as shell pages.
    #[serde(default)]
    pub min_len: Option<usize>,

    /// Substring (case-insensitive) that a usable page must contain.
    #[serde(default)]
    pub must_contain: Option<String>,

    /// Consecutive shell/block failures before a `JsIfShell` domain enters
    /// JS mode.
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,

    /// Rendering-path retry ceiling override.
    #[serde(default)]
    pub max_retries: Option<usize>,

    /// Rendering-path backoff base override, in seconds.
    #[serde(default)]
    pub backoff_base_s: Option<f64>,
}

fn default_fail_threshold() -> u32 {
    3
}

impl FetchPolicy {
    /// Per-attempt timeout, falling back to the supplied global default.
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_s.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Static mapping from normalized domain to fetch policy.
///
/// Resolution never fails: unknown domains get the `default` policy, and a
/// leading `www.` is stripped before lookup so `www.example.com` and
/// `example.com` resolve identically.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "HashMap<String, FetchPolicy>")]
pub struct PolicyStore {
    policies: HashMap<String, FetchPolicy>,
    fallback: FetchPolicy,
}

impl PolicyStore {
    /// Build a store from a raw table. The `default` entry, if present,
    /// becomes the fallback policy; otherwise the built-in fallback is used.
    pub fn from_table(mut table: HashMap<String, FetchPolicy>) -> Self {
        let fallback = table.remove("default").unwrap_or_else(default_policy);
        Self {
            policies: table,
            fallback,
        }
    }

    pub fn resolve(&self, domain: &str) -> &FetchPolicy {
        let domain = normalize_domain(domain);
        self.policies.get(domain).unwrap_or(&self.fallback)
    }

    pub fn fallback(&self) -> &FetchPolicy {
        &self.fallback
    }

    pub fn insert(&mut self, domain: impl Into<String>, policy: FetchPolicy) {
        self.policies.insert(domain.into(), policy);
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl From<HashMap<String, FetchPolicy>> for PolicyStore {
    fn from(table: HashMap<String, FetchPolicy>) -> Self {
        Self::from_table(table)
    }
}

fn default_policy() -> FetchPolicy {
    FetchPolicy {
        strategy: FetchStrategy::RequestsOnly,
        timeout_s: Some(15),
        min_len: Some(10_000),
        must_contain: None,
        fail_threshold: 3,
        max_retries: None,
        backoff_base_s: None,
    }
}

impl Default for PolicyStore {
    /// The built-in table shipped with the tool. Operators override it with
    /// a JSON policy file keyed by domain.
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            "pcgarage.ro".to_string(),
            FetchPolicy {
                strategy: FetchStrategy::JsRequired,
                timeout_s: Some(30),
                min_len: Some(30_000),
                must_contain: Some("/notebook-laptop/".to_string()),
                fail_threshold: 1,
                max_retries: None,
                backoff_base_s: None,
            },
        );
        policies.insert(
            "publi24.ro".to_string(),
            FetchPolicy {
                strategy: FetchStrategy::JsIfShell,
                timeout_s: Some(20),
                min_len: Some(15_000),
                must_contain: Some("/anunt/".to_string()),
                fail_threshold: 2,
                max_retries: None,
                backoff_base_s: None,
            },
        );
        Self {
            policies,
            fallback: default_policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_domain_gets_default() {
        let store = PolicyStore::default();
        let policy = store.resolve("nowhere.example");
        assert_eq!(policy.strategy, FetchStrategy::RequestsOnly);
        assert_eq!(policy.fail_threshold, 3);
        assert_eq!(policy.min_len, Some(10_000));
    }

    #[test]
    fn test_www_prefix_stripped() {
        let store = PolicyStore::default();
        let bare = store.resolve("pcgarage.ro");
        let www = store.resolve("www.pcgarage.ro");
        assert_eq!(bare.strategy, www.strategy);
        assert_eq!(bare.must_contain, www.must_contain);
        assert_eq!(bare.timeout_s, www.timeout_s);
    }

    #[test]
    fn test_table_without_default_entry() {
        let mut table = HashMap::new();
        table.insert(
            "example.com".to_string(),
            FetchPolicy {
                strategy: FetchStrategy::JsIfShell,
                timeout_s: None,
                min_len: None,
                must_contain: None,
                fail_threshold: 2,
                max_retries: None,
                backoff_base_s: None,
            },
        );
        let store = PolicyStore::from_table(table);
        assert_eq!(store.resolve("other.com").strategy, FetchStrategy::RequestsOnly);
        assert_eq!(store.resolve("example.com").fail_threshold, 2);
    }

    #[test]
    fn test_deserialize_table() {
        let json = r#"{
            "shop.example": {
                "strategy": "JS_REQUIRED",
                "timeout_s": 30,
                "min_len": 20000,
                "fail_threshold": 1
            },
            "default": {
                "strategy": "REQUESTS_ONLY",
                "timeout_s": 10,
                "fail_threshold": 5
            }
        }"#;
        let store: PolicyStore = serde_json::from_str(json).unwrap();
        assert_eq!(store.resolve("shop.example").strategy, FetchStrategy::JsRequired);
        assert_eq!(store.resolve("unlisted.example").fail_threshold, 5);
        assert_eq!(store.fallback().timeout_s, Some(10));
    }

    #[test]
    fn test_policy_timeout_fallback() {
        let policy = FetchPolicy {
            strategy: FetchStrategy::RequestsOnly,
            timeout_s: None,
            min_len: None,
            must_contain: None,
            fail_threshold: 3,
            max_retries: None,
            backoff_base_s: None,
        };
        assert_eq!(policy.timeout(Duration::from_secs(20)), Duration::from_secs(20));
        let policy = FetchPolicy {
            timeout_s: Some(5),
            ..policy
        };
        assert_eq!(policy.timeout(Duration::from_secs(20)), Duration::from_secs(5));
    }
}
