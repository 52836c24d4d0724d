//! Configuration management with serde serialization/deserialization
//!
//! Global defaults for both transports plus the Chrome launch configuration
//! used by the rendering path. Per-domain settings live in
//! [`crate::policy::PolicyStore`]; anything a policy leaves unset falls back
//! to the values here.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::FetchError;
use crate::policy::FetchPolicy;

/// Main configuration structure for the fetch engine
///
/// Controls transport timeouts, retry ceilings, backoff timing, pacing, and
/// the headless-browser launch settings.
///
/// # Examples
///
/// ```rust
/// use pagefetch::EngineConfig;
///
/// // Use default configuration
/// let config = EngineConfig::default();
///
/// // Create custom configuration
/// let config = EngineConfig {
///     max_retries: 5,
///     backoff_base_s: 0.5,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Per-attempt HTTP timeout when the domain policy does not set one
    /// (default: 20 seconds)
    pub timeout: Duration,

    /// Retry ceiling for the plain HTTP transport (default: 3 attempts)
    pub max_retries: usize,

    /// Base for exponential backoff between retries, in seconds
    /// (default: 1.0)
    ///
    /// Attempt `n` sleeps `backoff_base_s * 2^(n-1)` seconds before the
    /// next try.
    pub backoff_base_s: f64,

    /// Lower bound of the polite inter-request delay, in seconds
    /// (default: 1.5)
    pub min_delay_s: f64,

    /// Upper bound of the polite inter-request delay, in seconds
    /// (default: 3.5)
    pub max_delay_s: f64,

    /// User-Agent presented by both transports
    pub user_agent: String,

    /// Accept-Language presented by both transports, for session
    /// consistency between plain and rendered fetches
    pub accept_language: String,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Navigation timeout for the rendering path when neither the caller
    /// nor the policy supplies one (default: 30 seconds)
    pub nav_timeout: Duration,

    /// Settling interval after navigation commit, letting challenge and
    /// redirect scripts resolve before the DOM is captured
    /// (default: 1 second)
    pub settle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_retries: 3,
            backoff_base_s: 1.0,
            min_delay_s: 1.5,
            max_delay_s: 3.5,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/121.0.0.0 Safari/537.36"
                .to_string(),
            accept_language: "ro-RO,ro;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            chrome_path: None,
            nav_timeout: Duration::from_secs(30),
            settle: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Retry policy of the plain HTTP transport.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            backoff_base_s: self.backoff_base_s,
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.max_retries == 0 {
            return Err(FetchError::Config(
                "max_retries must be greater than 0".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(FetchError::Config("timeout must be greater than 0".to_string()));
        }
        if self.backoff_base_s < 0.0 {
            return Err(FetchError::Config(
                "backoff_base_s must not be negative".to_string(),
            ));
        }
        if self.min_delay_s > self.max_delay_s {
            return Err(FetchError::Config(
                "min_delay_s must not exceed max_delay_s".to_string(),
            ));
        }
        if self.user_agent.is_empty() {
            return Err(FetchError::Config("user_agent must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Shared retry/backoff value type used by both transports.
///
/// The plain transport always uses the global ceiling; the rendering path
/// derives its own from the policy overrides, so a domain under heavy
/// rendering load can be given fewer, longer-spaced retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff_base_s: f64,
}

impl RetryPolicy {
    /// Rendering-path policy: per-domain overrides where present, global
    /// defaults otherwise.
    pub fn for_rendering(policy: &FetchPolicy, config: &EngineConfig) -> Self {
        Self {
            max_attempts: policy.max_retries.unwrap_or(config.max_retries),
            backoff_base_s: policy.backoff_base_s.unwrap_or(config.backoff_base_s),
        }
    }

    /// Exponential backoff before the attempt after `attempt` (1-based):
    /// `base * 2^(attempt-1)` seconds.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        Duration::from_secs_f64(self.backoff_base_s.max(0.0) * 2f64.powi(exp))
    }
}

/// Generate Chrome command-line arguments for the rendering transport
///
/// Headless launch tuned for fetching, not screenshots: GPU and extension
/// machinery off, language forced to match the plain transport's
/// Accept-Language.
pub fn get_chrome_args(config: &EngineConfig) -> Vec<String> {
    let lang = config
        .accept_language
        .split(',')
        .next()
        .unwrap_or("en-US")
        .to_string();

    vec![
        "--headless=new".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--disable-background-networking".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        format!("--lang={lang}"),
        format!("--user-agent={}", config.user_agent),
    ]
}

/// Build the chromiumoxide launch configuration.
///
/// Surfaces a `Config` error instead of panicking so a bad `chrome_path`
/// shows up as a configuration problem at first rendering use.
pub fn create_browser_config(
    config: &EngineConfig,
) -> Result<chromiumoxide::browser::BrowserConfig, FetchError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder().args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder
        .build()
        .map_err(|e| FetchError::Config(format!("browser config: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base_s, 1.0);
        assert!(config.min_delay_s < config.max_delay_s);
        assert!(config.chrome_path.is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff_base_s: 1.0,
        };
        assert_eq!(retry.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(retry.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(retry.backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_rendering_retry_overrides() {
        let config = EngineConfig::default();
        let mut policy = crate::policy::PolicyStore::default().fallback().clone();
        assert_eq!(
            RetryPolicy::for_rendering(&policy, &config),
            config.retry_policy()
        );

        policy.max_retries = Some(2);
        policy.backoff_base_s = Some(5.0);
        let retry = RetryPolicy::for_rendering(&policy, &config);
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.backoff_base_s, 5.0);
    }

    #[test]
    fn test_chrome_args_carry_language_and_agent() {
        let config = EngineConfig::default();
        let args = get_chrome_args(&config);
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--lang=ro-RO".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=Mozilla")));
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = EngineConfig {
            max_retries: 5,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_retries, 5);
        assert_eq!(back.timeout, config.timeout);
    }
}
