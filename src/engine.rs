//! Strategy engine orchestrating the two transports
//!
//! Holds the per-domain run state (current mode, consecutive-failure count)
//! and decides, per request, whether plain HTTP can be trusted or the fetch
//! must go through the rendering path. Escalation is one-way for the life
//! of the engine: once a domain proves hostile, no cycle is wasted
//! re-probing it over plain HTTP.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::BrowserHost;
use crate::config::EngineConfig;
use crate::detect::BlockDetector;
use crate::error::FetchError;
use crate::policy::{FetchPolicy, FetchStrategy, PolicyStore};
use crate::render::BrowserFetcher;
use crate::transport::HttpTransport;
use crate::utils::{append_query_pairs, extract_domain, normalize_domain, validate_url};

/// The one artifact handed to downstream extraction logic.
///
/// `body_text` may be malformed HTML: a challenge page that slipped past
/// detection is returned as-is rather than invented away.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub status_code: u16,
    pub body_text: String,
    pub elapsed_ms: u64,
}

/// Per-domain fetch mode for the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainMode {
    #[default]
    Normal,
    /// All further fetches for the domain use the rendering transport.
    JsMode,
}

#[derive(Debug, Default)]
struct DomainRunState {
    mode: DomainMode,
    consecutive_failures: u32,
}

/// Read-only snapshot of a domain's run state.
#[derive(Debug, Clone, Copy)]
pub struct DomainStats {
    pub mode: DomainMode,
    pub consecutive_failures: u32,
}

/// Adaptive fetch engine.
///
/// All adaptive state lives on the instance, so independent engines can
/// coexist (each with its own domain history) and tests can construct and
/// tear one down deterministically.
///
/// # Examples
///
/// ```rust,no_run
/// use pagefetch::{EngineConfig, FetchEngine, PolicyStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = FetchEngine::new(EngineConfig::default(), PolicyStore::default())?;
///     let result = engine.get("https://www.publi24.ro/anunturi/laptopuri/").await?;
///     println!("{} -> {} ({} bytes)", result.url, result.status_code, result.body_text.len());
///     engine.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct FetchEngine {
    config: EngineConfig,
    policies: PolicyStore,
    detector: BlockDetector,
    transport: HttpTransport,
    renderer: BrowserFetcher,
    host: Arc<BrowserHost>,
    states: DashMap<String, DomainRunState>,
}

impl FetchEngine {
    pub fn new(config: EngineConfig, policies: PolicyStore) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(&config)?;
        let host = Arc::new(BrowserHost::new(config.clone()));
        let renderer = BrowserFetcher::new(host.clone(), config.clone());

        Ok(Self {
            config,
            policies,
            detector: BlockDetector::new(),
            transport,
            renderer,
            host,
            states: DashMap::new(),
        })
    }

    /// Swap in a tuned detector (extra challenge phrases/markers).
    pub fn with_detector(mut self, detector: BlockDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Fetch a URL, choosing the transport per the domain's policy and
    /// run history.
    pub async fn get(&self, url: &str) -> Result<FetchResult, FetchError> {
        self.get_with_params(url, None).await
    }

    /// Like [`get`](Self::get), with query parameters appended to the
    /// request.
    pub async fn get_with_params(
        &self,
        url: &str,
        params: Option<&[(String, String)]>,
    ) -> Result<FetchResult, FetchError> {
        let parsed = validate_url(url)?;
        let domain = extract_domain(parsed.as_str())
            .ok_or_else(|| FetchError::InvalidUrl(format!("{url}: no host")))?;
        let domain = normalize_domain(&domain).to_string();
        let policy = self.policies.resolve(&domain).clone();

        if self.mode(&domain) == DomainMode::JsMode
            && policy.strategy != FetchStrategy::RequestsOnly
        {
            debug!(domain = %domain, "domain in js mode, skipping plain transport");
            return self.render(url, &domain, &policy, params).await;
        }

        self.fetch_via_http(url, &domain, &policy, params).await
    }

    /// Plain-HTTP attempt loop with per-status strategy decisions.
    async fn fetch_via_http(
        &self,
        url: &str,
        domain: &str,
        policy: &FetchPolicy,
        params: Option<&[(String, String)]>,
    ) -> Result<FetchResult, FetchError> {
        let retry = self.config.retry_policy();
        let mut last_error: Option<FetchError> = None;

        for attempt in 1..=retry.max_attempts.max(1) {
            match self.transport.fetch_once(url, policy, params).await {
                Ok(raw) => match raw.status {
                    429 | 503 => {
                        self.record_failure(domain);
                        last_error =
                            Some(FetchError::Network(format!("HTTP {} from {domain}", raw.status)));
                        if attempt < retry.max_attempts {
                            let delay = retry.backoff_delay(attempt);
                            warn!(
                                url,
                                status = raw.status,
                                attempt,
                                "rate limited, retrying in {delay:?}"
                            );
                            sleep(delay).await;
                        }
                    }
                    403 if policy.strategy == FetchStrategy::JsRequired => {
                        self.record_failure(domain);
                        self.enter_js_mode(domain);
                        info!(domain, url, "403 on js-required domain, escalating to browser");
                        return self.render(url, domain, policy, params).await;
                    }
                    _ => {
                        if policy.strategy == FetchStrategy::JsIfShell
                            && self.detector.looks_shell_or_bad(policy, &raw.body)
                        {
                            let failures = self.record_failure(domain);
                            if failures >= policy.fail_threshold {
                                self.enter_js_mode(domain);
                                info!(
                                    domain,
                                    failures,
                                    threshold = policy.fail_threshold,
                                    "shell threshold reached, escalating to browser"
                                );
                                return self.render(url, domain, policy, params).await;
                            }
                            // Threshold not met yet: hand back the poor
                            // result and let the counter decide next time.
                            debug!(domain, failures, "shell page below threshold, returning as-is");
                            return Ok(raw.into_result());
                        }

                        self.reset_failures(domain);
                        return Ok(raw.into_result());
                    }
                },
                Err(e) if e.is_retryable() => {
                    if attempt < retry.max_attempts {
                        let delay = retry.backoff_delay(attempt);
                        warn!(url, attempt, "transport error ({e}), retrying in {delay:?}");
                        last_error = Some(e);
                        sleep(delay).await;
                    } else {
                        last_error = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(FetchError::FetchFailed {
            url: url.to_string(),
            attempts: retry.max_attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| FetchError::Network("no attempts made".to_string())),
            ),
        })
    }

    async fn render(
        &self,
        url: &str,
        domain: &str,
        policy: &FetchPolicy,
        params: Option<&[(String, String)]>,
    ) -> Result<FetchResult, FetchError> {
        // The rendering transport has no query API; parameters are
        // serialized onto the URL before navigation.
        let target = match params {
            Some(params) => append_query_pairs(url, params)?,
            None => url.to_string(),
        };
        self.renderer.fetch(&target, domain, policy, None).await
    }

    fn mode(&self, domain: &str) -> DomainMode {
        self.states.get(domain).map(|s| s.mode).unwrap_or_default()
    }

    fn record_failure(&self, domain: &str) -> u32 {
        let mut state = self.states.entry(domain.to_string()).or_default();
        state.consecutive_failures += 1;
        state.consecutive_failures
    }

    fn enter_js_mode(&self, domain: &str) {
        let mut state = self.states.entry(domain.to_string()).or_default();
        state.mode = DomainMode::JsMode;
    }

    fn reset_failures(&self, domain: &str) {
        if let Some(mut state) = self.states.get_mut(domain) {
            state.consecutive_failures = 0;
        }
    }

    /// Snapshot of a domain's adaptive state, if it was touched this run.
    pub fn domain_stats(&self, domain: &str) -> Option<DomainStats> {
        self.states.get(normalize_domain(domain)).map(|s| DomainStats {
            mode: s.mode,
            consecutive_failures: s.consecutive_failures,
        })
    }

    /// Domains escalated to the rendering transport this run.
    pub fn escalated_domains(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|e| e.mode == DomainMode::JsMode)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Release the browser process and all per-domain contexts.
    /// Idempotent; safe to call even if the browser never launched.
    pub async fn shutdown(&self) {
        self.host.shutdown().await;
    }
}
