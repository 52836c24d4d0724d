//! Browser-rendered fetching
//!
//! The escalation target for domains whose plain-HTTP responses cannot be
//! trusted. Pages open inside the per-domain context owned by
//! [`crate::browser::BrowserHost`]; images, media, and fonts are aborted at
//! the CDP fetch layer to cut latency and fingerprint surface; navigation
//! waits only for commit plus a short settling interval, because challenge
//! pages often never reach a full load event.

use chromiumoxide::cdp::browser_protocol::{fetch, network};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::browser::BrowserHost;
use crate::config::{EngineConfig, RetryPolicy};
use crate::engine::FetchResult;
use crate::error::FetchError;
use crate::policy::FetchPolicy;

/// Rendering transport: one fetch is one page navigation inside the
/// domain's long-lived browser context.
pub struct BrowserFetcher {
    host: Arc<BrowserHost>,
    config: EngineConfig,
}

impl BrowserFetcher {
    pub fn new(host: Arc<BrowserHost>, config: EngineConfig) -> Self {
        Self { host, config }
    }

    /// Fetch a URL through the browser, retrying navigation failures with
    /// the policy's own retry/backoff overrides.
    ///
    /// A missing browser installation is fatal at first use and is never
    /// retried; after the ceiling, the last navigation error propagates
    /// unmodified so its category survives for diagnostics.
    pub async fn fetch(
        &self,
        url: &str,
        domain: &str,
        policy: &FetchPolicy,
        timeout_override: Option<Duration>,
    ) -> Result<FetchResult, FetchError> {
        let retry = RetryPolicy::for_rendering(policy, &self.config);
        let nav_timeout = timeout_override
            .or(policy.timeout_s.map(Duration::from_secs))
            .unwrap_or(self.config.nav_timeout);

        let mut last_error: Option<FetchError> = None;

        for attempt in 1..=retry.max_attempts.max(1) {
            match self.fetch_attempt(url, domain, nav_timeout).await {
                Ok(result) => return Ok(result),
                Err(e @ (FetchError::BrowserUnavailable(_) | FetchError::Config(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        url,
                        attempt,
                        max_attempts = retry.max_attempts,
                        "rendered fetch attempt failed: {e}"
                    );
                    let should_sleep = attempt < retry.max_attempts;
                    last_error = Some(e);
                    if should_sleep {
                        sleep(retry.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::Navigation("rendered fetch made no attempts".into())))
    }

    async fn fetch_attempt(
        &self,
        url: &str,
        domain: &str,
        nav_timeout: Duration,
    ) -> Result<FetchResult, FetchError> {
        let start = Instant::now();
        let page = self.host.new_page(domain, "about:blank").await?;

        let outcome = self.navigate_and_capture(&page, url, nav_timeout).await;

        // Close the page regardless of outcome; the context stays alive for
        // the next fetch on this domain.
        if let Err(e) = page.close().await {
            debug!(domain, "page close failed: {e}");
        }

        let (status_code, body_text) = outcome?;
        Ok(FetchResult {
            url: url.to_string(),
            status_code,
            body_text,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn navigate_and_capture(
        &self,
        page: &Page,
        url: &str,
        nav_timeout: Duration,
    ) -> Result<(u16, String), FetchError> {
        let filter_task = install_resource_filter(page).await?;
        let (status_slot, status_task) = watch_document_status(page, url).await?;

        let navigation = timeout(nav_timeout, page.goto(url)).await;
        let nav_result = match navigation {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(FetchError::Navigation(e.to_string())),
            Err(_) => Err(FetchError::Timeout(nav_timeout)),
        };

        let result = match nav_result {
            Ok(()) => {
                // Give challenge/redirect scripts a beat to resolve before
                // reading the DOM.
                sleep(self.config.settle).await;
                page.content()
                    .await
                    .map_err(|e| FetchError::Page(format!("dom capture: {e}")))
                    .map(|html| {
                        let status = status_slot.load(Ordering::Relaxed);
                        (if status == 0 { 200 } else { status }, html)
                    })
            }
            Err(e) => Err(e),
        };

        status_task.abort();
        filter_task.abort();
        result
    }
}

/// Abort image, media, and font requests at the CDP fetch layer.
///
/// Interception patterns are scoped to those three resource types, so every
/// paused request is one we want gone; everything else never pauses.
async fn install_resource_filter(page: &Page) -> Result<tokio::task::JoinHandle<()>, FetchError> {
    let blocked = [
        network::ResourceType::Image,
        network::ResourceType::Media,
        network::ResourceType::Font,
    ];
    let patterns = blocked
        .iter()
        .map(|resource_type| fetch::RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: Some(resource_type.clone()),
            request_stage: Some(fetch::RequestStage::Request),
        })
        .collect();

    page.execute(fetch::EnableParams {
        patterns: Some(patterns),
        handle_auth_requests: Some(false),
    })
    .await
    .map_err(|e| FetchError::Page(format!("enable interception: {e}")))?;

    let mut paused = page
        .event_listener::<fetch::EventRequestPaused>()
        .await
        .map_err(|e| FetchError::Page(format!("listen for paused requests: {e}")))?;

    let page = page.clone();
    Ok(tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let _ = page
                .execute(fetch::FailRequestParams {
                    request_id: event.request_id.clone(),
                    error_reason: network::ErrorReason::BlockedByClient,
                })
                .await;
        }
    }))
}

/// Record the status code of the document response matching the navigated
/// URL. chromiumoxide does not expose the status on `goto`, so the network
/// event stream stands in; a redirected navigation keeps the slot at zero
/// and the caller assumes 200.
async fn watch_document_status(
    page: &Page,
    url: &str,
) -> Result<(Arc<AtomicU16>, tokio::task::JoinHandle<()>), FetchError> {
    page.execute(network::EnableParams::default())
        .await
        .map_err(|e| FetchError::Page(format!("enable network events: {e}")))?;

    let mut responses = page
        .event_listener::<network::EventResponseReceived>()
        .await
        .map_err(|e| FetchError::Page(format!("listen for responses: {e}")))?;

    let slot = Arc::new(AtomicU16::new(0));
    let writer = slot.clone();
    let target = url.to_string();
    let target_trimmed = target.trim_end_matches('/').to_string();

    let task = tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            let response_url = event.response.url.trim_end_matches('/');
            if response_url == target_trimmed || event.response.url == target {
                writer.store(event.response.status as u16, Ordering::Relaxed);
                break;
            }
        }
    });

    Ok((slot, task))
}
