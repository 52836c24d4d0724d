//! Browser process and context lifecycle
//!
//! Owns the headless Chrome singleton behind the rendering transport. The
//! process is launched lazily on the first rendering request; each domain
//! gets its own browser context so cookies and session state stay scoped to
//! that domain for the rest of the run. Shutdown is deterministic and tied
//! to the engine value, with release order strictly nested: contexts, then
//! the browser, then the CDP handler task.

use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::Page;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{create_browser_config, EngineConfig};
use crate::error::FetchError;

struct BrowserRuntime {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
}

/// Lazily launched headless-browser host with per-domain contexts.
pub struct BrowserHost {
    config: EngineConfig,
    runtime: Mutex<Option<BrowserRuntime>>,
    contexts: DashMap<String, BrowserContextId>,
    closed: AtomicBool,
}

impl BrowserHost {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            runtime: Mutex::new(None),
            contexts: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Open a page inside the domain's browser context, creating the
    /// context (and the browser itself) on first use.
    pub async fn new_page(&self, domain: &str, url: &str) -> Result<Page, FetchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FetchError::BrowserUnavailable(
                "browser host already shut down".to_string(),
            ));
        }

        let mut guard = self.runtime.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let Some(runtime) = guard.as_mut() else {
            return Err(FetchError::BrowserUnavailable(
                "browser runtime missing after launch".to_string(),
            ));
        };

        let context_id = match self.contexts.get(domain) {
            Some(existing) => existing.clone(),
            None => {
                let response = runtime
                    .browser
                    .execute(CreateBrowserContextParams::default())
                    .await
                    .map_err(|e| FetchError::BrowserCrashed(format!("create context: {e}")))?;
                let id = response.result.browser_context_id;
                info!(domain, "created browser context");
                self.contexts.insert(domain.to_string(), id.clone());
                id
            }
        };

        let params = CreateTargetParams::builder()
            .url(url)
            .browser_context_id(context_id)
            .build()
            .map_err(FetchError::Page)?;

        runtime
            .browser
            .new_page(params)
            .await
            .map_err(|e| FetchError::Page(format!("new page: {e}")))
    }

    /// Launch headless Chrome and start draining its CDP event stream.
    ///
    /// A missing or broken Chrome installation is a configuration problem,
    /// surfaced immediately and never retried.
    async fn launch(&self) -> Result<BrowserRuntime, FetchError> {
        let browser_config = create_browser_config(&self.config)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| FetchError::BrowserUnavailable(format!("launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    error!("browser handler error: {e}");
                    break;
                }
            }
        });

        info!("headless browser launched");
        Ok(BrowserRuntime {
            browser,
            handler_task,
        })
    }

    /// Number of live per-domain contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Release everything: contexts first, then the browser, then the CDP
    /// handler. Each step is guarded so one failure cannot stop the rest.
    /// Calling this twice is a no-op.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut guard = self.runtime.lock().await;
        let Some(mut runtime) = guard.take() else {
            return;
        };

        info!("shutting down browser host...");

        let domains: Vec<String> = self.contexts.iter().map(|e| e.key().clone()).collect();
        for domain in domains {
            if let Some((_, context_id)) = self.contexts.remove(&domain) {
                let dispose = DisposeBrowserContextParams {
                    browser_context_id: context_id,
                };
                if let Err(e) = runtime.browser.execute(dispose).await {
                    warn!(domain = %domain, "failed to dispose browser context: {e}");
                }
            }
        }

        if let Err(e) = runtime.browser.close().await {
            warn!("failed to close browser: {e}");
        }
        runtime.handler_task.abort();

        info!("browser host shutdown complete");
    }
}
