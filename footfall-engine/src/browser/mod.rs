//! Browser fetch orchestration
//!
//! Renders a batch of URLs concurrently through a [`Renderer`] and returns
//! the page content for each, in input order. Each page gets its own
//! isolated context with an identity drawn from the configured pools and a
//! random start delay, so a batch neither fingerprints as one client nor
//! bursts the source.
//!
//! Failure is isolated per URL: a page that times out or fails to load
//! contributes an empty string. Only a failure to launch the browser fails
//! the batch.

pub mod chromium;
pub mod http;

use async_trait::async_trait;
use footfall_common::config::{FetchConfig, RenderEngine, Viewport};
use footfall_common::Result;
use futures::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub use chromium::ChromiumRenderer;
pub use http::{Downloader, HttpDownloader, HttpRenderer};

/// How much of a failed page to include in the warning
const FAILED_PAGE_LOG_CHARS: usize = 10_000;

/// Identity presented to a source for one page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserIdentity {
    pub user_agent: String,
    pub viewport: Viewport,
    pub locale: String,
}

/// Pools identities are drawn from, uniformly and independently
#[derive(Debug, Clone)]
pub struct IdentityPool {
    user_agents: Vec<String>,
    viewports: Vec<Viewport>,
    locales: Vec<String>,
}

impl IdentityPool {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            user_agents: config.user_agents.clone(),
            viewports: config.viewports.clone(),
            locales: config.locales.clone(),
        }
    }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> BrowserIdentity {
        BrowserIdentity {
            user_agent: self.user_agents.choose(rng).cloned().unwrap_or_default(),
            viewport: self
                .viewports
                .choose(rng)
                .copied()
                .unwrap_or(Viewport { width: 1920, height: 1080 }),
            locale: self
                .locales
                .choose(rng)
                .cloned()
                .unwrap_or_else(|| "en-GB".to_string()),
        }
    }
}

/// Renderer selected by `fetch.engine`
pub fn renderer_from_config(config: &FetchConfig) -> Arc<dyn Renderer> {
    match config.engine {
        RenderEngine::Chromium => Arc::new(ChromiumRenderer::from_config(config)),
        RenderEngine::Http => Arc::new(HttpRenderer::new()),
    }
}

/// Per-page failure
#[derive(Debug, Error)]
pub enum PageError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("navigation failed: {0}")]
    Navigation(String),
}

/// Headless rendering engine
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Start a browser shared by one batch
    async fn launch(&self) -> Result<Box<dyn RenderSession>>;
}

/// A launched browser
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Open a page in a fresh, isolated context
    async fn new_page(
        &self,
        identity: &BrowserIdentity,
    ) -> std::result::Result<Box<dyn RenderPage>, PageError>;

    /// Release the browser
    async fn close(self: Box<Self>);
}

/// One open page
#[async_trait]
pub trait RenderPage: Send {
    async fn goto(&mut self, url: &str, timeout: Duration) -> std::result::Result<(), PageError>;

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> std::result::Result<(), PageError>;

    /// Whatever content the page currently holds
    async fn content(&mut self) -> String;

    /// Current URL after redirects
    fn url(&self) -> String;

    /// Release the page and its context
    async fn close(self: Box<Self>);
}

/// Concurrent page fetcher
#[derive(Clone)]
pub struct FetchOrchestrator {
    renderer: Arc<dyn Renderer>,
    identities: IdentityPool,
    jitter: Duration,
    timeout: Duration,
}

impl FetchOrchestrator {
    pub fn new(renderer: Arc<dyn Renderer>, config: &FetchConfig) -> Self {
        Self {
            renderer,
            identities: IdentityPool::from_config(config),
            jitter: config.jitter(),
            timeout: config.load_timeout(),
        }
    }

    /// Per-page timeout from configuration
    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch every URL, returning content in input order
    ///
    /// Entries are empty for pages that timed out or failed. Errors only if
    /// the browser cannot be launched.
    pub async fn fetch_pages(
        &self,
        urls: &[String],
        ready_selector: &str,
        per_page_timeout: Duration,
    ) -> Result<Vec<String>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Launching browser for {} pages", urls.len());
        let session = self.renderer.launch().await?;

        let pages = join_all(
            urls.iter()
                .map(|url| self.fetch_single_page(session.as_ref(), url, ready_selector, per_page_timeout)),
        )
        .await;

        session.close().await;
        debug!("Browser closed");
        Ok(pages)
    }

    async fn fetch_single_page(
        &self,
        session: &dyn RenderSession,
        url: &str,
        ready_selector: &str,
        timeout: Duration,
    ) -> String {
        // Draw before any await; ThreadRng is not Send
        let (delay, identity) = {
            let mut rng = rand::thread_rng();
            (self.jitter.mul_f64(rng.gen::<f64>()), self.identities.draw(&mut rng))
        };
        tokio::time::sleep(delay).await;

        debug!(url, user_agent = %identity.user_agent, locale = %identity.locale, "Opening page");
        let mut page = match session.new_page(&identity).await {
            Ok(page) => page,
            Err(e) => {
                warn!(url, "Could not open page, returning empty content: {}", e);
                return String::new();
            }
        };

        let html = match load_page(page.as_mut(), url, ready_selector, timeout).await {
            Ok(()) => {
                let html = page.content().await;
                debug!(url, bytes = html.len(), "Page content extracted");
                html
            }
            Err(e) => {
                let partial = page.content().await;
                let excerpt: String = partial.chars().take(FAILED_PAGE_LOG_CHARS).collect();
                warn!(
                    url,
                    page_url = %page.url(),
                    "Failed to load page ({}), content contained {}, returning empty string",
                    e,
                    excerpt
                );
                String::new()
            }
        };

        page.close().await;
        html
    }
}

/// Navigate and wait for the ready selector, each bounded by `timeout`
///
/// The outer `tokio::time::timeout` holds even if an engine ignores the
/// timeout it was given.
async fn load_page(
    page: &mut dyn RenderPage,
    url: &str,
    ready_selector: &str,
    timeout: Duration,
) -> std::result::Result<(), PageError> {
    tokio::time::timeout(timeout, page.goto(url, timeout))
        .await
        .map_err(|_| PageError::Timeout(timeout))??;

    debug!(url, ready_selector, "Waiting for page to render");
    tokio::time::timeout(timeout, page.wait_for_selector(ready_selector, timeout))
        .await
        .map_err(|_| PageError::Timeout(timeout))??;

    Ok(())
}
