//! reqwest-backed rendering engine
//!
//! Serves pages whose content is present in the initial response. Each page
//! gets its own client, so nothing (connections, cookies) is shared between
//! pages of a batch. The ready selector is checked against the fetched
//! markup; a selector that never appears reads as a timeout, the same as a
//! script-driven page that never finishes rendering.

use super::{BrowserIdentity, PageError, RenderPage, RenderSession, Renderer};
use crate::html;
use async_trait::async_trait;
use footfall_common::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use std::time::Duration;
use tracing::debug;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Plain HTTP renderer
#[derive(Debug, Clone, Default)]
pub struct HttpRenderer;

impl HttpRenderer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn launch(&self) -> Result<Box<dyn RenderSession>> {
        Ok(Box::new(HttpSession))
    }
}

struct HttpSession;

#[async_trait]
impl RenderSession for HttpSession {
    async fn new_page(
        &self,
        identity: &BrowserIdentity,
    ) -> std::result::Result<Box<dyn RenderPage>, PageError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        let locale = HeaderValue::from_str(&identity.locale)
            .map_err(|e| PageError::Navigation(format!("bad locale {}: {}", identity.locale, e)))?;
        headers.insert(ACCEPT_LANGUAGE, locale);

        let client = reqwest::Client::builder()
            .user_agent(identity.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| PageError::Navigation(e.to_string()))?;

        debug!(
            viewport = %format!("{}x{}", identity.viewport.width, identity.viewport.height),
            "HTTP page context created"
        );

        Ok(Box::new(HttpPage {
            client,
            url: String::new(),
            content: String::new(),
        }))
    }

    async fn close(self: Box<Self>) {}
}

struct HttpPage {
    client: reqwest::Client,
    url: String,
    content: String,
}

#[async_trait]
impl RenderPage for HttpPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> std::result::Result<(), PageError> {
        self.url = url.to_string();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PageError::Timeout(timeout)
                } else {
                    PageError::Navigation(e.to_string())
                }
            })?;

        self.url = response.url().to_string();
        let status = response.status();
        self.content = response
            .text()
            .await
            .map_err(|e| PageError::Navigation(e.to_string()))?;

        if !status.is_success() {
            return Err(PageError::Navigation(format!("HTTP {}", status.as_u16())));
        }
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> std::result::Result<(), PageError> {
        if html::matches_selector(&self.content, selector) {
            Ok(())
        } else {
            Err(PageError::Timeout(timeout))
        }
    }

    async fn content(&mut self) -> String {
        self.content.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    async fn close(self: Box<Self>) {}
}

/// Fetches raw bytes such as chart images
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

/// Downloader over a shared reqwest client
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Fetch(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        debug!(url, "Downloading");
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("{}: HTTP {}", url, status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Fetch(format!("{}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footfall_common::config::Viewport;

    fn identity(locale: &str) -> BrowserIdentity {
        BrowserIdentity {
            user_agent: "test-agent".to_string(),
            viewport: Viewport { width: 800, height: 600 },
            locale: locale.to_string(),
        }
    }

    #[tokio::test]
    async fn test_selector_check_against_content() {
        let mut page = HttpPage {
            client: reqwest::Client::new(),
            url: "https://example.org".to_string(),
            content: r#"<div class="visualizer-chart-loaded"></div>"#.to_string(),
        };
        let t = Duration::from_secs(1);
        assert!(page.wait_for_selector(".visualizer-chart-loaded", t).await.is_ok());
        assert!(matches!(
            page.wait_for_selector("#gridTable", t).await,
            Err(PageError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_locale_rejected_per_page() {
        let session = HttpSession;
        assert!(session.new_page(&identity("en-GB")).await.is_ok());
        assert!(session.new_page(&identity("en\nGB")).await.is_err());
    }
}
