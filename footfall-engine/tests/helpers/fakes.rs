//! Fake rendering engines and fixtures

use async_trait::async_trait;
use footfall_common::db::init::init_database;
use footfall_common::{Error, Result, TtlCache};
use footfall_engine::browser::{BrowserIdentity, PageError, RenderPage, RenderSession, Renderer};
use footfall_engine::html;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub async fn temp_cache() -> (TempDir, TtlCache) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("footfall.db")).await.unwrap();
    (dir, TtlCache::new(pool))
}

/// Council report with the hourly `Time`/`Ped` grid
pub fn report_page(rows: &[(&str, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(t, p)| format!("<tr><td>{}</td><td>{}</td></tr>", t, p))
        .collect();
    format!(
        "<html><body><table class=\"grid\" id=\"gridTable\">\
         <tr><th>Time</th><th>Ped</th></tr>{}</table></body></html>",
        body
    )
}

#[derive(Clone)]
struct Route {
    body: String,
    delay: Duration,
}

/// Serves fixed pages, optionally after a delay
#[derive(Clone, Default)]
pub struct FakeRenderer {
    routes: Arc<HashMap<String, Route>>,
    pub launches: Arc<AtomicUsize>,
    pub pages_closed: Arc<AtomicUsize>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.slow_page(url, body, Duration::ZERO)
    }

    pub fn slow_page(mut self, url: impl Into<String>, body: impl Into<String>, delay: Duration) -> Self {
        let mut routes = (*self.routes).clone();
        routes.insert(
            url.into(),
            Route {
                body: body.into(),
                delay,
            },
        );
        self.routes = Arc::new(routes);
        self
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn launch(&self) -> Result<Box<dyn RenderSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl RenderSession for FakeRenderer {
    async fn new_page(
        &self,
        _identity: &BrowserIdentity,
    ) -> std::result::Result<Box<dyn RenderPage>, PageError> {
        Ok(Box::new(FakePage {
            renderer: self.clone(),
            url: String::new(),
            content: String::new(),
        }))
    }

    async fn close(self: Box<Self>) {}
}

struct FakePage {
    renderer: FakeRenderer,
    url: String,
    content: String,
}

#[async_trait]
impl RenderPage for FakePage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> std::result::Result<(), PageError> {
        self.url = url.to_string();
        let route = self
            .renderer
            .routes
            .get(url)
            .cloned()
            .ok_or_else(|| PageError::Navigation(format!("no route for {}", url)))?;
        self.content = "<html><body>Loading…</body></html>".to_string();
        tokio::time::sleep(route.delay).await;
        self.content = route.body;
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

    async fn close(self: Box<Self>) {
        self.renderer.pages_closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Browser that never starts
pub struct FailingRenderer;

#[async_trait]
impl Renderer for FailingRenderer {
    async fn launch(&self) -> Result<Box<dyn RenderSession>> {
        Err(Error::Fetch("browser executable not found".to_string()))
    }
}
