//! Shared fakes for unit tests

use crate::browser::{BrowserIdentity, Downloader, PageError, RenderPage, RenderSession, Renderer};
use crate::html;
use async_trait::async_trait;
use footfall_common::db::init::init_database;
use footfall_common::{Error, Result, TtlCache};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Cache on a fresh on-disk database; keep the `TempDir` alive
pub async fn temp_cache() -> (TempDir, TtlCache) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("footfall.db")).await.unwrap();
    (dir, TtlCache::new(pool))
}

/// Report page with the standard `Time`/`Ped` grid
pub fn report_page(rows: &[(&str, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(t, p)| format!("<tr><td>{}</td><td>3</td><td>{}</td></tr>\n", t, p))
        .collect();
    format!(
        "<html><body><table id=\"gridTable\" class=\"grid\">\n\
         <tr><th>Time</th><th>Cyc</th><th>Ped</th></tr>\n{}</table></body></html>",
        body
    )
}

/// Renderer serving fixed pages; unknown URLs fail navigation
pub struct StaticRenderer {
    pages: Arc<HashMap<String, String>>,
    launches: Arc<AtomicUsize>,
}

impl StaticRenderer {
    pub fn new(pages: Vec<(String, String)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().collect()),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launch_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.launches)
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn launch(&self) -> Result<Box<dyn RenderSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticSession {
            pages: Arc::clone(&self.pages),
        }))
    }
}

struct StaticSession {
    pages: Arc<HashMap<String, String>>,
}

#[async_trait]
impl RenderSession for StaticSession {
    async fn new_page(
        &self,
        _identity: &BrowserIdentity,
    ) -> std::result::Result<Box<dyn RenderPage>, PageError> {
        Ok(Box::new(StaticPage {
            pages: Arc::clone(&self.pages),
            url: String::new(),
            content: String::new(),
        }))
    }

    async fn close(self: Box<Self>) {}
}

struct StaticPage {
    pages: Arc<HashMap<String, String>>,
    url: String,
    content: String,
}

#[async_trait]
impl RenderPage for StaticPage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> std::result::Result<(), PageError> {
        self.url = url.to_string();
        match self.pages.get(url) {
            Some(body) => {
                self.content = body.clone();
                Ok(())
            }
            None => Err(PageError::Navigation(format!("no page at {}", url))),
        }
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

/// Downloader serving fixed byte blobs
#[derive(Default)]
pub struct StaticDownloader {
    blobs: HashMap<String, Vec<u8>>,
}

impl StaticDownloader {
    pub fn new(blobs: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            blobs: blobs.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Downloader for StaticDownloader {
    async fn download(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
        self.blobs
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch(format!("{}: HTTP 404", url)))
    }
}
