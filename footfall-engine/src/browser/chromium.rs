//! Headless Chromium rendering engine
//!
//! Each page runs one `chromium --headless --dump-dom` process with its own
//! throwaway profile directory, so pages share no cookies or storage. Page
//! scripts run for up to the configured budget of virtual time before the
//! DOM is serialized, which is what makes script-inserted markers such as a
//! chart plugin's "loaded" class visible to the ready selector.

use super::{BrowserIdentity, PageError, RenderPage, RenderSession, Renderer};
use crate::html;
use async_trait::async_trait;
use footfall_common::config::FetchConfig;
use footfall_common::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

/// Executable names searched on `PATH` when no path is configured
const CHROMIUM_CANDIDATES: [&str; 5] = [
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

/// Renderer driving a local Chromium install
#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    browser_path: Option<PathBuf>,
    extra_args: Vec<String>,
    script_budget: Duration,
}

impl ChromiumRenderer {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            browser_path: config.browser_path.clone(),
            extra_args: config.browser_args.clone(),
            script_budget: config.script_budget(),
        }
    }

    /// Configured executable, else the first candidate found on `PATH`
    fn locate(&self) -> Result<PathBuf> {
        if let Some(path) = &self.browser_path {
            return if path.is_file() {
                Ok(path.clone())
            } else {
                Err(Error::Fetch(format!(
                    "configured browser {} does not exist",
                    path.display()
                )))
            };
        }

        let search = std::env::var_os("PATH").unwrap_or_default();
        std::env::split_paths(&search)
            .flat_map(|dir| CHROMIUM_CANDIDATES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                Error::Fetch(
                    "no Chromium executable found; set fetch.browser_path or fetch.engine = \"http\""
                        .to_string(),
                )
            })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn launch(&self) -> Result<Box<dyn RenderSession>> {
        let executable = self.locate()?;
        debug!(browser = %executable.display(), "Using Chromium");
        Ok(Box::new(ChromiumSession {
            executable,
            extra_args: self.extra_args.clone(),
            script_budget: self.script_budget,
        }))
    }
}

struct ChromiumSession {
    executable: PathBuf,
    extra_args: Vec<String>,
    script_budget: Duration,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn new_page(
        &self,
        identity: &BrowserIdentity,
    ) -> std::result::Result<Box<dyn RenderPage>, PageError> {
        let profile = tempfile::Builder::new()
            .prefix("footfall-chromium-")
            .tempdir()
            .map_err(|e| PageError::Navigation(format!("profile directory: {}", e)))?;

        Ok(Box::new(ChromiumPage {
            executable: self.executable.clone(),
            extra_args: self.extra_args.clone(),
            script_budget: self.script_budget,
            identity: identity.clone(),
            profile,
            url: String::new(),
            content: String::new(),
        }))
    }

    async fn close(self: Box<Self>) {}
}

struct ChromiumPage {
    executable: PathBuf,
    extra_args: Vec<String>,
    script_budget: Duration,
    identity: BrowserIdentity,
    /// Removed when the page drops
    profile: TempDir,
    url: String,
    content: String,
}

#[async_trait]
impl RenderPage for ChromiumPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> std::result::Result<(), PageError> {
        self.url = url.to_string();

        let mut command = Command::new(&self.executable);
        command
            .args(chromium_args(
                &self.identity,
                self.script_budget,
                self.profile.path(),
                &self.extra_args,
                url,
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| PageError::Timeout(timeout))?
            .map_err(|e| PageError::Navigation(format!("{}: {}", self.executable.display(), e)))?;

        self.content = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PageError::Navigation(format!(
                "browser exited with {}: {}",
                output.status,
                stderr.lines().last().unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> std::result::Result<(), PageError> {
        // The dump is taken after scripts ran, so there is nothing left to wait for
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

fn chromium_args(
    identity: &BrowserIdentity,
    script_budget: Duration,
    profile: &Path,
    extra: &[String],
    url: &str,
) -> Vec<String> {
    let mut args = vec![
        "--headless=new".to_string(),
        "--disable-gpu".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--mute-audio".to_string(),
        format!("--user-data-dir={}", profile.display()),
        format!("--user-agent={}", identity.user_agent),
        format!("--lang={}", identity.locale),
        format!(
            "--window-size={},{}",
            identity.viewport.width, identity.viewport.height
        ),
        format!("--virtual-time-budget={}", script_budget.as_millis()),
    ];
    args.extend(extra.iter().cloned());
    args.push("--dump-dom".to_string());
    args.push(url.to_string());
    args
}
