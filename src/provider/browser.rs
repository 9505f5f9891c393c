// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Browser document provider — a live Chromium tab via chromiumoxide.
//!
//! Page-preparation flags and click/fill side effects run as injected
//! JavaScript against the live DOM; snapshots come back as serialized HTML
//! for the engine's selector resolver.

use super::{DocumentProvider, PageSession};
use crate::instructions::PageFlag;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. GLEANER_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("GLEANER_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.gleaner/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".gleaner/chromium/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".gleaner/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".gleaner/chromium/chrome-linux64/chrome"),
                home.join(".gleaner/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Live-tab transport.
pub struct BrowserProvider {
    browser: Browser,
}

impl BrowserProvider {
    /// Launch a headless Chromium instance.
    pub async fn launch() -> Result<Self> {
        let chrome_path = find_chromium()
            .context("Chromium not found; set GLEANER_CHROMIUM_PATH or install Chrome")?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self { browser })
    }
}

#[async_trait]
impl DocumentProvider for BrowserProvider {
    async fn open(
        &self,
        url: &str,
        flags: &[PageFlag],
        timeout_ms: u64,
    ) -> Result<Box<dyn PageSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("failed to create new page")?;

        let nav = tokio::time::timeout(Duration::from_millis(timeout_ms), page.goto(url)).await;
        match nav {
            Ok(Ok(_)) => {
                let _ = page.wait_for_navigation().await;
            }
            Ok(Err(e)) => bail!("navigation to {url} failed: {e}"),
            Err(_) => bail!("page load timed out after {timeout_ms}ms: {url}"),
        }

        for flag in flags {
            if let Err(e) = page.evaluate(flag_script(*flag)).await {
                tracing::warn!(?flag, "failed to apply page flag: {e}");
            }
        }

        let base_url = page
            .url()
            .await
            .unwrap_or_default()
            .map(|u| u.to_string())
            .unwrap_or_else(|| url.to_string());

        Ok(Box::new(BrowserSession { page, base_url }))
    }
}

/// One live Chromium tab.
pub struct BrowserSession {
    page: Page,
    base_url: String,
}

#[async_trait]
impl PageSession for BrowserSession {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.documentElement.outerHTML")
            .await
            .context("failed to snapshot page HTML")?;
        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert HTML snapshot: {e:?}"))
    }

    async fn click(&mut self, css_paths: &[String]) -> Result<()> {
        for path in css_paths {
            let script = format!(
                "(() => {{ const el = document.querySelector({sel}); if (el) el.click(); }})()",
                sel = serde_json::to_string(path)?
            );
            self.page
                .evaluate(script)
                .await
                .with_context(|| format!("click failed for {path}"))?;
        }
        Ok(())
    }

    async fn set_value(&mut self, css_paths: &[String], value: &str) -> Result<()> {
        for path in css_paths {
            let script = format!(
                "(() => {{ const el = document.querySelector({sel}); if (!el) return; \
                 el.value = {val}; \
                 el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                 el.dispatchEvent(new Event('input', {{ bubbles: true }})); }})()",
                sel = serde_json::to_string(path)?,
                val = serde_json::to_string(value)?
            );
            self.page
                .evaluate(script)
                .await
                .with_context(|| format!("fill failed for {path}"))?;
        }
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let _ = self.page.close().await;
        Ok(())
    }
}

/// The JS applied for each page-preparation flag.
fn flag_script(flag: PageFlag) -> &'static str {
    match flag {
        PageFlag::RemoveVideos => {
            "document.querySelectorAll('video').forEach((v) => v.remove());"
        }
        PageFlag::PauseVideos => {
            "document.querySelectorAll('video').forEach((v) => v.pause());"
        }
        PageFlag::ClearLocalStorage => "try { localStorage.clear(); } catch (e) {}",
        PageFlag::ClearSessionStorage => "try { sessionStorage.clear(); } catch (e) {}",
        PageFlag::ClearCookies => {
            "document.cookie.split(';').forEach((c) => { \
               const name = c.trim().split('=')[0]; \
               document.cookie = name + '=;expires=' + new Date(0).toUTCString() + ';path=/;'; \
             });"
        }
        PageFlag::DisableAnimation => {
            "(() => { const s = document.createElement('style'); \
               s.textContent = '*, *::before, *::after { animation: none !important; transition: none !important; }'; \
               document.head.appendChild(s); })()"
        }
        PageFlag::DisableIndexedDb => {
            "try { Object.defineProperty(window, 'indexedDB', { get() { return undefined; }, configurable: false }); } catch (e) {}"
        }
    }
}
