// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Offline document provider — plain HTTP fetch, no browser.
//!
//! Retries once on 5xx and network errors. The resulting session is a static
//! snapshot: click/fill have no live DOM to act on and are warn-level no-ops,
//! which is the honest rendition of the capability on a parsed tree.

use super::{DocumentProvider, PageSession, CHROME_UA};
use crate::instructions::PageFlag;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// HTTP-fetch transport.
#[derive(Clone)]
pub struct OfflineProvider {
    client: reqwest::Client,
}

impl OfflineProvider {
    pub fn new(timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(CHROME_UA)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl DocumentProvider for OfflineProvider {
    async fn open(
        &self,
        url: &str,
        flags: &[PageFlag],
        timeout_ms: u64,
    ) -> Result<Box<dyn PageSession>> {
        if !flags.is_empty() {
            tracing::debug!(?flags, "offline provider ignores page flags");
        }

        let mut retries = 0u32;
        let response = loop {
            let attempt = self
                .client
                .get(url)
                .timeout(Duration::from_millis(timeout_ms))
                .send()
                .await;

            match attempt {
                Ok(r) if r.status().as_u16() >= 500 && retries < 1 => {
                    retries += 1;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Ok(r) => break r,
                Err(e) if retries < 1 => {
                    tracing::debug!(url, "retrying page fetch: {e}");
                    retries += 1;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e).context(format!("failed to fetch {url}")),
            }
        };

        let status = response.status();
        if !status.is_success() {
            bail!("failed to fetch {url}: HTTP {}", status.as_u16());
        }

        // Redirects may have moved us; relative URLs resolve against the
        // final location.
        let base_url = response.url().to_string();
        let html = response
            .text()
            .await
            .with_context(|| format!("failed to read body of {url}"))?;

        Ok(Box::new(OfflineSession { html, base_url }))
    }
}

/// A static HTML snapshot session.
pub struct OfflineSession {
    html: String,
    base_url: String,
}

impl OfflineSession {
    /// Build a session directly from HTML, bypassing the network. Used by
    /// tests and by callers that already hold a document.
    pub fn from_html(html: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PageSession for OfflineSession {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn html(&self) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn click(&mut self, css_paths: &[String]) -> Result<()> {
        tracing::warn!(
            count = css_paths.len(),
            "click has no effect on an offline document"
        );
        Ok(())
    }

    async fn set_value(&mut self, css_paths: &[String], _value: &str) -> Result<()> {
        tracing::warn!(
            count = css_paths.len(),
            "fill has no effect on an offline document"
        );
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
