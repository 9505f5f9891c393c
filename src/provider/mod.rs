// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Document providers — the transports that turn an instruction's URL into a
//! document the engine can read.
//!
//! Two interchangeable implementations exist: an offline provider that
//! fetches raw HTML over HTTP, and a browser provider that drives a live
//! Chromium tab. The engine only sees the [`PageSession`] capability
//! interface: an HTML snapshot, a base location, and click/set-value
//! actions addressed by CSS node paths, so it never depends on a concrete
//! DOM implementation.

pub mod browser;
pub mod offline;

use crate::instructions::PageFlag;
use anyhow::Result;
use async_trait::async_trait;

/// User-agent shared by the offline provider and the image downloader.
pub const CHROME_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                             AppleWebKit/537.36 (KHTML, like Gecko) \
                             Chrome/131.0.0.0 Safari/537.36";

/// A transport that can open pages for instructions.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Navigate to `url`, apply the page-preparation flags, and hand back a
    /// session. A fetch/navigation failure here is fatal to the instruction.
    async fn open(
        &self,
        url: &str,
        flags: &[PageFlag],
        timeout_ms: u64,
    ) -> Result<Box<dyn PageSession>>;
}

/// One open page. Snapshots are full HTML documents; side effects are
/// addressed by `:nth-child` CSS paths computed on the latest snapshot.
#[async_trait]
pub trait PageSession: Send {
    /// The page's base location, used to absolutize relative URLs.
    fn base_url(&self) -> &str;

    /// A full HTML snapshot of the current document.
    async fn html(&self) -> Result<String>;

    /// Click each addressed element, in order. Providers without a live DOM
    /// log and ignore this.
    async fn click(&mut self, css_paths: &[String]) -> Result<()>;

    /// Set each addressed element's value and dispatch `change`/`input`
    /// notifications. Providers without a live DOM log and ignore this.
    async fn set_value(&mut self, css_paths: &[String], value: &str) -> Result<()>;

    /// Release the page.
    async fn close(self: Box<Self>) -> Result<()>;
}
