// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! The extraction engine — runs instruction queues against a document
//! provider.
//!
//! One instruction flows through: open page, settle delay, readiness wait,
//! immediate steps in program order, final snapshot, scope planning, asset
//! capture, record assembly. Queues are strictly sequential; a later
//! instruction never starts before the previous one has been persisted.
//!
//! Two failure channels exist and they are not the same thing. A fatal error
//! (navigation failure, transport error) surfaces as `Err` and is subject to
//! `stop_on_error`. A readiness-wait exhaustion is a *payload*: the engine
//! persists an [`Outcome::Failed`] for that instruction and the queue
//! continues regardless.

use crate::assets;
use crate::classify::{classify, ExecutionPlan, Step};
use crate::extract::{self, Record, ScopeColumns};
use crate::instructions::Instruction;
use crate::provider::DocumentProvider;
use crate::selector;
use anyhow::{Context, Result};
use scraper::Html;
use serde::Serialize;
use std::time::Duration;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Abort the queue on the first fatal instruction error.
    pub stop_on_error: bool,
    /// Readiness polls before giving up on `waitFor`.
    pub readiness_retries: u32,
    /// Delay between readiness polls.
    pub readiness_interval_ms: u64,
    /// Navigation/page-load timeout.
    pub page_load_timeout_ms: u64,
    /// Timeout for image downloads.
    pub fetch_timeout_ms: u64,
    /// When set, instruction URLs are wrapped as `{prefix}{encoded-url}`.
    pub proxy_prefix: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_on_error: false,
            readiness_retries: 50,
            readiness_interval_ms: 200,
            page_load_timeout_ms: 100_000,
            fetch_timeout_ms: 30_000,
            proxy_prefix: None,
        }
    }
}

/// The persisted product of one successful instruction run.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// RFC 3339 UTC timestamp of when extraction finished.
    pub timestamp: String,
    /// The instruction's original URL, before any proxy wrapping.
    pub url: String,
    pub data: Vec<Record>,
}

/// What one instruction run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Extracted(ExtractionResult),
    /// Readiness wait exhausted. Persisted like a result; not fatal.
    Failed { error: String },
}

/// Receives each instruction's outcome as the queue advances.
pub trait ResultSink: Send {
    fn persist(&mut self, instruction: &Instruction, outcome: &Outcome) -> Result<()>;
}

/// Per-instruction entry in a queue report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How an instruction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Records extracted and persisted.
    Extracted,
    /// Readiness wait exhausted; failure payload persisted.
    Failed,
    /// Fatal error; nothing persisted.
    Error,
}

/// Summary of one queue run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueReport {
    pub total: usize,
    pub completed: usize,
    pub stopped_early: bool,
    pub entries: Vec<QueueEntry>,
}

/// Drives instruction queues against a document provider.
pub struct Engine {
    provider: Box<dyn DocumentProvider>,
    config: EngineConfig,
    image_client: reqwest::Client,
}

impl Engine {
    pub fn new(provider: Box<dyn DocumentProvider>, config: EngineConfig) -> Self {
        let image_client = assets::image_client(config.fetch_timeout_ms);
        Self {
            provider,
            config,
            image_client,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one instruction end to end.
    ///
    /// `Err` means a fatal failure (navigation, transport). `Ok(Failed)`
    /// means the readiness wait ran out; the caller persists it and moves on.
    pub async fn run_instruction(&self, instruction: &Instruction) -> Result<Outcome> {
        let url = target_url(&instruction.url, self.config.proxy_prefix.as_deref());
        tracing::info!(url = %instruction.url, id = ?instruction.id, "running instruction");

        let mut session = self
            .provider
            .open(&url, &instruction.page_flags(), self.config.page_load_timeout_ms)
            .await
            .with_context(|| format!("failed to open {}", instruction.url))?;

        if let Some(ms) = instruction.settle_delay_ms() {
            tracing::debug!(ms, "settle delay");
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if let Some(wait_for) = instruction.wait_for.as_deref().filter(|s| !s.trim().is_empty()) {
            let mut ready = false;
            for attempt in 0..self.config.readiness_retries {
                let html = session.html().await?;
                if document_satisfies(&html, wait_for) {
                    ready = true;
                    break;
                }
                tracing::trace!(attempt, selector = wait_for, "readiness poll missed");
                tokio::time::sleep(Duration::from_millis(self.config.readiness_interval_ms)).await;
            }
            if !ready {
                tracing::warn!(selector = wait_for, "readiness wait exhausted");
                session.close().await?;
                return Ok(Outcome::Failed {
                    error: format!("Element {wait_for} not found within time limit"),
                });
            }
        }

        let plan = classify(&instruction.requests);
        self.execute_steps(&plan, session.as_mut()).await?;

        let html = session.html().await?;
        let base_url = session.base_url().to_string();
        let scopes = build_scopes(&html, &plan, instruction.id.as_deref(), &base_url);
        let data = extract::finalize_records(scopes, &self.image_client).await;

        session.close().await?;

        Ok(Outcome::Extracted(ExtractionResult {
            id: instruction.id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            url: instruction.url.clone(),
            data,
        }))
    }

    /// Run the immediate steps in program order. Click and fill re-snapshot
    /// the page first so their selectors resolve against the current state.
    async fn execute_steps(
        &self,
        plan: &ExecutionPlan,
        session: &mut dyn crate::provider::PageSession,
    ) -> Result<()> {
        for step in &plan.steps {
            match step {
                Step::Wait { ms } => {
                    tracing::debug!(ms, "waiter step");
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                }
                Step::Click { selector } => {
                    let html = session.html().await?;
                    let paths = resolve_paths(&html, selector);
                    if paths.is_empty() {
                        tracing::debug!(selector, "click resolved no elements");
                        continue;
                    }
                    session.click(&paths).await?;
                }
                Step::Fill { selector, value } => {
                    let html = session.html().await?;
                    let paths = resolve_paths(&html, selector);
                    if paths.is_empty() {
                        tracing::debug!(selector, "fill resolved no elements");
                        continue;
                    }
                    session.set_value(&paths, value).await?;
                }
            }
        }
        Ok(())
    }

    /// Run a queue of instructions sequentially, persisting each outcome
    /// before the next instruction starts.
    pub async fn run_queue(
        &self,
        instructions: &[Instruction],
        sink: &mut dyn ResultSink,
    ) -> QueueReport {
        let mut report = QueueReport {
            total: instructions.len(),
            completed: 0,
            stopped_early: false,
            entries: Vec::with_capacity(instructions.len()),
        };

        for instruction in instructions {
            match self.run_instruction(instruction).await {
                Ok(outcome) => {
                    if let Err(e) = sink.persist(instruction, &outcome) {
                        tracing::error!(url = %instruction.url, "failed to persist outcome: {e:#}");
                    }
                    report.completed += 1;
                    report.entries.push(match &outcome {
                        Outcome::Extracted(result) => QueueEntry {
                            id: instruction.id.clone(),
                            url: instruction.url.clone(),
                            status: EntryStatus::Extracted,
                            records: Some(result.data.len()),
                            error: None,
                        },
                        Outcome::Failed { error } => QueueEntry {
                            id: instruction.id.clone(),
                            url: instruction.url.clone(),
                            status: EntryStatus::Failed,
                            records: None,
                            error: Some(error.clone()),
                        },
                    });
                }
                Err(e) => {
                    tracing::error!(url = %instruction.url, "instruction failed: {e:#}");
                    report.entries.push(QueueEntry {
                        id: instruction.id.clone(),
                        url: instruction.url.clone(),
                        status: EntryStatus::Error,
                        records: None,
                        error: Some(format!("{e:#}")),
                    });
                    if self.config.stop_on_error {
                        report.stopped_early = true;
                        break;
                    }
                    continue;
                }
            }

            if let Some(ms) = instruction.trailing_wait_ms() {
                tracing::debug!(ms, "trailing wait");
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }

        report
    }
}

/// Wrap the target URL in the proxy prefix, percent-encoding the original.
fn target_url(url: &str, proxy_prefix: Option<&str>) -> String {
    match proxy_prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => {
            let encoded: String = url::form_urlencoded::byte_serialize(url.as_bytes()).collect();
            format!("{prefix}{encoded}")
        }
        None => url.to_string(),
    }
}

// Document parsing stays inside these helpers so no tree reference is held
// across an await (the parsed tree is not Send).

fn document_satisfies(html: &str, wait_for: &str) -> bool {
    let doc = Html::parse_document(html);
    !selector::resolve(wait_for, doc.root_element()).is_empty()
}

fn resolve_paths(html: &str, sel: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    selector::resolve(sel, doc.root_element())
        .into_iter()
        .map(selector::css_path)
        .collect()
}

fn build_scopes(
    html: &str,
    plan: &ExecutionPlan,
    file_seed: Option<&str>,
    base_url: &str,
) -> Vec<ScopeColumns> {
    let doc = Html::parse_document(html);
    extract::plan_scopes(
        doc.root_element(),
        &plan.groups,
        &plan.fields,
        file_seed,
        base_url,
    )
}
