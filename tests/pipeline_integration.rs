// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline tests: instruction JSON in, snapshots and CSV out.

use anyhow::Result;
use async_trait::async_trait;
use gleaner::engine::{Engine, EngineConfig, EntryStatus};
use gleaner::instructions::{parse_instruction_list, Instruction, PageFlag};
use gleaner::persist::Store;
use gleaner::provider::offline::OfflineSession;
use gleaner::provider::{DocumentProvider, PageSession};
use std::collections::HashMap;
use tempfile::tempdir;

/// Serves canned HTML documents keyed by URL.
struct FixtureProvider {
    pages: HashMap<String, String>,
}

impl FixtureProvider {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, html)| (url.to_string(), html.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl DocumentProvider for FixtureProvider {
    async fn open(
        &self,
        url: &str,
        _flags: &[PageFlag],
        _timeout_ms: u64,
    ) -> Result<Box<dyn PageSession>> {
        let html = self
            .pages
            .get(url)
            .ok_or_else(|| anyhow::anyhow!("no fixture for {url}"))?;
        Ok(Box::new(OfflineSession::from_html(html.clone(), url)))
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        readiness_retries: 2,
        readiness_interval_ms: 1,
        ..EngineConfig::default()
    }
}

fn instructions(json: serde_json::Value) -> Vec<Instruction> {
    parse_instruction_list(json).unwrap()
}

const DIRECTORY_PAGE: &str = r#"
    <html><body>
      <div class="row"><span class="n">Ada</span><span class="p">555-0100</span></div>
      <div class="row"><span class="n">Grace</span><span class="p">555-0101</span></div>
      <div class="row"><span class="n">Edsger</span></div>
    </body></html>
"#;

#[tokio::test]
async fn test_queue_produces_snapshots_and_csv() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();
    let engine = Engine::new(
        Box::new(FixtureProvider::new(&[
            ("https://x.test/directory", DIRECTORY_PAGE),
            ("https://x.test/empty", "<html><body><p>nothing</p></body></html>"),
        ])),
        fast_config(),
    );

    let list = instructions(serde_json::json!([
        {
            "id": "job-1",
            "url": "https://x.test/directory",
            "requests": [
                { "type": "patent", "selector": "div.row" },
                { "type": "tag", "selector": "span.n", "name": "name" },
                { "type": "tag", "selector": "span.p", "name": "phone" }
            ]
        },
        {
            "id": "job-2",
            "url": "https://x.test/empty",
            "waitFor": "#never",
            "requests": [
                { "type": "tag", "selector": "p", "name": "text" }
            ]
        }
    ]));

    let report = engine.run_queue(&list, &mut store).await;
    assert_eq!(report.total, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(report.entries[0].status, EntryStatus::Extracted);
    assert_eq!(report.entries[0].records, Some(3));
    assert_eq!(report.entries[1].status, EntryStatus::Failed);

    // the extraction snapshot holds one record per group scope
    let raw = std::fs::read_to_string(dir.path().join("results/job-1.json")).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["url"], "https://x.test/directory");
    assert_eq!(snapshot["data"][0]["name"], "Ada");
    assert_eq!(snapshot["data"][0]["phone"], "555-0100");
    // the third row has no phone span at all
    assert_eq!(snapshot["data"][2]["name"], "Edsger");
    assert!(snapshot["data"][2].get("phone").is_none());

    // the readiness failure is persisted as its own snapshot
    let raw = std::fs::read_to_string(dir.path().join("results/job-2.json")).unwrap();
    let failure: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(failure["error"], "Element #never not found within time limit");

    let csv = std::fs::read_to_string(dir.path().join("data.csv")).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("name,phone"));
    assert_eq!(lines.next(), Some("Ada,555-0100"));
    assert_eq!(lines.next(), Some("Grace,555-0101"));
    assert_eq!(lines.next(), Some("Edsger,"));
}

#[tokio::test]
async fn test_csv_columns_accumulate_across_instructions() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();
    let engine = Engine::new(
        Box::new(FixtureProvider::new(&[
            ("https://x.test/a", "<p class=\"id\">1</p><p class=\"name\">a</p>"),
            ("https://x.test/b", "<p class=\"id\">2</p><p class=\"mail\">b@x.test</p>"),
        ])),
        fast_config(),
    );

    let list = instructions(serde_json::json!([
        {
            "id": "run-1",
            "url": "https://x.test/a",
            "requests": [
                { "type": "tag", "selector": "p.id", "name": "id" },
                { "type": "tag", "selector": "p.name", "name": "name" }
            ]
        },
        {
            "id": "run-2",
            "url": "https://x.test/b",
            "requests": [
                { "type": "tag", "selector": "p.id", "name": "id" },
                { "type": "tag", "selector": "p.mail", "name": "email" }
            ]
        }
    ]));

    engine.run_queue(&list, &mut store).await;

    let csv = std::fs::read_to_string(dir.path().join("data.csv")).unwrap();
    let mut lines = csv.lines();
    // header is the union of both runs' fields, in first-seen order
    assert_eq!(lines.next(), Some("id,name,email"));
    assert_eq!(lines.next(), Some("1,a,"));
    assert_eq!(lines.next(), Some("2,,b@x.test"));
}

#[tokio::test]
async fn test_immediate_steps_do_not_break_offline_extraction() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();
    let engine = Engine::new(
        Box::new(FixtureProvider::new(&[(
            "https://x.test/page",
            "<button class=\"more\">more</button><h1>Title</h1>",
        )])),
        fast_config(),
    );

    // click and fill are no-ops on a static snapshot; the extractors still run
    let list = instructions(serde_json::json!([{
        "id": "job-3",
        "url": "https://x.test/page",
        "requests": [
            { "type": "click", "selector": "button.more" },
            { "type": "waiter", "time": 5 },
            { "type": "fill", "selector": "input.q", "value": "rust" },
            { "type": "tag", "selector": "h1", "name": "title" }
        ]
    }]));

    let report = engine.run_queue(&list, &mut store).await;
    assert_eq!(report.entries[0].status, EntryStatus::Extracted);
    assert_eq!(report.entries[0].records, Some(1));

    let raw = std::fs::read_to_string(dir.path().join("results/job-3.json")).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["data"][0]["title"], "Title");
}

#[tokio::test]
async fn test_extended_selectors_flow_through_the_pipeline() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path()).unwrap();
    let engine = Engine::new(
        Box::new(FixtureProvider::new(&[(
            "https://x.test/profile",
            r#"<div class="card">
                 <span>Officers</span>
                 <div><b>Street:</b><i>12 Main St</i></div>
               </div>"#,
        )])),
        fast_config(),
    );

    let list = instructions(serde_json::json!([{
        "id": "job-4",
        "url": "https://x.test/profile",
        "requests": [
            { "type": "tag", "selector": "div.card >> span(\"officers\")", "name": "section" },
            { "type": "tag", "selector": "b:has-text(\"street\") >> next:i", "name": "street" }
        ]
    }]));

    let report = engine.run_queue(&list, &mut store).await;
    assert_eq!(report.entries[0].status, EntryStatus::Extracted);

    let raw = std::fs::read_to_string(dir.path().join("results/job-4.json")).unwrap();
    let snapshot: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(snapshot["data"][0]["section"], "Officers");
    assert_eq!(snapshot["data"][0]["street"], "12 Main St");
}
