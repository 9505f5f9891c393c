// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Field extraction and record assembly.
//!
//! Extraction runs in two phases so that no `scraper` tree reference is held
//! across an await point (the tree types are not `Send`, and engine futures
//! must be):
//!
//! 1. A **sync phase** walks the document: group scopes are resolved, field
//!    commands produce [`RawValue`]s per matched element — text, markup, and
//!    attribute values are final, image fields become [`PendingAsset`]
//!    markers carrying an already-absolutized source URL.
//! 2. An **async phase** downloads pending assets and zips the per-field
//!    value arrays into ordered flat records. A failed capture drops that
//!    value before zipping, exactly like any other missing field value.

use crate::assets::{self, ImageAsset, PendingAsset};
use crate::instructions::Command;
use crate::selector::{self, collapse_whitespace};
use regex::Regex;
use scraper::ElementRef;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use url::Url;

/// One extracted field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Text, attribute, or markup content (also file paths after the
    /// persistence adapter substitutes assets).
    Text(String),
    /// A single captured image representation.
    Asset(ImageAsset),
    /// Multiple values in one field — the `[normalized, original]` image
    /// pair, or the substituted path pair after persistence.
    Many(Vec<FieldValue>),
}

/// One flattened row of field-name → value pairs, in field insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut FieldValue)> {
        self.fields.iter_mut().map(|(n, v)| (n.as_str(), v))
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// A value produced by the sync phase.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Final value, no further work needed.
    Ready(FieldValue),
    /// An image capture to be performed by the async phase.
    Pending(PendingAsset),
}

/// The per-field value arrays collected for one extraction scope, in field
/// insertion order (a later command reusing a name replaces the earlier
/// array in place).
#[derive(Debug, Clone, Default)]
pub struct ScopeColumns {
    pub columns: Vec<(String, Vec<RawValue>)>,
}

/// Sync phase: resolve group scopes and collect per-field value arrays.
///
/// With both groups and fields present, each group command's resolved
/// elements become independent scopes in (group command, group element)
/// order. With fields only, the root is the single scope. Without fields the
/// result is empty.
pub fn plan_scopes(
    root: ElementRef<'_>,
    groups: &[Command],
    fields: &[Command],
    file_seed: Option<&str>,
    base_url: &str,
) -> Vec<ScopeColumns> {
    if fields.is_empty() {
        return Vec::new();
    }

    if groups.is_empty() {
        return vec![collect_columns(root, fields, file_seed, base_url)];
    }

    let mut scopes = Vec::new();
    for group in groups {
        let Some(group_selector) = group.selector().filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        for element in selector::resolve(group_selector, root) {
            scopes.push(collect_columns(element, fields, file_seed, base_url));
        }
    }
    scopes
}

/// Collect the field-value arrays for one scope.
fn collect_columns(
    scope: ElementRef<'_>,
    fields: &[Command],
    file_seed: Option<&str>,
    base_url: &str,
) -> ScopeColumns {
    let mut columns = ScopeColumns::default();

    for cmd in fields {
        let Some(sel) = cmd.selector().filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        let elements = selector::resolve(sel, scope);
        if elements.is_empty() {
            continue;
        }

        let Some(field_name) = cmd.field_name() else {
            continue;
        };

        let values: Vec<RawValue> = elements
            .iter()
            .filter_map(|el| extract_raw(*el, cmd, file_seed, base_url))
            .collect();
        if values.is_empty() {
            continue;
        }

        // Map semantics with stable position: a later command reusing the
        // name replaces the earlier array where it first appeared.
        if let Some(slot) = columns.columns.iter_mut().find(|(n, _)| n == field_name) {
            slot.1 = values;
        } else {
            columns.columns.push((field_name.to_string(), values));
        }
    }

    columns
}

/// Extract one value from a resolved element. `None` drops the value —
/// it is never stored, so it does not occupy a position in the field array.
fn extract_raw(
    el: ElementRef<'_>,
    cmd: &Command,
    file_seed: Option<&str>,
    base_url: &str,
) -> Option<RawValue> {
    match cmd {
        Command::Attr {
            selector,
            name,
            attribute,
        } => {
            name.as_ref()?;
            let attr_name = attribute_name(attribute.as_deref(), selector)?;
            let value = el.value().attr(&attr_name)?;
            Some(RawValue::Ready(FieldValue::Text(collapse_whitespace(value))))
        }
        Command::Tag { name, .. } => {
            name.as_ref()?;
            Some(RawValue::Ready(FieldValue::Text(selector::element_text(
                &el,
            ))))
        }
        Command::Html { name, .. } => {
            name.as_ref()?;
            Some(RawValue::Ready(FieldValue::Text(el.html())))
        }
        Command::Img { name, .. } => {
            let field_name = name.as_ref()?;
            let src = el.value().attr("src").filter(|s| !s.trim().is_empty())?;
            let source_url = absolutize(src, base_url)?;
            Some(RawValue::Pending(PendingAsset {
                source_url,
                name: field_name.clone(),
                file_name: file_seed.unwrap_or(field_name).to_string(),
            }))
        }
        _ => None,
    }
}

/// Resolve the attribute to read: explicit override first, else the last
/// `[name=...]` bracket clause of the selector.
fn attribute_name(explicit: Option<&str>, selector: &str) -> Option<String> {
    if let Some(attr) = explicit {
        let attr = attr.trim();
        if !attr.is_empty() {
            return Some(attr.to_string());
        }
    }

    let re = Regex::new(r"\[([^\]]+)\]").expect("bracket regex is valid");
    let last = re.captures_iter(selector).last()?;
    let inner = last[1].split('=').next()?.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

/// Resolve a possibly-relative source URL against the page base. Falls back
/// to the raw value when the base itself does not parse.
fn absolutize(src: &str, base_url: &str) -> Option<String> {
    match Url::parse(base_url).and_then(|base| base.join(src)) {
        Ok(url) => Some(url.to_string()),
        Err(_) => Some(src.to_string()),
    }
}

/// Async phase: capture pending images, then zip each scope's value arrays
/// into records.
pub async fn finalize_records(
    scopes: Vec<ScopeColumns>,
    client: &reqwest::Client,
) -> Vec<Record> {
    let mut records = Vec::new();

    for scope in scopes {
        let mut columns: Vec<(String, Vec<FieldValue>)> = Vec::new();
        for (name, raw_values) in scope.columns {
            let mut values = Vec::new();
            for raw in raw_values {
                match raw {
                    RawValue::Ready(value) => values.push(value),
                    RawValue::Pending(pending) => {
                        if let Some(captured) = assets::capture(&pending, client).await {
                            values.push(wrap_assets(captured));
                        }
                    }
                }
            }
            if !values.is_empty() {
                columns.push((name, values));
            }
        }
        records.extend(zip_columns(columns));
    }

    records
}

/// One surviving branch is returned bare; two stay an ordered pair.
fn wrap_assets(mut captured: Vec<ImageAsset>) -> FieldValue {
    if captured.len() == 1 {
        FieldValue::Asset(captured.remove(0))
    } else {
        FieldValue::Many(captured.into_iter().map(FieldValue::Asset).collect())
    }
}

/// Zip per-field value arrays into positional records.
///
/// Record `i` contains field `f` iff `i < len(array[f])`; records with zero
/// keys are discarded.
pub fn zip_columns(columns: Vec<(String, Vec<FieldValue>)>) -> Vec<Record> {
    let max_len = columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0);

    let mut records = Vec::new();
    for i in 0..max_len {
        let mut record = Record::default();
        for (name, values) in &columns {
            if let Some(value) = values.get(i) {
                record.insert(name.clone(), value.clone());
            }
        }
        if !record.is_empty() {
            records.push(record);
        }
    }
    records
}
