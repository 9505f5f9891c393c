// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Instruction and command model — the declarative input of the engine.
//!
//! An [`Instruction`] describes one page-scrape job: the URL, page-preparation
//! flags, an optional readiness selector, and an ordered command program. A
//! [`Command`] is one step of that program, tagged by its `type` field on the
//! wire. Instructions are read-only once loaded.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

/// One step of an instruction's command program.
///
/// Closed set of variants, matched exhaustively everywhere — an unhandled
/// command kind is a compile error, not a silent no-op. Entries with an
/// unknown `type` are dropped (with a warning) while decoding the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    /// Suspend the pipeline for `time` milliseconds at this point.
    Waiter {
        #[serde(default, deserialize_with = "de_opt_ms")]
        time: Option<u64>,
    },
    /// Group command: each resolved element becomes an independent
    /// extraction scope yielding its own record set.
    Patent {
        #[serde(default)]
        selector: String,
    },
    /// Extract an attribute value as a named field.
    Attr {
        #[serde(default)]
        selector: String,
        #[serde(default)]
        name: Option<String>,
        /// Explicit attribute override; falls back to the last `[name=...]`
        /// clause in the selector.
        #[serde(default)]
        attribute: Option<String>,
    },
    /// Extract the element's text content as a named field.
    Tag {
        #[serde(default)]
        selector: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Extract the element's serialized outer markup, verbatim.
    Html {
        #[serde(default)]
        selector: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Download and encode the element's image source.
    Img {
        #[serde(default)]
        selector: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Click every resolved element, in document order.
    Click {
        #[serde(default)]
        selector: String,
    },
    /// Set every resolved element's value, dispatching change/input events.
    Fill {
        #[serde(default)]
        selector: String,
        #[serde(default)]
        value: Option<String>,
    },
}

impl Command {
    /// The field key this command writes to, when it is an extraction command.
    ///
    /// Falls back to the command's type label when `name` is absent.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Command::Attr { name, .. } => Some(name.as_deref().unwrap_or("attr")),
            Command::Tag { name, .. } => Some(name.as_deref().unwrap_or("tag")),
            Command::Html { name, .. } => Some(name.as_deref().unwrap_or("html")),
            Command::Img { name, .. } => Some(name.as_deref().unwrap_or("img")),
            _ => None,
        }
    }

    /// The selector attached to this command, if any.
    pub fn selector(&self) -> Option<&str> {
        match self {
            Command::Waiter { .. } => None,
            Command::Patent { selector }
            | Command::Attr { selector, .. }
            | Command::Tag { selector, .. }
            | Command::Html { selector, .. }
            | Command::Img { selector, .. }
            | Command::Click { selector }
            | Command::Fill { selector, .. } => Some(selector),
        }
    }
}

/// A single page-scrape job description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    /// Identifier used for result files and image naming. Accepts a JSON
    /// number or string on the wire.
    #[serde(default, deserialize_with = "de_opt_string")]
    pub id: Option<String>,
    pub url: String,
    /// Page-preparation flags, applied by the document provider before
    /// extraction begins. Unknown flags are ignored with a warning.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Selector the page must satisfy before extraction starts.
    #[serde(default)]
    pub wait_for: Option<String>,
    /// Post-load settle delay in milliseconds.
    #[serde(default, deserialize_with = "de_opt_ms")]
    pub timer_delay: Option<u64>,
    /// Alternative settle delay, used when `timerDelay` is absent.
    #[serde(default, deserialize_with = "de_opt_ms")]
    pub sleep: Option<u64>,
    /// The ordered command program for this page.
    #[serde(default, deserialize_with = "de_commands")]
    pub requests: Vec<Command>,
}

impl Instruction {
    /// Effective post-load settle delay: `timerDelay`, else `sleep`.
    pub fn settle_delay_ms(&self) -> Option<u64> {
        self.timer_delay.or(self.sleep)
    }

    /// The first waiter's delay, used as a trailing wait after persistence.
    /// A first waiter without a usable delay means no trailing wait, even if
    /// a later waiter carries one.
    pub fn trailing_wait_ms(&self) -> Option<u64> {
        self.requests
            .iter()
            .find_map(|cmd| match cmd {
                Command::Waiter { time } => Some(*time),
                _ => None,
            })
            .flatten()
    }

    /// Parse the instruction's flag strings into the closed flag set.
    pub fn page_flags(&self) -> Vec<PageFlag> {
        self.flags
            .iter()
            .filter_map(|raw| {
                let flag = PageFlag::parse(raw);
                if flag.is_none() {
                    tracing::warn!(flag = %raw, "ignoring unknown page flag");
                }
                flag
            })
            .collect()
    }
}

/// Page-preparation flags understood by the document providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFlag {
    RemoveVideos,
    PauseVideos,
    ClearLocalStorage,
    ClearSessionStorage,
    ClearCookies,
    DisableAnimation,
    DisableIndexedDb,
}

impl PageFlag {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "remove-videos" => Some(PageFlag::RemoveVideos),
            "pause-videos" => Some(PageFlag::PauseVideos),
            "clear-local-storage" => Some(PageFlag::ClearLocalStorage),
            "clear-session-storage" => Some(PageFlag::ClearSessionStorage),
            "clear-cookies" => Some(PageFlag::ClearCookies),
            "disable-animation" => Some(PageFlag::DisableAnimation),
            "disable-indexed-db" => Some(PageFlag::DisableIndexedDb),
            _ => None,
        }
    }
}

/// Errors raised while loading an instruction list.
#[derive(Debug, Error)]
pub enum InstructionError {
    #[error("failed to read instruction file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("instruction source is not valid JSON")]
    Json(#[from] serde_json::Error),
    #[error("instruction source must decode to an array of instructions")]
    NotAnArray,
}

/// Load an ordered instruction list from a JSON file.
///
/// The file must decode to a JSON array; anything else is a structured error.
pub fn load_instructions(path: &Path) -> Result<Vec<Instruction>, InstructionError> {
    let raw = std::fs::read_to_string(path).map_err(|source| InstructionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw)?;
    parse_instruction_list(value)
}

/// Decode an already-parsed JSON value into an instruction list.
///
/// Shared by the file loader and the HTTP endpoint.
pub fn parse_instruction_list(value: Value) -> Result<Vec<Instruction>, InstructionError> {
    if !value.is_array() {
        return Err(InstructionError::NotAnArray);
    }
    Ok(serde_json::from_value(value)?)
}

// ── Lenient wire decoding ────────────────────────────────────────

/// Decode a command list, skipping entries whose type is missing or unknown.
///
/// The `type` value is trimmed and lowercased before matching, so `" Attr "`
/// still decodes to [`Command::Attr`].
fn de_commands<'de, D>(deserializer: D) -> Result<Vec<Command>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(decode_commands(raw))
}

fn decode_commands(raw: Vec<Value>) -> Vec<Command> {
    raw.into_iter()
        .filter_map(|mut entry| {
            let ty = entry
                .get("type")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty());
            let Some(ty) = ty else {
                tracing::warn!("skipping command without a type");
                return None;
            };
            if let Some(obj) = entry.as_object_mut() {
                obj.insert("type".to_string(), Value::String(ty.clone()));
            }
            match serde_json::from_value::<Command>(entry) {
                Ok(cmd) => Some(cmd),
                Err(e) => {
                    tracing::warn!(r#type = %ty, error = %e, "skipping unrecognized command");
                    None
                }
            }
        })
        .collect()
}

/// Accept a millisecond duration as either a JSON number or a numeric string.
/// Non-positive and non-numeric values decode to `None`.
fn de_opt_ms<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_ms))
}

fn value_as_ms(value: &Value) -> Option<u64> {
    let ms = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    ms.filter(|ms| ms.is_finite() && *ms > 0.0).map(|ms| ms as u64)
}

/// Accept an id as either a JSON number or a string.
fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}
