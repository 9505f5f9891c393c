// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command classification — one ordered pass over an instruction's program.
//!
//! Immediate-effect commands (waiter, click, fill) keep their relative order
//! and become [`Step`]s the engine executes in sequence, so a waiter's sleep
//! is interleaved with click/fill side effects exactly where it appears.
//! Data-producing commands (patent groups and the four extractors) are
//! deferred: they run together after the whole program has been scanned, and
//! their position relative to the immediate commands does not affect
//! extraction results.

use crate::instructions::Command;

/// An immediate-effect step, executed in program order.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Suspend the pipeline for this many milliseconds.
    Wait { ms: u64 },
    /// Click every element the selector resolves to, in document order.
    Click { selector: String },
    /// Set every resolved element's value and notify the page.
    Fill { selector: String, value: String },
}

/// The classified form of an instruction's command program.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    /// Immediate steps in program order.
    pub steps: Vec<Step>,
    /// Group ("patent") commands, in program order.
    pub groups: Vec<Command>,
    /// Field extraction commands, in program order.
    pub fields: Vec<Command>,
}

/// Partition a command program into immediate steps and deferred
/// group/field commands. Pure and synchronous; waiters with a missing or
/// non-positive delay are dropped.
pub fn classify(requests: &[Command]) -> ExecutionPlan {
    let mut plan = ExecutionPlan::default();

    for cmd in requests {
        match cmd {
            Command::Waiter { time } => {
                if let Some(ms) = time {
                    plan.steps.push(Step::Wait { ms: *ms });
                }
            }
            Command::Click { selector } => plan.steps.push(Step::Click {
                selector: selector.clone(),
            }),
            Command::Fill { selector, value } => plan.steps.push(Step::Fill {
                selector: selector.clone(),
                value: value.clone().unwrap_or_default(),
            }),
            Command::Patent { .. } => plan.groups.push(cmd.clone()),
            Command::Attr { .. }
            | Command::Tag { .. }
            | Command::Html { .. }
            | Command::Img { .. } => plan.fields.push(cmd.clone()),
        }
    }

    plan
}
