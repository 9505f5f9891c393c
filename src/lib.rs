// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gleaner — declarative record extraction from HTML pages.
//!
//! An instruction queue describes what to pull from each page: an extended
//! CSS selector mini-language addresses the elements, commands classify into
//! immediate page actions and deferred extractors, and matched values are
//! zipped positionally into flat records. Pages come from interchangeable
//! document providers (plain HTTP or a headless Chromium tab); results are
//! persisted as JSON snapshots, image files, and a cumulative CSV export.

pub mod assets;
pub mod classify;
pub mod engine;
pub mod extract;
pub mod instructions;
pub mod persist;
pub mod provider;
pub mod selector;
pub mod server;
