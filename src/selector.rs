// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Extended selector mini-language over `scraper` documents.
//!
//! Supports plain CSS selectors plus three extensions:
//!
//! 1. Segments separated by `>>` scope resolution step by step; each segment
//!    runs against every element the previous segment produced.
//! 2. A `next:` segment prefix moves the search root to the single next
//!    sibling element of the current context. Only that element is tested —
//!    its descendants are never queried, so `next:div` cannot greedily
//!    collect nested DIVs before later segments run.
//! 3. `:has-text("value")` filters matched nodes by text content containing
//!    the value, case-insensitively. The sugar `tag("value")` expands to
//!    `tag:has-text("value")`. When the base selector carries a `+`
//!    combinator, the needle is tested against the immediately preceding
//!    sibling instead of the candidate itself, so
//!    `label:has-text('Street:') + span` selects the value next to a label
//!    rather than a span that happens to contain the label text.
//!
//! Example: `#contenu >> h3:has-text('Officers') >> next:div >> p.principal`
//! finds the `#contenu` section, picks the H3 whose text contains
//! "Officers", moves to the DIV right after it, then selects its
//! `p.principal` descendants.

use regex::Regex;
use scraper::{Element, ElementRef, Selector};

/// One parsed `>>` segment.
#[derive(Debug, Clone, PartialEq)]
struct Segment {
    /// Search root is the context's next sibling element, not the context.
    next_sibling: bool,
    /// Base CSS selector with any `:has-text` clause stripped.
    base: String,
    /// Lowercased substring needle from `:has-text`, if present.
    needle: Option<String>,
    /// Test the needle against the preceding sibling instead of the
    /// candidate (active when the base selector contains `+`).
    sibling_fallback: bool,
}

/// Resolve an extended selector against a context element.
///
/// Returns matched elements in (context order, document order). An empty or
/// syntactically empty selector resolves to nothing; an invalid CSS segment
/// is logged and contributes zero matches without failing the caller.
pub fn resolve<'a>(selector: &str, context: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    let Some(segments) = parse_segments(selector) else {
        return Vec::new();
    };

    let mut contexts = vec![context];
    for segment in &segments {
        let parsed = match Selector::parse(&segment.base) {
            Ok(sel) => sel,
            Err(e) => {
                tracing::warn!(selector = %segment.base, "invalid selector segment: {e}");
                return Vec::new();
            }
        };

        let mut next_contexts = Vec::new();
        for ctx in &contexts {
            let root = if segment.next_sibling {
                ctx.next_sibling_element()
            } else {
                Some(*ctx)
            };
            let Some(root) = root else { continue };

            let mut matched = Vec::new();
            if parsed.matches(&root) {
                matched.push(root);
            }
            if !segment.next_sibling {
                matched.extend(root.select(&parsed));
            }

            if let Some(needle) = &segment.needle {
                matched.retain(|el| {
                    if segment.sibling_fallback {
                        el.prev_sibling_element()
                            .map(|sib| text_contains(&sib, needle))
                            .unwrap_or(false)
                    } else {
                        text_contains(el, needle)
                    }
                });
            }

            next_contexts.extend(matched);
        }

        contexts = next_contexts;
        if contexts.is_empty() {
            break;
        }
    }

    contexts
}

/// Compute a `:nth-child` chain addressing this element from the document
/// root, e.g. `html > body:nth-child(2) > div:nth-child(1)`.
///
/// Used to point a live browser page at an element the engine resolved on a
/// static snapshot (click/fill side effects).
pub fn css_path(el: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    let mut current = Some(el);

    while let Some(e) = current {
        let name = e.value().name().to_string();
        if name == "html" {
            parts.push(name);
            break;
        }
        let mut index = 1usize;
        let mut sibling = e.prev_sibling_element();
        while let Some(s) = sibling {
            index += 1;
            sibling = s.prev_sibling_element();
        }
        parts.push(format!("{name}:nth-child({index})"));
        current = e.parent_element();
    }

    parts.reverse();
    parts.join(" > ")
}

/// Full text content of an element, trimmed and whitespace-collapsed.
pub fn element_text(el: &ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<String>())
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ── Segment parsing ──────────────────────────────────────────────

/// Split a selector into segments. `None` when the selector is blank or any
/// segment is empty after trimming, which invalidates the whole resolution.
fn parse_segments(selector: &str) -> Option<Vec<Segment>> {
    if selector.trim().is_empty() {
        return None;
    }

    let mut segments = Vec::new();
    for raw in selector.split(">>") {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let (next_sibling, body) = match strip_next_prefix(trimmed) {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };

        let body = normalize_segment(body);
        let (base, needle) = split_has_text(&body);
        let base = if base.is_empty() {
            "*".to_string()
        } else {
            base
        };
        let sibling_fallback = needle.is_some() && base.contains('+');

        segments.push(Segment {
            next_sibling,
            base,
            needle,
            sibling_fallback,
        });
    }
    Some(segments)
}

fn strip_next_prefix(segment: &str) -> Option<&str> {
    // get(..5) rather than a byte slice: the fifth byte of a segment may sit
    // inside a multibyte character.
    let head = segment.get(..5)?;
    if head.eq_ignore_ascii_case("next:") {
        Some(&segment[5..])
    } else {
        None
    }
}

/// Rewrite the `tag("text")` / `*("text")` shorthand to
/// `tag:has-text("text")`. Applied before the has-text clause is extracted.
fn normalize_segment(segment: &str) -> String {
    // The regex crate has no backreferences, so the two quote styles get one
    // pattern each. The guard class excludes identifier characters so the
    // match cannot start inside a hyphenated pseudo-class like `:has-text`.
    let double = Regex::new(r#"(^|[^:A-Za-z0-9_-])([A-Za-z][A-Za-z0-9_-]*|\*)\("([^"]*)"\)"#)
        .expect("shorthand regex is valid");
    let single = Regex::new(r#"(^|[^:A-Za-z0-9_-])([A-Za-z][A-Za-z0-9_-]*|\*)\('([^']*)'\)"#)
        .expect("shorthand regex is valid");

    let pass = double.replace_all(segment, "${1}${2}:has-text(\"${3}\")");
    single
        .replace_all(&pass, "${1}${2}:has-text('${3}')")
        .into_owned()
}

/// Strip the single `:has-text(...)` clause from a segment, returning the
/// remaining base selector and the lowercased needle.
fn split_has_text(segment: &str) -> (String, Option<String>) {
    let double = Regex::new(r#"(?i):has-text\("([^"]*)"\)"#).expect("has-text regex is valid");
    let single = Regex::new(r#"(?i):has-text\('([^']*)'\)"#).expect("has-text regex is valid");

    for re in [&double, &single] {
        if let Some(caps) = re.captures(segment) {
            let full = caps.get(0).expect("capture 0 always present");
            let needle = caps[1].to_lowercase();
            let mut base = String::with_capacity(segment.len());
            base.push_str(&segment[..full.start()]);
            base.push_str(&segment[full.end()..]);
            return (base.trim().to_string(), Some(needle));
        }
    }
    (segment.trim().to_string(), None)
}

fn text_contains(el: &ElementRef<'_>, needle: &str) -> bool {
    el.text().collect::<String>().to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn first_match<'a>(doc: &'a Html, selector: &str) -> Option<String> {
        resolve(selector, doc.root_element())
            .first()
            .map(element_text)
    }

    #[test]
    fn test_plain_css_segments_scope_sequentially() {
        let doc = Html::parse_document(
            r#"<div id="contenu"><section><p class="a">one</p></section>
               <p class="a">two</p></div>
               <p class="a">outside</p>"#,
        );
        let found = resolve("#contenu >> p.a", doc.root_element());
        let texts: Vec<String> = found.iter().map(element_text).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn test_has_text_filters_case_insensitively() {
        let doc = Html::parse_document(
            "<div>Board of OFFICERS</div><div>Shareholders</div>",
        );
        let found = resolve(r#"div:has-text("Officers")"#, doc.root_element());
        assert_eq!(found.len(), 1);
        assert_eq!(element_text(&found[0]), "Board of OFFICERS");
    }

    #[test]
    fn test_next_prefix_takes_sibling_not_descendants() {
        let doc = Html::parse_document(
            r#"<h3>X marks</h3>
               <div id="target"><div id="nested">inner</div></div>"#,
        );
        let found = resolve(r#"h3:has-text('X') >> next:div"#, doc.root_element());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value().attr("id"), Some("target"));
    }

    #[test]
    fn test_next_prefix_skips_when_sibling_does_not_match() {
        let doc = Html::parse_document("<h3>X</h3><span>not a div</span>");
        let found = resolve("h3 >> next:div", doc.root_element());
        assert!(found.is_empty());
    }

    #[test]
    fn test_sibling_text_fallback_checks_previous_sibling() {
        let doc = Html::parse_document(
            r#"<p><label>Street:</label><span>12 Main St</span></p>
               <p><label>City:</label><span>Street: is my favourite word</span></p>"#,
        );
        let found = resolve(r#"label:has-text('Street:') + span"#, doc.root_element());
        assert_eq!(found.len(), 1);
        assert_eq!(element_text(&found[0]), "12 Main St");
    }

    #[test]
    fn test_shorthand_expands_to_has_text() {
        let doc = Html::parse_document("<h3>Officers</h3><h3>Other</h3>");
        let found = resolve(r#"h3("Officers")"#, doc.root_element());
        assert_eq!(found.len(), 1);

        let star = resolve(r#"*('Officers')"#, doc.root_element());
        assert!(star.iter().any(|el| el.value().name() == "h3"));
    }

    #[test]
    fn test_explicit_has_text_is_not_rewritten() {
        // the shorthand rewrite must not fire inside `:has-text` itself
        assert_eq!(
            normalize_segment(r#"div:has-text("Officers")"#),
            r#"div:has-text("Officers")"#
        );
        assert_eq!(
            normalize_segment(r#"h3:has-text('X')"#),
            r#"h3:has-text('X')"#
        );
        assert_eq!(normalize_segment(r#"h3("X")"#), r#"h3:has-text("X")"#);

        let doc = Html::parse_document("<div>Officers here</div><div>other</div>");
        let found = resolve(r#"div:has-text("Officers")"#, doc.root_element());
        assert_eq!(found.len(), 1);
        assert_eq!(element_text(&found[0]), "Officers here");
    }

    #[test]
    fn test_multibyte_shorthand_does_not_panic() {
        let doc = Html::parse_document("<p>日本語のテキスト</p><p>other</p>");
        let found = resolve(r#"*("日本")"#, doc.root_element());
        assert!(found.iter().any(|el| el.value().name() == "p"));
        assert!(resolve("日本 >> p", doc.root_element()).is_empty());
    }

    #[test]
    fn test_empty_segment_invalidates_resolution() {
        let doc = Html::parse_document("<div><p>x</p></div>");
        assert!(resolve("div >> >> p", doc.root_element()).is_empty());
        assert!(resolve("", doc.root_element()).is_empty());
        assert!(resolve("   ", doc.root_element()).is_empty());
    }

    #[test]
    fn test_invalid_css_segment_is_non_fatal() {
        let doc = Html::parse_document("<div><p>x</p></div>");
        assert!(resolve("div >> p[", doc.root_element()).is_empty());
    }

    #[test]
    fn test_early_stop_on_empty_context_list() {
        let doc = Html::parse_document("<div><p>x</p></div>");
        assert!(resolve("section >> p", doc.root_element()).is_empty());
    }

    #[test]
    fn test_officers_walkthrough() {
        let doc = Html::parse_document(
            r#"<div id="contenu">
                 <h3>Company Officers</h3>
                 <div>
                   <p class="principal">Alice</p>
                   <p class="principal">Bob</p>
                   <p>footnote</p>
                 </div>
               </div>"#,
        );
        let found = resolve(
            "#contenu >> h3:has-text('Officers') >> next:div >> p.principal",
            doc.root_element(),
        );
        let texts: Vec<String> = found.iter().map(element_text).collect();
        assert_eq!(texts, vec!["Alice", "Bob"]);
    }

    #[test]
    fn test_css_path_round_trip() {
        let doc = Html::parse_document(
            "<body><div>a</div><div><span>target</span></div></body>",
        );
        let span = resolve("span", doc.root_element());
        assert_eq!(span.len(), 1);
        let path = css_path(span[0]);
        assert!(path.starts_with("html"), "path was {path}");
        assert!(path.ends_with("span:nth-child(1)"), "path was {path}");

        // The computed path must resolve back to the same element.
        let sel = Selector::parse(&path).unwrap();
        let again: Vec<_> = doc.select(&sel).collect();
        assert_eq!(again.len(), 1);
        assert_eq!(element_text(&again[0]), "target");
    }

    #[test]
    fn test_first_match_helper_and_collapse() {
        let doc = Html::parse_document("<p>  lots\n of \t space </p>");
        assert_eq!(first_match(&doc, "p").as_deref(), Some("lots of space"));
        assert_eq!(collapse_whitespace("  a  b \n c "), "a b c");
    }
}
