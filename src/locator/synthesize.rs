//! Locator synthesis: a live node becomes a ranked list of durable
//! references, most durable first.
//!
//! Candidate order: stable id, name, test attribute, link text, an
//! ancestor-anchored XPath, an attribute-combination XPath verified
//! against the document, a self-verified positional XPath, and a CSS
//! path. Generation never fails as a whole; a candidate that cannot be
//! built is simply omitted.

use tracing::trace;

use crate::dom::{Document, NodeId};
use crate::locator::{css, xpath};

/// Longest link text worth recording as a locator.
const LINK_TEXT_MAX: usize = 50;

/// Attributes tried, in order, for the attribute-combination XPath.
const PREFERRED_ATTRIBUTES: &[&str] = &[
    "id",
    "name",
    "value",
    "type",
    "action",
    "onclick",
    "data-testid",
    "aria-label",
];

/// Ids that look auto-generated make brittle locators; the heuristic
/// here is the cheap one: reject ids led by a digit.
fn stable_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with(|c: char| c.is_ascii_digit())
}

/// Generate the ranked candidate list for an element.
///
/// The first entry is the primary locator, the rest are fallbacks in
/// preference order. Returns an empty list for text nodes.
pub fn synthesize(doc: &Document, node: NodeId) -> Vec<String> {
    if !doc.is_element(node) {
        return Vec::new();
    }
    let mut candidates = Vec::new();

    if let Some(id) = doc.attr(node, "id") {
        if stable_id(id) {
            candidates.push(format!("id={id}"));
        }
    }

    if let Some(name) = doc.attr(node, "name") {
        if !name.is_empty() {
            candidates.push(format!("name={name}"));
        }
    }

    if let Some(testid) = doc.attr(node, "data-testid") {
        if !testid.is_empty() {
            candidates.push(format!(
                "css=[data-testid=\"{}\"]",
                css::escape_string(testid)
            ));
        }
    }

    if doc.tag(node) == Some("a") {
        let text = doc.computed_text(node).trim().to_string();
        if !text.is_empty() && text.chars().count() < LINK_TEXT_MAX {
            candidates.push(format!("linktext={text}"));
        }
    }

    if let Some(path) = anchored_xpath(doc, node) {
        candidates.push(format!("xpath={path}"));
    }

    if let Some(path) = attribute_xpath(doc, node) {
        candidates.push(format!("xpath={path}"));
    }

    if let Some(path) = positional_xpath(doc, node) {
        candidates.push(format!("xpath={path}"));
    }

    if let Some(selector) = css_path(doc, node) {
        candidates.push(format!("css={selector}"));
    }

    candidates.dedup();
    trace!(count = candidates.len(), "synthesized locator candidates");
    candidates
}

/// `tag` or `tag[i]`, indexed among same-tag element siblings, index
/// omitted when the node is the only one of its tag there.
fn relative_step(doc: &Document, node: NodeId) -> Option<String> {
    let tag = doc.tag(node)?;
    if doc.same_tag_sibling_count(node) > 1 {
        Some(format!("{}[{}]", tag, doc.tag_index(node)))
    } else {
        Some(tag.to_string())
    }
}

/// Climb toward the root, anchoring at the first ancestor with an id
/// (or at `html`/`body`), emitting positional steps below the anchor.
fn anchored_xpath(doc: &Document, node: NodeId) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut cur = node;
    loop {
        if doc.parent(cur).is_none() {
            parts.insert(0, "html".to_string());
            break;
        }
        if doc.tag(cur) == Some("body") {
            parts.insert(0, "body".to_string());
            parts.insert(0, "html".to_string());
            break;
        }
        if let Some(id) = doc.attr(cur, "id") {
            if !id.is_empty() {
                parts.insert(0, format!("*[@id=\"{id}\"]"));
                break;
            }
        }
        parts.insert(0, relative_step(doc, cur)?);
        cur = doc.parent(cur)?;
    }
    let prefix = if parts.first().map(String::as_str) == Some("html") {
        "/"
    } else {
        "//"
    };
    Some(format!("{prefix}{}", parts.join("/")))
}

/// Add preferred attributes one at a time until the resulting
/// `//tag[@a=v and ...]` re-resolves to this exact element.
fn attribute_xpath(doc: &Document, node: NodeId) -> Option<String> {
    let tag = doc.tag(node)?;
    let mut tests: Vec<String> = Vec::new();
    for &name in PREFERRED_ATTRIBUTES {
        let Some(value) = doc.attr(node, name) else {
            continue;
        };
        tests.push(format!("@{}={}", name, xpath::literal(value)));
        let candidate = format!("//{}[{}]", tag, tests.join(" and "));
        if xpath::evaluate_first(doc, &candidate).ok().flatten() == Some(node) {
            return Some(candidate);
        }
    }
    None
}

/// Full positional path from `html` down, kept only if it resolves
/// back to the identical element.
fn positional_xpath(doc: &Document, node: NodeId) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut cur = node;
    while let Some(parent) = doc.parent(cur) {
        parts.insert(0, relative_step(doc, cur)?);
        cur = parent;
    }
    if doc.tag(cur) != Some("html") {
        return None;
    }
    parts.insert(0, "html".to_string());
    let path = format!("/{}", parts.join("/"));
    if xpath::evaluate_first(doc, &path).ok().flatten() == Some(node) {
        Some(path)
    } else {
        None
    }
}

/// CSS path: `#id` anchors and stops the climb, otherwise
/// `tag:nth-of-type(n)` when the tag repeats among siblings.
fn css_path(doc: &Document, node: NodeId) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut cur = node;
    loop {
        let tag = doc.tag(cur)?;
        if tag == "body" || tag == "html" {
            parts.insert(0, tag.to_string());
            break;
        }
        if let Some(id) = doc.attr(cur, "id") {
            if !id.is_empty() {
                parts.insert(0, format!("#{}", css::escape_ident(id)));
                break;
            }
        }
        if doc.same_tag_sibling_count(cur) > 1 {
            parts.insert(0, format!("{}:nth-of-type({})", tag, doc.tag_index(cur)));
        } else {
            parts.insert(0, tag.to_string());
        }
        match doc.parent(cur) {
            Some(p) if doc.is_element(p) => cur = p,
            _ => break,
        }
    }
    Some(parts.join(" > "))
}
