//! Locator resolution: a recorded string back into a live node.
//!
//! Single-locator resolution parses the scheme and performs the lookup;
//! fan-out resolution walks primary-then-alternates and short-circuits
//! on the first hit, surfacing the last failure when everything misses.

use tracing::{debug, trace};

use crate::dom::{Document, NodeId};
use crate::locator::{css, glob_match, xpath, Locator};
use crate::{Error, Result};

/// Outcome of a fan-out resolution: which locator actually matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub node: NodeId,
    pub locator: String,
}

/// Resolve one locator string.
///
/// With `must_be_visible`, an element whose ancestor chain hides it is
/// reported as [`Error::ElementNotVisible`] rather than returned.
pub fn resolve(doc: &Document, locator: &str, must_be_visible: bool) -> Result<NodeId> {
    let parsed = Locator::parse(locator)?;
    let found = match &parsed {
        Locator::Id(value) => doc.element_by_id(value),
        Locator::Name(value) => doc.elements_by_name(value).into_iter().next(),
        Locator::Css(selector) => css::select_first(doc, selector)?,
        Locator::XPath(path) => xpath::evaluate_first(doc, path)?,
        Locator::LinkText(pattern) => find_link(doc, pattern),
    };
    let node = found.ok_or_else(|| Error::ElementNotFound(locator.to_string()))?;
    if must_be_visible && !doc.is_visible(node) {
        return Err(Error::ElementNotVisible(locator.to_string()));
    }
    Ok(node)
}

/// First anchor whose computed text matches the pattern exactly or by
/// glob.
fn find_link(doc: &Document, pattern: &str) -> Option<NodeId> {
    doc.elements_by_tag("a")
        .into_iter()
        .find(|&a| glob_match(pattern, doc.computed_text(a).trim()))
}

/// Fan-out resolution: primary first, then each alternate in order.
/// Visibility requirements apply identically to every candidate.
pub fn resolve_any(
    doc: &Document,
    primary: &str,
    alternates: &[String],
    must_be_visible: bool,
) -> Result<Resolved> {
    let mut last_err: Option<Error> = None;
    let candidates =
        std::iter::once(primary).chain(alternates.iter().map(String::as_str));
    for (i, candidate) in candidates.enumerate() {
        if candidate.is_empty() || (i > 0 && candidate == primary) {
            continue;
        }
        match resolve(doc, candidate, must_be_visible) {
            Ok(node) => {
                if i > 0 {
                    debug!(locator = candidate, "resolved via fallback locator");
                } else {
                    trace!(locator = candidate, "resolved via primary locator");
                }
                return Ok(Resolved {
                    node,
                    locator: candidate.to_string(),
                });
            }
            Err(e) => {
                trace!(locator = candidate, error = %e, "locator did not resolve");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| Error::ElementNotFound(primary.to_string())))
}
