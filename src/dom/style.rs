//! Inline-style visibility.
//!
//! Visibility is computed the way the replay engine needs it: a node is
//! hidden when any ancestor (itself included) carries an inline style
//! with `display: none`, `visibility: hidden`, or an opacity of exactly
//! zero. Stylesheets are out of reach for a structural engine.

use super::{Document, NodeId};

/// Look up a property in an inline `style` attribute.
fn inline_property<'a>(style: &'a str, name: &str) -> Option<&'a str> {
    for decl in style.split(';') {
        if let Some((k, v)) = decl.split_once(':') {
            if k.trim().eq_ignore_ascii_case(name) {
                return Some(v.trim());
            }
        }
    }
    None
}

fn hides(doc: &Document, id: NodeId) -> bool {
    let Some(style) = doc.attr(id, "style") else {
        return false;
    };
    if inline_property(style, "display").is_some_and(|v| v.eq_ignore_ascii_case("none")) {
        return true;
    }
    if inline_property(style, "visibility").is_some_and(|v| v.eq_ignore_ascii_case("hidden")) {
        return true;
    }
    if inline_property(style, "opacity")
        .and_then(|v| v.parse::<f64>().ok())
        .is_some_and(|v| v == 0.0)
    {
        return true;
    }
    false
}

impl Document {
    /// Whether the element would be rendered, walking the ancestor
    /// chain up to the document root.
    pub fn is_visible(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if self.is_element(n) && hides(self, n) {
                return false;
            }
            cur = self.parent(n);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_ancestor_hides_descendants() {
        let doc = Document::parse(
            r#"<div style="display: none"><span id="inner">x</span></div>
               <span id="outer">y</span>"#,
        );
        let inner = doc.element_by_id("inner").unwrap();
        let outer = doc.element_by_id("outer").unwrap();
        assert!(!doc.is_visible(inner));
        assert!(doc.is_visible(outer));
    }

    #[test]
    fn zero_opacity_hides() {
        let doc = Document::parse(r#"<p id="ghost" style="opacity: 0.0">x</p>"#);
        assert!(!doc.is_visible(doc.element_by_id("ghost").unwrap()));
        let doc = Document::parse(r#"<p id="dim" style="opacity: 0.4">x</p>"#);
        assert!(doc.is_visible(doc.element_by_id("dim").unwrap()));
    }

    #[test]
    fn visibility_hidden_hides() {
        let doc = Document::parse(r#"<p id="h" style="color: red; visibility: hidden">x</p>"#);
        assert!(!doc.is_visible(doc.element_by_id("h").unwrap()));
    }
}
