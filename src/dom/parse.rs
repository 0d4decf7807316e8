//! HTML import: converts a parsed `scraper` tree into the arena
//! document. Comments, doctypes and processing instructions are
//! dropped; element tags and attribute names are lowercased.

use scraper::node::Node;
use scraper::Html;

use super::Document;

impl Document {
    /// Parse an HTML snapshot into a document.
    ///
    /// The underlying parser normalizes the tree into the standard
    /// `html > head + body` shape, so a fragment like
    /// `<button id="go">Go</button>` still produces a full document.
    pub fn parse(html: &str) -> Document {
        let parsed = Html::parse_document(html);
        let mut doc = Document::default();

        // (scraper node, arena parent) pairs; children pushed in
        // reverse so pops preserve document order.
        let mut stack = Vec::new();
        for child in parsed.tree.root().children().collect::<Vec<_>>().into_iter().rev() {
            stack.push((child, None));
        }

        while let Some((node, parent)) = stack.pop() {
            let arena_id = match node.value() {
                Node::Element(el) => {
                    let attrs: Vec<(String, String)> = el
                        .attrs()
                        .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                        .collect();
                    let borrowed: Vec<(&str, &str)> = attrs
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_str()))
                        .collect();
                    let id = match parent {
                        Some(p) => doc.append_element(p, el.name(), &borrowed),
                        None => {
                            let id = doc.push_element(None, el.name(), &borrowed);
                            if doc.root.is_none() {
                                doc.root = Some(id);
                            }
                            id
                        }
                    };
                    Some(id)
                }
                Node::Text(text) => {
                    let content: &str = text;
                    if content.is_empty() {
                        None
                    } else {
                        parent.map(|p| doc.append_text(p, content))
                    }
                }
                _ => None,
            };

            if let Some(arena_id) = arena_id {
                if doc.is_element(arena_id) {
                    for child in node.children().collect::<Vec<_>>().into_iter().rev() {
                        stack.push((child, Some(arena_id)));
                    }
                }
            }
        }

        if doc.root.is_none() {
            // Parser produced no element at all; fall back to a skeleton.
            return Document::new();
        }

        let title = doc
            .elements_by_tag("title")
            .first()
            .map(|&t| doc.rendered_text(t))
            .unwrap_or_default();
        doc.set_title(title);
        doc
    }
}
