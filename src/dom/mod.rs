//! In-memory page document.
//!
//! The engine records against and replays into a live page. Outside a
//! browser that page is emulated here: an arena-backed element tree
//! parsed from real HTML, carrying the mutable state a replay touches
//! (values, checked flags, focus), a dispatch log for synthetic events,
//! inline-style visibility and a synthetic layout for client
//! coordinates. Locator synthesis and resolution treat this as the DOM.

mod parse;
mod style;

/// Handle to a node in a [`Document`]. Cheap to copy, only meaningful
/// for the document that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Element bounding box in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    /// Center point, used as the synthesized click coordinate.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Counters for a framework-style guarded `value` property.
///
/// Reactive frameworks wrap the native value setter; writes through the
/// wrapped property are invisible to their change detectors. The engine
/// is required to go through the native setter, and tests assert that
/// via these counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardStats {
    /// Writes through the (wrapped) property setter.
    pub property_writes: u32,
    /// Writes through the platform's original setter.
    pub native_writes: u32,
}

/// A synthetic event dispatched on a node.
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
    pub name: String,
    pub key: Option<String>,
    pub client: Option<(f64, f64)>,
}

impl DomEvent {
    pub fn simple(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: None,
            client: None,
        }
    }

    pub fn mouse(name: &str, x: f64, y: f64) -> Self {
        Self {
            name: name.to_string(),
            key: None,
            client: Some((x, y)),
        }
    }

    pub fn keyboard(name: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            key: Some(key.to_string()),
            client: None,
        }
    }
}

/// Log entry: an event observed on a target node.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    pub target: NodeId,
    pub event: DomEvent,
}

#[derive(Debug, Clone)]
pub(crate) struct ElementData {
    tag: String,
    attrs: Vec<(String, String)>,
    value: Option<String>,
    checked: Option<bool>,
    guard: Option<GuardStats>,
    bbox: Option<Rect>,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed document tree.
#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: Option<NodeId>,
    title: String,
    events: Vec<DispatchedEvent>,
    highlights: Vec<NodeId>,
    focused: Option<NodeId>,
}

impl Document {
    /// Empty document with an `html > body` skeleton.
    pub fn new() -> Self {
        let mut doc = Self::default();
        let html = doc.push_element(None, "html", &[]);
        doc.root = Some(html);
        doc.push_element(Some(html), "head", &[]);
        doc.push_element(Some(html), "body", &[]);
        doc
    }

    fn push_node(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p.0].children.push(id);
        }
        id
    }

    fn push_element(&mut self, parent: Option<NodeId>, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        self.push_node(
            parent,
            NodeKind::Element(ElementData {
                tag: tag.to_ascii_lowercase(),
                attrs: attrs
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect(),
                value: None,
                checked: None,
                guard: None,
                bbox: None,
            }),
        )
    }

    /// The `html` element.
    pub fn root(&self) -> NodeId {
        self.root.expect("document has a root element")
    }

    /// The `body` element, when present.
    pub fn body(&self) -> Option<NodeId> {
        self.child_elements(self.root())
            .into_iter()
            .find(|&c| self.tag(c) == Some("body"))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = title;
    }

    // --- structure -------------------------------------------------------

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            NodeKind::Text(_) => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(el) => Some(el),
            NodeKind::Text(_) => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    /// Lowercase tag name, `None` for text nodes.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.tag.as_str())
    }

    /// Text content of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Text(t) => Some(t.as_str()),
            NodeKind::Element(_) => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&c| self.is_element(c))
            .collect()
    }

    /// All nodes under (and including) `id`, document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            for &c in self.children(n).iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// All elements in the document, document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|&n| self.is_element(n))
            .collect()
    }

    /// 1-based ordinal of `id` among same-tag element siblings.
    pub fn tag_index(&self, id: NodeId) -> usize {
        let Some(tag) = self.tag(id) else { return 1 };
        let Some(parent) = self.parent(id) else {
            return 1;
        };
        let mut index = 0;
        for &sib in self.children(parent) {
            if self.tag(sib) == Some(tag) {
                index += 1;
                if sib == id {
                    return index;
                }
            }
        }
        1
    }

    /// Number of element siblings (including `id`) sharing its tag.
    pub fn same_tag_sibling_count(&self, id: NodeId) -> usize {
        let Some(tag) = self.tag(id) else { return 1 };
        let Some(parent) = self.parent(id) else {
            return 1;
        };
        self.children(parent)
            .iter()
            .filter(|&&sib| self.tag(sib) == Some(tag))
            .count()
    }

    // --- attributes ------------------------------------------------------

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        self.element(id).map(|el| el.attrs.as_slice()).unwrap_or(&[])
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        if let Some(el) = self.element_mut(id) {
            if let Some(entry) = el.attrs.iter_mut().find(|(k, _)| *k == name) {
                entry.1 = value.to_string();
            } else {
                el.attrs.push((name, value.to_string()));
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(el) = self.element_mut(id) {
            el.attrs.retain(|(k, _)| k != name);
        }
    }

    // --- queries ---------------------------------------------------------

    /// First element with the given `id` attribute, document order.
    pub fn element_by_id(&self, value: &str) -> Option<NodeId> {
        self.elements()
            .into_iter()
            .find(|&n| self.attr(n, "id") == Some(value))
    }

    /// Elements with the given `name` attribute, document order.
    pub fn elements_by_name(&self, value: &str) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|&n| self.attr(n, "name") == Some(value))
            .collect()
    }

    pub fn elements_by_tag(&self, tag: &str) -> Vec<NodeId> {
        let tag = tag.to_ascii_lowercase();
        self.elements()
            .into_iter()
            .filter(|&n| self.tag(n) == Some(tag.as_str()))
            .collect()
    }

    // --- mutation --------------------------------------------------------

    /// Append a new element under `parent`.
    pub fn append_element(&mut self, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        self.push_element(Some(parent), tag, attrs)
    }

    /// Append a text node under `parent`.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.push_node(Some(parent), NodeKind::Text(text.to_string()))
    }

    /// Detach `id` (and its subtree) from its parent.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(p) = self.nodes[id.0].parent.take() {
            self.nodes[p.0].children.retain(|&c| c != id);
        }
    }

    // --- form state ------------------------------------------------------

    /// Live value property; falls back to the `value` attribute.
    pub fn value(&self, id: NodeId) -> String {
        self.element(id)
            .and_then(|el| {
                el.value
                    .clone()
                    .or_else(|| self.attr(id, "value").map(str::to_string))
            })
            .unwrap_or_default()
    }

    /// Write the value through the (possibly framework-wrapped)
    /// property setter.
    pub fn set_value_property(&mut self, id: NodeId, value: &str) {
        if let Some(el) = self.element_mut(id) {
            if let Some(guard) = el.guard.as_mut() {
                guard.property_writes += 1;
            }
            el.value = Some(value.to_string());
        }
    }

    /// Write the value through the platform's original setter,
    /// bypassing any installed guard.
    pub fn set_value_native(&mut self, id: NodeId, value: &str) {
        if let Some(el) = self.element_mut(id) {
            if let Some(guard) = el.guard.as_mut() {
                guard.native_writes += 1;
            }
            el.value = Some(value.to_string());
        }
    }

    /// Install a framework-style wrapper around the value setter.
    pub fn install_value_guard(&mut self, id: NodeId) {
        if let Some(el) = self.element_mut(id) {
            el.guard = Some(GuardStats::default());
        }
    }

    pub fn guard_stats(&self, id: NodeId) -> Option<GuardStats> {
        self.element(id).and_then(|el| el.guard)
    }

    pub fn checked(&self, id: NodeId) -> bool {
        self.element(id)
            .and_then(|el| el.checked)
            .unwrap_or_else(|| self.attr(id, "checked").is_some())
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool) {
        if let Some(el) = self.element_mut(id) {
            el.checked = Some(checked);
        }
    }

    /// Editable per form semantics: enabled, non-readonly input or
    /// textarea, or `contenteditable="true"`.
    pub fn is_editable(&self, id: NodeId) -> bool {
        if self.attr(id, "contenteditable") == Some("true") {
            return true;
        }
        matches!(self.tag(id), Some("input") | Some("textarea"))
            && self.attr(id, "disabled").is_none()
            && self.attr(id, "readonly").is_none()
    }

    // --- events, focus, highlight ---------------------------------------

    /// Dispatch a synthetic event; appended to the document's log.
    pub fn dispatch(&mut self, target: NodeId, event: DomEvent) {
        self.events.push(DispatchedEvent { target, event });
    }

    pub fn events(&self) -> &[DispatchedEvent] {
        &self.events
    }

    /// Event names dispatched on `target`, in order.
    pub fn event_names(&self, target: NodeId) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.target == target)
            .map(|e| e.event.name.as_str())
            .collect()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn focus(&mut self, id: NodeId) {
        self.focused = Some(id);
        self.dispatch(id, DomEvent::simple("focus"));
    }

    pub fn blur(&mut self, id: NodeId) {
        if self.focused == Some(id) {
            self.focused = None;
        }
        self.dispatch(id, DomEvent::simple("blur"));
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    /// Mark an element with the transient operator highlight.
    pub fn highlight(&mut self, id: NodeId) {
        self.highlights.push(id);
    }

    pub fn highlights(&self) -> &[NodeId] {
        &self.highlights
    }

    // --- layout ----------------------------------------------------------

    pub fn set_bbox(&mut self, id: NodeId, rect: Rect) {
        if let Some(el) = self.element_mut(id) {
            el.bbox = Some(rect);
        }
    }

    /// Bounding box; elements without an explicit box get a synthetic
    /// one stacked by document order, so center coordinates are always
    /// defined and deterministic.
    pub fn bbox(&self, id: NodeId) -> Rect {
        if let Some(rect) = self.element(id).and_then(|el| el.bbox) {
            return rect;
        }
        let ordinal = self
            .elements()
            .into_iter()
            .position(|n| n == id)
            .unwrap_or(0) as f64;
        Rect {
            x: 8.0,
            y: 8.0 + ordinal * 24.0,
            width: 160.0,
            height: 20.0,
        }
    }

    // --- text ------------------------------------------------------------

    /// Raw text content: every descendant text node, verbatim.
    pub fn raw_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for n in self.descendants(id) {
            if let Some(t) = self.text(n) {
                out.push_str(t);
            }
        }
        out
    }

    /// Rendered text approximation: raw text with whitespace runs
    /// collapsed and the ends trimmed.
    pub fn rendered_text(&self, id: NodeId) -> String {
        let raw = self.raw_text(id);
        let mut out = String::new();
        let mut in_ws = false;
        for ch in raw.chars() {
            if ch.is_whitespace() {
                in_ws = true;
            } else {
                if in_ws && !out.is_empty() {
                    out.push(' ');
                }
                in_ws = false;
                out.push(ch);
            }
        }
        out
    }

    /// Text used for matching: the rendered text located as a substring
    /// of the raw content (preserving the raw spelling), or the
    /// rendered text itself when it cannot be located.
    pub fn computed_text(&self, id: NodeId) -> String {
        let rendered = self.rendered_text(id);
        let raw = self.raw_text(id);
        let pos = raw.to_uppercase().find(&rendered.to_uppercase());
        match pos {
            Some(pos) if raw.is_char_boundary(pos) && raw.is_char_boundary(pos + rendered.len()) => {
                raw[pos..pos + rendered.len()].to_string()
            }
            _ => rendered,
        }
    }
}
