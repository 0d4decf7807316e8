//! CSS selector subset.
//!
//! Resolution is structural, so the evaluator covers the shapes the
//! synthesizer emits and their hand-written cousins: tag, `#id`,
//! `.class`, `[attr]` / `[attr="value"]`, `:nth-of-type(n)`,
//! `:nth-child(n)`, compounds of those, and descendant / `>` child
//! combinators.

use crate::dom::{Document, NodeId};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
    nth_of_type: Option<usize>,
    nth_child: Option<usize>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
            && self.nth_of_type.is_none()
            && self.nth_child.is_none()
    }
}

/// Escape an identifier for embedding in a selector.
pub fn escape_ident(ident: &str) -> String {
    let mut out = String::new();
    for c in ident.chars() {
        if c.is_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// Escape a string for a double-quoted attribute value.
pub fn escape_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    raw: String,
}

impl Parser {
    fn new(raw: &str) -> Self {
        Self {
            chars: raw.chars().collect(),
            pos: 0,
            raw: raw.to_string(),
        }
    }

    fn err(&self) -> Error {
        Error::LocatorParse(format!("css={}", self.raw))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    /// Identifier with backslash escapes.
    fn ident(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            out.push(c);
                            self.pos += 1;
                        }
                        None => return Err(self.err()),
                    }
                }
                Some(c) if c.is_alphanumeric() || c == '-' || c == '_' => {
                    out.push(c);
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if out.is_empty() {
            return Err(self.err());
        }
        Ok(out)
    }

    fn number(&mut self) -> Result<usize> {
        let start = self.pos;
        let mut n = 0usize;
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            n = n * 10 + (c as usize - '0' as usize);
            self.pos += 1;
        }
        if self.pos == start || n == 0 {
            return Err(self.err());
        }
        Ok(n)
    }

    fn quoted(&mut self) -> Result<String> {
        let quote = self.peek().ok_or_else(|| self.err())?;
        if quote != '"' && quote != '\'' {
            return Err(self.err());
        }
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            out.push(c);
                            self.pos += 1;
                        }
                        None => return Err(self.err()),
                    }
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                None => return Err(self.err()),
            }
        }
    }

    fn compound(&mut self) -> Result<Compound> {
        let mut c = Compound::default();
        let universal = self.eat('*');
        if !universal && self.peek().is_some_and(|ch| ch.is_alphanumeric()) {
            c.tag = Some(self.ident()?.to_ascii_lowercase());
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    c.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    c.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    self.skip_ws();
                    let name = self.ident()?.to_ascii_lowercase();
                    self.skip_ws();
                    if self.eat(']') {
                        c.attrs.push((name, None));
                    } else if self.eat('=') {
                        self.skip_ws();
                        let value = if matches!(self.peek(), Some('"') | Some('\'')) {
                            self.quoted()?
                        } else {
                            self.ident()?
                        };
                        self.skip_ws();
                        if !self.eat(']') {
                            return Err(self.err());
                        }
                        c.attrs.push((name, Some(value)));
                    } else {
                        return Err(self.err());
                    }
                }
                Some(':') => {
                    self.pos += 1;
                    self.eat(':');
                    let name = self.ident()?;
                    match name.as_str() {
                        "nth-of-type" | "nth-child" => {
                            if !self.eat('(') {
                                return Err(self.err());
                            }
                            self.skip_ws();
                            let n = self.number()?;
                            self.skip_ws();
                            if !self.eat(')') {
                                return Err(self.err());
                            }
                            if name == "nth-of-type" {
                                c.nth_of_type = Some(n);
                            } else {
                                c.nth_child = Some(n);
                            }
                        }
                        _ => return Err(self.err()),
                    }
                }
                _ => break,
            }
        }
        if c.is_empty() && !universal {
            return Err(self.err());
        }
        Ok(c)
    }

    fn selector(&mut self) -> Result<Vec<(Combinator, Compound)>> {
        self.skip_ws();
        let mut parts = vec![(Combinator::Descendant, self.compound()?)];
        loop {
            let had_ws = self.skip_ws();
            match self.peek() {
                None => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    parts.push((Combinator::Child, self.compound()?));
                }
                Some(_) if had_ws => {
                    parts.push((Combinator::Descendant, self.compound()?));
                }
                Some(_) => return Err(self.err()),
            }
        }
        Ok(parts)
    }
}

fn element_sibling_index(doc: &Document, node: NodeId) -> usize {
    let Some(parent) = doc.parent(node) else {
        return 1;
    };
    let mut index = 0;
    for &sib in doc.children(parent) {
        if doc.is_element(sib) {
            index += 1;
            if sib == node {
                return index;
            }
        }
    }
    1
}

fn matches_compound(doc: &Document, node: NodeId, c: &Compound) -> bool {
    if let Some(ref tag) = c.tag {
        if doc.tag(node) != Some(tag.as_str()) {
            return false;
        }
    }
    if let Some(ref id) = c.id {
        if doc.attr(node, "id") != Some(id.as_str()) {
            return false;
        }
    }
    if !c.classes.is_empty() {
        let class_attr = doc.attr(node, "class").unwrap_or("");
        let have: Vec<&str> = class_attr.split_whitespace().collect();
        if !c.classes.iter().all(|cl| have.contains(&cl.as_str())) {
            return false;
        }
    }
    for (name, value) in &c.attrs {
        match (doc.attr(node, name), value) {
            (Some(actual), Some(expected)) if actual == expected => {}
            (Some(_), None) => {}
            _ => return false,
        }
    }
    if let Some(n) = c.nth_of_type {
        if doc.tag_index(node) != n {
            return false;
        }
    }
    if let Some(n) = c.nth_child {
        if element_sibling_index(doc, node) != n {
            return false;
        }
    }
    true
}

fn chain_matches(doc: &Document, parts: &[(Combinator, Compound)], idx: usize, node: NodeId) -> bool {
    if idx == 0 {
        return true;
    }
    let combinator = parts[idx].0;
    let prev = &parts[idx - 1].1;
    match combinator {
        Combinator::Child => match doc.parent(node) {
            Some(p) if doc.is_element(p) && matches_compound(doc, p, prev) => {
                chain_matches(doc, parts, idx - 1, p)
            }
            _ => false,
        },
        Combinator::Descendant => {
            let mut cur = doc.parent(node);
            while let Some(a) = cur {
                if doc.is_element(a)
                    && matches_compound(doc, a, prev)
                    && chain_matches(doc, parts, idx - 1, a)
                {
                    return true;
                }
                cur = doc.parent(a);
            }
            false
        }
    }
}

/// All matches in document order.
pub fn select_all(doc: &Document, selector: &str) -> Result<Vec<NodeId>> {
    let parts = Parser::new(selector).selector()?;
    let last = parts.len() - 1;
    Ok(doc
        .elements()
        .into_iter()
        .filter(|&n| matches_compound(doc, n, &parts[last].1) && chain_matches(doc, &parts, last, n))
        .collect())
}

/// First match in document order.
pub fn select_first(doc: &Document, selector: &str) -> Result<Option<NodeId>> {
    Ok(select_all(doc, selector)?.into_iter().next())
}
