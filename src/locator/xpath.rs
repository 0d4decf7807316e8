//! Structural XPath support.
//!
//! Covers the grammar locator synthesis emits plus the common
//! hand-written forms: absolute (`/html/body/div[2]`) and descendant
//! (`//input[@name='q']`) paths, `*` name tests, positional predicates,
//! attribute-equality predicates joined by `and`, and string literals
//! in either quote style or as `concat(...)` expressions.

use std::collections::{HashMap, HashSet};

use crate::dom::{Document, NodeId};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum Pred {
    Index(usize),
    Attrs(Vec<(String, String)>),
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    tag: Option<String>,
    preds: Vec<Pred>,
}

/// Build an XPath string literal for an arbitrary attribute value.
///
/// Single quotes when the value has none, double quotes when it has no
/// double quote, otherwise a `concat(...)` of alternating fragments so
/// a value containing both quote characters stays expressible.
pub fn literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let mut parts = Vec::new();
    let mut rest = value;
    loop {
        let apos = rest.find('\'');
        let quot = rest.find('"');
        match (apos, quot) {
            (None, _) => {
                parts.push(format!("'{rest}'"));
                break;
            }
            (Some(_), None) => {
                parts.push(format!("\"{rest}\""));
                break;
            }
            (Some(a), Some(q)) if q < a => {
                parts.push(format!("'{}'", &rest[..a]));
                rest = &rest[a..];
            }
            (Some(_), Some(q)) => {
                parts.push(format!("\"{}\"", &rest[..q]));
                rest = &rest[q..];
            }
        }
    }
    format!("concat({})", parts.join(","))
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
        Error::LocatorParse(format!("xpath={}", self.raw))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.err())
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn ident(&mut self) -> Result<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err());
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn quoted(&mut self) -> Result<String> {
        let quote = self.bump().ok_or_else(|| self.err())?;
        if quote != '\'' && quote != '"' {
            return Err(self.err());
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c != quote) {
            self.pos += 1;
        }
        let value: String = self.chars[start..self.pos].iter().collect();
        self.expect(quote)?;
        Ok(value)
    }

    /// `'...'`, `"..."`, or `concat(lit, lit, ...)`.
    fn string_literal(&mut self) -> Result<String> {
        let rest: String = self.chars[self.pos..].iter().collect();
        if rest.starts_with("concat") {
            self.pos += "concat".len();
            self.skip_ws();
            self.expect('(')?;
            let mut value = String::new();
            loop {
                self.skip_ws();
                value.push_str(&self.quoted()?);
                self.skip_ws();
                if self.eat(',') {
                    continue;
                }
                self.expect(')')?;
                return Ok(value);
            }
        }
        self.quoted()
    }

    fn predicate(&mut self) -> Result<Pred> {
        self.expect('[')?;
        self.skip_ws();
        if self.peek().is_some_and(|c| c.is_ascii_digit()) {
            let mut n = 0usize;
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                n = n * 10 + (c as usize - '0' as usize);
                self.pos += 1;
            }
            self.skip_ws();
            self.expect(']')?;
            if n == 0 {
                return Err(self.err());
            }
            return Ok(Pred::Index(n));
        }
        let mut tests = Vec::new();
        loop {
            self.expect('@')?;
            let name = self.ident()?.to_ascii_lowercase();
            self.skip_ws();
            self.expect('=')?;
            self.skip_ws();
            let value = self.string_literal()?;
            tests.push((name, value));
            self.skip_ws();
            let rest: String = self.chars[self.pos..].iter().collect();
            if rest.starts_with("and") {
                self.pos += 3;
                self.skip_ws();
                continue;
            }
            break;
        }
        self.expect(']')?;
        Ok(Pred::Attrs(tests))
    }

    fn step(&mut self, axis: Axis) -> Result<Step> {
        let tag = if self.eat('*') {
            None
        } else {
            Some(self.ident()?.to_ascii_lowercase())
        };
        let mut preds = Vec::new();
        while self.peek() == Some('[') {
            preds.push(self.predicate()?);
        }
        Ok(Step { axis, tag, preds })
    }

    fn path(&mut self) -> Result<Vec<Step>> {
        let mut axis = if self.eat('/') {
            if self.eat('/') {
                Axis::Descendant
            } else {
                Axis::Child
            }
        } else {
            // Relative expressions evaluate from the document node, so
            // treat them as descendant searches.
            Axis::Descendant
        };
        let mut steps = Vec::new();
        loop {
            steps.push(self.step(axis)?);
            match self.peek() {
                None => break,
                Some('/') => {
                    self.pos += 1;
                    axis = if self.eat('/') {
                        Axis::Descendant
                    } else {
                        Axis::Child
                    };
                }
                Some(_) => return Err(self.err()),
            }
        }
        Ok(steps)
    }
}

fn apply_pred(doc: &Document, group: Vec<NodeId>, pred: &Pred) -> Vec<NodeId> {
    match pred {
        Pred::Index(i) => group.get(i - 1).copied().into_iter().collect(),
        Pred::Attrs(tests) => group
            .into_iter()
            .filter(|&n| {
                tests
                    .iter()
                    .all(|(name, value)| doc.attr(n, name) == Some(value.as_str()))
            })
            .collect(),
    }
}

/// Evaluate a path against a document, all matches in document order.
pub fn evaluate_all(doc: &Document, path: &str) -> Result<Vec<NodeId>> {
    let steps = Parser::new(path).path()?;

    // `None` stands for the document node above the root element.
    let mut contexts: Vec<Option<NodeId>> = vec![None];
    for step in &steps {
        let mut matched = Vec::new();
        let mut seen = HashSet::new();
        for &ctx in &contexts {
            let bases: Vec<Option<NodeId>> = match step.axis {
                Axis::Child => vec![ctx],
                Axis::Descendant => {
                    let mut bases = vec![ctx];
                    let under = match ctx {
                        None => doc.descendants(doc.root()),
                        Some(n) => doc
                            .descendants(n)
                            .into_iter()
                            .filter(|&d| d != n)
                            .collect(),
                    };
                    bases.extend(under.into_iter().map(Some));
                    bases
                }
            };
            for base in bases {
                let children: Vec<NodeId> = match base {
                    None => vec![doc.root()],
                    Some(b) => doc.children(b).to_vec(),
                };
                let mut group: Vec<NodeId> = children
                    .into_iter()
                    .filter(|&c| doc.is_element(c))
                    .filter(|&c| match &step.tag {
                        None => true,
                        Some(t) => doc.tag(c) == Some(t.as_str()),
                    })
                    .collect();
                for pred in &step.preds {
                    group = apply_pred(doc, group, pred);
                }
                for n in group {
                    if seen.insert(n) {
                        matched.push(n);
                    }
                }
            }
        }
        contexts = matched.into_iter().map(Some).collect();
    }

    let order: HashMap<NodeId, usize> = doc
        .descendants(doc.root())
        .into_iter()
        .enumerate()
        .map(|(i, n)| (n, i))
        .collect();
    let mut out: Vec<NodeId> = contexts.into_iter().flatten().collect();
    out.sort_by_key(|n| order.get(n).copied().unwrap_or(usize::MAX));
    Ok(out)
}

/// First match in document order, the resolution semantics locators use.
pub fn evaluate_first(doc: &Document, path: &str) -> Result<Option<NodeId>> {
    Ok(evaluate_all(doc, path)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::parse(
            r##"<html><body>
                <div id="top">
                  <span>a</span>
                  <span>b</span>
                </div>
                <div>
                  <input name="q" type="text">
                  <a href="#">link</a>
                </div>
            </body></html>"##,
        )
    }

    #[test]
    fn absolute_positional_path() {
        let d = doc();
        let spans = d.elements_by_tag("span");
        assert_eq!(
            evaluate_first(&d, "/html/body/div[1]/span[2]").unwrap(),
            Some(spans[1])
        );
    }

    #[test]
    fn descendant_with_attribute() {
        let d = doc();
        let input = d.elements_by_name("q")[0];
        assert_eq!(
            evaluate_first(&d, "//input[@name='q' and @type='text']").unwrap(),
            Some(input)
        );
        assert_eq!(evaluate_first(&d, "//input[@name='nope']").unwrap(), None);
    }

    #[test]
    fn star_with_id_anchor() {
        let d = doc();
        let top = d.element_by_id("top").unwrap();
        let spans = d.elements_by_tag("span");
        assert_eq!(evaluate_first(&d, "//*[@id=\"top\"]").unwrap(), Some(top));
        assert_eq!(
            evaluate_first(&d, "//*[@id=\"top\"]/span[2]").unwrap(),
            Some(spans[1])
        );
    }

    #[test]
    fn unindexed_step_matches_all_siblings() {
        let d = doc();
        let divs = d.elements_by_tag("div");
        let all = evaluate_all(&d, "/html/body/div").unwrap();
        assert_eq!(all, divs);
    }

    #[test]
    fn malformed_path_is_a_parse_error() {
        let d = doc();
        assert!(matches!(
            evaluate_first(&d, "//div[@id="),
            Err(Error::LocatorParse(_))
        ));
    }

    #[test]
    fn literal_round_trip_with_both_quotes() {
        let value = r#"he said "don't" twice"#;
        let lit = literal(value);
        assert!(lit.starts_with("concat("));
        let path = format!("//div[@data-note={lit}]");
        let mut d = Document::parse("<div data-note='placeholder'>x</div>");
        let div = d.elements_by_tag("div")[0];
        d.set_attr(div, "data-note", value);
        assert_eq!(evaluate_first(&d, &path).unwrap(), Some(div));
    }

    #[test]
    fn literal_simple_quoting() {
        assert_eq!(literal("plain"), "'plain'");
        assert_eq!(literal("it's"), "\"it's\"");
        assert_eq!(literal(r#"say "hi""#), r#"'say "hi"'"#);
    }
}
