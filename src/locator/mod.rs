//! Durable element references.
//!
//! A locator is a string with a `scheme=payload` grammar (`id`, `name`,
//! `css`, `xpath`, `linktext`); a bare string starting with `/` is an
//! implicit XPath. Locators are immutable once recorded: synthesis
//! produces them from a live node, resolution turns them back into a
//! node, and neither ever rewrites the string.

pub mod css;
pub mod resolve;
pub mod synthesize;
pub mod xpath;

use std::fmt;

use crate::{Error, Result};

/// A parsed locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Name(String),
    Css(String),
    XPath(String),
    LinkText(String),
}

impl Locator {
    /// Parse a locator string. Unknown schemes and scheme-less strings
    /// that are not XPaths are reported as parse errors.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.starts_with('/') {
            return Ok(Self::XPath(raw.to_string()));
        }
        let Some((scheme, payload)) = raw.split_once('=') else {
            return Err(Error::LocatorParse(raw.to_string()));
        };
        match scheme.to_ascii_lowercase().as_str() {
            "id" => Ok(Self::Id(payload.to_string())),
            "name" => Ok(Self::Name(payload.to_string())),
            "css" => Ok(Self::Css(payload.to_string())),
            "xpath" => Ok(Self::XPath(payload.to_string())),
            "linktext" | "link" => Ok(Self::LinkText(payload.to_string())),
            _ => Err(Error::LocatorParse(raw.to_string())),
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::Name(_) => "name",
            Self::Css(_) => "css",
            Self::XPath(_) => "xpath",
            Self::LinkText(_) => "linktext",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            Self::Id(p)
            | Self::Name(p)
            | Self::Css(p)
            | Self::XPath(p)
            | Self::LinkText(p) => p,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.scheme(), self.payload())
    }
}

/// Glob matching for link text and option labels: without wildcards an
/// exact comparison, with `*`/`?` a case-insensitive pattern.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') && !pattern.contains('?') {
        return pattern == text;
    }
    let escaped = regex::escape(pattern)
        .replace("\\*", ".*")
        .replace("\\?", ".");
    match regex::Regex::new(&format!("(?i)^{escaped}$")) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}
