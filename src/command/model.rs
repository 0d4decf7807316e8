//! The command: unit of record and replay.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Closed set of replayable operations. Unknown kinds are a hard
/// deserialization error naming the offending string, never silently
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    Open,
    Click,
    Type,
    Select,
    Check,
    Uncheck,
    WaitVisible,
    Pause,
    Refresh,
    ApiRequest,
}

impl CommandKind {
    /// Short name for logging and overlay display.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Click => "click",
            Self::Type => "type",
            Self::Select => "select",
            Self::Check => "check",
            Self::Uncheck => "uncheck",
            Self::WaitVisible => "wait-visible",
            Self::Pause => "pause",
            Self::Refresh => "refresh",
            Self::ApiRequest => "api-request",
        }
    }

    /// Whether replay needs a primary locator for this kind.
    pub fn requires_target(&self) -> bool {
        !matches!(self, Self::Pause | Self::Refresh | Self::ApiRequest)
    }
}

/// One recorded operation: kind, preferred locator, fallback locators
/// in synthesis order, and a value payload whose meaning depends on the
/// kind (text to type, option label, request body, delay in
/// milliseconds). `method`/`headers` only apply to `api-request`;
/// `disabled` keeps a command for audit but skips it at replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl Default for CommandKind {
    fn default() -> Self {
        Self::Click
    }
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Build a command from a synthesized candidate list: the first
    /// candidate becomes the primary locator, the rest the fallbacks.
    pub fn from_candidates(kind: CommandKind, candidates: Vec<String>, value: &str) -> Self {
        let mut cmd = Self::new(kind);
        let mut iter = candidates.into_iter();
        cmd.target = iter.next().unwrap_or_default();
        cmd.targets = iter.collect();
        cmd.value = value.to_string();
        cmd.normalize();
        cmd
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    pub fn with_targets(mut self, targets: &[&str]) -> Self {
        self.targets = targets.iter().map(|s| s.to_string()).collect();
        self.normalize();
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// One-line description for progress display.
    pub fn summary(&self) -> String {
        let mut out = self.name().to_string();
        if !self.target.is_empty() {
            out.push(' ');
            let mut target = self.target.clone();
            if target.chars().count() > 60 {
                target = target.chars().take(60).collect::<String>() + "…";
            }
            out.push_str(&target);
        }
        out
    }

    /// Drop a leading fallback that duplicates the primary and collapse
    /// adjacent duplicate fallbacks. Order is otherwise preserved.
    pub fn normalize(&mut self) {
        self.targets.dedup();
        while self.targets.first() == Some(&self.target) {
            self.targets.remove(0);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.kind.requires_target() && self.target.is_empty() {
            return Err(Error::Scenario(format!(
                "{} command requires a target locator",
                self.name()
            )));
        }
        Ok(())
    }
}
