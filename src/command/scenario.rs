//! Scenario: an ordered command list, owned by the orchestrator and
//! replayed read-only. Loads from YAML or JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    /// Display name.
    pub name: String,

    /// Creation date, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    #[serde(default)]
    pub commands: Vec<Command>,
}

impl Scenario {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Load from a file; `.json` goes through the JSON parser,
    /// everything else through YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if json {
            Self::parse_json(&content)
        } else {
            Self::parse_yaml(&content)
        }
    }

    pub fn parse_yaml(input: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(input)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn parse_json(input: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(input)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Scenario("name is required".into()));
        }
        for (i, cmd) in self.commands.iter().enumerate() {
            if let Err(e) = cmd.validate() {
                let reason = match e {
                    Error::Scenario(reason) => reason,
                    other => other.to_string(),
                };
                return Err(Error::Scenario(format!("command {i}: {reason}")));
            }
        }
        Ok(())
    }

    pub fn push(&mut self, mut cmd: Command) {
        cmd.normalize();
        self.commands.push(cmd);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
