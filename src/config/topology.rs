//! Topology files: steps, hops and per-step options.
//!
//! Topologies are plain serde structs, read from TOML or JSON depending on
//! the file extension:
//!
//! ```toml
//! name = "orders"
//!
//! [[steps]]
//! name = "source"
//! type = "generator"
//! [steps.options]
//! limit = 5
//!
//! [[steps]]
//! name = "sink"
//! type = "dummy"
//! copies = 2
//!
//! [[hops]]
//! from = "source"
//! to = "sink"
//! ```

use crate::error::{ResultExt, Result};
use crate::pipeline::error_router::{ErrorFieldNames, RejectionLimits};
use crate::pipeline::router::DataMovement;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_copies() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

fn default_topology_name() -> String {
    "pipeline".to_string()
}

/// Key fields that decide which copy of a step receives a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitioning {
    pub fields: Vec<String>,
}

/// Error hop configuration of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    /// Step receiving the error rows; a hop to it must exist.
    pub target: String,

    /// More rejected rows than this is fatal.
    #[serde(default)]
    pub max_errors: Option<u64>,

    /// A higher rejection percentage is fatal.
    #[serde(default)]
    pub max_percent_errors: Option<u32>,

    /// Rows read before `max_percent_errors` applies.
    #[serde(default)]
    pub min_rows_for_percent: u64,

    #[serde(default)]
    pub field_names: ErrorFieldNames,
}

impl ErrorHandling {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            max_errors: None,
            max_percent_errors: None,
            min_rows_for_percent: 0,
            field_names: ErrorFieldNames::default(),
        }
    }

    pub fn with_max_errors(mut self, max_errors: u64) -> Self {
        self.max_errors = Some(max_errors);
        self
    }

    pub fn with_max_percent_errors(mut self, percent: u32, min_rows: u64) -> Self {
        self.max_percent_errors = Some(percent);
        self.min_rows_for_percent = min_rows;
        self
    }

    pub fn limits(&self) -> RejectionLimits {
        RejectionLimits {
            max_errors: self.max_errors,
            max_percent_errors: self.max_percent_errors,
            min_rows_for_percent: self.min_rows_for_percent,
        }
    }
}

/// One step of a topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,

    /// Registry tag of the step type.
    #[serde(rename = "type")]
    pub step_type: String,

    #[serde(default = "default_copies")]
    pub copies: usize,

    #[serde(default)]
    pub movement: DataMovement,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<Partitioning>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,

    /// Step-type specific settings.
    #[serde(default)]
    pub options: toml::Table,
}

impl StepConfig {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            copies: 1,
            movement: DataMovement::default(),
            partitioning: None,
            error_handling: None,
            options: toml::Table::new(),
        }
    }

    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    pub fn with_movement(mut self, movement: DataMovement) -> Self {
        self.movement = movement;
        self
    }

    pub fn partitioned_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitioning = Some(Partitioning {
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_error_handling(mut self, handling: ErrorHandling) -> Self {
        self.error_handling = Some(handling);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn option(&self, key: &str) -> Option<&toml::Value> {
        self.options.get(key)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.option(key).and_then(|v| v.as_str())
    }

    pub fn option_i64(&self, key: &str) -> Option<i64> {
        self.option(key).and_then(|v| v.as_integer())
    }

    pub fn option_bool(&self, key: &str) -> Option<bool> {
        self.option(key).and_then(|v| v.as_bool())
    }

    /// Deserialize one option into a typed value.
    pub fn option_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.option(key) {
            None => Ok(None),
            Some(value) => value
                .clone()
                .try_into::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("step '{}': invalid option '{}': {}", self.name, key, e)),
        }
    }
}

/// A directed connection between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub from: String,
    pub to: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default = "default_topology_name")]
    pub name: String,

    #[serde(default)]
    pub steps: Vec<StepConfig>,

    #[serde(default)]
    pub hops: Vec<Hop>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new(default_topology_name())
    }
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            hops: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepConfig) -> Self {
        self.steps.push(step);
        self
    }

    pub fn hop(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.hops.push(Hop {
            from: from.into(),
            to: to.into(),
            enabled: true,
        });
        self
    }

    pub fn find_step(&self, name: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Load a topology; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read topology {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let topology = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        };
        topology.with_context(|| format!("Failed to parse topology {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save as TOML, or JSON when the path ends in `.json`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let content = if is_json {
            serde_json::to_string_pretty(self)?
        } else {
            self.to_toml_string()?
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write topology {}", path.display()))
    }
}
