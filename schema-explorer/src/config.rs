//! Explorer configuration
//!
//! Limits and relationship overrides. Everything here is plain data with
//! serde support so a host application can load it from its own config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Hand-configured parameter references, keyed by procedure then parameter
///
/// JSON shape: `{ "<procedure>": { "<parameter>": "schema.table" } }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipOverrides {
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl RelationshipOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides shipped with the explorer
    pub fn builtin() -> Self {
        Self::new()
            .with("leader_transfer", "new_leader_id", "public.young_people")
            .with("leader_transfer", "target_id", "public.projects")
    }

    pub fn with(mut self, procedure: &str, parameter: &str, table: &str) -> Self {
        self.insert(procedure, parameter, table);
        self
    }

    pub fn insert(&mut self, procedure: &str, parameter: &str, table: &str) {
        self.entries
            .entry(procedure.to_string())
            .or_default()
            .insert(parameter.to_string(), table.to_string());
    }

    /// Referenced table for a (procedure, parameter) pair, as configured
    pub fn get(&self, procedure: &str, parameter: &str) -> Option<&str> {
        self.entries
            .get(procedure)
            .and_then(|parameters| parameters.get(parameter))
            .map(String::as_str)
    }

    /// Add every entry of `other`, replacing existing pairs
    pub fn merge(&mut self, other: RelationshipOverrides) {
        for (procedure, parameters) in other.entries {
            for (parameter, table) in parameters {
                self.insert(&procedure, &parameter, &table);
            }
        }
    }

    pub fn from_json(text: &str) -> Result<Self, OverrideError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, OverrideError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("Failed to read overrides: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse overrides: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Limits and overrides for an [`Explorer`](crate::Explorer)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExplorerConfig {
    /// Maximum entries in a reference option list
    pub option_limit: u64,

    /// Rows per browse page when the caller gives no limit
    pub default_page_size: u64,

    pub max_page_size: u64,

    /// Rows per change poll when the caller gives no maximum
    pub change_limit: u64,

    pub max_change_limit: u64,

    /// Upper bound for an explicit export limit
    pub export_limit_max: u64,

    /// Number of day buckets on the timeline
    pub timeline_days: u64,

    /// Rows shown for the selected timeline day
    pub timeline_rows: u64,

    pub overrides: RelationshipOverrides,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            option_limit: 200,
            default_page_size: 50,
            max_page_size: 500,
            change_limit: 50,
            max_change_limit: 500,
            export_limit_max: 200_000,
            timeline_days: 60,
            timeline_rows: 200,
            overrides: RelationshipOverrides::builtin(),
        }
    }
}

impl ExplorerConfig {
    pub fn with_overrides(mut self, overrides: RelationshipOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Clamp a requested page size into `[1, max_page_size]`
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    pub fn change_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.change_limit)
            .clamp(1, self.max_change_limit.max(1))
    }

    pub fn export_size(&self, requested: Option<u64>) -> Option<u64> {
        requested.map(|limit| limit.clamp(1, self.export_limit_max.max(1)))
    }
}
