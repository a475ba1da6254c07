//! Normalized catalog record model
//!
//! A [`CatalogRecord`] is what the host consumes to render a device's
//! configuration page. Parameters sharing a configuration number (typically
//! bitmask fields of one physical value) are coalesced into a single
//! [`Parameter`] with ordered sub-parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One selectable value of a configuration parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterOption {
    pub label: String,
    pub value: i64,
}

/// A configuration parameter
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parameter {
    /// Logical configuration number; may repeat across raw entries
    pub number: u16,
    /// Catalog id of this particular entry
    pub record_id: i64,
    pub label: String,
    pub description: String,
    pub overview: String,
    pub units: String,
    /// Value size in bytes
    pub size: u8,
    /// Bits of the physical value this entry covers, 0 when the entry is the whole value
    pub bitmask: u64,
    pub minimum: i64,
    pub maximum: i64,
    pub default: i64,
    pub read_only: bool,
    pub write_only: bool,
    pub options: Vec<ParameterOption>,
    /// Further entries with the same number, in catalog order. Never nested deeper.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_parameters: Vec<Parameter>,
}

impl Parameter {
    pub fn has_sub_parameters(&self) -> bool {
        !self.sub_parameters.is_empty()
    }

    /// This entry followed by its sub-parameters
    pub fn entries(&self) -> impl Iterator<Item = &Parameter> {
        std::iter::once(self).chain(self.sub_parameters.iter())
    }
}

/// Text a command class channel publishes for a configuration parameter
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelText {
    pub command_class: String,
    pub label: String,
    pub overview: String,
}

/// One device's specification as published by the catalog
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: i64,
    pub approved: bool,
    pub deleted: bool,
    pub overview: String,
    pub description: String,
    pub label: String,
    pub manufacturer_label: String,
    pub parameters: Vec<Parameter>,
    /// Channel text keyed by the parameter number in its `param=N` config
    pub command_class_channels: BTreeMap<u16, ChannelText>,
}

impl CatalogRecord {
    /// Top-level parameter with the given number
    pub fn parameter(&self, number: u16) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.number == number)
    }

    /// Total number of parameter entries, top-level and nested
    pub fn entry_count(&self) -> usize {
        self.parameters.iter().map(|p| 1 + p.sub_parameters.len()).sum()
    }

    /// Label for a parameter, recovered from channel metadata when the parameter has none
    pub fn parameter_label(&self, number: u16) -> Option<&str> {
        let own = self
            .parameter(number)
            .map(|p| p.label.as_str())
            .filter(|s| !s.trim().is_empty());
        own.or_else(|| {
            self.command_class_channels
                .get(&number)
                .map(|c| c.label.as_str())
                .filter(|s| !s.trim().is_empty())
        })
    }

    /// Overview for a parameter, recovered from channel metadata when the parameter has none
    pub fn parameter_overview(&self, number: u16) -> Option<&str> {
        let own = self
            .parameter(number)
            .map(|p| p.overview.as_str())
            .filter(|s| !s.trim().is_empty());
        own.or_else(|| {
            self.command_class_channels
                .get(&number)
                .map(|c| c.overview.as_str())
                .filter(|s| !s.trim().is_empty())
        })
    }
}
