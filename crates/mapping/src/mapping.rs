//! Status mapping documents

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::StatusObject;

/// Path-match table: a path expression plus the status to report for each leaf value
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PathMatch {
    /// Path into the raw status payload, e.g. `$.phase` or `.phase`
    #[schemars(length(min = 1, max = 1024))]
    pub expression: String,
    /// Resolved leaf value to status
    #[serde(default)]
    pub matches: BTreeMap<String, StatusObject>,
    /// Status used when the leaf is not listed in `matches`
    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_status: Option<StatusObject>,
}

/// Mapping document as stored in configuration.
///
/// More than one branch may be filled in; the first populated of
/// `exists`, `pathMatch`, `algorithm` is the one that applies.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusMappingDocument {
    /// Report this status whenever the resource exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<StatusObject>,
    /// Derive the status from a path lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_match: Option<PathMatch>,
    /// Rego module body defining a `status` rule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

/// How a status is derived from a raw status payload
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(try_from = "StatusMappingDocument", into = "StatusMappingDocument")]
pub enum StatusMapping {
    /// Fixed status
    Exists(StatusObject),
    /// Path lookup table
    PathMatch(PathMatch),
    /// Rego module body
    Algorithm(String),
}

/// Returned when a mapping document has no populated branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyMapping;

impl fmt::Display for EmptyMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("status mapping has none of exists, pathMatch or algorithm")
    }
}

impl std::error::Error for EmptyMapping {}

impl TryFrom<StatusMappingDocument> for StatusMapping {
    type Error = EmptyMapping;

    fn try_from(doc: StatusMappingDocument) -> Result<Self, Self::Error> {
        if let Some(status) = doc.exists {
            return Ok(StatusMapping::Exists(status));
        }
        if let Some(path_match) = doc.path_match {
            return Ok(StatusMapping::PathMatch(path_match));
        }
        match doc.algorithm {
            Some(script) if !script.trim().is_empty() => Ok(StatusMapping::Algorithm(script)),
            _ => Err(EmptyMapping),
        }
    }
}

impl From<StatusMapping> for StatusMappingDocument {
    fn from(mapping: StatusMapping) -> Self {
        match mapping {
            StatusMapping::Exists(status) => Self {
                exists: Some(status),
                ..Self::default()
            },
            StatusMapping::PathMatch(path_match) => Self {
                path_match: Some(path_match),
                ..Self::default()
            },
            StatusMapping::Algorithm(script) => Self {
                algorithm: Some(script),
                ..Self::default()
            },
        }
    }
}
