//! Normalized status objects and the known-status vocabulary

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Localized flyover text, either a single string or one string per locale
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(untagged)]
pub enum Localized {
    /// A single localized message
    One(String),
    /// A list of localized messages
    Many(Vec<String>),
}

impl Localized {
    /// Applies `f` to every message, keeping the shape of the value
    #[must_use]
    pub fn map(&self, f: impl Fn(&str) -> String) -> Self {
        match self {
            Localized::One(s) => Localized::One(f(s)),
            Localized::Many(v) => Localized::Many(v.iter().map(|s| f(s)).collect()),
        }
    }
}

/// A normalized, display-ready status
///
/// Unknown fields are carried through untouched in `extra`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusObject {
    /// Simple status value (e.g. "Running")
    #[serde(default)]
    pub value: Option<String>,
    /// Human readable explanation, may contain the `${status}` macro
    #[serde(default)]
    pub flyover: String,
    /// Localized variants of `flyover`, may contain the `${status}` macro
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flyover_localized: Option<Localized>,
    /// Passthrough fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusObject {
    /// Builds a status object whose value and flyover are both `label`
    #[must_use]
    pub fn labelled(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            value: Some(label.clone()),
            flyover: label,
            ..Self::default()
        }
    }
}

/// The configured status vocabulary
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KnownStatusConfig {
    /// Known status values, most severe first
    #[serde(default)]
    pub precedence: Vec<String>,
    /// Label used when no status can be derived
    #[serde(default = "default_unknown")]
    pub unknown: String,
    /// Only accept values listed in `precedence` (or `unknown`)
    #[serde(default)]
    pub strict: bool,
}

fn default_unknown() -> String {
    "Unknown".to_string()
}

impl Default for KnownStatusConfig {
    fn default() -> Self {
        Self {
            precedence: Vec::new(),
            unknown: default_unknown(),
            strict: false,
        }
    }
}

impl KnownStatusConfig {
    /// Whether `value` is an acceptable status value.
    ///
    /// Outside strict mode every non-null value is accepted.
    #[must_use]
    pub fn is_known(&self, value: Option<&str>) -> bool {
        let Some(value) = value else {
            return false;
        };

        if value == self.unknown || self.precedence.iter().any(|p| p == value) {
            return true;
        }

        !self.strict
    }

    /// The fallback status object
    #[must_use]
    pub fn unknown_status(&self) -> StatusObject {
        StatusObject::labelled(self.unknown.clone())
    }
}
