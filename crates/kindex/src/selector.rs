// Copyright 2026 Kindex Maintainers
// SPDX-License-Identifier: Apache-2.0

//! Label selectors with cluster match semantics.
//!
//! A selector holds equality labels and set-based expressions, both kept in insertion
//! order so that the serialized wire string is stable. An empty selector matches
//! nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Set-based selector operators
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    /// Label value is one of the listed values
    In,
    /// Label is absent or its value is none of the listed values
    NotIn,
    /// Label key is present
    Exists,
    /// Label key is absent
    DoesNotExist,
}

impl Operator {
    fn takes_values(self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "In" => Ok(Operator::In),
            "NotIn" => Ok(Operator::NotIn),
            "Exists" => Ok(Operator::Exists),
            "DoesNotExist" => Ok(Operator::DoesNotExist),
            other => Err(Error::MalformedExpression(format!(
                "unsupported selector operator: {other}"
            ))),
        }
    }
}

/// One set-based requirement of a selector
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchExpression {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl MatchExpression {
    /// Creates an expression without values
    pub fn new(key: impl Into<String>, operator: Operator) -> Self {
        Self {
            key: key.into(),
            operator,
            values: Vec::new(),
        }
    }

    /// Appends a value, only meaningful for `In` and `NotIn`
    #[must_use]
    pub fn add_value(mut self, value: impl Into<String>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Label key
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Operator
    #[must_use]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Values, in insertion order
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Whether this requirement holds for `labels`
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.is_none_or(|v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }

    fn from_requirement(key: &str, operator: &str, values: Vec<String>) -> Option<Self> {
        let operator = match operator.parse::<Operator>() {
            Ok(op) => op,
            Err(e) => {
                debug!(key, error = %e, "dropping selector expression");
                return None;
            }
        };

        if operator.takes_values() && values.is_empty() {
            debug!(key, "dropping selector expression without values");
            return None;
        }

        Some(Self {
            key: key.to_string(),
            operator,
            values: if operator.takes_values() {
                values
            } else {
                Vec::new()
            },
        })
    }
}

impl fmt::Display for MatchExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(", ")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(", ")),
            Operator::Exists => f.write_str(&self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A label selector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    match_labels: Vec<(String, String)>,
    match_expressions: Vec<MatchExpression>,
}

impl Selector {
    /// An empty selector, which matches nothing until constraints are added
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an equality requirement
    #[must_use]
    pub fn add_match_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.match_labels.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.match_labels.push((key, value)),
        }
        self
    }

    /// Adds a set-based requirement
    #[must_use]
    pub fn add_match_expression(mut self, expr: MatchExpression) -> Self {
        self.match_expressions.push(expr);
        self
    }

    /// True when there are no constraints at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Equality requirements, in insertion order
    #[must_use]
    pub fn match_labels(&self) -> &[(String, String)] {
        &self.match_labels
    }

    /// Set-based requirements, in insertion order
    #[must_use]
    pub fn match_expressions(&self) -> &[MatchExpression] {
        &self.match_expressions
    }

    /// Whether every requirement holds for `labels`. An empty selector never matches.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if self.is_empty() {
            return false;
        }

        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|e| e.matches(labels))
    }

    /// Renders the selector in the cluster's wire syntax
    #[must_use]
    pub fn serialize(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .chain(self.match_expressions.iter().map(ToString::to_string))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Reads `spec.selector` out of an object.
    ///
    /// Non-primitive label values, unknown operators and `In`/`NotIn` requirements
    /// without values are skipped.
    #[must_use]
    pub fn from_spec(node: &Value) -> Self {
        let mut selector = Self::new();

        if let Some(labels) = node
            .pointer("/spec/selector/matchLabels")
            .and_then(Value::as_object)
        {
            for (key, value) in labels {
                if let Some(value) = primitive_string(value) {
                    selector = selector.add_match_label(key.clone(), value);
                }
            }
        }

        if let Some(exprs) = node
            .pointer("/spec/selector/matchExpressions")
            .and_then(Value::as_array)
        {
            for expr in exprs {
                let key = expr.get("key").and_then(Value::as_str);
                let operator = expr.get("operator").and_then(Value::as_str);
                let (Some(key), Some(operator)) = (key, operator) else {
                    continue;
                };
                let values = expr
                    .get("values")
                    .and_then(Value::as_array)
                    .map(|vs| vs.iter().filter_map(primitive_string).collect())
                    .unwrap_or_default();

                if let Some(expr) = MatchExpression::from_requirement(key, operator, values) {
                    selector = selector.add_match_expression(expr);
                }
            }
        }

        selector
    }
}

fn primitive_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl From<&LabelSelector> for Selector {
    fn from(ls: &LabelSelector) -> Self {
        let mut selector = Self::new();
        for (k, v) in ls.match_labels.iter().flatten() {
            selector = selector.add_match_label(k.clone(), v.clone());
        }
        for req in ls.match_expressions.iter().flatten() {
            let LabelSelectorRequirement {
                key,
                operator,
                values,
            } = req;
            if let Some(expr) =
                MatchExpression::from_requirement(key, operator, values.clone().unwrap_or_default())
            {
                selector = selector.add_match_expression(expr);
            }
        }
        selector
    }
}

impl FromStr for Selector {
    type Err = Error;

    /// Parses the wire syntax produced by [`Selector::serialize`], plus `k==v` and `k!=v`
    fn from_str(s: &str) -> Result<Self> {
        let mut selector = Self::new();
        for term in split_terms(s)? {
            selector = parse_term(term, selector)?;
        }
        Ok(selector)
    }
}

fn malformed(s: &str) -> Error {
    Error::MalformedExpression(format!("invalid selector term: '{s}'"))
}

fn split_terms(s: &str) -> Result<Vec<&str>> {
    let mut terms = Vec::new();
    let mut depth = 0u32;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.checked_sub(1).ok_or_else(|| malformed(s))?,
            ',' if depth == 0 => {
                terms.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(malformed(s));
    }

    let last = s[start..].trim();
    if !(last.is_empty() && terms.is_empty()) {
        terms.push(last);
    }
    Ok(terms)
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '=' | '!' | ','))
}

fn parse_term(term: &str, selector: Selector) -> Result<Selector> {
    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        if !valid_key(key) {
            return Err(malformed(term));
        }
        return Ok(selector.add_match_expression(MatchExpression::new(key, Operator::DoesNotExist)));
    }

    if let Some((key, rest)) = term.split_once(char::is_whitespace) {
        let rest = rest.trim_start();
        let (operator, list) = if let Some(list) = rest.strip_prefix("notin") {
            (Operator::NotIn, list)
        } else if let Some(list) = rest.strip_prefix("in") {
            (Operator::In, list)
        } else {
            return parse_equality(term, selector);
        };

        let inner = list
            .trim()
            .strip_prefix('(')
            .and_then(|l| l.strip_suffix(')'))
            .ok_or_else(|| malformed(term))?;

        let mut expr = MatchExpression::new(key, operator);
        for value in inner.split(',').map(str::trim) {
            if value.is_empty() {
                return Err(malformed(term));
            }
            expr = expr.add_value(value);
        }
        if !valid_key(key) {
            return Err(malformed(term));
        }
        return Ok(selector.add_match_expression(expr));
    }

    parse_equality(term, selector)
}

fn parse_equality(term: &str, selector: Selector) -> Result<Selector> {
    if let Some((key, value)) = term.split_once("!=") {
        let key = key.trim();
        if !valid_key(key) {
            return Err(malformed(term));
        }
        return Ok(selector
            .add_match_expression(MatchExpression::new(key, Operator::NotIn).add_value(value.trim())));
    }

    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        let key = key.trim();
        if !valid_key(key) {
            return Err(malformed(term));
        }
        return Ok(selector.add_match_label(key, value.trim()));
    }

    if valid_key(term) {
        Ok(selector.add_match_expression(MatchExpression::new(term, Operator::Exists)))
    } else {
        Err(malformed(term))
    }
}
