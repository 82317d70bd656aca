//! Restricted path expressions over JSON documents.
//!
//! Only child access is supported, in dot (`$.status.phase`) or quoted bracket
//! (`$['status']['phase']`) notation. There are no wildcards, indices, filters or
//! recursive descent.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::Error;

/// A parsed path: an ordered list of child names
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathExpression {
    segments: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Start,
    StartChild,
    DotChildName,
    StartBracket,
    BracketChildName,
    EndBracket,
}

impl PathExpression {
    /// Parses `expr`, returning `None` on any malformed input
    #[must_use]
    pub fn parse(expr: &str) -> Option<Self> {
        let mut state = State::Start;
        let mut segments = Vec::new();
        let mut start = 0;

        for (i, c) in expr.char_indices() {
            state = match (state, c) {
                (State::Start, '$') | (State::EndBracket, ']') => State::StartChild,
                (State::StartChild, '.') => {
                    start = i + 1;
                    State::DotChildName
                }
                (State::StartChild, '[') => State::StartBracket,
                (State::DotChildName, '.' | '[') => {
                    if i == start {
                        return None;
                    }
                    segments.push(expr[start..i].to_string());
                    start = i + 1;
                    if c == '.' {
                        State::DotChildName
                    } else {
                        State::StartBracket
                    }
                }
                (State::StartBracket, '\'') => {
                    start = i + 1;
                    State::BracketChildName
                }
                (State::BracketChildName, '\'') => {
                    if i == start {
                        return None;
                    }
                    segments.push(expr[start..i].to_string());
                    State::EndBracket
                }
                (State::DotChildName | State::BracketChildName, _) => state,
                _ => return None,
            };
        }

        match state {
            State::DotChildName if start < expr.len() => {
                segments.push(expr[start..].to_string());
            }
            State::StartChild if !segments.is_empty() => {}
            _ => return None,
        }

        Some(Self { segments })
    }

    /// Child names, outermost first
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walks `root` and returns the string form of the primitive at the end of the path.
    ///
    /// Every intermediate node has to be an object. Nulls, objects and arrays do not
    /// resolve.
    #[must_use]
    pub fn resolve_leaf(&self, root: &Value) -> Option<String> {
        let mut node = root;
        for segment in &self.segments {
            node = node.as_object()?.get(segment)?;
        }

        match node {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl FromStr for PathExpression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::MalformedExpression(format!("invalid path: {s}")))
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.segments {
            // dot names end at '.' or '[', bracket names at a quote
            if segment.contains(['.', '[']) {
                write!(f, "['{segment}']")?;
            } else {
                write!(f, ".{segment}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dot_and_bracket_notation_agree() {
        let dot = PathExpression::parse("$.a.b").unwrap();
        let bracket = PathExpression::parse("$['a']['b']").unwrap();
        let mixed = PathExpression::parse("$.a['b']").unwrap();

        assert_eq!(dot, bracket);
        assert_eq!(dot, mixed);
        assert_eq!(dot.segments(), ["a", "b"]);
    }

    #[test]
    fn resolves_leaf_values() {
        let path = PathExpression::parse("$.a.b").unwrap();

        assert_eq!(path.resolve_leaf(&json!({"a": {"b": "x"}})).as_deref(), Some("x"));
        assert_eq!(path.resolve_leaf(&json!({"a": {"b": 3}})).as_deref(), Some("3"));
        assert_eq!(path.resolve_leaf(&json!({"a": {"b": true}})).as_deref(), Some("true"));
    }

    #[test]
    fn missing_or_structured_leaves_do_not_resolve() {
        let path = PathExpression::parse("$['a']['b']").unwrap();

        assert_eq!(path.resolve_leaf(&json!({"a": {}})), None);
        assert_eq!(path.resolve_leaf(&json!({"a": "flat"})), None);
        assert_eq!(path.resolve_leaf(&json!({"a": {"b": {"c": 1}}})), None);
        assert_eq!(path.resolve_leaf(&json!({"a": {"b": [1]}})), None);
        assert_eq!(path.resolve_leaf(&json!({"a": {"b": null}})), None);
        assert_eq!(path.resolve_leaf(&Value::Null), None);
    }

    #[test]
    fn rejects_malformed_expressions() {
        for expr in ["", "$", "$.", "$['a'", "$['a']x", "a.b", ".a", "$.a..b", "$['']", "$[a]", "$x"] {
            assert!(PathExpression::parse(expr).is_none(), "{expr} should not parse");
        }
    }

    #[test]
    fn bracket_segments_may_contain_dots() {
        let path = PathExpression::parse("$['metadata']['app.kubernetes.io/name']").unwrap();

        assert_eq!(path.segments(), ["metadata", "app.kubernetes.io/name"]);
        assert_eq!(path.to_string(), "$.metadata['app.kubernetes.io/name']");
        assert_eq!(
            path.resolve_leaf(&json!({"metadata": {"app.kubernetes.io/name": "web"}}))
                .as_deref(),
            Some("web")
        );
    }

    #[test]
    fn display_output_parses_back() {
        for expr in ["$.it's", "$.a]b", "$['a.b'].c", "$['x[0]']"] {
            let path = PathExpression::parse(expr).unwrap();
            let rendered = path.to_string();

            assert_eq!(PathExpression::parse(&rendered).as_ref(), Some(&path), "{rendered}");
        }
        assert_eq!(PathExpression::parse("$.it's").unwrap().to_string(), "$.it's");
    }

    #[test]
    fn from_str_reports_malformed_expression() {
        let err = "$.".parse::<PathExpression>().unwrap_err();
        assert!(matches!(err, Error::MalformedExpression(_)));
    }
}
