//! Normalizes a raw resource status into a [`StatusObject`] using a [`StatusMapping`].

use kindex_mapping::{KnownStatusConfig, PathMatch, StatusMapping, StatusObject};
use regorus::Engine;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::path::PathExpression;
use crate::{Error, Result};

const STATUS_PLACEHOLDER: &str = "${status}";
const ALGORITHM_PACKAGE: &str = "kindex.status";

/// Computes the normalized status of `raw` under `mapping`.
///
/// Never fails: every dead end ends in the configured unknown status. An `exists`
/// mapping is returned as written, without the known-status check.
#[must_use]
#[instrument(skip_all, fields(mapping = mapping.map(kind_of)))]
pub fn compute_status(
    raw: Option<&Value>,
    mapping: Option<&StatusMapping>,
    config: &KnownStatusConfig,
) -> StatusObject {
    let computed = match mapping {
        None => None,
        Some(StatusMapping::Exists(status)) => return status.clone(),
        Some(StatusMapping::PathMatch(path_match)) => match_path(raw, path_match, config),
        Some(StatusMapping::Algorithm(script)) => match run_algorithm(raw, script) {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "status algorithm failed");
                None
            }
        },
    };

    match computed {
        Some(status) if config.is_known(status.value.as_deref()) => status,
        Some(status) => {
            debug!(value = status.value.as_deref(), "computed status is not known");
            config.unknown_status()
        }
        None => config.unknown_status(),
    }
}

fn kind_of(mapping: &StatusMapping) -> &'static str {
    match mapping {
        StatusMapping::Exists(_) => "exists",
        StatusMapping::PathMatch(_) => "pathMatch",
        StatusMapping::Algorithm(_) => "algorithm",
    }
}

/// Copy of `template` with the placeholder replaced in both flyover fields
fn substitute(template: &StatusObject, status: &str) -> StatusObject {
    let mut out = template.clone();
    out.flyover = template.flyover.replace(STATUS_PLACEHOLDER, status);
    out.flyover_localized = template
        .flyover_localized
        .as_ref()
        .map(|l| l.map(|s| s.replace(STATUS_PLACEHOLDER, status)));
    out
}

fn match_path(
    raw: Option<&Value>,
    path_match: &PathMatch,
    config: &KnownStatusConfig,
) -> Option<StatusObject> {
    let expr = if path_match.expression.starts_with('$') {
        path_match.expression.clone()
    } else {
        format!("${}", path_match.expression)
    };

    let leaf = PathExpression::parse(&expr).and_then(|path| path.resolve_leaf(raw?));

    match leaf {
        Some(leaf) => path_match
            .matches
            .get(&leaf)
            .or(path_match.else_status.as_ref())
            .map(|template| substitute(template, &leaf)),
        None => {
            debug!(expression = %expr, "path did not resolve");
            path_match
                .else_status
                .as_ref()
                .map(|template| substitute(template, &config.unknown))
        }
    }
}

/// Evaluates a Rego module body and reads rule `status` as a status object.
/// The rule may yield an object, or a string holding a JSON object.
fn run_algorithm(raw: Option<&Value>, script: &str) -> Result<Option<StatusObject>> {
    let mut engine = Engine::new();
    engine.add_policy(
        "algorithm.rego".to_string(),
        format!("package {ALGORITHM_PACKAGE}\n\n{script}"),
    )?;
    engine.set_input_json(&serde_json::to_string(raw.unwrap_or(&Value::Null))?)?;

    let results = engine.eval_query(format!("data.{ALGORITHM_PACKAGE}.status"), false)?;
    let Some(value) = results
        .result
        .first()
        .and_then(|r| r.expressions.first())
        .map(|e| &e.value)
        .filter(|v| **v != regorus::Value::Undefined)
    else {
        debug!("status rule is undefined");
        return Ok(None);
    };

    let value: Value = serde_json::from_str(&value.to_json_str()?)?;
    let value = match value {
        Value::String(s) => serde_json::from_str(&s)
            .map_err(|e| Error::ScriptFailure(format!("status string is not JSON: {e}")))?,
        other => other,
    };

    if !value.is_object() {
        return Err(Error::ScriptFailure(format!(
            "status must be an object, got {value}"
        )));
    }

    Ok(Some(serde_json::from_value(value)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use kindex_mapping::Localized;
    use serde_json::json;

    use super::*;

    fn vocabulary() -> KnownStatusConfig {
        KnownStatusConfig {
            precedence: vec!["Error".into(), "Warning".into(), "Ok".into()],
            unknown: "Unknown".into(),
            strict: false,
        }
    }

    fn flyover(value: &str, flyover: &str) -> StatusObject {
        StatusObject {
            value: Some(value.into()),
            flyover: flyover.into(),
            ..StatusObject::default()
        }
    }

    fn phase_mapping() -> StatusMapping {
        StatusMapping::PathMatch(PathMatch {
            expression: "$.phase".into(),
            matches: BTreeMap::from([(
                "Running".to_string(),
                StatusObject {
                    flyover_localized: Some(Localized::Many(vec![
                        "en: ${status}".into(),
                        "de: ${status}".into(),
                    ])),
                    ..flyover("Ok", "Pod is ${status}")
                },
            )]),
            else_status: Some(flyover("Warning", "Phase is ${status}")),
        })
    }

    #[test]
    fn path_match_substitutes_matched_value() {
        let mapping = phase_mapping();
        let raw = json!({ "phase": "Running" });

        let status = compute_status(Some(&raw), Some(&mapping), &vocabulary());

        assert_eq!(status.value.as_deref(), Some("Ok"));
        assert_eq!(status.flyover, "Pod is Running");
        assert_eq!(
            status.flyover_localized,
            Some(Localized::Many(vec!["en: Running".into(), "de: Running".into()]))
        );

        // templates in the mapping are untouched
        let StatusMapping::PathMatch(pm) = &mapping else {
            unreachable!()
        };
        assert_eq!(pm.matches["Running"].flyover, "Pod is ${status}");
    }

    #[test]
    fn path_match_falls_back_to_else() {
        let raw = json!({ "phase": "Pending" });

        let status = compute_status(Some(&raw), Some(&phase_mapping()), &vocabulary());

        assert_eq!(status.value.as_deref(), Some("Warning"));
        assert_eq!(status.flyover, "Phase is Pending");
    }

    #[test]
    fn unresolved_path_uses_else_with_unknown_label() {
        let raw = json!({ "conditions": [] });

        let status = compute_status(Some(&raw), Some(&phase_mapping()), &vocabulary());

        assert_eq!(status.value.as_deref(), Some("Warning"));
        assert_eq!(status.flyover, "Phase is Unknown");

        let missing = compute_status(None, Some(&phase_mapping()), &vocabulary());
        assert_eq!(missing.flyover, "Phase is Unknown");
    }

    #[test]
    fn expression_without_dollar_is_prefixed() {
        let mapping = StatusMapping::PathMatch(PathMatch {
            expression: ".health.state".into(),
            matches: BTreeMap::from([("green".to_string(), flyover("Ok", "${status}"))]),
            else_status: None,
        });
        let raw = json!({ "health": { "state": "green" } });

        let status = compute_status(Some(&raw), Some(&mapping), &vocabulary());

        assert_eq!(status.value.as_deref(), Some("Ok"));
        assert_eq!(status.flyover, "green");
    }

    #[test]
    fn path_match_without_match_or_else_is_unknown() {
        let mapping = StatusMapping::PathMatch(PathMatch {
            expression: "$.phase".into(),
            matches: BTreeMap::new(),
            else_status: None,
        });
        let raw = json!({ "phase": "Running" });

        let status = compute_status(Some(&raw), Some(&mapping), &vocabulary());

        assert_eq!(status, vocabulary().unknown_status());
    }

    #[test]
    fn exists_is_returned_verbatim() {
        let literal = flyover("Present", "always ${status}");
        let mapping = StatusMapping::Exists(literal.clone());
        let strict = KnownStatusConfig {
            strict: true,
            ..vocabulary()
        };

        assert_eq!(compute_status(None, Some(&mapping), &strict), literal);
    }

    #[test]
    fn missing_mapping_is_unknown() {
        let raw = json!({ "phase": "Running" });
        let status = compute_status(Some(&raw), None, &vocabulary());

        assert_eq!(status.value.as_deref(), Some("Unknown"));
        assert_eq!(status.flyover, "Unknown");
    }

    #[test]
    fn algorithm_object_result() {
        let mapping = StatusMapping::Algorithm(
            r#"status := {"value": "Ok", "flyover": sprintf("replicas %v", [input.replicas]), "severity": 1}"#
                .into(),
        );
        let raw = json!({ "replicas": 3 });

        let status = compute_status(Some(&raw), Some(&mapping), &vocabulary());

        assert_eq!(status.value.as_deref(), Some("Ok"));
        assert_eq!(status.flyover, "replicas 3");
        assert_eq!(status.extra.get("severity"), Some(&json!(1)));
    }

    #[test]
    fn algorithm_json_string_result() {
        let mapping = StatusMapping::Algorithm(
            r#"status := json.marshal({"value": input.state, "flyover": "from json"})"#.into(),
        );
        let raw = json!({ "state": "Error" });

        let status = compute_status(Some(&raw), Some(&mapping), &vocabulary());

        assert_eq!(status.value.as_deref(), Some("Error"));
        assert_eq!(status.flyover, "from json");
    }

    #[test]
    fn algorithm_failures_degrade_to_unknown() {
        let raw = json!({ "state": "Error" });
        let unknown = vocabulary().unknown_status();

        for script in [
            "status := 42",
            r#"status := "not json""#,
            "status := {",
            "status := input.missing.field",
        ] {
            let mapping = StatusMapping::Algorithm(script.into());
            assert_eq!(
                compute_status(Some(&raw), Some(&mapping), &vocabulary()),
                unknown,
                "{script}"
            );
        }
    }

    #[test]
    fn strict_vocabulary_rejects_unlisted_value() {
        let raw = json!({ "phase": "Running" });
        let mapping = StatusMapping::PathMatch(PathMatch {
            expression: "$.phase".into(),
            matches: BTreeMap::from([("Running".to_string(), flyover("Healthy", "${status}"))]),
            else_status: None,
        });

        let lenient = compute_status(Some(&raw), Some(&mapping), &vocabulary());
        assert_eq!(lenient.value.as_deref(), Some("Healthy"));

        let strict = KnownStatusConfig {
            strict: true,
            ..vocabulary()
        };
        let status = compute_status(Some(&raw), Some(&mapping), &strict);
        assert_eq!(status, strict.unknown_status());
    }

    #[test]
    fn valueless_status_is_unknown() {
        let mapping = StatusMapping::Algorithm(r#"status := {"flyover": "no value"}"#.into());
        let raw = json!({});

        let status = compute_status(Some(&raw), Some(&mapping), &vocabulary());

        assert_eq!(status.value.as_deref(), Some("Unknown"));
    }
}
