//! Persisted form of a parameter override.
//!
//! Two shapes share one JSON text field:
//!
//! ```json
//! {"temperature": 0.2, "top_p": 1}
//! ```
//!
//! is a legacy override (each key is set verbatim), while
//!
//! ```json
//! {"operations": [{"path": "temperature", "mode": "set", "value": 0.2}]}
//! ```
//!
//! is a rule set. An object is a rule set exactly when it has an
//! `operations` array.

use crate::config::{
    ConditionConfig, ConditionMode, Logic, OperationConfig, OperationMode, RuleSet,
};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

pub use crate::config::parse_loose;

const OPERATIONS_KEY: &str = "operations";

/// A decoded override.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamOverride {
    /// Top-level keys written into the body as-is
    Legacy(Map<String, JsonValue>),
    Rules(RuleSet),
}

impl ParamOverride {
    /// An override that changes nothing.
    pub fn empty() -> Self {
        ParamOverride::Rules(RuleSet::default())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ParamOverride::Legacy(map) => map.is_empty(),
            ParamOverride::Rules(rules) => rules.authored().next().is_none(),
        }
    }

    pub fn as_rules(&self) -> Option<&RuleSet> {
        match self {
            ParamOverride::Rules(rules) => Some(rules),
            ParamOverride::Legacy(_) => None,
        }
    }
}

impl Default for ParamOverride {
    fn default() -> Self {
        Self::empty()
    }
}

/// Why a text failed to decode.
#[derive(Debug)]
pub enum DecodeErrorKind {
    Syntax(serde_json::Error),
    NotAnObject { found: &'static str },
    Operations(serde_json::Error),
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(e) => write!(f, "invalid JSON: {e}"),
            Self::NotAnObject { found } => write!(f, "expected a JSON object, got {found}"),
            Self::Operations(e) => write!(f, "invalid operations: {e}"),
        }
    }
}

/// A text that could not be decoded. The original text is kept so that an
/// editor can fall back to raw editing without losing it.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct DecodeError {
    text: String,
    kind: DecodeErrorKind,
}

impl DecodeError {
    /// The text that failed to decode, unchanged.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &DecodeErrorKind {
        &self.kind
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Decode persisted override text. Blank text is an empty rule set.
pub fn decode(text: &str) -> Result<ParamOverride, DecodeError> {
    if text.trim().is_empty() {
        return Ok(ParamOverride::empty());
    }

    let fail = |kind| DecodeError {
        text: text.to_string(),
        kind,
    };

    let value: JsonValue =
        serde_json::from_str(text).map_err(|e| fail(DecodeErrorKind::Syntax(e)))?;
    let map = match value {
        JsonValue::Object(map) => map,
        other => {
            return Err(fail(DecodeErrorKind::NotAnObject {
                found: crate::path::type_name(&other),
            }))
        }
    };

    if !matches!(map.get(OPERATIONS_KEY), Some(JsonValue::Array(_))) {
        return Ok(ParamOverride::Legacy(map));
    }

    let mut rules: RuleSet = serde_json::from_value(JsonValue::Object(map))
        .map_err(|e| fail(DecodeErrorKind::Operations(e)))?;
    for op in &mut rules.operations {
        // Blank rows never encode, and logic only means something alongside
        // real conditions.
        op.conditions.retain(|c| !c.is_blank());
        if op.conditions.is_empty() {
            op.logic = Logic::default();
        }
    }
    Ok(ParamOverride::Rules(rules))
}

#[derive(Serialize)]
struct RuleSetPayload<'a> {
    operations: Vec<OperationPayload<'a>>,
}

#[derive(Serialize)]
struct OperationPayload<'a> {
    mode: OperationMode,
    #[serde(skip_serializing_if = "str::is_empty")]
    path: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    from: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    to: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a JsonValue>,
    #[serde(skip_serializing_if = "is_false")]
    keep_origin: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conditions: Vec<ConditionPayload<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logic: Option<Logic>,
}

#[derive(Serialize)]
struct ConditionPayload<'a> {
    path: &'a str,
    mode: ConditionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a JsonValue>,
    #[serde(skip_serializing_if = "is_false")]
    invert: bool,
    #[serde(skip_serializing_if = "is_false")]
    pass_missing_key: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl<'a> From<&'a OperationConfig> for OperationPayload<'a> {
    fn from(op: &'a OperationConfig) -> Self {
        let conditions: Vec<_> = op
            .conditions
            .iter()
            .filter(|c| !c.is_blank())
            .map(ConditionPayload::from)
            .collect();
        let logic = (!conditions.is_empty()).then_some(op.logic);

        Self {
            mode: op.mode,
            path: &op.path,
            from: &op.from,
            to: &op.to,
            value: op.value.as_ref(),
            keep_origin: op.keep_origin,
            conditions,
            logic,
        }
    }
}

impl<'a> From<&'a ConditionConfig> for ConditionPayload<'a> {
    fn from(c: &'a ConditionConfig) -> Self {
        Self {
            path: &c.path,
            mode: c.mode,
            value: c.value.as_ref(),
            invert: c.invert,
            pass_missing_key: c.pass_missing_key,
        }
    }
}

fn payload(rules: &RuleSet) -> RuleSetPayload<'_> {
    RuleSetPayload {
        operations: rules
            .operations
            .iter()
            .filter(|op| !op.is_blank())
            .map(OperationPayload::from)
            .collect(),
    }
}

/// Encode compactly. Blank operations and condition rows are dropped, as are
/// fields left at their defaults; the output is deterministic.
pub fn encode(config: &ParamOverride) -> serde_json::Result<String> {
    match config {
        ParamOverride::Legacy(map) => serde_json::to_string(map),
        ParamOverride::Rules(rules) => serde_json::to_string(&payload(rules)),
    }
}

/// Encode for display, indented.
pub fn encode_pretty(config: &ParamOverride) -> serde_json::Result<String> {
    match config {
        ParamOverride::Legacy(map) => serde_json::to_string_pretty(map),
        ParamOverride::Rules(rules) => serde_json::to_string_pretty(&payload(rules)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_blank() {
        assert_eq!(decode("").unwrap(), ParamOverride::empty());
        assert_eq!(decode("  \n").unwrap(), ParamOverride::empty());
    }

    #[test]
    fn test_decode_legacy() {
        let config = decode(r#"{"temperature": 0.2, "operations": "not a list"}"#).unwrap();
        match config {
            ParamOverride::Legacy(map) => {
                assert_eq!(map["temperature"], json!(0.2));
                assert_eq!(map["operations"], json!("not a list"));
            }
            other => panic!("expected legacy override, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rules() {
        let config = decode(
            r#"{"operations": [
                {"path": "temperature", "mode": "set", "value": 0.2, "logic": "AND"},
                {"mode": "delete", "path": "top_p", "conditions": {"model": "gpt-4"}, "logic": "AND"}
            ], "version": 2}"#,
        )
        .unwrap();

        let rules = config.as_rules().unwrap();
        assert_eq!(rules.operations.len(), 2);
        // logic without conditions is normalised away
        assert_eq!(rules.operations[0].logic, Logic::Or);
        assert_eq!(rules.operations[1].logic, Logic::And);
        assert_eq!(rules.operations[1].conditions.len(), 1);
    }

    #[test]
    fn test_decode_empty_operations() {
        let config = decode(r#"{"operations": []}"#).unwrap();
        let rules = config.as_rules().unwrap();
        assert!(rules.operations.is_empty());
        assert_eq!(rules.editable_operations(), vec![OperationConfig::default()]);
    }

    #[test]
    fn test_decode_errors_keep_text() {
        let err = decode("{not json").unwrap_err();
        assert!(matches!(err.kind(), DecodeErrorKind::Syntax(_)));
        assert_eq!(err.text(), "{not json");

        let err = decode("[1, 2]").unwrap_err();
        assert!(matches!(
            err.kind(),
            DecodeErrorKind::NotAnObject { found: "array" }
        ));
        assert_eq!(err.into_text(), "[1, 2]");

        let err = decode(r#"{"operations": [{"mode": "explode"}]}"#).unwrap_err();
        assert!(matches!(err.kind(), DecodeErrorKind::Operations(_)));
    }

    #[test]
    fn test_encode_omits_defaults() {
        let config = ParamOverride::Rules(RuleSet::new(vec![
            OperationConfig::new(OperationMode::Set)
                .with_path("temperature")
                .with_value(json!(0.2)),
            OperationConfig::default(),
            OperationConfig::new(OperationMode::Delete)
                .with_path("top_p")
                .with_condition(
                    ConditionConfig::new("model", ConditionMode::Prefix, json!("gpt")).inverted(),
                )
                .with_condition(ConditionConfig::default())
                .with_logic(Logic::And),
        ]));

        assert_eq!(
            encode(&config).unwrap(),
            r#"{"operations":[{"mode":"set","path":"temperature","value":0.2},{"mode":"delete","path":"top_p","conditions":[{"path":"model","mode":"prefix","value":"gpt","invert":true}],"logic":"AND"}]}"#
        );
    }

    #[test]
    fn test_encode_keeps_explicit_null() {
        let config = ParamOverride::Rules(RuleSet::new(vec![OperationConfig::new(
            OperationMode::Set,
        )
        .with_path("stop")
        .with_value(JsonValue::Null)]));

        assert_eq!(
            encode(&config).unwrap(),
            r#"{"operations":[{"mode":"set","path":"stop","value":null}]}"#
        );
    }

    #[test]
    fn test_encode_legacy() {
        let config = decode(r#"{"top_p": 1, "temperature": 0.2}"#).unwrap();
        assert_eq!(encode(&config).unwrap(), r#"{"temperature":0.2,"top_p":1}"#);
    }

    #[test]
    fn test_round_trip() {
        let text = r#"{"operations":[{"mode":"copy_header","path":"X-Trace","to":"X-Request-Id","keep_origin":true},{"mode":"return_error","value":{"message":"no","status_code":403},"conditions":[{"path":"model","mode":"full","value":"banned","pass_missing_key":true}],"logic":"OR"}]}"#;
        let config = decode(text).unwrap();
        assert_eq!(encode(&config).unwrap(), text);
        assert_eq!(decode(&encode(&config).unwrap()).unwrap(), config);
    }

    #[test]
    fn test_blank_condition_rows_round_trip() {
        let config = ParamOverride::Rules(RuleSet::new(vec![OperationConfig::new(
            OperationMode::Delete,
        )
        .with_path("top_p")
        .with_condition(ConditionConfig::default())
        .with_logic(Logic::And)]));

        let text = encode(&config).unwrap();
        assert_eq!(text, r#"{"operations":[{"mode":"delete","path":"top_p"}]}"#);

        let decoded = decode(&text).unwrap();
        assert_eq!(
            decoded,
            ParamOverride::Rules(RuleSet::new(vec![
                OperationConfig::new(OperationMode::Delete).with_path("top_p")
            ]))
        );
        assert_eq!(decode(&encode(&decoded).unwrap()).unwrap(), decoded);

        // blank rows in stored text are dropped along with their logic
        let stored = decode(
            r#"{"operations":[{"mode":"delete","path":"top_p","conditions":[{"path":"","mode":"full"}],"logic":"AND"}]}"#,
        )
        .unwrap();
        assert_eq!(stored, decoded);
    }

    #[test]
    fn test_encode_pretty() {
        let config = decode(r#"{"operations":[{"mode":"delete","path":"x"}]}"#).unwrap();
        let pretty = encode_pretty(&config).unwrap();
        assert!(pretty.contains('\n'));
        assert_eq!(decode(&pretty).unwrap(), config);
    }
}
