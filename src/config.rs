//! Configuration types for the parameter override engine.
//!
//! These are the authoring shapes: what the persisted JSON contains and what
//! an editor manipulates. They are deliberately lenient (every field but
//! `mode` is optional) so that half-written rules can be loaded and saved.
//! [`crate::transformer::Operation`] is the strict, compiled counterpart.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// Engine settings, loaded from YAML or JSON by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Longest accepted `regex_replace` pattern (characters)
    pub max_pattern_length: usize,
    /// Compiled size limit for `regex_replace` patterns (bytes)
    pub regex_size_limit: usize,
    /// Maximum number of authored operations in one rule set
    pub max_operations: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_pattern_length: 512,
            regex_size_limit: 1024 * 1024, // 1MB
            max_operations: 256,
        }
    }
}

/// A rule set: operations applied in order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RuleSet {
    pub operations: Vec<OperationConfig>,
}

impl RuleSet {
    pub fn new(operations: Vec<OperationConfig>) -> Self {
        Self { operations }
    }

    /// Operations that have actually been authored.
    pub fn authored(&self) -> impl Iterator<Item = (usize, &OperationConfig)> {
        self.operations
            .iter()
            .enumerate()
            .filter(|(_, op)| !op.is_blank())
    }

    /// Operations to show in an editor: never empty, a blank template
    /// stands in for an empty rule set.
    pub fn editable_operations(&self) -> Vec<OperationConfig> {
        if self.operations.is_empty() {
            vec![OperationConfig::default()]
        } else {
            self.operations.clone()
        }
    }
}

/// One authored operation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OperationConfig {
    /// What the operation does
    pub mode: OperationMode,
    /// Target JSON path or header name
    #[serde(default)]
    pub path: String,
    /// Source for copy-like modes; search text for replace modes
    #[serde(default)]
    pub from: String,
    /// Destination for copy-like modes; replacement for replace modes
    #[serde(default)]
    pub to: String,
    /// Literal operand
    #[serde(default, deserialize_with = "present_value")]
    pub value: Option<JsonValue>,
    /// Do not overwrite an existing destination
    #[serde(default)]
    pub keep_origin: bool,
    /// Gate conditions
    #[serde(default, deserialize_with = "conditions_list_or_map")]
    pub conditions: Vec<ConditionConfig>,
    /// How conditions combine
    #[serde(default)]
    pub logic: Logic,
}

impl OperationConfig {
    /// Create an operation with only a mode set.
    pub fn new(mode: OperationMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    pub fn with_value(mut self, value: JsonValue) -> Self {
        self.value = Some(value);
        self
    }

    pub fn keep_origin(mut self) -> Self {
        self.keep_origin = true;
        self
    }

    pub fn with_condition(mut self, condition: ConditionConfig) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_logic(mut self, logic: Logic) -> Self {
        self.logic = logic;
        self
    }

    /// A placeholder an editor has not filled in yet: `set` with nothing
    /// else populated.
    pub fn is_blank(&self) -> bool {
        self.mode == OperationMode::Set
            && self.path.trim().is_empty()
            && self.from.trim().is_empty()
            && self.to.trim().is_empty()
            && value_is_blank(self.value.as_ref())
            && !self.keep_origin
            && self.conditions.iter().all(ConditionConfig::is_blank)
    }

    /// The `value` operand as text, for modes that take a string.
    pub fn value_text(&self) -> Option<String> {
        self.value
            .as_ref()
            .map(|v| crate::context::display_value(v).into_owned())
    }
}

pub(crate) fn value_is_blank(value: Option<&JsonValue>) -> bool {
    match value {
        None => true,
        Some(JsonValue::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// One gate condition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConditionConfig {
    /// Body path, `request_headers.<name>`, or context key
    #[serde(default)]
    pub path: String,
    /// Comparison mode
    #[serde(default)]
    pub mode: ConditionMode,
    /// Comparison operand
    #[serde(default, deserialize_with = "present_value")]
    pub value: Option<JsonValue>,
    /// Negate the result
    #[serde(default)]
    pub invert: bool,
    /// Result when the path is absent
    #[serde(default)]
    pub pass_missing_key: bool,
}

impl ConditionConfig {
    pub fn new(path: impl Into<String>, mode: ConditionMode, value: JsonValue) -> Self {
        Self {
            path: path.into(),
            mode,
            value: Some(value),
            invert: false,
            pass_missing_key: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn pass_missing_key(mut self) -> Self {
        self.pass_missing_key = true;
        self
    }

    /// An untouched editor row.
    pub fn is_blank(&self) -> bool {
        self.path.trim().is_empty()
            && value_is_blank(self.value.as_ref())
            && self.mode == ConditionMode::Full
            && !self.invert
            && !self.pass_missing_key
    }
}

/// Operation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    #[default]
    Set,
    Delete,
    Append,
    Prepend,
    Copy,
    Move,
    Replace,
    RegexReplace,
    TrimPrefix,
    TrimSuffix,
    EnsurePrefix,
    EnsureSuffix,
    TrimSpace,
    ToLower,
    ToUpper,
    ReturnError,
    PruneObjects,
    SyncFields,
    SetHeader,
    DeleteHeader,
    CopyHeader,
    MoveHeader,
}

/// Whether a mode needs a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Need {
    Required,
    Optional,
    Unused,
}

/// Field requirements of a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    pub path: Need,
    pub from: Need,
    pub to: Need,
    pub value: Need,
    /// `path` may stand in for a missing `from`/`to`
    pub path_alias: bool,
}

impl Requirements {
    const fn new(path: Need, from: Need, to: Need, value: Need) -> Self {
        Self {
            path,
            from,
            to,
            value,
            path_alias: false,
        }
    }
}

impl OperationMode {
    pub const ALL: [OperationMode; 22] = [
        Self::Set,
        Self::Delete,
        Self::Append,
        Self::Prepend,
        Self::Copy,
        Self::Move,
        Self::Replace,
        Self::RegexReplace,
        Self::TrimPrefix,
        Self::TrimSuffix,
        Self::EnsurePrefix,
        Self::EnsureSuffix,
        Self::TrimSpace,
        Self::ToLower,
        Self::ToUpper,
        Self::ReturnError,
        Self::PruneObjects,
        Self::SyncFields,
        Self::SetHeader,
        Self::DeleteHeader,
        Self::CopyHeader,
        Self::MoveHeader,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Append => "append",
            Self::Prepend => "prepend",
            Self::Copy => "copy",
            Self::Move => "move",
            Self::Replace => "replace",
            Self::RegexReplace => "regex_replace",
            Self::TrimPrefix => "trim_prefix",
            Self::TrimSuffix => "trim_suffix",
            Self::EnsurePrefix => "ensure_prefix",
            Self::EnsureSuffix => "ensure_suffix",
            Self::TrimSpace => "trim_space",
            Self::ToLower => "to_lower",
            Self::ToUpper => "to_upper",
            Self::ReturnError => "return_error",
            Self::PruneObjects => "prune_objects",
            Self::SyncFields => "sync_fields",
            Self::SetHeader => "set_header",
            Self::DeleteHeader => "delete_header",
            Self::CopyHeader => "copy_header",
            Self::MoveHeader => "move_header",
        }
    }

    /// The required-field table shared by validation and compilation.
    pub fn requirements(self) -> Requirements {
        use Need::{Optional, Required, Unused};

        match self {
            Self::Set | Self::Append | Self::Prepend | Self::SetHeader => {
                Requirements::new(Required, Unused, Unused, Required)
            }
            Self::Delete | Self::DeleteHeader | Self::TrimSpace | Self::ToLower | Self::ToUpper => {
                Requirements::new(Required, Unused, Unused, Unused)
            }
            Self::TrimPrefix | Self::TrimSuffix | Self::EnsurePrefix | Self::EnsureSuffix => {
                Requirements::new(Required, Unused, Unused, Required)
            }
            Self::Copy | Self::Move => Requirements::new(Unused, Required, Required, Unused),
            Self::CopyHeader | Self::MoveHeader => Requirements {
                path_alias: true,
                ..Requirements::new(Optional, Required, Required, Unused)
            },
            Self::Replace | Self::RegexReplace => {
                Requirements::new(Required, Required, Optional, Unused)
            }
            Self::ReturnError => Requirements::new(Unused, Unused, Unused, Required),
            Self::PruneObjects => Requirements::new(Optional, Unused, Unused, Required),
            Self::SyncFields => Requirements::new(Unused, Required, Required, Unused),
        }
    }

    /// Whether the mode operates on headers.
    pub fn is_header(self) -> bool {
        matches!(
            self,
            Self::SetHeader | Self::DeleteHeader | Self::CopyHeader | Self::MoveHeader
        )
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition comparison modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionMode {
    /// Exact match
    #[default]
    Full,
    Prefix,
    Suffix,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ConditionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Prefix => "prefix",
            Self::Suffix => "suffix",
            Self::Contains => "contains",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }
}

impl FromStr for ConditionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "full" => Ok(Self::Full),
            "prefix" => Ok(Self::Prefix),
            "suffix" => Ok(Self::Suffix),
            "contains" => Ok(Self::Contains),
            "gt" => Ok(Self::Gt),
            "gte" => Ok(Self::Gte),
            "lt" => Ok(Self::Lt),
            "lte" => Ok(Self::Lte),
            other => Err(format!("unknown condition mode `{other}`")),
        }
    }
}

impl<'de> Deserialize<'de> for ConditionMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How an operation's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    And,
    #[default]
    Or,
}

impl<'de> Deserialize<'de> for Logic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw {
            Some(s) if s.trim().eq_ignore_ascii_case("and") => Logic::And,
            _ => Logic::Or,
        })
    }
}

/// Domain of a `sync_fields` target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Json,
    Header,
}

/// A `sync_fields` endpoint, written `<domain>:<key>`; the domain defaults
/// to `json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub domain: Domain,
    pub key: String,
}

impl FromStr for TargetSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (domain, key) = match s.split_once(':') {
            Some((prefix, key)) => match prefix.trim().to_ascii_lowercase().as_str() {
                "json" => (Domain::Json, key.trim()),
                "header" => (Domain::Header, key.trim()),
                other => return Err(format!("unknown domain `{other}`")),
            },
            None => (Domain::Json, s),
        };
        if key.is_empty() {
            return Err("empty key".to_string());
        }
        Ok(Self {
            domain,
            key: key.to_string(),
        })
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.domain {
            Domain::Json => write!(f, "json:{}", self.key),
            Domain::Header => write!(f, "header:{}", self.key),
        }
    }
}

/// Read a value typed into a free-text field: blank is the empty string,
/// valid JSON is that value, anything else is the raw text.
pub fn parse_loose(text: &str) -> JsonValue {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return JsonValue::String(String::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| JsonValue::String(text.to_string()))
}

/// Keep an explicit `null` as `Some(Null)`; only a missing field is `None`.
fn present_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<JsonValue>, D::Error> {
    JsonValue::deserialize(deserializer).map(Some)
}

/// Conditions are a list, or an object shorthand where every key is a
/// `full` match against its value.
pub(crate) fn conditions_list_or_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<ConditionConfig>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Conditions {
        List(Vec<ConditionConfig>),
        Map(Map<String, JsonValue>),
    }

    Ok(match Option::<Conditions>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Conditions::List(list)) => list,
        Some(Conditions::Map(map)) => map
            .into_iter()
            .map(|(path, value)| ConditionConfig::new(path, ConditionMode::Full, value))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.max_pattern_length, 512);
        assert_eq!(settings.regex_size_limit, 1024 * 1024);
        assert_eq!(settings.max_operations, 256);
    }

    #[test]
    fn test_settings_parsing() {
        let yaml = r#"
max_pattern_length: 64
"#;
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.max_pattern_length, 64);
        assert_eq!(settings.max_operations, 256);
    }

    #[test]
    fn test_operation_parsing() {
        let op: OperationConfig = serde_json::from_value(json!({
            "path": "temperature",
            "mode": "set",
            "value": 0.7,
            "conditions": [{"path": "model", "mode": "prefix", "value": "gpt"}],
            "logic": "and"
        }))
        .unwrap();

        assert_eq!(op.mode, OperationMode::Set);
        assert_eq!(op.value, Some(json!(0.7)));
        assert_eq!(op.conditions.len(), 1);
        assert_eq!(op.conditions[0].mode, ConditionMode::Prefix);
        assert_eq!(op.logic, Logic::And);
        assert!(!op.keep_origin);
    }

    #[test]
    fn test_mode_is_required() {
        let result = serde_json::from_value::<OperationConfig>(json!({"path": "x"}));
        assert!(result.is_err());

        let result = serde_json::from_value::<OperationConfig>(json!({"mode": "explode"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_null_value_is_present() {
        let op: OperationConfig =
            serde_json::from_value(json!({"mode": "set", "path": "x", "value": null})).unwrap();
        assert_eq!(op.value, Some(JsonValue::Null));

        let op: OperationConfig =
            serde_json::from_value(json!({"mode": "delete", "path": "x"})).unwrap();
        assert_eq!(op.value, None);
    }

    #[test]
    fn test_conditions_map_shorthand() {
        let op: OperationConfig = serde_json::from_value(json!({
            "mode": "set",
            "path": "x",
            "value": 1,
            "conditions": {"model": "gpt-4"}
        }))
        .unwrap();

        assert_eq!(
            op.conditions,
            vec![ConditionConfig::new("model", ConditionMode::Full, json!("gpt-4"))]
        );
    }

    #[test]
    fn test_condition_mode_case_insensitive() {
        let cond: ConditionConfig =
            serde_json::from_value(json!({"path": "a", "mode": "GTE", "value": 1})).unwrap();
        assert_eq!(cond.mode, ConditionMode::Gte);

        let result =
            serde_json::from_value::<ConditionConfig>(json!({"path": "a", "mode": "regex"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_logic_defaults_to_or() {
        let op: OperationConfig =
            serde_json::from_value(json!({"mode": "delete", "path": "x", "logic": "xor"}))
                .unwrap();
        assert_eq!(op.logic, Logic::Or);
    }

    #[test]
    fn test_blank_operation() {
        assert!(OperationConfig::default().is_blank());
        assert!(OperationConfig::default()
            .with_value(json!(""))
            .with_condition(ConditionConfig::default())
            .is_blank());

        assert!(!OperationConfig::new(OperationMode::Delete).is_blank());
        assert!(!OperationConfig::default().with_path("x").is_blank());
        assert!(!OperationConfig::default().with_value(json!(0)).is_blank());
        assert!(!OperationConfig::default()
            .with_condition(ConditionConfig::default().inverted())
            .is_blank());
    }

    #[test]
    fn test_parse_loose() {
        assert_eq!(parse_loose("   "), json!(""));
        assert_eq!(parse_loose("0.7"), json!(0.7));
        assert_eq!(parse_loose("true"), json!(true));
        assert_eq!(parse_loose(r#"{"a": [1]}"#), json!({"a": [1]}));
        assert_eq!(parse_loose("gpt-4o"), json!("gpt-4o"));
        assert_eq!(parse_loose("{broken"), json!("{broken"));
    }

    #[test]
    fn test_target_spec() {
        let spec: TargetSpec = "header:session_id".parse().unwrap();
        assert_eq!(spec.domain, Domain::Header);
        assert_eq!(spec.key, "session_id");

        let spec: TargetSpec = "prompt_cache_key".parse().unwrap();
        assert_eq!(spec.domain, Domain::Json);
        assert_eq!(spec.to_string(), "json:prompt_cache_key");

        assert!("cookie:x".parse::<TargetSpec>().is_err());
        assert!("header:".parse::<TargetSpec>().is_err());
        assert!("".parse::<TargetSpec>().is_err());
    }

    #[test]
    fn test_requirements_table() {
        let req = OperationMode::Replace.requirements();
        assert_eq!(req.path, Need::Required);
        assert_eq!(req.from, Need::Required);
        assert_eq!(req.to, Need::Optional);

        assert!(OperationMode::CopyHeader.requirements().path_alias);
        assert!(!OperationMode::Copy.requirements().path_alias);
        assert_eq!(
            OperationMode::PruneObjects.requirements().path,
            Need::Optional
        );

        for mode in OperationMode::ALL {
            let json = serde_json::to_value(mode).unwrap();
            assert_eq!(json, json!(mode.as_str()));
        }
    }
}
