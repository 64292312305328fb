//! Operation execution.
//!
//! [`Operation::compile`] turns a lenient [`OperationConfig`] into a closed
//! variant carrying only the fields its mode uses. Compilation is where every
//! required-field, regex and prune-rule check happens, so a compiled
//! operation can always run.

mod header;
mod json;
mod patterns;
mod sync;

pub use header::HeaderOperation;
pub use json::JsonOperation;
pub use patterns::RegexCache;
pub use sync::SyncFields;

use crate::config::{
    parse_loose, value_is_blank, Need, OperationConfig, OperationMode, Settings, TargetSpec,
};
use crate::context::{display_value, RequestParts};
use crate::matcher::PruneRule;
use crate::path::{JsonPath, PathError};
use crate::validate::ValidationErrorKind;
use serde_json::{Map, Value as JsonValue};

/// Default status of a `return_error` halt.
pub const DEFAULT_HALT_STATUS: u16 = 400;

/// Default error code of a `return_error` halt.
pub const DEFAULT_HALT_CODE: &str = "param_override_rejected";

/// Trait for anything that mutates a request.
pub trait Transformer: Send + Sync {
    /// Apply to the request in place.
    fn apply(&self, parts: &mut RequestParts) -> Result<Step, OperationError>;

    /// Get the transformer name for debugging.
    fn name(&self) -> &'static str;
}

/// Outcome of one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Modified,
    Unchanged,
    /// Stop processing and reject the request
    Halt(EngineHalt),
}

impl Step {
    fn changed(changed: bool) -> Self {
        if changed {
            Step::Modified
        } else {
            Step::Unchanged
        }
    }
}

/// A request rejected by `return_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineHalt {
    pub message: String,
    pub status_code: u16,
    pub code: String,
    pub skip_retry: bool,
}

impl EngineHalt {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: DEFAULT_HALT_STATUS,
            code: DEFAULT_HALT_CODE.to_string(),
            skip_retry: true,
        }
    }

    /// Build from a `return_error` value: a message string, or an object
    /// with `message` and optional `status_code`, `code`, `skip_retry`.
    pub fn from_value(value: &JsonValue) -> Result<Self, ValidationErrorKind> {
        match value {
            JsonValue::String(text) => match parse_loose(text) {
                JsonValue::Object(map) => Self::from_object(&map),
                _ if text.trim().is_empty() => Err(ValidationErrorKind::EmptyErrorMessage),
                _ => Ok(Self::new(text.trim())),
            },
            JsonValue::Object(map) => Self::from_object(map),
            JsonValue::Null => Err(ValidationErrorKind::EmptyErrorMessage),
            other => Ok(Self::new(display_value(other))),
        }
    }

    fn from_object(map: &Map<String, JsonValue>) -> Result<Self, ValidationErrorKind> {
        let message = map
            .get("message")
            .filter(|v| !v.is_null())
            .map(|v| display_value(v).trim().to_string())
            .unwrap_or_default();
        if message.is_empty() {
            return Err(ValidationErrorKind::EmptyErrorMessage);
        }

        let mut halt = Self::new(message);
        if let Some(status) = map
            .get("status_code")
            .and_then(crate::context::numeric_value)
            .filter(|s| (100.0..=599.0).contains(s) && s.fract() == 0.0)
        {
            halt.status_code = status as u16;
        }
        if let Some(code) = map.get("code").and_then(JsonValue::as_str) {
            if !code.trim().is_empty() {
                halt.code = code.trim().to_string();
            }
        }
        if let Some(skip) = map.get("skip_retry").and_then(JsonValue::as_bool) {
            halt.skip_retry = skip;
        }
        Ok(halt)
    }
}

/// Errors from a single operation. The engine logs these and moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("{mode} is not supported on {found} at `{path}`")]
    Unsupported {
        mode: OperationMode,
        path: String,
        found: &'static str,
    },

    #[error("{mode} into object at `{path}` needs an object value, got {found}")]
    MergeRequiresObject {
        mode: OperationMode,
        path: String,
        found: &'static str,
    },
}

/// A compiled operation.
#[derive(Debug, Clone)]
pub enum Operation {
    Json(JsonOperation),
    Header(HeaderOperation),
    Sync(SyncFields),
    ReturnError(EngineHalt),
}

impl Operation {
    /// Compile an authored operation.
    pub fn compile(
        config: &OperationConfig,
        settings: &Settings,
        patterns: &RegexCache,
    ) -> Result<Self, ValidationErrorKind> {
        check_requirements(config)?;

        let mode = config.mode;
        let path = || JsonPath::parse(config.path.trim());
        let value = || config.value.clone().unwrap_or(JsonValue::Null);
        let text = || config.value_text().unwrap_or_default();
        let keep_origin = config.keep_origin;

        let operation = match mode {
            OperationMode::Set => Operation::Json(JsonOperation::Set {
                path: path(),
                value: value(),
                keep_origin,
            }),
            OperationMode::Delete => Operation::Json(JsonOperation::Delete { path: path() }),
            OperationMode::Append => Operation::Json(JsonOperation::Append {
                path: path(),
                value: value(),
                keep_origin,
            }),
            OperationMode::Prepend => Operation::Json(JsonOperation::Prepend {
                path: path(),
                value: value(),
                keep_origin,
            }),
            OperationMode::Copy => Operation::Json(JsonOperation::Copy {
                from: JsonPath::parse(config.from.trim()),
                to: JsonPath::parse(config.to.trim()),
                keep_origin,
            }),
            OperationMode::Move => Operation::Json(JsonOperation::Move {
                from: JsonPath::parse(config.from.trim()),
                to: JsonPath::parse(config.to.trim()),
                keep_origin,
            }),
            OperationMode::Replace => Operation::Json(JsonOperation::Replace {
                path: path(),
                search: config.from.clone(),
                replacement: config.to.clone(),
            }),
            OperationMode::RegexReplace => {
                let length = config.from.chars().count();
                if length > settings.max_pattern_length {
                    return Err(ValidationErrorKind::PatternTooLong {
                        length,
                        limit: settings.max_pattern_length,
                    });
                }
                let pattern = patterns.get_or_compile(&config.from).map_err(|e| {
                    ValidationErrorKind::InvalidRegex {
                        pattern: config.from.clone(),
                        reason: e.to_string(),
                    }
                })?;
                Operation::Json(JsonOperation::RegexReplace {
                    path: path(),
                    pattern,
                    replacement: config.to.clone(),
                })
            }
            OperationMode::TrimPrefix => Operation::Json(JsonOperation::TrimPrefix {
                path: path(),
                prefix: text(),
            }),
            OperationMode::TrimSuffix => Operation::Json(JsonOperation::TrimSuffix {
                path: path(),
                suffix: text(),
            }),
            OperationMode::EnsurePrefix => Operation::Json(JsonOperation::EnsurePrefix {
                path: path(),
                prefix: text(),
            }),
            OperationMode::EnsureSuffix => Operation::Json(JsonOperation::EnsureSuffix {
                path: path(),
                suffix: text(),
            }),
            OperationMode::TrimSpace => Operation::Json(JsonOperation::TrimSpace { path: path() }),
            OperationMode::ToLower => Operation::Json(JsonOperation::ToLower { path: path() }),
            OperationMode::ToUpper => Operation::Json(JsonOperation::ToUpper { path: path() }),
            OperationMode::ReturnError => Operation::ReturnError(EngineHalt::from_value(&value())?),
            OperationMode::PruneObjects => Operation::Json(JsonOperation::PruneObjects {
                path: Some(config.path.trim())
                    .filter(|p| !p.is_empty())
                    .map(JsonPath::parse),
                rule: PruneRule::compile(&prune_value(value()))?,
            }),
            OperationMode::SyncFields => {
                let from = parse_target("from", &config.from)?;
                let to = parse_target("to", &config.to)?;
                Operation::Sync(SyncFields::new(&from, &to))
            }
            OperationMode::SetHeader => Operation::Header(HeaderOperation::Set {
                name: config.path.trim().to_string(),
                value: text(),
                keep_origin,
            }),
            OperationMode::DeleteHeader => Operation::Header(HeaderOperation::Delete {
                name: config.path.trim().to_string(),
            }),
            OperationMode::CopyHeader => Operation::Header(HeaderOperation::Copy {
                from: header_endpoint(&config.from, &config.path),
                to: header_endpoint(&config.to, &config.path),
                keep_origin,
            }),
            OperationMode::MoveHeader => Operation::Header(HeaderOperation::Move {
                from: header_endpoint(&config.from, &config.path),
                to: header_endpoint(&config.to, &config.path),
                keep_origin,
            }),
        };

        Ok(operation)
    }

    pub fn mode(&self) -> OperationMode {
        match self {
            Operation::Json(op) => op.mode(),
            Operation::Header(op) => op.mode(),
            Operation::Sync(_) => OperationMode::SyncFields,
            Operation::ReturnError(_) => OperationMode::ReturnError,
        }
    }
}

impl Transformer for Operation {
    fn apply(&self, parts: &mut RequestParts) -> Result<Step, OperationError> {
        match self {
            Operation::Json(op) => op.apply(&mut parts.body),
            Operation::Header(op) => Ok(op.apply(&mut parts.headers)),
            Operation::Sync(op) => op.apply(parts),
            Operation::ReturnError(halt) => Ok(Step::Halt(halt.clone())),
        }
    }

    fn name(&self) -> &'static str {
        self.mode().as_str()
    }
}

/// Check the required fields of a mode, honouring the `path` alias.
fn check_requirements(config: &OperationConfig) -> Result<(), ValidationErrorKind> {
    let mode = config.mode;
    let req = mode.requirements();
    let has_path = !config.path.trim().is_empty();
    let missing = |field| ValidationErrorKind::MissingField { mode, field };

    if req.path == Need::Required && !has_path {
        return Err(missing("path"));
    }
    let aliased = req.path_alias && has_path;
    if req.from == Need::Required && config.from.trim().is_empty() && !aliased {
        return Err(missing("from"));
    }
    if req.to == Need::Required && config.to.trim().is_empty() && !aliased {
        return Err(missing("to"));
    }
    if req.value == Need::Required {
        match &config.value {
            None => return Err(missing("value")),
            // set, append and prepend accept any literal, including "" and null
            Some(v) if needs_text_value(mode) && value_is_blank(Some(v)) => {
                return Err(missing("value"))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn needs_text_value(mode: OperationMode) -> bool {
    matches!(
        mode,
        OperationMode::TrimPrefix
            | OperationMode::TrimSuffix
            | OperationMode::EnsurePrefix
            | OperationMode::EnsureSuffix
            | OperationMode::SetHeader
            | OperationMode::ReturnError
            | OperationMode::PruneObjects
    )
}

/// A prune rule typed as text may hold a JSON object.
fn prune_value(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::String(text) => match parse_loose(&text) {
            object @ JsonValue::Object(_) => object,
            _ => JsonValue::String(text),
        },
        other => other,
    }
}

fn parse_target(field: &'static str, raw: &str) -> Result<TargetSpec, ValidationErrorKind> {
    raw.parse()
        .map_err(|reason| ValidationErrorKind::InvalidTarget {
            field,
            target: raw.to_string(),
            reason,
        })
}

fn header_endpoint(explicit: &str, path: &str) -> String {
    let explicit = explicit.trim();
    if explicit.is_empty() {
        path.trim().to_string()
    } else {
        explicit.to_string()
    }
}
