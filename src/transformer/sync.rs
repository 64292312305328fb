//! Two-way field synchronisation between the body and the headers.

use super::{OperationError, Step};
use crate::config::{Domain, TargetSpec};
use crate::context::{display_value, RequestParts};
use crate::path::JsonPath;
use serde_json::Value as JsonValue;

/// `sync_fields`: when exactly one side holds a value, copy it to the other.
///
/// `null` and empty strings count as missing.
#[derive(Debug, Clone)]
pub struct SyncFields {
    from: Target,
    to: Target,
}

#[derive(Debug, Clone)]
enum Target {
    Json(JsonPath),
    Header(String),
}

impl Target {
    fn new(spec: &TargetSpec) -> Self {
        match spec.domain {
            Domain::Json => Target::Json(JsonPath::parse(&spec.key)),
            Domain::Header => Target::Header(spec.key.clone()),
        }
    }

    fn read(&self, parts: &RequestParts) -> Option<JsonValue> {
        let value = match self {
            Target::Json(path) => path.resolve(&parts.body).cloned(),
            Target::Header(name) => parts
                .headers
                .get(name)
                .map(|v| JsonValue::String(v.to_string())),
        }?;

        match &value {
            JsonValue::Null => None,
            JsonValue::String(s) if s.is_empty() => None,
            _ => Some(value),
        }
    }

    fn write(&self, parts: &mut RequestParts, value: JsonValue) -> Result<(), OperationError> {
        match self {
            Target::Json(path) => path.write(&mut parts.body, value)?,
            Target::Header(name) => {
                parts.headers.set(name, display_value(&value).into_owned());
            }
        }
        Ok(())
    }
}

impl SyncFields {
    pub fn new(from: &TargetSpec, to: &TargetSpec) -> Self {
        Self {
            from: Target::new(from),
            to: Target::new(to),
        }
    }

    pub fn apply(&self, parts: &mut RequestParts) -> Result<Step, OperationError> {
        match (self.from.read(parts), self.to.read(parts)) {
            (Some(value), None) => self.to.write(parts, value)?,
            (None, Some(value)) => self.from.write(parts, value)?,
            _ => return Ok(Step::Unchanged),
        }
        Ok(Step::Modified)
    }
}
