//! Single-condition evaluation.

use super::{Matcher, MatcherError};
use crate::config::{ConditionConfig, ConditionMode};
use crate::context::{display_value, numeric_value, EvalScope};
use crate::path::JsonPath;
use serde_json::Value as JsonValue;

/// Compiled gate condition.
#[derive(Debug, Clone)]
pub struct Condition {
    path: JsonPath,
    check: Check,
    invert: bool,
    pass_missing_key: bool,
}

#[derive(Debug, Clone)]
enum Check {
    Full(JsonValue),
    Prefix(String),
    Suffix(String),
    Contains(String),
    Compare(Ordering, Option<f64>),
}

#[derive(Debug, Clone, Copy)]
enum Ordering {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Condition {
    /// Compile a condition. `index` is only used to label errors.
    pub fn compile(index: usize, config: &ConditionConfig) -> Result<Self, MatcherError> {
        let path = config.path.trim();
        if path.is_empty() {
            return Err(MatcherError::MissingPath { index });
        }

        // A missing operand compares as the empty string.
        let operand = config
            .value
            .clone()
            .unwrap_or_else(|| JsonValue::String(String::new()));
        let text = || display_value(&operand).into_owned();

        let check = match config.mode {
            ConditionMode::Full => Check::Full(operand.clone()),
            ConditionMode::Prefix => Check::Prefix(text()),
            ConditionMode::Suffix => Check::Suffix(text()),
            ConditionMode::Contains => Check::Contains(text()),
            ConditionMode::Gt => Check::Compare(Ordering::Gt, numeric_value(&operand)),
            ConditionMode::Gte => Check::Compare(Ordering::Gte, numeric_value(&operand)),
            ConditionMode::Lt => Check::Compare(Ordering::Lt, numeric_value(&operand)),
            ConditionMode::Lte => Check::Compare(Ordering::Lte, numeric_value(&operand)),
        };

        Ok(Self {
            path: JsonPath::parse(path),
            check,
            invert: config.invert,
            pass_missing_key: config.pass_missing_key,
        })
    }

    /// Exact-match condition, used by the shorthand forms.
    pub fn equals(path: &str, value: JsonValue) -> Self {
        Self {
            path: JsonPath::parse(path),
            check: Check::Full(value),
            invert: false,
            pass_missing_key: false,
        }
    }

    pub fn path(&self) -> &JsonPath {
        &self.path
    }
}

impl Check {
    fn test(&self, actual: &JsonValue) -> bool {
        match self {
            Check::Full(expected) => full_match(actual, expected),
            Check::Prefix(prefix) => display_value(actual).starts_with(prefix.as_str()),
            Check::Suffix(suffix) => display_value(actual).ends_with(suffix.as_str()),
            Check::Contains(needle) => display_value(actual).contains(needle.as_str()),
            Check::Compare(ordering, operand) => match (numeric_value(actual), operand) {
                (Some(actual), Some(operand)) => match ordering {
                    Ordering::Gt => actual > *operand,
                    Ordering::Gte => actual >= *operand,
                    Ordering::Lt => actual < *operand,
                    Ordering::Lte => actual <= *operand,
                },
                _ => false,
            },
        }
    }
}

/// Numbers compare numerically when either side is a JSON number, so `0.7`
/// and `"0.70"` match; everything else compares by string form.
fn full_match(actual: &JsonValue, expected: &JsonValue) -> bool {
    if actual.is_number() || expected.is_number() {
        if let (Some(a), Some(b)) = (numeric_value(actual), numeric_value(expected)) {
            return a == b;
        }
    }
    display_value(actual) == display_value(expected)
}

impl Matcher for Condition {
    fn matches(&self, scope: &EvalScope<'_>) -> bool {
        match scope.resolve(&self.path) {
            None => self.pass_missing_key,
            Some(actual) => self.check.test(&actual) != self.invert,
        }
    }

    fn name(&self) -> &'static str {
        "condition"
    }
}
