//! Rule set validation.
//!
//! Validation is compilation with the results thrown away: the same checks
//! guard both, so a rule set that validates always compiles.

use crate::config::{OperationMode, RuleSet, Settings};
use crate::matcher::MatcherError;
use crate::rule::Rule;
use crate::transformer::RegexCache;
use std::fmt;

/// Why one operation is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationErrorKind {
    #[error("{mode} requires `{field}`")]
    MissingField {
        mode: OperationMode,
        field: &'static str,
    },

    #[error("return_error requires a non-empty message")]
    EmptyErrorMessage,

    #[error("invalid `{field}` target `{target}`: {reason}")]
    InvalidTarget {
        field: &'static str,
        target: String,
        reason: String,
    },

    #[error("invalid regex `{pattern}`: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("regex is {length} characters, limit is {limit}")]
    PatternTooLong { length: usize, limit: usize },

    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error("too many operations ({count}, limit is {limit})")]
    TooManyOperations { count: usize, limit: usize },
}

/// One invalid operation, addressed by its position in the rule set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("operations[{index}]: {kind}")]
pub struct ValidationError {
    pub index: usize,
    pub kind: ValidationErrorKind,
}

/// Every problem found in a rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn into_inner(self) -> Vec<ValidationError> {
        self.0
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Check a rule set, reporting every invalid operation. Blank placeholder
/// operations are ignored.
pub fn validate(rule_set: &RuleSet, settings: &Settings) -> Result<(), ValidationErrors> {
    compile(rule_set, settings, &RegexCache::new(settings.regex_size_limit)).map(|_| ())
}

/// Compile every authored operation, or report every invalid one.
pub(crate) fn compile(
    rule_set: &RuleSet,
    settings: &Settings,
    patterns: &RegexCache,
) -> Result<Vec<Rule>, ValidationErrors> {
    let mut rules = Vec::new();
    let mut errors = Vec::new();

    let count = rule_set.authored().count();
    if count > settings.max_operations {
        if let Some((index, _)) = rule_set.authored().nth(settings.max_operations) {
            errors.push(ValidationError {
                index,
                kind: ValidationErrorKind::TooManyOperations {
                    count,
                    limit: settings.max_operations,
                },
            });
        }
    }

    for (index, config) in rule_set.authored() {
        match Rule::compile(index, config, settings, patterns) {
            Ok(rule) => rules.push(rule),
            Err(kind) => errors.push(ValidationError { index, kind }),
        }
    }

    if errors.is_empty() {
        Ok(rules)
    } else {
        Err(ValidationErrors(errors))
    }
}
