//! Condition groups.

use super::{Condition, Matcher, MatcherError};
use crate::config::{conditions_list_or_map, ConditionConfig, Logic};
use crate::context::EvalScope;
use serde::Deserialize;
use serde_json::Value as JsonValue;

/// An operation's conditions combined with AND/OR.
///
/// An empty gate always passes.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    conditions: Vec<Condition>,
    logic: Logic,
}

impl Gate {
    /// Compile a gate, skipping untouched editor rows.
    pub fn compile(conditions: &[ConditionConfig], logic: Logic) -> Result<Self, MatcherError> {
        let conditions = conditions
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_blank())
            .map(|(index, c)| Condition::compile(index, c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { conditions, logic })
    }

    /// A gate with no conditions.
    pub fn always() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn logic(&self) -> Logic {
        self.logic
    }
}

impl Matcher for Gate {
    fn matches(&self, scope: &EvalScope<'_>) -> bool {
        if self.conditions.is_empty() {
            return true;
        }

        match self.logic {
            Logic::And => self.conditions.iter().all(|c| c.matches(scope)),
            Logic::Or => self.conditions.iter().any(|c| c.matches(scope)),
        }
    }

    fn name(&self) -> &'static str {
        "gate"
    }
}

/// Which elements `prune_objects` removes.
///
/// Accepted forms of the operation's `value`:
/// - `"thinking"`: objects whose `type` is `"thinking"`
/// - `{"type": "thinking", "signature": ""}`: objects where every key matches
/// - `{"conditions": [...], "logic": "OR", "recursive": true}`: element-relative
///   conditions; `logic` defaults to AND
///
/// Only object elements are ever candidates.
#[derive(Debug, Clone)]
pub struct PruneRule {
    gate: Gate,
    recursive: Option<bool>,
}

#[derive(Deserialize)]
struct PruneSpec {
    #[serde(deserialize_with = "conditions_list_or_map")]
    conditions: Vec<ConditionConfig>,
    #[serde(default)]
    logic: Option<Logic>,
    #[serde(default)]
    recursive: Option<bool>,
}

impl PruneRule {
    pub fn compile(value: &JsonValue) -> Result<Self, MatcherError> {
        match value {
            JsonValue::String(s) => {
                let kind = s.trim();
                if kind.is_empty() {
                    return Err(MatcherError::InvalidPruneRule("empty type".to_string()));
                }
                Ok(Self::all_of(vec![Condition::equals(
                    "type",
                    JsonValue::String(kind.to_string()),
                )]))
            }
            JsonValue::Object(map) if map.contains_key("conditions") => {
                let spec = PruneSpec::deserialize(value)
                    .map_err(|e| MatcherError::InvalidPruneRule(e.to_string()))?;
                let gate = Gate::compile(&spec.conditions, spec.logic.unwrap_or(Logic::And))?;
                if gate.is_empty() {
                    return Err(MatcherError::InvalidPruneRule(
                        "no conditions".to_string(),
                    ));
                }
                Ok(Self {
                    gate,
                    recursive: spec.recursive,
                })
            }
            JsonValue::Object(map) => {
                if map.is_empty() {
                    return Err(MatcherError::InvalidPruneRule("empty object".to_string()));
                }
                Ok(Self::all_of(
                    map.iter()
                        .map(|(key, value)| Condition::equals(key, value.clone()))
                        .collect(),
                ))
            }
            other => Err(MatcherError::InvalidPruneRule(format!(
                "expected a string or object, got {}",
                crate::path::type_name(other)
            ))),
        }
    }

    fn all_of(conditions: Vec<Condition>) -> Self {
        Self {
            gate: Gate {
                conditions,
                logic: Logic::And,
            },
            recursive: None,
        }
    }

    /// Whether `element` should be removed.
    pub fn matches(&self, element: &JsonValue) -> bool {
        element.is_object() && self.gate.matches(&EvalScope::document(element))
    }

    /// Explicit `recursive` flag, or `default` when the rule leaves it out.
    pub fn recursive_or(&self, default: bool) -> bool {
        self.recursive.unwrap_or(default)
    }
}
