//! Rule engine: gated operations applied in order.

use crate::config::{OperationConfig, OperationMode, RuleSet, Settings};
use crate::context::{EvalScope, OverrideContext, RequestParts};
use crate::matcher::{Gate, Matcher};
use crate::path::JsonPath;
use crate::transformer::{
    EngineHalt, JsonOperation, Operation, OperationError, RegexCache, Step, Transformer,
};
use crate::validate::{self, ValidationErrorKind, ValidationErrors};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, info, trace, warn};

/// A compiled operation together with its gate.
#[derive(Debug, Clone)]
pub struct Rule {
    index: usize,
    gate: Gate,
    operation: Operation,
}

impl Rule {
    /// Compile the operation at `index` of a rule set.
    pub fn compile(
        index: usize,
        config: &OperationConfig,
        settings: &Settings,
        patterns: &RegexCache,
    ) -> Result<Self, ValidationErrorKind> {
        let operation = Operation::compile(config, settings, patterns)?;
        let gate = Gate::compile(&config.conditions, config.logic)?;
        Ok(Self {
            index,
            gate,
            operation,
        })
    }

    /// Position of the operation in its rule set.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mode(&self) -> OperationMode {
        self.operation.mode()
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

/// One operation that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationFailure {
    pub index: usize,
    pub mode: OperationMode,
    #[serde(serialize_with = "serialize_display")]
    pub error: OperationError,
}

fn serialize_display<S: Serializer>(
    error: &OperationError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// What a pass over a request did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    /// Operations whose gate passed and that ran without error
    pub applied: usize,
    /// Of those, operations that changed the request
    pub modified: usize,
    /// Operations whose gate did not pass
    pub skipped: usize,
    pub failures: Vec<OperationFailure>,
}

impl ApplyReport {
    pub fn is_modified(&self) -> bool {
        self.modified > 0
    }
}

/// Compiled rules, ready to run against any number of requests.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    /// Compile a rule set.
    pub fn new(rule_set: &RuleSet, settings: &Settings) -> Result<Self, ValidationErrors> {
        Self::with_patterns(
            rule_set,
            settings,
            &RegexCache::new(settings.regex_size_limit),
        )
    }

    /// Compile a rule set, sharing compiled regexes through `patterns`.
    pub fn with_patterns(
        rule_set: &RuleSet,
        settings: &Settings,
        patterns: &RegexCache,
    ) -> Result<Self, ValidationErrors> {
        let rules = validate::compile(rule_set, settings, patterns)?;
        debug!(rules = rules.len(), "Compiled rule set");
        Ok(Self { rules })
    }

    /// Treat each top-level key of a legacy override as an unconditional
    /// `set` of that literal key. Keys containing dots are not split.
    pub fn legacy(overrides: &Map<String, JsonValue>) -> Self {
        let rules = overrides
            .iter()
            .enumerate()
            .map(|(index, (key, value))| Rule {
                index,
                gate: Gate::always(),
                operation: Operation::Json(JsonOperation::Set {
                    path: JsonPath::key(key),
                    value: value.clone(),
                    keep_origin: false,
                }),
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule in order against `parts`.
    ///
    /// Each gate sees the request as left by the rules before it. A failing
    /// operation is logged and skipped; `return_error` stops the pass and is
    /// returned as the error.
    pub fn apply(
        &self,
        parts: &mut RequestParts,
        context: &OverrideContext,
    ) -> Result<ApplyReport, EngineHalt> {
        let mut report = ApplyReport::default();

        for rule in &self.rules {
            let mode = rule.mode();

            if !rule.gate.matches(&EvalScope::new(parts, context)) {
                trace!(index = rule.index, %mode, "Conditions not met, skipping");
                report.skipped += 1;
                continue;
            }

            match rule.operation.apply(parts) {
                Ok(Step::Modified) => {
                    trace!(index = rule.index, %mode, "Operation applied");
                    report.applied += 1;
                    report.modified += 1;
                }
                Ok(Step::Unchanged) => {
                    report.applied += 1;
                }
                Ok(Step::Halt(halt)) => {
                    info!(
                        index = rule.index,
                        status = halt.status_code,
                        code = %halt.code,
                        message = %halt.message,
                        "Request rejected by override"
                    );
                    return Err(halt);
                }
                Err(error) => {
                    warn!(index = rule.index, %mode, error = %error, "Operation failed, skipping");
                    report.failures.push(OperationFailure {
                        index: rule.index,
                        mode,
                        error,
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConditionConfig, ConditionMode, Logic};
    use crate::path::HeaderMap;
    use serde_json::json;

    fn engine(operations: Vec<OperationConfig>) -> RuleEngine {
        RuleEngine::new(&RuleSet::new(operations), &Settings::default()).unwrap()
    }

    fn run(engine: &RuleEngine, body: JsonValue) -> (JsonValue, ApplyReport) {
        let mut parts = RequestParts::with_body(body);
        let report = engine.apply(&mut parts, &OverrideContext::new()).unwrap();
        (parts.body, report)
    }

    #[test]
    fn test_operations_run_in_order() {
        let engine = engine(vec![
            OperationConfig::new(OperationMode::Set)
                .with_path("model")
                .with_value(json!("  GPT-4  ")),
            OperationConfig::new(OperationMode::TrimSpace).with_path("model"),
            OperationConfig::new(OperationMode::ToLower).with_path("model"),
        ]);

        let (body, report) = run(&engine, json!({}));
        assert_eq!(body, json!({"model": "gpt-4"}));
        assert_eq!(report.applied, 3);
        assert_eq!(report.modified, 3);
    }

    #[test]
    fn test_gates_see_earlier_mutations() {
        let engine = engine(vec![
            OperationConfig::new(OperationMode::Set)
                .with_path("tier")
                .with_value(json!("pro")),
            OperationConfig::new(OperationMode::Set)
                .with_path("max_tokens")
                .with_value(json!(8192))
                .with_condition(ConditionConfig::new("tier", ConditionMode::Full, json!("pro"))),
        ]);

        let (body, _) = run(&engine, json!({}));
        assert_eq!(body["max_tokens"], json!(8192));
    }

    #[test]
    fn test_skipped_gate() {
        let engine = engine(vec![OperationConfig::new(OperationMode::Delete)
            .with_path("top_p")
            .with_condition(ConditionConfig::new("model", ConditionMode::Prefix, json!("o1")))
            .with_condition(ConditionConfig::new("model", ConditionMode::Prefix, json!("o3")))
            .with_logic(Logic::Or)]);

        let (body, report) = run(&engine, json!({"model": "gpt-4", "top_p": 1}));
        assert_eq!(body, json!({"model": "gpt-4", "top_p": 1}));
        assert_eq!(report.skipped, 1);

        let (body, _) = run(&engine, json!({"model": "o3-mini", "top_p": 1}));
        assert_eq!(body, json!({"model": "o3-mini"}));
    }

    #[test]
    fn test_failure_is_skipped() {
        let engine = engine(vec![
            OperationConfig::new(OperationMode::Set)
                .with_path("model.name")
                .with_value(json!("x")),
            OperationConfig::new(OperationMode::Set)
                .with_path("temperature")
                .with_value(json!(0)),
        ]);

        let (body, report) = run(&engine, json!({"model": "gpt-4"}));
        assert_eq!(body, json!({"model": "gpt-4", "temperature": 0}));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(report.failures[0].mode, OperationMode::Set);
    }

    #[test]
    fn test_return_error_halts() {
        let engine = engine(vec![
            OperationConfig::new(OperationMode::Set)
                .with_path("a")
                .with_value(json!(1)),
            OperationConfig::new(OperationMode::ReturnError)
                .with_value(json!("blocked model"))
                .with_condition(ConditionConfig::new("model", ConditionMode::Full, json!("banned"))),
            OperationConfig::new(OperationMode::Set)
                .with_path("b")
                .with_value(json!(2)),
        ]);

        let mut parts = RequestParts::with_body(json!({"model": "banned"}));
        let halt = engine
            .apply(&mut parts, &OverrideContext::new())
            .unwrap_err();
        assert_eq!(halt.message, "blocked model");
        assert_eq!(parts.body, json!({"model": "banned", "a": 1}));

        let (body, _) = run(&engine, json!({"model": "fine"}));
        assert_eq!(body, json!({"model": "fine", "a": 1, "b": 2}));
    }

    #[test]
    fn test_legacy_keys_are_literal() {
        let overrides = json!({"temperature": 0.1, "a.b": true});
        let JsonValue::Object(map) = overrides else {
            unreachable!()
        };
        let engine = RuleEngine::legacy(&map);

        let (body, _) = run(&engine, json!({"temperature": 0.9}));
        assert_eq!(body, json!({"temperature": 0.1, "a.b": true}));
    }

    #[test]
    fn test_header_rules_and_context() {
        let engine = engine(vec![OperationConfig::new(OperationMode::SetHeader)
            .with_path("X-Retry")
            .with_value(json!("1"))
            .with_condition(ConditionConfig::new("retry.is_retry", ConditionMode::Full, json!(true)))]);

        let mut parts = RequestParts::new(json!({}), HeaderMap::new());
        engine
            .apply(&mut parts, &OverrideContext::new().with_retry(1))
            .unwrap();
        assert_eq!(parts.headers.get("x-retry"), Some("1"));

        let mut parts = RequestParts::new(json!({}), HeaderMap::new());
        engine.apply(&mut parts, &OverrideContext::new()).unwrap();
        assert!(parts.headers.is_empty());
    }

    #[test]
    fn test_rule_indices_skip_blanks() {
        let engine = engine(vec![
            OperationConfig::default(),
            OperationConfig::new(OperationMode::Delete).with_path("x"),
        ]);
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.rules()[0].index(), 1);
    }
}
