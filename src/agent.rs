//! Override agent: one persisted override, applied to many requests.

use crate::codec::{self, DecodeError, ParamOverride};
use crate::config::Settings;
use crate::context::{OverrideContext, RequestParts};
use crate::path::HeaderMap;
use crate::rule::{ApplyReport, RuleEngine};
use crate::transformer::{EngineHalt, RegexCache};
use crate::validate::ValidationErrors;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Applies a decoded and validated override to requests.
///
/// Compiled once, then shared across threads: `process` only takes `&self`
/// and every request carries its own [`RequestParts`].
#[derive(Debug)]
pub struct OverrideAgent {
    /// Engine settings
    settings: Settings,
    /// Decoded override, kept for re-encoding
    config: ParamOverride,
    /// Compiled rules
    engine: RuleEngine,
    /// Metrics: total requests processed.
    requests_total: AtomicU64,
    /// Metrics: requests changed by at least one operation.
    requests_modified: AtomicU64,
    /// Metrics: operations that failed and were skipped.
    operation_errors: AtomicU64,
    /// Metrics: requests rejected by `return_error`.
    requests_halted: AtomicU64,
}

/// Snapshot of the agent counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub rules: usize,
    pub requests_total: u64,
    pub requests_modified: u64,
    pub operation_errors: u64,
    pub requests_halted: u64,
}

impl OverrideAgent {
    /// Create an agent from a decoded override, validating it first.
    pub fn new(config: ParamOverride, settings: Settings) -> Result<Self, AgentError> {
        let engine = match &config {
            ParamOverride::Legacy(map) => RuleEngine::legacy(map),
            ParamOverride::Rules(rules) => {
                let patterns = RegexCache::new(settings.regex_size_limit);
                RuleEngine::with_patterns(rules, &settings, &patterns)?
            }
        };

        info!(
            rules = engine.rules().len(),
            legacy = matches!(config, ParamOverride::Legacy(_)),
            "Override agent initialized"
        );

        Ok(Self {
            settings,
            config,
            engine,
            requests_total: AtomicU64::new(0),
            requests_modified: AtomicU64::new(0),
            operation_errors: AtomicU64::new(0),
            requests_halted: AtomicU64::new(0),
        })
    }

    /// Create from persisted override text.
    pub fn from_text(text: &str, settings: Settings) -> Result<Self, AgentError> {
        let config = codec::decode(text)?;
        Self::new(config, settings)
    }

    pub fn config(&self) -> &ParamOverride {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Canonical compact encoding of the loaded override.
    pub fn encode(&self) -> serde_json::Result<String> {
        codec::encode(&self.config)
    }

    /// Apply the override to one request in place.
    pub fn process(
        &self,
        parts: &mut RequestParts,
        context: &OverrideContext,
    ) -> Result<ApplyReport, EngineHalt> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match self.engine.apply(parts, context) {
            Ok(report) => {
                if report.is_modified() {
                    self.requests_modified.fetch_add(1, Ordering::Relaxed);
                }
                if !report.failures.is_empty() {
                    self.operation_errors
                        .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
                }
                debug!(
                    applied = report.applied,
                    modified = report.modified,
                    skipped = report.skipped,
                    failed = report.failures.len(),
                    "Processed request"
                );
                Ok(report)
            }
            Err(halt) => {
                self.requests_halted.fetch_add(1, Ordering::Relaxed);
                Err(halt)
            }
        }
    }

    /// Apply the override to a raw JSON body, returning the rewritten body.
    ///
    /// An empty override returns the body untouched without parsing it.
    pub fn process_body(
        &self,
        body: &[u8],
        headers: &mut HeaderMap,
        context: &OverrideContext,
    ) -> Result<Vec<u8>, AgentError> {
        if self.engine.is_empty() {
            return Ok(body.to_vec());
        }

        let json: JsonValue = serde_json::from_slice(body)?;
        let mut parts = RequestParts::new(json, std::mem::take(headers));
        let result = self.process(&mut parts, context);
        *headers = parts.headers;
        result?;

        Ok(serde_json::to_vec(&parts.body)?)
    }

    /// Current counter values.
    pub fn stats(&self) -> AgentStats {
        AgentStats {
            rules: self.engine.rules().len(),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_modified: self.requests_modified.load(Ordering::Relaxed),
            operation_errors: self.operation_errors.load(Ordering::Relaxed),
            requests_halted: self.requests_halted.load(Ordering::Relaxed),
        }
    }
}

/// Errors from the override agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid override: {0}")]
    Invalid(#[from] ValidationErrors),

    #[error("Body error: {0}")]
    Body(#[from] serde_json::Error),

    #[error("Request rejected: {0}")]
    Halted(#[from] EngineHalt),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    const RULES: &str = r#"{"operations": [
        {"mode": "return_error", "value": {"message": "model blocked", "status_code": 403},
         "conditions": [{"path": "model", "mode": "full", "value": "banned"}]},
        {"mode": "set", "path": "temperature", "value": 0.2,
         "conditions": [{"path": "model", "mode": "prefix", "value": "gpt"}]},
        {"mode": "set_header", "path": "X-Override", "value": "on"},
        {"mode": "append", "path": "model.suffix", "value": "x"}
    ]}"#;

    fn agent() -> OverrideAgent {
        OverrideAgent::from_text(RULES, Settings::default()).unwrap()
    }

    #[test]
    fn test_agent_creation() {
        let agent = agent();
        assert_eq!(agent.engine().rules().len(), 4);
        assert_eq!(agent.stats().rules, 4);
        assert_eq!(agent.stats().requests_total, 0);
    }

    #[test]
    fn test_invalid_override() {
        let result = OverrideAgent::from_text(
            r#"{"operations": [{"mode": "set", "path": "x"}]}"#,
            Settings::default(),
        );
        assert!(matches!(result, Err(AgentError::Invalid(_))));

        let result = OverrideAgent::from_text("{oops", Settings::default());
        match result {
            Err(AgentError::Decode(e)) => assert_eq!(e.text(), "{oops"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_process_counts() {
        let agent = agent();
        let ctx = OverrideContext::new();

        let mut parts = RequestParts::with_body(json!({"model": "gpt-4"}));
        let report = agent.process(&mut parts, &ctx).unwrap();
        assert_eq!(parts.body["temperature"], json!(0.2));
        assert_eq!(parts.headers.get("x-override"), Some("on"));
        // appending below a string fails and is skipped
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 3);

        let mut parts = RequestParts::with_body(json!({"model": "banned"}));
        let halt = agent.process(&mut parts, &ctx).unwrap_err();
        assert_eq!(halt.status_code, 403);

        let stats = agent.stats();
        assert_eq!(stats.requests_total, 2);
        assert_eq!(stats.requests_modified, 1);
        assert_eq!(stats.operation_errors, 1);
        assert_eq!(stats.requests_halted, 1);
    }

    #[test]
    fn test_process_body() {
        let agent = OverrideAgent::from_text(
            r#"{"operations": [{"mode": "move", "from": "max_tokens", "to": "max_completion_tokens"}]}"#,
            Settings::default(),
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        let body = agent
            .process_body(br#"{"max_tokens": 10}"#, &mut headers, &OverrideContext::new())
            .unwrap();
        let body: JsonValue = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"max_completion_tokens": 10}));

        let result = agent.process_body(b"not json", &mut headers, &OverrideContext::new());
        assert!(matches!(result, Err(AgentError::Body(_))));
    }

    #[test]
    fn test_empty_override_passes_body_through() {
        let agent = OverrideAgent::from_text("", Settings::default()).unwrap();
        let mut headers = HeaderMap::new();
        let body = agent
            .process_body(b"not even json", &mut headers, &OverrideContext::new())
            .unwrap();
        assert_eq!(body, b"not even json");
    }

    #[test]
    fn test_legacy_override() {
        let agent =
            OverrideAgent::from_text(r#"{"temperature": 0, "max_tokens": 1000}"#, Settings::default())
                .unwrap();

        let mut parts = RequestParts::with_body(json!({"temperature": 1}));
        agent.process(&mut parts, &OverrideContext::new()).unwrap();
        assert_eq!(parts.body, json!({"temperature": 0, "max_tokens": 1000}));
        assert_eq!(
            agent.encode().unwrap(),
            r#"{"max_tokens":1000,"temperature":0}"#
        );
    }

    #[test]
    fn test_shared_across_threads() {
        let agent = Arc::new(agent());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let agent = Arc::clone(&agent);
                std::thread::spawn(move || {
                    let mut parts = RequestParts::with_body(json!({"model": format!("gpt-{i}")}));
                    agent.process(&mut parts, &OverrideContext::new()).is_ok()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(agent.stats().requests_total, 4);
    }
}
