//! Request state seen by the override engine.

use crate::path::{HeaderMap, JsonPath, Segment};
use serde_json::{Map, Value as JsonValue};
use std::borrow::Cow;

/// Namespace under which condition paths reach the live request headers.
pub const REQUEST_HEADERS_KEY: &str = "request_headers";

/// Older spelling of [`REQUEST_HEADERS_KEY`], still found in saved rules.
pub const NORMALIZED_HEADERS_KEY: &str = "header_override_normalized";

/// The mutable half of a request: the JSON body and the outbound headers.
///
/// Each request owns its own `RequestParts`; the engine mutates it in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParts {
    /// Parsed request body
    pub body: JsonValue,
    /// Outbound headers
    pub headers: HeaderMap,
}

impl RequestParts {
    /// Create request parts from a body and headers.
    pub fn new(body: JsonValue, headers: HeaderMap) -> Self {
        Self { body, headers }
    }

    /// Create request parts with a body and no headers.
    pub fn with_body(body: JsonValue) -> Self {
        Self {
            body,
            headers: HeaderMap::new(),
        }
    }
}

/// Runtime facts about a request that are not part of its body.
///
/// Well-known keys:
/// - `model` - the requested model name
/// - `retry.is_retry`, `retry.attempt` - retry state
/// - `last_error.code`, `last_error.status` - the previous upstream failure
///
/// Callers may add arbitrary keys with [`OverrideContext::with_value`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideContext {
    facts: JsonValue,
}

impl OverrideContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            facts: JsonValue::Object(Map::new()),
        }
    }

    /// Build a context from an arbitrary JSON object.
    pub fn from_value(facts: JsonValue) -> Self {
        match facts {
            JsonValue::Object(_) => Self { facts },
            _ => Self::new(),
        }
    }

    /// Record the requested model.
    pub fn with_model(self, model: impl Into<String>) -> Self {
        self.with_value("model", JsonValue::String(model.into()))
    }

    /// Record retry state.
    pub fn with_retry(self, attempt: u32) -> Self {
        self.with_value("retry.is_retry", JsonValue::Bool(attempt > 0))
            .with_value("retry.attempt", JsonValue::from(attempt))
    }

    /// Record the previous upstream failure.
    pub fn with_last_error(self, code: impl Into<String>, status: u16) -> Self {
        self.with_value("last_error.code", JsonValue::String(code.into()))
            .with_value("last_error.status", JsonValue::from(status))
    }

    /// Add a fact at a dotted path.
    pub fn with_value(mut self, path: &str, value: JsonValue) -> Self {
        // Facts are always an object, so object paths cannot fail.
        let _ = JsonPath::parse(path).write(&mut self.facts, value);
        self
    }

    /// Resolve a path against the facts.
    pub fn get(&self, path: &JsonPath) -> Option<&JsonValue> {
        path.resolve(&self.facts)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.facts
    }
}

/// Read-only view a condition is evaluated against.
///
/// Paths resolve in the body first; when absent there, `request_headers.*`
/// (or `header_override_normalized.*`) reads the header map and anything else falls back to the context facts.
#[derive(Debug, Clone, Copy)]
pub struct EvalScope<'a> {
    body: &'a JsonValue,
    headers: Option<&'a HeaderMap>,
    context: Option<&'a OverrideContext>,
}

impl<'a> EvalScope<'a> {
    /// Scope over a whole request.
    pub fn new(parts: &'a RequestParts, context: &'a OverrideContext) -> Self {
        Self {
            body: &parts.body,
            headers: Some(&parts.headers),
            context: Some(context),
        }
    }

    /// Scope over a bare document, with no headers or context facts.
    pub fn document(body: &'a JsonValue) -> Self {
        Self {
            body,
            headers: None,
            context: None,
        }
    }

    /// Resolve a path in this scope.
    pub fn resolve(&self, path: &JsonPath) -> Option<Cow<'a, JsonValue>> {
        if let Some(value) = path.resolve(self.body) {
            return Some(Cow::Borrowed(value));
        }

        if let (Some(headers), [Segment::Key(ns), name]) = (self.headers, path.segments()) {
            if ns == REQUEST_HEADERS_KEY || ns == NORMALIZED_HEADERS_KEY {
                return headers
                    .get_normalized(&name.to_string())
                    .map(|v| Cow::Owned(JsonValue::String(v.to_string())));
            }
        }

        self.context
            .and_then(|ctx| ctx.get(path))
            .map(Cow::Borrowed)
    }
}

/// String form of a JSON value: strings unquoted, everything else as
/// compact JSON.
pub fn display_value(value: &JsonValue) -> Cow<'_, str> {
    match value {
        JsonValue::String(s) => Cow::Borrowed(s),
        JsonValue::Number(n) => Cow::Owned(n.to_string()),
        JsonValue::Bool(b) => Cow::Owned(b.to_string()),
        JsonValue::Null => Cow::Borrowed("null"),
        other => Cow::Owned(other.to_string()),
    }
}

/// Numeric form of a JSON value: numbers, and strings that parse as numbers.
pub fn numeric_value(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_parts() -> RequestParts {
        let headers: HeaderMap = [
            ("Authorization", "Bearer sk-test"),
            ("X-Debug-Mode", "on"),
        ]
        .into_iter()
        .collect();

        RequestParts::new(
            json!({
                "model": "gpt-4",
                "messages": [{"role": "user", "content": "hi"}]
            }),
            headers,
        )
    }

    fn resolve(scope: &EvalScope<'_>, path: &str) -> Option<JsonValue> {
        scope
            .resolve(&JsonPath::parse(path))
            .map(|v| v.into_owned())
    }

    #[test]
    fn test_body_first() {
        let parts = make_parts();
        let ctx = OverrideContext::new().with_model("claude-3");
        let scope = EvalScope::new(&parts, &ctx);

        assert_eq!(resolve(&scope, "model"), Some(json!("gpt-4")));
        assert_eq!(resolve(&scope, "messages.-1.role"), Some(json!("user")));
    }

    #[test]
    fn test_context_fallback() {
        let parts = RequestParts::with_body(json!({"temperature": 0.7}));
        let ctx = OverrideContext::new()
            .with_model("gpt-4")
            .with_retry(2)
            .with_last_error("rate_limited", 429);
        let scope = EvalScope::new(&parts, &ctx);

        assert_eq!(resolve(&scope, "model"), Some(json!("gpt-4")));
        assert_eq!(resolve(&scope, "retry.is_retry"), Some(json!(true)));
        assert_eq!(resolve(&scope, "retry.attempt"), Some(json!(2)));
        assert_eq!(resolve(&scope, "last_error.code"), Some(json!("rate_limited")));
        assert_eq!(resolve(&scope, "last_error.status"), Some(json!(429)));
        assert_eq!(resolve(&scope, "missing"), None);
    }

    #[test]
    fn test_request_headers() {
        let parts = make_parts();
        let ctx = OverrideContext::new();
        let scope = EvalScope::new(&parts, &ctx);

        assert_eq!(
            resolve(&scope, "request_headers.authorization"),
            Some(json!("Bearer sk-test"))
        );
        assert_eq!(
            resolve(&scope, "request_headers.x_debug_mode"),
            Some(json!("on"))
        );
        assert_eq!(resolve(&scope, "request_headers.x-missing"), None);
    }

    #[test]
    fn test_normalized_headers_alias() {
        let parts = make_parts();
        let ctx = OverrideContext::new();
        let scope = EvalScope::new(&parts, &ctx);

        assert_eq!(
            resolve(&scope, "header_override_normalized.x_debug_mode"),
            Some(json!("on"))
        );
        assert_eq!(
            resolve(&scope, "header_override_normalized.Authorization"),
            resolve(&scope, "request_headers.authorization")
        );
        assert_eq!(resolve(&scope, "header_override_normalized.x_missing"), None);
    }

    #[test]
    fn test_document_scope() {
        let element = json!({"type": "thinking"});
        let scope = EvalScope::document(&element);
        assert_eq!(resolve(&scope, "type"), Some(json!("thinking")));
        assert_eq!(resolve(&scope, "request_headers.authorization"), None);
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("abc")), "abc");
        assert_eq!(display_value(&json!(30)), "30");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!(null)), "null");
        assert_eq!(display_value(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_numeric_value() {
        assert_eq!(numeric_value(&json!(0.5)), Some(0.5));
        assert_eq!(numeric_value(&json!(" 12 ")), Some(12.0));
        assert_eq!(numeric_value(&json!("gpt")), None);
        assert_eq!(numeric_value(&json!(true)), None);
    }
}
