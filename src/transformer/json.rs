//! JSON body operations.

use super::{OperationError, Step};
use crate::config::OperationMode;
use crate::context::display_value;
use crate::matcher::PruneRule;
use crate::path::{type_name, JsonPath};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// A compiled body operation.
#[derive(Debug, Clone)]
pub enum JsonOperation {
    Set {
        path: JsonPath,
        value: JsonValue,
        keep_origin: bool,
    },
    Delete {
        path: JsonPath,
    },
    Append {
        path: JsonPath,
        value: JsonValue,
        keep_origin: bool,
    },
    Prepend {
        path: JsonPath,
        value: JsonValue,
        keep_origin: bool,
    },
    Copy {
        from: JsonPath,
        to: JsonPath,
        keep_origin: bool,
    },
    Move {
        from: JsonPath,
        to: JsonPath,
        keep_origin: bool,
    },
    Replace {
        path: JsonPath,
        search: String,
        replacement: String,
    },
    RegexReplace {
        path: JsonPath,
        pattern: Arc<Regex>,
        replacement: String,
    },
    TrimPrefix {
        path: JsonPath,
        prefix: String,
    },
    TrimSuffix {
        path: JsonPath,
        suffix: String,
    },
    EnsurePrefix {
        path: JsonPath,
        prefix: String,
    },
    EnsureSuffix {
        path: JsonPath,
        suffix: String,
    },
    TrimSpace {
        path: JsonPath,
    },
    ToLower {
        path: JsonPath,
    },
    ToUpper {
        path: JsonPath,
    },
    PruneObjects {
        /// Subtree to prune; the whole body when absent
        path: Option<JsonPath>,
        rule: PruneRule,
    },
}

#[derive(Clone, Copy)]
enum End {
    Front,
    Back,
}

impl JsonOperation {
    pub fn mode(&self) -> OperationMode {
        match self {
            Self::Set { .. } => OperationMode::Set,
            Self::Delete { .. } => OperationMode::Delete,
            Self::Append { .. } => OperationMode::Append,
            Self::Prepend { .. } => OperationMode::Prepend,
            Self::Copy { .. } => OperationMode::Copy,
            Self::Move { .. } => OperationMode::Move,
            Self::Replace { .. } => OperationMode::Replace,
            Self::RegexReplace { .. } => OperationMode::RegexReplace,
            Self::TrimPrefix { .. } => OperationMode::TrimPrefix,
            Self::TrimSuffix { .. } => OperationMode::TrimSuffix,
            Self::EnsurePrefix { .. } => OperationMode::EnsurePrefix,
            Self::EnsureSuffix { .. } => OperationMode::EnsureSuffix,
            Self::TrimSpace { .. } => OperationMode::TrimSpace,
            Self::ToLower { .. } => OperationMode::ToLower,
            Self::ToUpper { .. } => OperationMode::ToUpper,
            Self::PruneObjects { .. } => OperationMode::PruneObjects,
        }
    }

    /// Apply to a body in place.
    pub fn apply(&self, doc: &mut JsonValue) -> Result<Step, OperationError> {
        match self {
            Self::Set {
                path,
                value,
                keep_origin,
            } => {
                if *keep_origin && path.exists(doc) {
                    return Ok(Step::Unchanged);
                }
                if path.resolve(doc) == Some(value) {
                    return Ok(Step::Unchanged);
                }
                path.write(doc, value.clone())?;
                Ok(Step::Modified)
            }
            Self::Delete { path } => Ok(Step::changed(path.remove(doc).is_some())),
            Self::Append {
                path,
                value,
                keep_origin,
            } => self.extend(doc, path, value, *keep_origin, End::Back),
            Self::Prepend {
                path,
                value,
                keep_origin,
            } => self.extend(doc, path, value, *keep_origin, End::Front),
            Self::Copy {
                from,
                to,
                keep_origin,
            } => {
                let Some(value) = from.resolve(doc).cloned() else {
                    return Ok(Step::Unchanged);
                };
                if (*keep_origin && to.exists(doc)) || to.resolve(doc) == Some(&value) {
                    return Ok(Step::Unchanged);
                }
                to.write(doc, value)?;
                Ok(Step::Modified)
            }
            Self::Move {
                from,
                to,
                keep_origin,
            } => {
                if from == to || !from.exists(doc) {
                    return Ok(Step::Unchanged);
                }
                if *keep_origin && to.exists(doc) {
                    from.remove(doc);
                    return Ok(Step::Modified);
                }
                // Removing shifts array elements, so pin `-1` before it does.
                let from = from.pinned(doc);
                let Some(value) = from.remove(doc) else {
                    return Ok(Step::Unchanged);
                };
                if let Err(e) = to.check_writable(doc) {
                    // The parent was just read from, so the value always fits back.
                    from.insert(doc, value);
                    return Err(e.into());
                }
                to.write(doc, value)?;
                Ok(Step::Modified)
            }
            Self::Replace {
                path,
                search,
                replacement,
            } => Ok(rewrite_string(doc, path, |s| s.replace(search.as_str(), replacement))),
            Self::RegexReplace {
                path,
                pattern,
                replacement,
            } => Ok(rewrite_string(doc, path, |s| {
                pattern.replace_all(s, replacement.as_str()).into_owned()
            })),
            Self::TrimPrefix { path, prefix } => Ok(rewrite_string(doc, path, |s| {
                s.strip_prefix(prefix.as_str()).unwrap_or(s).to_string()
            })),
            Self::TrimSuffix { path, suffix } => Ok(rewrite_string(doc, path, |s| {
                s.strip_suffix(suffix.as_str()).unwrap_or(s).to_string()
            })),
            Self::EnsurePrefix { path, prefix } => Ok(rewrite_string(doc, path, |s| {
                if s.starts_with(prefix.as_str()) {
                    s.to_string()
                } else {
                    format!("{prefix}{s}")
                }
            })),
            Self::EnsureSuffix { path, suffix } => Ok(rewrite_string(doc, path, |s| {
                if s.ends_with(suffix.as_str()) {
                    s.to_string()
                } else {
                    format!("{s}{suffix}")
                }
            })),
            Self::TrimSpace { path } => Ok(rewrite_string(doc, path, |s| s.trim().to_string())),
            Self::ToLower { path } => Ok(rewrite_string(doc, path, str::to_lowercase)),
            Self::ToUpper { path } => Ok(rewrite_string(doc, path, str::to_uppercase)),
            Self::PruneObjects { path, rule } => {
                let removed = match path {
                    Some(path) => match path.resolve_mut(doc) {
                        Some(target) => prune(target, rule, rule.recursive_or(false)),
                        None => 0,
                    },
                    None => prune(doc, rule, rule.recursive_or(true)),
                };
                Ok(Step::changed(removed > 0))
            }
        }
    }

    /// `append`/`prepend`: splice arrays, concatenate strings, merge objects.
    /// An absent target is created with the value.
    fn extend(
        &self,
        doc: &mut JsonValue,
        path: &JsonPath,
        value: &JsonValue,
        keep_origin: bool,
        end: End,
    ) -> Result<Step, OperationError> {
        let Some(current) = path.resolve_mut(doc) else {
            path.write(doc, value.clone())?;
            return Ok(Step::Modified);
        };

        match current {
            JsonValue::Array(items) => {
                let incoming = match value {
                    JsonValue::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                if incoming.is_empty() {
                    return Ok(Step::Unchanged);
                }
                match end {
                    End::Front => {
                        items.splice(0..0, incoming);
                    }
                    End::Back => items.extend(incoming),
                }
                Ok(Step::Modified)
            }
            JsonValue::String(s) => {
                let text = display_value(value);
                if text.is_empty() {
                    return Ok(Step::Unchanged);
                }
                match end {
                    End::Front => s.insert_str(0, &text),
                    End::Back => s.push_str(&text),
                }
                Ok(Step::Modified)
            }
            JsonValue::Object(map) => {
                let JsonValue::Object(incoming) = value else {
                    return Err(OperationError::MergeRequiresObject {
                        mode: self.mode(),
                        path: path.to_string(),
                        found: type_name(value),
                    });
                };
                let mut changed = false;
                for (key, v) in incoming {
                    let existing = map.get(key);
                    if keep_origin && existing.is_some_and(|e| !e.is_null()) {
                        continue;
                    }
                    if existing != Some(v) {
                        map.insert(key.clone(), v.clone());
                        changed = true;
                    }
                }
                Ok(Step::changed(changed))
            }
            other => Err(OperationError::Unsupported {
                mode: self.mode(),
                path: path.to_string(),
                found: type_name(other),
            }),
        }
    }
}

/// Rewrite the string at `path`. Absent and non-string values are left alone.
fn rewrite_string(doc: &mut JsonValue, path: &JsonPath, f: impl FnOnce(&str) -> String) -> Step {
    match path.resolve_mut(doc) {
        Some(JsonValue::String(s)) => {
            let rewritten = f(s);
            if rewritten == *s {
                Step::Unchanged
            } else {
                *s = rewritten;
                Step::Modified
            }
        }
        _ => Step::Unchanged,
    }
}

/// Remove matching object elements below `target`, returning how many went.
fn prune(target: &mut JsonValue, rule: &PruneRule, recursive: bool) -> usize {
    let mut removed = 0;
    match target {
        JsonValue::Array(items) => {
            let before = items.len();
            items.retain(|item| !rule.matches(item));
            removed += before - items.len();
            if recursive {
                removed += items.iter_mut().map(|item| prune(item, rule, true)).sum::<usize>();
            }
        }
        JsonValue::Object(map) => {
            let before = map.len();
            map.retain(|_, item| !rule.matches(item));
            removed += before - map.len();
            if recursive {
                removed += map.values_mut().map(|item| prune(item, rule, true)).sum::<usize>();
            }
        }
        _ => {}
    }
    removed
}
