//! Header operations.

use super::Step;
use crate::config::OperationMode;
use crate::path::HeaderMap;

/// A compiled header operation. Names match case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOperation {
    Set {
        name: String,
        value: String,
        keep_origin: bool,
    },
    Delete {
        name: String,
    },
    Copy {
        from: String,
        to: String,
        keep_origin: bool,
    },
    Move {
        from: String,
        to: String,
        keep_origin: bool,
    },
}

impl HeaderOperation {
    pub fn mode(&self) -> OperationMode {
        match self {
            Self::Set { .. } => OperationMode::SetHeader,
            Self::Delete { .. } => OperationMode::DeleteHeader,
            Self::Copy { .. } => OperationMode::CopyHeader,
            Self::Move { .. } => OperationMode::MoveHeader,
        }
    }

    /// Apply to a header map in place. Header operations cannot fail.
    pub fn apply(&self, headers: &mut HeaderMap) -> Step {
        match self {
            Self::Set {
                name,
                value,
                keep_origin,
            } => {
                if *keep_origin && headers.contains(name) {
                    return Step::Unchanged;
                }
                let previous = headers.set(name, value.as_str());
                Step::changed(previous.as_deref() != Some(value.as_str()))
            }
            Self::Delete { name } => Step::changed(headers.remove(name).is_some()),
            Self::Copy {
                from,
                to,
                keep_origin,
            } => {
                if from.eq_ignore_ascii_case(to) {
                    return Step::Unchanged;
                }
                let Some(value) = headers.get(from).map(str::to_string) else {
                    return Step::Unchanged;
                };
                if *keep_origin && headers.contains(to) {
                    return Step::Unchanged;
                }
                let previous = headers.set(to, value.as_str());
                Step::changed(previous.as_deref() != Some(value.as_str()))
            }
            Self::Move {
                from,
                to,
                keep_origin,
            } => {
                if from.eq_ignore_ascii_case(to) {
                    return Step::Unchanged;
                }
                let keep_existing = *keep_origin && headers.contains(to);
                let Some(value) = headers.remove(from) else {
                    return Step::Unchanged;
                };
                if !keep_existing {
                    headers.set(to, value);
                }
                Step::Modified
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> HeaderMap {
        [("Authorization", "Bearer sk"), ("X-Trace-Id", "abc")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_set_header() {
        let mut map = headers();
        let op = HeaderOperation::Set {
            name: "x-tenant".to_string(),
            value: "acme".to_string(),
            keep_origin: false,
        };
        assert_eq!(op.apply(&mut map), Step::Modified);
        assert_eq!(map.get("X-Tenant"), Some("acme"));
        assert_eq!(op.apply(&mut map), Step::Unchanged);
    }

    #[test]
    fn test_set_header_keep_origin() {
        let mut map = headers();
        let op = HeaderOperation::Set {
            name: "authorization".to_string(),
            value: "Bearer other".to_string(),
            keep_origin: true,
        };
        assert_eq!(op.apply(&mut map), Step::Unchanged);
        assert_eq!(map.get("Authorization"), Some("Bearer sk"));
    }

    #[test]
    fn test_delete_header() {
        let mut map = headers();
        let op = HeaderOperation::Delete {
            name: "x-trace-id".to_string(),
        };
        assert_eq!(op.apply(&mut map), Step::Modified);
        assert!(!map.contains("X-Trace-Id"));
        assert_eq!(op.apply(&mut map), Step::Unchanged);
    }

    #[test]
    fn test_copy_header() {
        let mut map = headers();
        let op = HeaderOperation::Copy {
            from: "X-Trace-Id".to_string(),
            to: "X-Request-Id".to_string(),
            keep_origin: false,
        };
        assert_eq!(op.apply(&mut map), Step::Modified);
        assert_eq!(map.get("x-request-id"), Some("abc"));
        assert_eq!(map.get("x-trace-id"), Some("abc"));

        let missing = HeaderOperation::Copy {
            from: "X-Missing".to_string(),
            to: "X-Other".to_string(),
            keep_origin: false,
        };
        assert_eq!(missing.apply(&mut map), Step::Unchanged);
        assert!(!map.contains("X-Other"));
    }

    #[test]
    fn test_move_header() {
        let mut map = headers();
        let op = HeaderOperation::Move {
            from: "X-Trace-Id".to_string(),
            to: "X-Request-Id".to_string(),
            keep_origin: false,
        };
        assert_eq!(op.apply(&mut map), Step::Modified);
        assert_eq!(map.get("X-Request-Id"), Some("abc"));
        assert!(!map.contains("X-Trace-Id"));
    }

    #[test]
    fn test_move_header_keep_origin() {
        let mut map = headers();
        map.set("X-Request-Id", "existing");
        let op = HeaderOperation::Move {
            from: "X-Trace-Id".to_string(),
            to: "X-Request-Id".to_string(),
            keep_origin: true,
        };
        assert_eq!(op.apply(&mut map), Step::Modified);
        assert_eq!(map.get("X-Request-Id"), Some("existing"));
        assert!(!map.contains("X-Trace-Id"));
    }

    #[test]
    fn test_move_to_same_name() {
        let mut map = headers();
        let op = HeaderOperation::Move {
            from: "x-trace-id".to_string(),
            to: "X-TRACE-ID".to_string(),
            keep_origin: false,
        };
        assert_eq!(op.apply(&mut map), Step::Unchanged);
        assert_eq!(map.get("X-Trace-Id"), Some("abc"));
    }
}
