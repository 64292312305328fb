//! Shared cache of compiled `regex_replace` patterns.

use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use std::sync::Arc;

/// Default compiled size limit (1MB).
const DEFAULT_SIZE_LIMIT: usize = 1024 * 1024;

/// Append-only map from pattern text to compiled regex.
///
/// Safe to share between threads; the same pattern is compiled at most a
/// handful of times under contention and then always served from the map.
#[derive(Debug)]
pub struct RegexCache {
    size_limit: usize,
    patterns: RwLock<HashMap<String, Arc<Regex>>>,
}

impl RegexCache {
    pub fn new(size_limit: usize) -> Self {
        Self {
            size_limit,
            patterns: RwLock::new(HashMap::new()),
        }
    }

    /// Get a compiled pattern, compiling and caching it on first use.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(regex) = self.patterns.read().get(pattern) {
            return Ok(Arc::clone(regex));
        }

        let regex = Arc::new(
            RegexBuilder::new(pattern)
                .size_limit(self.size_limit)
                .build()?,
        );

        let mut patterns = self.patterns.write();
        Ok(Arc::clone(
            patterns.entry(pattern.to_string()).or_insert(regex),
        ))
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().is_empty()
    }
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE_LIMIT)
    }
}
