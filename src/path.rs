//! Path addressing for JSON documents and header maps.
//!
//! JSON paths are dotted: `messages.-1.content`, `metadata.user.id`. A
//! segment that parses as an integer indexes an array, `-1` addressing the
//! last element. Bracket indices (`items[0]`) and a leading `$.` are
//! accepted as well.
//!
//! Headers are a flat namespace: one name per header, compared
//! case-insensitively.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Maximum number of `null` slots a single write may append to an array.
pub const MAX_ARRAY_GAP: usize = 1024;

/// One step of a JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key
    Key(String),
    /// Array index (`-1` = last element); also usable as an object key
    Index(i64),
}

impl Segment {
    /// The segment as an object key.
    fn key(&self) -> Cow<'_, str> {
        match self {
            Segment::Key(key) => Cow::Borrowed(key),
            Segment::Index(idx) => Cow::Owned(idx.to_string()),
        }
    }

    /// Empty container suitable for holding this segment.
    fn empty_container(&self) -> JsonValue {
        match self {
            Segment::Key(_) => JsonValue::Object(Map::new()),
            Segment::Index(_) => JsonValue::Array(Vec::new()),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// A parsed JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse a path expression. Parsing never fails; empty segments are
    /// skipped and an empty path addresses the document root.
    pub fn parse(path: &str) -> Self {
        Self {
            raw: path.to_string(),
            segments: parse_segments(path),
        }
    }

    /// A single-segment path naming a literal top-level key, dots included.
    pub fn key(key: &str) -> Self {
        Self {
            raw: key.to_string(),
            segments: vec![Segment::Key(key.to_string())],
        }
    }

    /// The path as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether this path addresses the document root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Resolve the path. Missing intermediates yield `None`, never an error.
    pub fn resolve<'a>(&self, doc: &'a JsonValue) -> Option<&'a JsonValue> {
        self.segments
            .iter()
            .try_fold(doc, |current, segment| child(current, segment))
    }

    /// Resolve the path mutably without creating anything.
    pub fn resolve_mut<'a>(&self, doc: &'a mut JsonValue) -> Option<&'a mut JsonValue> {
        self.segments
            .iter()
            .try_fold(doc, |current, segment| child_mut(current, segment))
    }

    pub fn exists(&self, doc: &JsonValue) -> bool {
        self.resolve(doc).is_some()
    }

    /// Write `value` at the path, overwriting whatever is there.
    ///
    /// Missing (or `null`) intermediates are created as objects, or as
    /// arrays when the following segment is an index. Writing past the end
    /// of an array pads it with `null`s, up to [`MAX_ARRAY_GAP`] slots.
    ///
    /// A write that fails leaves `doc` untouched.
    pub fn write(&self, doc: &mut JsonValue, value: JsonValue) -> Result<(), PathError> {
        self.check_writable(doc)?;

        let Some((last, parents)) = self.segments.split_last() else {
            *doc = value;
            return Ok(());
        };

        let mut current = doc;
        for (i, segment) in parents.iter().enumerate() {
            let next = &self.segments[i + 1];
            if current.is_null() {
                *current = segment.empty_container();
            }
            let slot = self.slot_mut(current, segment)?;
            if slot.is_null() {
                *slot = next.empty_container();
            }
            current = slot;
        }

        if current.is_null() {
            *current = last.empty_container();
        }
        *self.slot_mut(current, last)? = value;
        Ok(())
    }

    /// Check that [`JsonPath::write`] would succeed on `doc`, without
    /// touching it.
    pub fn check_writable(&self, doc: &JsonValue) -> Result<(), PathError> {
        // `None` once the walk leaves the existing document: from there on
        // every container is freshly created and empty.
        let mut current = Some(doc).filter(|v| !v.is_null());

        for segment in &self.segments {
            current = match current {
                None => {
                    if let Segment::Index(idx) = segment {
                        self.write_position(0, *idx)?;
                    }
                    None
                }
                Some(JsonValue::Object(map)) => map.get(segment.key().as_ref()),
                Some(JsonValue::Array(items)) => {
                    let Segment::Index(idx) = segment else {
                        return Err(self.not_container(segment, "array"));
                    };
                    items.get(self.write_position(items.len(), *idx)?)
                }
                Some(other) => return Err(self.not_container(segment, type_name(other))),
            }
            .filter(|v| !v.is_null());
        }
        Ok(())
    }

    /// The same path with every `-1` replaced by the concrete position it
    /// currently addresses in `doc`.
    pub fn pinned(&self, doc: &JsonValue) -> Self {
        let mut current = Some(doc);
        let segments = self
            .segments
            .iter()
            .map(|segment| {
                let pinned = match (segment, current) {
                    (Segment::Index(-1), Some(JsonValue::Array(items))) if !items.is_empty() => {
                        Segment::Index(items.len() as i64 - 1)
                    }
                    _ => segment.clone(),
                };
                current = current.and_then(|c| child(c, segment));
                pinned
            })
            .collect();

        Self {
            raw: self.raw.clone(),
            segments,
        }
    }

    /// Put a value back where [`JsonPath::remove`] took it from: array
    /// elements are inserted, shifting later ones, rather than overwritten.
    /// Returns false when the parent no longer exists.
    pub fn insert(&self, doc: &mut JsonValue, value: JsonValue) -> bool {
        let Some((last, parents)) = self.segments.split_last() else {
            *doc = value;
            return true;
        };

        let Some(parent) = parents
            .iter()
            .try_fold(doc, |current, segment| child_mut(current, segment))
        else {
            return false;
        };

        match (parent, last) {
            (JsonValue::Object(map), segment) => {
                map.insert(segment.key().into_owned(), value);
                true
            }
            (JsonValue::Array(items), Segment::Index(idx)) => {
                let pos = match array_position(items.len() + 1, *idx) {
                    Some(pos) => pos.min(items.len()),
                    None => return false,
                };
                items.insert(pos, value);
                true
            }
            _ => false,
        }
    }

    fn write_position(&self, len: usize, idx: i64) -> Result<usize, PathError> {
        let pos = array_position(len, idx).ok_or_else(|| PathError::InvalidIndex {
            path: self.raw.clone(),
            index: idx,
        })?;
        if pos >= len && pos - len > MAX_ARRAY_GAP {
            return Err(PathError::IndexTooFar {
                path: self.raw.clone(),
                index: idx,
                len,
            });
        }
        Ok(pos)
    }

    /// Remove and return the value at the path. Absent paths are a no-op.
    pub fn remove(&self, doc: &mut JsonValue) -> Option<JsonValue> {
        let (last, parents) = self.segments.split_last()?;

        let parent = parents
            .iter()
            .try_fold(doc, |current, segment| child_mut(current, segment))?;

        match (parent, last) {
            (JsonValue::Object(map), segment) => map.remove(segment.key().as_ref()),
            (JsonValue::Array(items), Segment::Index(idx)) => {
                let pos = array_position(items.len(), *idx)?;
                (pos < items.len()).then(|| items.remove(pos))
            }
            _ => None,
        }
    }

    /// Get or create the slot addressed by `segment` inside `container`.
    fn slot_mut<'a>(
        &self,
        container: &'a mut JsonValue,
        segment: &Segment,
    ) -> Result<&'a mut JsonValue, PathError> {
        match container {
            JsonValue::Object(map) => Ok(map
                .entry(segment.key().into_owned())
                .or_insert(JsonValue::Null)),
            JsonValue::Array(items) => {
                let Segment::Index(idx) = segment else {
                    return Err(self.not_container(segment, "array"));
                };
                let pos = self.write_position(items.len(), *idx)?;
                if pos >= items.len() {
                    items.resize(pos + 1, JsonValue::Null);
                }
                Ok(&mut items[pos])
            }
            other => Err(self.not_container(segment, type_name(other))),
        }
    }

    fn not_container(&self, segment: &Segment, found: &'static str) -> PathError {
        PathError::NotContainer {
            path: self.raw.clone(),
            segment: segment.to_string(),
            found,
        }
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Map an index onto an array position. Only `-1` is accepted among the
/// negative indices.
fn array_position(len: usize, idx: i64) -> Option<usize> {
    match idx {
        -1 => len.checked_sub(1),
        i if i >= 0 => usize::try_from(i).ok(),
        _ => None,
    }
}

fn child<'a>(current: &'a JsonValue, segment: &Segment) -> Option<&'a JsonValue> {
    match (current, segment) {
        (JsonValue::Object(map), segment) => map.get(segment.key().as_ref()),
        (JsonValue::Array(items), Segment::Index(idx)) => {
            items.get(array_position(items.len(), *idx)?)
        }
        _ => None,
    }
}

fn child_mut<'a>(current: &'a mut JsonValue, segment: &Segment) -> Option<&'a mut JsonValue> {
    match (current, segment) {
        (JsonValue::Object(map), segment) => map.get_mut(segment.key().as_ref()),
        (JsonValue::Array(items), Segment::Index(idx)) => {
            let pos = array_position(items.len(), *idx)?;
            items.get_mut(pos)
        }
        _ => None,
    }
}

fn parse_segments(path: &str) -> Vec<Segment> {
    let path = path.trim();
    let path = path.strip_prefix("$.").unwrap_or(path);
    let path = path.strip_prefix('$').unwrap_or(path);

    let mut segments = Vec::new();
    for part in path.split('.') {
        let mut rest = part;
        // `items[0][1]` style suffixes
        while let Some(open) = rest.find('[') {
            push_segment(&mut segments, &rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find(']').unwrap_or(after.len());
            push_segment(&mut segments, &after[..close]);
            rest = after.get(close + 1..).unwrap_or("");
        }
        push_segment(&mut segments, rest);
    }
    segments
}

fn push_segment(segments: &mut Vec<Segment>, token: &str) {
    if token.is_empty() {
        return;
    }
    match token.parse::<i64>() {
        Ok(idx) => segments.push(Segment::Index(idx)),
        Err(_) => segments.push(Segment::Key(token.to_string())),
    }
}

/// Human-readable JSON type name.
pub fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Errors raised while writing through a path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("cannot descend into {found} at segment `{segment}` of `{path}`")]
    NotContainer {
        path: String,
        segment: String,
        found: &'static str,
    },

    #[error("index {index} is not addressable in `{path}`")]
    InvalidIndex { path: String, index: i64 },

    #[error("index {index} in `{path}` is too far past the end of a {len}-element array")]
    IndexTooFar { path: String, index: i64, len: usize },
}

/// Flat, case-insensitive header map that keeps insertion order and the
/// casing a header was last written with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Get a header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Get a header value, treating `-` and `_` in names as equivalent.
    pub fn get_normalized(&self, name: &str) -> Option<&str> {
        let wanted = normalize_header_name(name);
        self.entries
            .iter()
            .find(|(n, _)| normalize_header_name(n) == wanted)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set a header, replacing any existing value. Returns the old value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Option<String> {
        let value = value.into();
        match self.position(name) {
            Some(i) => {
                let (_, old) = std::mem::replace(&mut self.entries[i], (name.to_string(), value));
                Some(old)
            }
            None => {
                self.entries.push((name.to_string(), value));
                None
            }
        }
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

fn normalize_header_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in iter {
            let name: String = name.into();
            headers.set(&name, value);
        }
        headers
    }
}

impl From<BTreeMap<String, String>> for HeaderMap {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<HeaderMap> for BTreeMap<String, String> {
    fn from(headers: HeaderMap) -> Self {
        headers.entries.into_iter().collect()
    }
}
