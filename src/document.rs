//! Ordered document model for retrieved entities.
//!
//! A [`Document`] is one JSON object with insertion order preserved: keys
//! are unique and iterate in the order they were inserted, which matches
//! the order the server sent them. Values are [`Value`]s — scalars, nested
//! documents, lists, or an unresolved on-demand slot installed by an
//! enricher.
//!
//! Reading a key that holds an on-demand slot triggers resolution (a
//! secondary query through the owning connection) and memoizes the result,
//! so repeated reads never re-issue the underlying call. Serialization
//! never triggers resolution: an unresolved slot serializes as `null`.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::lazy::OnDemandSlot;

// ── Value ───────────────────────────────────────────────────────────────

/// A single value stored under a document key.
#[derive(Clone)]
pub enum Value {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number that fits in a signed 64-bit integer.
    Int(i64),
    /// JSON number that does not fit in `i64`.
    Float(f64),
    /// JSON string.
    Str(String),
    /// A nested JSON object.
    Doc(Document),
    /// An ordered JSON array.
    List(Vec<Value>),
    /// An unresolved on-demand property. Resolved (and memoized) on first
    /// read through [`Document::get`].
    Lazy(Arc<OnDemandSlot>),
}

impl Value {
    /// Converts a `serde_json::Value` into a [`Value`], preserving member
    /// order of nested objects.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(members) => {
                let mut doc = Document::new();
                for (k, v) in members {
                    doc.insert(k.clone(), Value::from_json(v));
                }
                Value::Doc(doc)
            }
        }
    }

    /// Converts back to a `serde_json::Value`. An unresolved on-demand slot
    /// becomes `null`; a resolved one contributes its resolved value. No
    /// network call is ever made here.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Doc(d) => d.to_json(),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Lazy(slot) => slot
                .resolved_value()
                .map(|v| v.to_json())
                .unwrap_or(serde_json::Value::Null),
        }
    }

    /// Returns the string slice if this is a [`Value::Str`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is a [`Value::Int`].
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the boolean if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Renders a scalar as the string used in template expansion and
    /// map keys. Returns `None` for null, documents, lists, and
    /// unresolved slots.
    pub fn as_scalar_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// True if this value is an unresolved or resolved on-demand slot.
    pub fn is_lazy(&self) -> bool {
        matches!(self, Value::Lazy(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Doc(a), Value::Doc(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            // Slots compare by identity: two slots are the same value only
            // if they are literally the same slot.
            (Value::Lazy(a), Value::Lazy(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Doc(d) => write!(f, "Doc({d:?})"),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Lazy(slot) => write!(f, "Lazy({:?})", slot),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// ── Document ────────────────────────────────────────────────────────────

/// An ordered key→value record representing one retrieved entity.
///
/// Keys are unique; iteration yields them in insertion order. Cloning a
/// document is shallow with respect to on-demand slots — clones share the
/// slot, so resolving the property through any clone resolves it for all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    entries: IndexMap<String, Value>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Document {
            entries: IndexMap::new(),
        }
    }

    /// Parses a `serde_json::Value` that must be a JSON object.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        match Value::from_json(json) {
            Value::Doc(doc) => Ok(doc),
            other => Err(Error::decode(format!(
                "expected a JSON object, got {other:?}"
            ))),
        }
    }

    /// Converts to a `serde_json::Value` object, in key order. Unresolved
    /// on-demand slots serialize as `null` (no network call).
    pub fn to_json(&self) -> serde_json::Value {
        let mut members = serde_json::Map::new();
        for (k, v) in &self.entries {
            members.insert(k.clone(), v.to_json());
        }
        serde_json::Value::Object(members)
    }

    /// Inserts or replaces a value. Replacing an existing key keeps its
    /// position; a new key appends. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.insert(key.into(), value)
    }

    /// Removes a key, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// Returns the stored value without resolving on-demand slots.
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Reads a key, resolving an on-demand slot if one is stored there.
    ///
    /// The first read of an unresolved slot invokes its resolver (which
    /// typically issues a secondary query through the owning connection)
    /// and memoizes the result; later reads return the memoized value
    /// without any network call. Resolution is synchronized per slot, so
    /// concurrent readers of the same property collapse into one call.
    ///
    /// # Errors
    ///
    /// Propagates the resolver's failure when the enrichment's policy is
    /// `Fail`; swallowing policies yield `Ok(Some(Value::Null))` instead.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let slot = match self.entries.get(key) {
            None => return Ok(None),
            Some(Value::Lazy(slot)) => Arc::clone(slot),
            Some(v) => return Ok(Some(v.clone())),
        };
        slot.read(self).map(Some)
    }

    /// Reads a key as a string, resolving on-demand slots.
    /// Returns `Ok(None)` if the key is absent or not a string.
    pub fn get_str(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get(key)?.and_then(|v| v.as_str().map(str::to_owned)))
    }

    /// Reads a key as an integer, resolving on-demand slots.
    pub fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get(key)?.and_then(|v| v.as_i64()))
    }

    /// Reads a key as a boolean, resolving on-demand slots.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.get(key)?.and_then(|v| v.as_bool()))
    }

    /// Reads a key as a nested document, resolving on-demand slots.
    pub fn get_doc(&self, key: &str) -> Result<Option<Document>> {
        Ok(self.get(key)?.and_then(|v| match v {
            Value::Doc(d) => Some(d),
            _ => None,
        }))
    }

    /// Reads a key as a list, resolving on-demand slots.
    pub fn get_list(&self, key: &str) -> Result<Option<Vec<Value>>> {
        Ok(self.get(key)?.and_then(|v| match v {
            Value::List(items) => Some(items),
            _ => None,
        }))
    }

    /// True if the key is present (resolved or not).
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the document has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterates entries in insertion order without resolving slots.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// ── DocumentList ────────────────────────────────────────────────────────

/// An ordered sequence of documents, as extracted from one response page
/// or accumulated across a full paginated query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentList(Vec<Document>);

impl DocumentList {
    /// Creates an empty list.
    pub fn new() -> Self {
        DocumentList(Vec::new())
    }

    /// Appends a document.
    pub fn push(&mut self, doc: Document) {
        self.0.push(doc);
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the document at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Document> {
        self.0.get(index)
    }

    /// Returns the first document, if any.
    pub fn first(&self) -> Option<&Document> {
        self.0.first()
    }

    /// Iterates the documents in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Document> {
        self.0.iter()
    }

    /// Derives a new list containing only the documents the predicate
    /// accepts, preserving order.
    pub fn filter(&self, mut predicate: impl FnMut(&Document) -> bool) -> DocumentList {
        DocumentList(self.0.iter().filter(|d| predicate(d)).cloned().collect())
    }

    /// Returns the first document the predicate accepts.
    pub fn find(&self, mut predicate: impl FnMut(&Document) -> bool) -> Option<&Document> {
        self.0.iter().find(|d| predicate(d))
    }

    /// Derives a map keyed by the scalar value stored under `key` in each
    /// document. Documents without a scalar at that key are skipped; a
    /// duplicate key keeps the last document, matching insertion order
    /// semantics of the backing map.
    pub fn to_map(&self, key: &str) -> Result<IndexMap<String, Document>> {
        let mut map = IndexMap::new();
        for doc in &self.0 {
            if let Some(v) = doc.get(key)? {
                if let Some(s) = v.as_scalar_string() {
                    map.insert(s, doc.clone());
                }
            }
        }
        Ok(map)
    }
}

impl From<Vec<Document>> for DocumentList {
    fn from(docs: Vec<Document>) -> Self {
        DocumentList(docs)
    }
}

impl IntoIterator for DocumentList {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DocumentList {
    type Item = &'a Document;
    type IntoIter = std::slice::Iter<'a, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
