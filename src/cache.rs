//! Per-connection response cache.
//!
//! A cache entry is keyed by `(cache_name, normalized request identity)`
//! where the identity is `METHOD <fully-resolved-URI>`. The cache lives as
//! long as its connection; there is no TTL and no eviction — serving stale
//! data for the life of the connection is an accepted tradeoff of this
//! design, not a bug. Requests carrying a body never touch the cache;
//! the connection enforces that before calling into here.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::document::Document;
use crate::lock;

/// Map from `(cache_name, request identity)` to the decoded response.
/// Cheap to share across threads: the mutex is held only for the map
/// operation, never across a network call.
#[derive(Default)]
pub struct ResponseCache {
    entries: Mutex<HashMap<(String, String), Document>>,
}

impl ResponseCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        ResponseCache::default()
    }

    /// Returns a clone of the cached response for this identity, if any.
    pub(crate) fn lookup(&self, cache_name: &str, identity: &str) -> Option<Document> {
        let entries = lock(&self.entries);
        let hit = entries.get(&(cache_name.to_string(), identity.to_string())).cloned();
        if hit.is_some() {
            debug!(target: "restq::cache", cache = cache_name, identity, "cache hit");
        }
        hit
    }

    /// Stores the decoded response under this identity, replacing any
    /// previous entry.
    pub(crate) fn store(&self, cache_name: &str, identity: &str, document: &Document) {
        lock(&self.entries).insert(
            (cache_name.to_string(), identity.to_string()),
            document.clone(),
        );
    }

    /// Number of cached responses, across all cache names.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: i64) -> Document {
        Document::from_json(&serde_json::json!({"id": id})).unwrap()
    }

    #[test]
    fn lookup_misses_until_stored() {
        let cache = ResponseCache::new();
        assert!(cache.lookup("releases", "GET https://x/api/releases").is_none());
        cache.store("releases", "GET https://x/api/releases", &doc(1));
        let hit = cache.lookup("releases", "GET https://x/api/releases").unwrap();
        assert_eq!(hit.get_i64("id").unwrap(), Some(1));
    }

    #[test]
    fn cache_names_partition_the_key_space() {
        let cache = ResponseCache::new();
        cache.store("releases", "GET https://x/a", &doc(1));
        assert!(
            cache.lookup("scans", "GET https://x/a").is_none(),
            "same identity under another cache name must miss"
        );
    }

    #[test]
    fn identities_include_the_method() {
        let cache = ResponseCache::new();
        cache.store("c", "GET https://x/a", &doc(1));
        assert!(cache.lookup("c", "POST https://x/a").is_none());
    }

    #[test]
    fn store_replaces_the_previous_entry() {
        let cache = ResponseCache::new();
        cache.store("c", "GET https://x/a", &doc(1));
        cache.store("c", "GET https://x/a", &doc(2));
        assert_eq!(cache.len(), 1);
        let hit = cache.lookup("c", "GET https://x/a").unwrap();
        assert_eq!(hit.get_i64("id").unwrap(), Some(2));
    }
}
