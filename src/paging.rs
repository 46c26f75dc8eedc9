//! Pagination protocols and the per-execution paging cursor.
//!
//! Two backend families are supported as drop-in [`PagingStrategy`]
//! implementations:
//!
//! | Protocol | Request params | Envelope | Count field |
//! |----------|----------------|----------|-------------|
//! | A ([`OffsetLimit`]) | `offset`, `limit` | `{ "items": [...], "totalCount": N }` | `totalCount` |
//! | B ([`StartLimit`]) | `start`, `limit` | `{ "data": [...], "count": N }` | `count` |
//!
//! The cursor ([`PagingState`]) advances by the number of items the server
//! actually returned — before filtering — and terminates against the
//! *server-reported* total. The short-page rule (a page smaller than the
//! requested size means end of data) is only a fallback for servers that
//! never report a total; when a total is known it wins, so filtered
//! queries never stop early just because every survivor was discarded.

use crate::document::{Document, DocumentList, Value};
use crate::error::{Error, Result};

/// Default page size requested from the server.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Mutable cursor owned by exactly one in-flight query execution.
#[derive(Debug, Clone)]
pub struct PagingState {
    /// Offset of the next page. Monotonically non-decreasing.
    pub start: u64,
    /// Items requested per page. Independent of any result cap — page
    /// size never shrinks to the remaining quota.
    pub page_size: u64,
    /// Server-reported total, once known.
    pub total: Option<u64>,
    /// Item count of the most recently fetched page.
    pub last_page_size: u64,
}

impl PagingState {
    /// A cursor at the beginning, with the given page size.
    pub fn new(page_size: u64) -> Self {
        PagingState {
            start: 0,
            page_size: page_size.max(1),
            total: None,
            last_page_size: 0,
        }
    }

    /// Advances past a fetched page of `fetched` items (the raw page
    /// size, before any filtering).
    pub fn advance(&mut self, fetched: usize) {
        self.last_page_size = fetched as u64;
        self.start += fetched as u64;
    }

    /// True when no further page should be requested.
    ///
    /// With a server-reported total, exhaustion is `start >= total` —
    /// short pages are tolerated as long as the total says more remain.
    /// Without one, a short page is the only end-of-data signal. An empty
    /// page always terminates: whatever the total claims, requesting the
    /// same offset again cannot make progress.
    pub fn exhausted(&self) -> bool {
        if self.last_page_size == 0 {
            return true;
        }
        match self.total {
            Some(total) => self.start >= total,
            None => self.last_page_size < self.page_size,
        }
    }
}

/// One pagination protocol: how paging parameters are encoded on the
/// request and how pages are extracted from the response envelope.
pub trait PagingStrategy: Send + Sync {
    /// Query parameters encoding the cursor position.
    fn page_params(&self, state: &PagingState) -> Vec<(String, String)>;

    /// Extracts the page's documents and the server-reported total from a
    /// response envelope.
    ///
    /// Unwrapping degrades gracefully for non-collection responses: a
    /// single document under the list field counts as a one-item page,
    /// and a response without the list field at all is treated as itself
    /// being the single result — detail endpoints share their protocol
    /// family's envelope conventions only loosely.
    fn unwrap_page(&self, envelope: &Document) -> Result<(DocumentList, Option<u64>)>;
}

fn extract(
    envelope: &Document,
    list_field: &str,
    count_field: &str,
) -> Result<(DocumentList, Option<u64>)> {
    let documents = match envelope.raw(list_field) {
        Some(Value::List(items)) => {
            let mut docs = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Doc(d) => docs.push(d.clone()),
                    other => {
                        return Err(Error::decode(format!(
                            "'{list_field}' contains a non-object entry: {other:?}"
                        )))
                    }
                }
            }
            docs
        }
        Some(Value::Doc(single)) => vec![single.clone()],
        Some(other) => {
            return Err(Error::decode(format!(
                "'{list_field}' is neither a list nor an object: {other:?}"
            )))
        }
        None => vec![envelope.clone()],
    };

    let total = match envelope.raw(count_field) {
        Some(Value::Int(n)) if *n >= 0 => Some(*n as u64),
        Some(Value::Int(n)) => {
            return Err(Error::decode(format!("negative '{count_field}': {n}")))
        }
        Some(other) => {
            return Err(Error::decode(format!(
                "'{count_field}' is not an integer: {other:?}"
            )))
        }
        None => None,
    };

    Ok((documents.into(), total))
}

/// Protocol A: `offset`/`limit` request parameters, `items`/`totalCount`
/// envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct OffsetLimit;

impl PagingStrategy for OffsetLimit {
    fn page_params(&self, state: &PagingState) -> Vec<(String, String)> {
        vec![
            ("offset".to_string(), state.start.to_string()),
            ("limit".to_string(), state.page_size.to_string()),
        ]
    }

    fn unwrap_page(&self, envelope: &Document) -> Result<(DocumentList, Option<u64>)> {
        extract(envelope, "items", "totalCount")
    }
}

/// Protocol B: `start`/`limit` request parameters, `data`/`count`
/// envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct StartLimit;

impl PagingStrategy for StartLimit {
    fn page_params(&self, state: &PagingState) -> Vec<(String, String)> {
        vec![
            ("start".to_string(), state.start.to_string()),
            ("limit".to_string(), state.page_size.to_string()),
        ]
    }

    fn unwrap_page(&self, envelope: &Document) -> Result<(DocumentList, Option<u64>)> {
        extract(envelope, "data", "count")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: serde_json::Value) -> Document {
        Document::from_json(&json).unwrap()
    }

    // ── Cursor ───────────────────────────────────────────────────────

    #[test]
    fn cursor_advances_by_the_raw_page_size() {
        let mut state = PagingState::new(50);
        state.total = Some(120);
        state.advance(50);
        assert_eq!(state.start, 50);
        assert!(!state.exhausted());
        state.advance(50);
        state.advance(20);
        assert_eq!(state.start, 120);
        assert!(state.exhausted(), "start reached the reported total");
    }

    #[test]
    fn short_page_with_known_total_does_not_terminate() {
        // A filtered-server or flaky backend may return short pages while
        // the total still promises more data.
        let mut state = PagingState::new(50);
        state.total = Some(100);
        state.advance(30);
        assert!(
            !state.exhausted(),
            "short page must be tolerated while total says more remain"
        );
    }

    #[test]
    fn short_page_without_total_terminates() {
        let mut state = PagingState::new(50);
        state.advance(50);
        assert!(!state.exhausted(), "full page, keep going");
        state.advance(12);
        assert!(state.exhausted(), "short page is the only signal we have");
    }

    #[test]
    fn empty_page_always_terminates() {
        let mut state = PagingState::new(50);
        state.total = Some(500);
        state.advance(0);
        assert!(
            state.exhausted(),
            "an empty page cannot make progress, whatever the total claims"
        );
    }

    #[test]
    fn page_size_is_never_zero() {
        let state = PagingState::new(0);
        assert_eq!(state.page_size, 1);
    }

    // ── Protocol A ───────────────────────────────────────────────────

    #[test]
    fn offset_limit_encodes_cursor_params() {
        let mut state = PagingState::new(25);
        state.start = 75;
        let params = OffsetLimit.page_params(&state);
        assert_eq!(
            params,
            vec![
                ("offset".to_string(), "75".to_string()),
                ("limit".to_string(), "25".to_string())
            ]
        );
    }

    #[test]
    fn offset_limit_unwraps_items_and_total_count() {
        let env = envelope(serde_json::json!({
            "items": [{"id": 1}, {"id": 2}],
            "totalCount": 41
        }));
        let (docs, total) = OffsetLimit.unwrap_page(&env).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs.get(1).unwrap().get_i64("id").unwrap(), Some(2));
        assert_eq!(total, Some(41));
    }

    // ── Protocol B ───────────────────────────────────────────────────

    #[test]
    fn start_limit_encodes_cursor_params() {
        let state = PagingState::new(10);
        let params = StartLimit.page_params(&state);
        assert_eq!(
            params,
            vec![
                ("start".to_string(), "0".to_string()),
                ("limit".to_string(), "10".to_string())
            ]
        );
    }

    #[test]
    fn start_limit_unwraps_data_and_count() {
        let env = envelope(serde_json::json!({
            "data": [{"name": "a"}],
            "count": 1
        }));
        let (docs, total) = StartLimit.unwrap_page(&env).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(total, Some(1));
    }

    // ── Degenerate envelopes ─────────────────────────────────────────

    #[test]
    fn single_document_under_the_list_field_is_a_one_item_page() {
        let env = envelope(serde_json::json!({"data": {"id": 9}}));
        let (docs, total) = StartLimit.unwrap_page(&env).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs.first().unwrap().get_i64("id").unwrap(), Some(9));
        assert_eq!(total, None);
    }

    #[test]
    fn response_without_envelope_is_itself_the_result() {
        let env = envelope(serde_json::json!({"id": 3, "name": "detail"}));
        let (docs, _) = OffsetLimit.unwrap_page(&env).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs.first().unwrap().get_i64("id").unwrap(), Some(3));
    }

    #[test]
    fn malformed_envelope_fields_are_decode_errors() {
        let bad_list = envelope(serde_json::json!({"items": "nope"}));
        assert!(matches!(
            OffsetLimit.unwrap_page(&bad_list).unwrap_err(),
            Error::Decode { .. }
        ));

        let bad_count = envelope(serde_json::json!({"items": [], "totalCount": "many"}));
        assert!(matches!(
            OffsetLimit.unwrap_page(&bad_count).unwrap_err(),
            Error::Decode { .. }
        ));
    }
}
