//! Shared harness for the integration flows: a scriptable in-process
//! transport that records every request it serves, plus envelope and
//! connection helpers.

// Each flow binary uses its own subset of these helpers.
#![allow(dead_code)]

use restq::auth::TokenScheme;
use restq::connection::Connection;
use restq::error::Result;
use restq::retry::RetryConfig;
use restq::transport::{HttpRequest, HttpResponse, HttpTransport};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Handler = dyn Fn(&HttpRequest, usize) -> HttpResponse + Send + Sync;

/// Transport backed by a handler closure. The closure receives the
/// request and the zero-based hit number, so a test can script different
/// answers per attempt.
pub struct MockTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<HttpRequest>>,
    hits: AtomicUsize,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&HttpRequest, usize) -> HttpResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(MockTransport {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            hits: AtomicUsize::new(0),
        })
    }

    /// Total requests served so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Snapshot of every request served, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for MockTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let hit = self.hits.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        Ok((self.handler)(request, hit))
    }
}

/// Builds a JSON response with the given status.
pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status,
        headers: HashMap::new(),
        body: body.to_string(),
    }
}

/// The connection every flow test starts from: pre-issued bearer token,
/// retry disabled unless a test opts back in.
pub fn connection(transport: Arc<MockTransport>) -> Arc<Connection> {
    Arc::new(
        Connection::builder("https://api.example.test/api/v1")
            .transport(transport)
            .token("itest-token")
            .scheme(TokenScheme::Bearer)
            .retry(RetryConfig::disabled())
            .build()
            .expect("test connection"),
    )
}

/// Decodes a request's query string into a map.
pub fn query_pairs(request: &HttpRequest) -> HashMap<String, String> {
    request.url.query_pairs().into_owned().collect()
}

/// Slices `all` into an `items`/`totalCount` envelope according to the
/// offset/limit parameters of `request`.
pub fn offset_limit_page(all: &[serde_json::Value], request: &HttpRequest) -> serde_json::Value {
    let params = query_pairs(request);
    let offset: usize = params
        .get("offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(all.len());
    let slice = if offset >= all.len() {
        &[][..]
    } else {
        &all[offset..(offset + limit).min(all.len())]
    };
    serde_json::json!({ "items": slice, "totalCount": all.len() })
}
