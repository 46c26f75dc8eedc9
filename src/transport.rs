//! HTTP transport collaborator.
//!
//! The engine never talks to `reqwest` directly — every wire interaction
//! goes through the [`HttpTransport`] trait, which keeps the pagination,
//! token, retry, and cache layers testable against an in-memory transport.
//! [`ReqwestTransport`] is the production implementation, a blocking
//! `reqwest` client with explicit connect/request timeouts.

use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::Result;

/// Connect timeout for API calls. Covers TCP + TLS handshake only.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall request timeout, covering the full round-trip including the
/// response body. Paginated result pages are bounded in size, so one
/// minute is comfortable headroom.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP methods the engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET — the only cacheable method.
    Get,
    /// POST, usually with a JSON entity.
    Post,
    /// PUT, usually with a JSON entity.
    Put,
    /// DELETE, used for token revocation among other things.
    Delete,
}

impl Method {
    /// Canonical upper-case name, as used in request identities and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fully resolved HTTP request, ready for a transport to execute.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: Method,
    /// The absolute request URL, query string included.
    pub url: Url,
    /// Headers to attach, in order. Names are case-insensitive on the wire.
    pub headers: Vec<(String, String)>,
    /// Optional JSON entity (POST/PUT).
    pub body: Option<serde_json::Value>,
    /// Optional form-encoded entity; used by the token exchange. Mutually
    /// exclusive with `body` — when both are set, `form` wins.
    pub form: Option<Vec<(String, String)>>,
}

impl HttpRequest {
    /// Creates a bodyless request for `method` on `url`.
    pub fn new(method: Method, url: Url) -> Self {
        HttpRequest {
            method,
            url,
            headers: Vec::new(),
            body: None,
            form: None,
        }
    }

    /// Appends a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The normalized request identity: `METHOD <absolute-uri>`. Used as
    /// the response-cache key.
    pub fn identity(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

/// One decoded HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// Response headers with lower-cased names.
    pub headers: HashMap<String, String>,
    /// The raw response body text.
    pub body: String,
}

impl HttpResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Blocking HTTP executor. GET/POST/PUT/DELETE with headers and JSON or
/// form bodies is all the engine needs from a transport.
///
/// Implementations must be shareable across threads — a multi-threaded
/// connection issues requests from several caller-owned threads at once.
pub trait HttpTransport: Send + Sync {
    /// Executes the request and returns the decoded response. Non-2xx
    /// statuses are returned as responses, not errors; only failures that
    /// prevent a response at all (DNS, TCP, TLS, timeout) are errors.
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Production transport backed by `reqwest::blocking`.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Builds a transport with the crate's default timeouts.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(ReqwestTransport { client })
    }

    /// Builds a transport with a caller-chosen overall request timeout,
    /// for endpoints known to be slow.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;
        Ok(ReqwestTransport { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        } else if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();

        // Lower-case header names once so lookups never care about the
        // server's casing. Non-UTF-8 header values are dropped.
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        let body = response.text()?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_includes_method_and_full_uri() {
        let url = Url::parse("https://api.example.test/api/v3/releases?limit=50").unwrap();
        let req = HttpRequest::new(Method::Get, url);
        assert_eq!(
            req.identity(),
            "GET https://api.example.test/api/v3/releases?limit=50"
        );
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("x-rate-limit-reset".to_string(), "30".to_string());
        let resp = HttpResponse {
            status: 429,
            headers,
            body: String::new(),
        };
        assert_eq!(resp.header("X-Rate-Limit-Reset"), Some("30"));
        assert_eq!(resp.header("x-RATE-limit-RESET"), Some("30"));
        assert_eq!(resp.header("Retry-After"), None);
    }

    #[test]
    fn success_covers_the_2xx_range_only() {
        let resp = |status| HttpResponse {
            status,
            headers: HashMap::new(),
            body: String::new(),
        };
        assert!(resp(200).is_success());
        assert!(resp(204).is_success());
        assert!(!resp(301).is_success());
        assert!(!resp(401).is_success());
        assert!(!resp(503).is_success());
    }

    #[test]
    fn method_names_are_canonical() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }
}
