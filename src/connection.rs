//! Authenticated connection to one REST backend.
//!
//! A [`Connection`] owns everything request execution needs: the transport,
//! the token factory, the rate-limit retry configuration, the response
//! cache, and (for multi-threaded use) the per-path request serialization.
//! Queries, on-demand resolvers, and request initializers all funnel
//! through [`Connection::execute`].
//!
//! Token lifecycle on the request path:
//! - Lazy acquisition: the first request with no cached token triggers the
//!   credential exchange automatically.
//! - Expiry-aware: the factory refuses a locally expired token, forcing a
//!   refresh before the request goes out.
//! - One-shot 401 retry: if the server rejects the token anyway (revoked
//!   server-side before local expiry caught it), the connection
//!   invalidates the cached record, refreshes, and retries exactly once.
//!   A second 401 propagates as an API error — no retry loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use url::Url;

use crate::auth::{Credentials, TokenFactory, TokenScheme};
use crate::cache::ResponseCache;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::lock;
use crate::retry::{self, RetryConfig};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};

// ── Requests ────────────────────────────────────────────────────────────

/// One logical API request, relative to the connection's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// The HTTP method.
    pub method: Method,
    /// Path relative to the base URL. A leading slash is tolerated.
    pub path: String,
    /// Query parameters, appended in order.
    pub query: Vec<(String, String)>,
    /// Optional JSON entity. Requests carrying one are never cached.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// A request with the given method and relative path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// A GET request for `path`.
    pub fn get(path: impl Into<String>) -> Self {
        ApiRequest::new(Method::Get, path)
    }

    /// Appends a query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Attaches a JSON entity.
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

// ── Per-path serialization ──────────────────────────────────────────────

/// Mutexes keyed by normalized path. Digits in the path are collapsed to a
/// wildcard so `/releases/8113/issues` and `/releases/8114/issues` share a
/// lock: concurrent requests against one logical endpoint would otherwise
/// all slam into the same rate limit at once.
#[derive(Default)]
struct PathLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PathLocks {
    fn for_path(&self, path: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            lock(&self.locks)
                .entry(normalize_path(path))
                .or_default(),
        )
    }
}

/// Collapses every run of digits in `path` to `#`.
fn normalize_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut in_digits = false;
    for c in path.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                out.push('#');
                in_digits = true;
            }
        } else {
            out.push(c);
            in_digits = false;
        }
    }
    out
}

// ── Connection ──────────────────────────────────────────────────────────

/// One authenticated connection to a backend, shareable across threads
/// via `Arc` when built with [`ConnectionBuilder::multi_threaded`].
pub struct Connection {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    tokens: TokenFactory,
    retry: RetryConfig,
    multi_threaded: bool,
    cache: ResponseCache,
    path_locks: PathLocks,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("base_url", &self.base_url.as_str())
            .field("multi_threaded", &self.multi_threaded)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Starts building a connection for `base_url`.
    pub fn builder(base_url: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(base_url)
    }

    /// The base URL every request path is resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether this connection was built for shared multi-threaded use.
    pub fn is_multi_threaded(&self) -> bool {
        self.multi_threaded
    }

    /// The token factory backing this connection. Mostly useful for
    /// observing token state; requests fetch their own tokens.
    pub fn token_factory(&self) -> &TokenFactory {
        &self.tokens
    }

    /// The response cache. Entries live until the connection is dropped.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Executes one request and decodes the JSON response into a document.
    ///
    /// `cache_name` turns the response cache on for this request: a
    /// repeat of the same method + fully resolved URI under the same name
    /// is served from the cache without a network round-trip. Requests
    /// carrying a body are never cached, whatever `cache_name` says —
    /// they are not idempotent-cacheable in this design.
    ///
    /// # Errors
    ///
    /// - [`Error::Api`] — non-success status (after the one-shot 401
    ///   re-auth and rate-limit retries are exhausted or inapplicable).
    /// - [`Error::RateLimitExceeded`] — the retry budget was spent.
    /// - [`Error::Transport`] — network-level failure, never retried.
    /// - [`Error::Configuration`] — the path does not resolve against the
    ///   base URL.
    pub fn execute(&self, request: &ApiRequest, cache_name: Option<&str>) -> Result<Document> {
        let url = self.resolve(request)?;
        let identity = format!("{} {}", request.method, url);
        let cacheable = cache_name.is_some() && request.body.is_none();

        if cacheable {
            let name = cache_name.unwrap_or_default();
            if let Some(hit) = self.cache.lookup(name, &identity) {
                return Ok(hit);
            }
        }

        // Serialize requests to the same logical endpoint while rate
        // limiting is in effect; a thundering herd would burn the whole
        // retry budget simultaneously.
        let serial = (self.multi_threaded && self.retry.enabled())
            .then(|| self.path_locks.for_path(url.path()));
        let _guard = serial.as_ref().map(|m| lock(m));

        debug!(target: "restq::connection", method = %request.method, url = %url, "executing request");
        let response = self.send_authenticated(request.method, &url, request.body.as_ref())?;
        if !response.is_success() {
            return Err(Error::Api {
                status: response.status,
                body: response.body,
            });
        }

        let document = if response.body.trim().is_empty() {
            Document::new()
        } else {
            Document::from_json(&serde_json::from_str(&response.body)?)?
        };

        if cacheable {
            self.cache
                .store(cache_name.unwrap_or_default(), &identity, &document);
        }
        Ok(document)
    }

    /// Best-effort token revocation. Failures are logged and swallowed —
    /// closing must always succeed locally.
    pub fn close(&self) {
        self.tokens.revoke();
    }

    fn resolve(&self, request: &ApiRequest) -> Result<Url> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| {
                Error::config(format!("path '{}' does not resolve: {e}", request.path))
            })?;
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn send_authenticated(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse> {
        let response = self.attempt(method, url, body)?;
        if response.status == 401 {
            debug!(
                target: "restq::connection",
                url = %url,
                "token rejected server-side; refreshing and retrying once"
            );
            self.tokens.invalidate();
            return self.attempt(method, url, body);
        }
        Ok(response)
    }

    /// One authenticated attempt, inside the rate-limit retry loop. The
    /// token read path depends on the threading mode: multi-threaded
    /// connections pay for single-flight, single-threaded ones do not.
    fn attempt(
        &self,
        method: Method,
        url: &Url,
        body: Option<&serde_json::Value>,
    ) -> Result<HttpResponse> {
        let token = if self.multi_threaded {
            self.tokens.token_synchronized()?
        } else {
            self.tokens.token()?
        };
        let mut request = HttpRequest::new(method, url.clone())
            .header("Authorization", self.tokens.scheme().header_value(&token))
            .header("Accept", "application/json");
        request.body = body.cloned();
        retry::execute_with_retry(self.transport.as_ref(), &request, &self.retry)
    }
}

// ── Builder ─────────────────────────────────────────────────────────────

/// Builds a [`Connection`].
///
/// Credential precedence: a pre-issued [`token`](Self::token) wins over
/// [`credentials`](Self::credentials); supplying neither fails the build —
/// a connection never proceeds unauthenticated.
pub struct ConnectionBuilder {
    base_url: String,
    transport: Option<Arc<dyn HttpTransport>>,
    scheme: TokenScheme,
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tenant: Option<String>,
    token_endpoint: Option<String>,
    multi_threaded: bool,
    retry: RetryConfig,
}

impl ConnectionBuilder {
    /// Starts a builder for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        ConnectionBuilder {
            base_url: base_url.into(),
            transport: None,
            scheme: TokenScheme::Bearer,
            token: None,
            username: None,
            password: None,
            tenant: None,
            token_endpoint: None,
            multi_threaded: false,
            retry: RetryConfig::default(),
        }
    }

    /// Uses a custom transport. Defaults to [`ReqwestTransport`].
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the `Authorization` scheme. Defaults to `Bearer`.
    pub fn scheme(mut self, scheme: TokenScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Supplies a pre-issued token. Takes precedence over username and
    /// password when both are configured.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Supplies username/password credentials, exchanged at the token
    /// endpoint on first use.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Qualifies the username with a tenant (multi-tenant backends).
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Sets the token endpoint — absolute, or a path resolved against the
    /// base URL. Required for username/password credentials.
    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = Some(endpoint.into());
        self
    }

    /// Marks the connection as shared across threads. Switches the token
    /// path to single-flight and turns on per-path request serialization.
    pub fn multi_threaded(mut self, multi_threaded: bool) -> Self {
        self.multi_threaded = multi_threaded;
        self
    }

    /// Overrides the rate-limit retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Builds the connection.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] for a malformed base URL or token
    /// endpoint, missing credentials, or password credentials without a
    /// token endpoint. [`Error::Transport`] if the default transport
    /// cannot be constructed.
    pub fn build(self) -> Result<Connection> {
        // join() treats a base without a trailing slash as a file, which
        // would drop the last path segment of every request.
        let mut base = self.base_url;
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| Error::config(format!("invalid base URL '{base}': {e}")))?;

        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let credentials = if let Some(token) = self.token {
            Credentials::Token(token)
        } else {
            match (self.username, self.password) {
                (Some(username), Some(password)) => Credentials::Password {
                    username,
                    password,
                    tenant: self.tenant,
                },
                _ => {
                    return Err(Error::config(
                        "no credentials: supply a token or username + password",
                    ))
                }
            }
        };

        let endpoint = match self.token_endpoint {
            None => None,
            Some(e) => Some(match Url::parse(&e) {
                Ok(absolute) => absolute,
                Err(_) => base_url.join(e.trim_start_matches('/')).map_err(|err| {
                    Error::config(format!("invalid token endpoint '{e}': {err}"))
                })?,
            }),
        };

        let tokens = TokenFactory::new(Arc::clone(&transport), self.scheme, endpoint, credentials)?;
        Ok(Connection {
            transport,
            base_url,
            tokens,
            retry: self.retry,
            multi_threaded: self.multi_threaded,
            cache: ResponseCache::new(),
            path_locks: PathLocks::default(),
        })
    }
}
