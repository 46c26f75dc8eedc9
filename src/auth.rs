//! Authentication-token lifecycle.
//!
//! A [`TokenFactory`] owns the token state of one connection and walks it
//! through `NoToken → Valid → Expired → Valid (refreshed) → … → Revoked`.
//! Credentials are exchanged at a token endpoint (basic-auth for
//! username/password) or passed through unchanged for a pre-issued token.
//! The cached record is read-mostly and shared across every thread using
//! the connection.
//!
//! Two read paths exist on purpose:
//! - [`TokenFactory::token`] — no cross-call locking; for single-threaded
//!   connections that should not pay for synchronization they don't need.
//! - [`TokenFactory::token_synchronized`] — single-flight: when several
//!   threads race an expired token, exactly one performs the exchange and
//!   the rest block until it publishes the new record.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::lock;
use crate::transport::{HttpRequest, HttpTransport, Method};

/// Safety buffer subtracted from the server-reported lifetime so a request
/// never races the expiry boundary with a token that dies in flight.
const EXPIRY_BUFFER_SECS: u64 = 60;

/// Token lifetime assumed when the exchange response carries no expiry.
const DEFAULT_LIFETIME_SECS: u64 = 3600;

// ── Schemes and credentials ─────────────────────────────────────────────

/// How the token is presented in the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScheme {
    /// `Authorization: Bearer <token>` (protocol A family).
    Bearer,
    /// `Authorization: FortifyToken <token>` (protocol B family).
    FortifyToken,
}

impl TokenScheme {
    /// Renders the full `Authorization` header value for `token`.
    pub fn header_value(&self, token: &str) -> String {
        match self {
            TokenScheme::Bearer => format!("Bearer {token}"),
            TokenScheme::FortifyToken => format!("FortifyToken {token}"),
        }
    }
}

/// The credential material a connection was configured with.
///
/// Precedence is enforced at connection build time: a pre-issued token wins
/// over username/password, and supplying neither is a configuration error —
/// the engine never proceeds unauthenticated.
#[derive(Clone)]
pub enum Credentials {
    /// A pre-issued token, used as-is. Never exchanged, never revoked.
    Token(String),
    /// Username and password, exchanged at the token endpoint via basic
    /// auth. Multi-tenant backends additionally qualify the username with
    /// a tenant (`tenant\username`).
    Password {
        /// Account user name.
        username: String,
        /// Account password.
        password: String,
        /// Optional tenant qualifier for multi-tenant backends.
        tenant: Option<String>,
    },
}

impl Credentials {
    /// The value for a basic-auth `Authorization` header, or `None` for
    /// pre-issued tokens.
    fn basic_auth(&self) -> Option<String> {
        match self {
            Credentials::Token(_) => None,
            Credentials::Password {
                username,
                password,
                tenant,
            } => {
                let user = match tenant {
                    Some(t) => format!("{t}\\{username}"),
                    None => username.clone(),
                };
                Some(format!("Basic {}", BASE64.encode(format!("{user}:{password}"))))
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    // Never leak secrets through Debug output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Credentials::Token(***)"),
            Credentials::Password { username, tenant, .. } => f
                .debug_struct("Credentials::Password")
                .field("username", username)
                .field("tenant", tenant)
                .finish_non_exhaustive(),
        }
    }
}

// ── Token record ────────────────────────────────────────────────────────

/// One issued token with its local expiry deadline.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    /// The opaque token string.
    pub token: String,
    /// When the token stops being usable (already shortened by the safety
    /// buffer). `None` means it never expires locally (pre-issued tokens).
    pub expires_at: Option<Instant>,
}

impl TokenRecord {
    /// Valid iff now is before the (buffered) expiry deadline.
    pub fn is_valid(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }
}

// ── Factory ─────────────────────────────────────────────────────────────

/// Owns and refreshes the token state of one connection.
pub struct TokenFactory {
    transport: Arc<dyn HttpTransport>,
    scheme: TokenScheme,
    /// Token endpoint; required for password credentials, used for
    /// best-effort revocation too. Pre-issued tokens may omit it.
    endpoint: Option<Url>,
    credentials: Credentials,
    record: Mutex<Option<TokenRecord>>,
    /// Single-flight gate: held across the network exchange by the one
    /// refresher; waiters re-check the record after acquiring it.
    refresh_gate: Mutex<()>,
}

impl std::fmt::Debug for TokenFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenFactory")
            .field("scheme", &self.scheme)
            .field("credentials", &self.credentials)
            .field("endpoint", &self.endpoint.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

impl TokenFactory {
    /// Creates a factory.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] when password credentials are supplied
    /// without a token endpoint to exchange them at.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        scheme: TokenScheme,
        endpoint: Option<Url>,
        credentials: Credentials,
    ) -> Result<Self> {
        if matches!(credentials, Credentials::Password { .. }) && endpoint.is_none() {
            return Err(Error::config(
                "username/password credentials require a token endpoint",
            ));
        }
        Ok(TokenFactory {
            transport,
            scheme,
            endpoint,
            credentials,
            record: Mutex::new(None),
            refresh_gate: Mutex::new(()),
        })
    }

    /// The header scheme this factory issues tokens for.
    pub fn scheme(&self) -> TokenScheme {
        self.scheme
    }

    /// Returns a valid token, performing a credential exchange when no
    /// valid record is cached. Not single-flight: two threads racing an
    /// expired token may both exchange. Use on single-threaded connections.
    pub fn token(&self) -> Result<String> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }
        self.refresh()
    }

    /// Same contract as [`token`](Self::token), but single-flight: under
    /// concurrent callers exactly one exchange is issued and every caller
    /// observes the record it published.
    pub fn token_synchronized(&self) -> Result<String> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }
        let _flight = lock(&self.refresh_gate);
        // Re-check: the winner of the race has already refreshed by the
        // time a waiter gets the gate.
        if let Some(token) = self.cached() {
            return Ok(token);
        }
        self.refresh()
    }

    /// Drops the cached record so the next read performs a fresh exchange.
    /// Used when the server rejects a token (401) before the local expiry
    /// tracking caught it.
    pub fn invalidate(&self) {
        *lock(&self.record) = None;
    }

    /// Best-effort revocation of an exchanged token. Pre-issued tokens are
    /// not ours to revoke. Failures are logged and swallowed — revocation
    /// must never prevent a connection from closing.
    pub fn revoke(&self) {
        if matches!(self.credentials, Credentials::Token(_)) {
            return;
        }
        let Some(endpoint) = &self.endpoint else {
            return;
        };
        let Some(record) = lock(&self.record).take() else {
            return;
        };
        let request = HttpRequest::new(Method::Delete, endpoint.clone())
            .header("Authorization", self.scheme.header_value(&record.token));
        match self.transport.execute(&request) {
            Ok(resp) if resp.is_success() => debug!(target: "restq::auth", "token revoked"),
            Ok(resp) => warn!(
                target: "restq::auth",
                status = resp.status,
                "token revocation rejected; continuing close"
            ),
            Err(err) => warn!(
                target: "restq::auth",
                error = %err,
                "token revocation failed; continuing close"
            ),
        }
    }

    fn cached(&self) -> Option<String> {
        lock(&self.record)
            .as_ref()
            .filter(|r| r.is_valid())
            .map(|r| r.token.clone())
    }

    /// Performs the credential exchange and publishes the new record.
    fn refresh(&self) -> Result<String> {
        let record = match &self.credentials {
            // Pass-through: re-publish the configured token. It has no
            // local expiry; if the server rejects it there is nothing to
            // refresh it into.
            Credentials::Token(token) => TokenRecord {
                token: token.clone(),
                expires_at: None,
            },
            Credentials::Password { .. } => self.exchange()?,
        };
        let token = record.token.clone();
        *lock(&self.record) = Some(record);
        Ok(token)
    }

    fn exchange(&self) -> Result<TokenRecord> {
        // new() guarantees an endpoint exists for password credentials.
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            Error::config("username/password credentials require a token endpoint")
        })?;
        let basic = self.credentials.basic_auth().ok_or_else(|| {
            Error::config("no exchangeable credentials configured")
        })?;

        debug!(target: "restq::auth", endpoint = %endpoint, "exchanging credentials for token");
        let mut request = HttpRequest::new(Method::Post, endpoint.clone())
            .header("Authorization", basic)
            .header("Accept", "application/json");
        request.form = Some(vec![(
            "grant_type".to_string(),
            "password".to_string(),
        )]);
        let response = self.transport.execute(&request)?;

        // Preserve the body on failure — token endpoints put their
        // diagnostic codes there.
        if !response.is_success() {
            return Err(Error::Api {
                status: response.status,
                body: response.body,
            });
        }

        let json: serde_json::Value = serde_json::from_str(&response.body)?;
        let token = extract_token(&json).ok_or_else(|| {
            Error::decode("token endpoint response carries no token field")
        })?;
        let lifetime = extract_expires_in(&json)
            .unwrap_or(DEFAULT_LIFETIME_SECS)
            .saturating_sub(EXPIRY_BUFFER_SECS);
        Ok(TokenRecord {
            token,
            expires_at: Some(Instant::now() + Duration::from_secs(lifetime)),
        })
    }
}

/// Pulls the token string out of an exchange response. Both backend
/// families are covered: `access_token` (OAuth-style), top-level `token`,
/// and the enveloped `data.token`.
fn extract_token(json: &serde_json::Value) -> Option<String> {
    for candidate in [&json["access_token"], &json["token"], &json["data"]["token"]] {
        if let Some(s) = candidate.as_str() {
            return Some(s.to_string());
        }
    }
    None
}

/// Pulls the lifetime in seconds out of an exchange response, wherever the
/// backend put it.
fn extract_expires_in(json: &serde_json::Value) -> Option<u64> {
    for candidate in [&json["expires_in"], &json["data"]["expires_in"]] {
        if let Some(n) = candidate.as_u64() {
            return Some(n);
        }
    }
    None
}
