//! Typed error hierarchy for the restq crate.
//!
//! Every failure a query can produce maps to one `Error` variant, aligned
//! with a real system boundary rather than an implementation detail:
//! configuration problems surface before any network call, rate-limit
//! exhaustion only after the transparent retries have been spent, and
//! transport failures pass through unchanged. Layers that sit between the
//! caller and the wire (cache, per-path serialization) never convert an
//! error into a different kind — they propagate what they received.

use std::time::Duration;

/// Unified error type for all restq operations.
///
/// The `#[source]` attribute on inner errors enables `Error::source()`
/// chaining so callers (and logging frameworks) can traverse the full
/// cause chain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or ambiguous configuration: no credentials, no target path
    /// on a query builder, an unresolvable template value, a malformed
    /// base URL. Always raised before any network call is made.
    #[error("configuration error: {message}")]
    Configuration {
        /// Human-readable description of what is missing or ambiguous.
        message: String,
    },

    /// `get_unique()` matched more than one document. This is a caller
    /// contract violation, never retried.
    #[error("query on '{path}' matched more than one document")]
    NonUniqueResult {
        /// The query path whose result set was not unique.
        path: String,
    },

    /// The retry budget for rate-limited responses is exhausted.
    ///
    /// Surfaced only after `max_retries` transparent retries; the attempt
    /// count includes the initial request.
    #[error("rate limit exceeded after {attempts} attempts (last status {status}), slept {total_delay:?}")]
    RateLimitExceeded {
        /// Total requests issued, including the first one.
        attempts: u32,
        /// The status code of the final rate-limited response (429 or 503).
        status: u16,
        /// Cumulative time spent sleeping between attempts.
        total_delay: Duration,
    },

    /// A lazily resolved ("on-demand") property failed to load and the
    /// enrichment's error policy is [`Fail`](crate::lazy::OnDemandPolicy::Fail).
    /// Swallowing policies never produce this variant — they degrade the
    /// property to null instead.
    #[error("on-demand resolution of '{property}' failed")]
    OnDemand {
        /// The document property whose resolver failed.
        property: String,
        /// The underlying query or transport failure.
        #[source]
        source: Box<Error>,
    },

    /// The server returned a non-success HTTP status that is neither a
    /// rate-limit signal nor a recoverable 401.
    ///
    /// The full response body is preserved — vendor APIs put their
    /// diagnostic codes there and `error_for_status()`-style handling
    /// would discard them.
    #[error("API error {status}: {body}")]
    Api {
        /// The HTTP status code returned by the server.
        status: u16,
        /// The raw response body text, possibly empty.
        body: String,
    },

    /// A response (or response envelope) did not have the expected shape:
    /// a list field that is not a list, a count field that is not a
    /// number, a document that is not a JSON object.
    #[error("unexpected response shape: {message}")]
    Decode {
        /// Description of the shape mismatch.
        message: String,
    },

    /// A `process_all` callback asked to stop the pagination loop.
    /// The engine propagates this unchanged and issues no further requests.
    #[error("processing aborted: {0}")]
    Aborted(String),

    /// JSON deserialization failed while parsing a response body.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// A network-level failure (DNS, TCP, TLS, request timeout). No HTTP
    /// status is available because the request did not complete. Never
    /// retried by this layer — only rate-limit responses are.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl Error {
    /// Shorthand for an [`Error::Configuration`] with the given message.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for an [`Error::Decode`] with the given message.
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn configuration_error_displays_message() {
        let err = Error::config("no credentials supplied");
        assert!(
            err.to_string().contains("no credentials supplied"),
            "display should include the configuration detail"
        );
    }

    #[test]
    fn api_error_preserves_status_and_body() {
        let err = Error::Api {
            status: 403,
            body: r#"{"message":"Access denied to application"}"#.to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("403"), "display should include status code");
        assert!(
            msg.contains("Access denied"),
            "display should include the response body"
        );
    }

    #[test]
    fn rate_limit_error_reports_attempts() {
        let err = Error::RateLimitExceeded {
            attempts: 4,
            status: 503,
            total_delay: Duration::from_secs(3),
        };
        let msg = err.to_string();
        assert!(msg.contains('4'), "display should include attempt count");
        assert!(msg.contains("503"), "display should include last status");
    }

    #[test]
    fn on_demand_error_chains_to_cause() {
        let cause = Error::Api {
            status: 404,
            body: "not found".to_string(),
        };
        let err = Error::OnDemand {
            property: "vulnerabilityDetails".to_string(),
            source: Box::new(cause),
        };
        assert!(
            err.to_string().contains("vulnerabilityDetails"),
            "display should name the property"
        );
        // source() should reach the underlying API error.
        let src = err.source().expect("OnDemand must chain its cause");
        assert!(src.to_string().contains("404"));
    }

    #[test]
    fn parse_error_wraps_serde_json() {
        let json_err = serde_json::from_str::<String>("{{bad json}}").unwrap_err();
        let err = Error::Parse(json_err);
        assert!(err.to_string().contains("failed to parse response"));
        assert!(err.source().is_some(), "Parse should chain to serde_json");
    }

    #[test]
    fn error_is_send_and_sync() {
        // The error crosses thread boundaries when a Connection is shared.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
