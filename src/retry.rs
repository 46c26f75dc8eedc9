//! Rate-limit-aware retry strategy.
//!
//! Sits between the connection and the transport: a 429/503 response is
//! slept off for the server-supplied retry-after duration and retried,
//! up to a configured budget. Everything else — success, other error
//! statuses, transport failures — passes through untouched on the first
//! attempt. This layer is entirely independent of authentication state;
//! the 401 re-auth path lives in the connection, not here.

use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Fallback delay when the rate-limited response carries no usable
/// retry-after header.
const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Tuning for the rate-limit retry loop.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt. `0` disables retrying.
    pub max_retries: u32,
    /// Header carrying the server-supplied wait, in seconds. Vendors
    /// disagree on the name, so it is configurable.
    pub retry_after_header: String,
    /// Ceiling on a single sleep. A server asking for an hour gets this
    /// instead; never sleep unbounded on someone else's say-so.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            retry_after_header: "X-Rate-Limit-Reset".to_string(),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// A configuration that never retries.
    pub fn disabled() -> Self {
        RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        }
    }

    /// True when rate-limit retrying is in effect.
    pub fn enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// How long to wait before retrying `response`. The header value is
    /// seconds; missing or unparseable values fall back to one second,
    /// and everything is clamped to `max_delay`. Never negative (the
    /// parse rejects signs), never beyond the ceiling.
    fn delay_for(&self, response: &HttpResponse) -> Duration {
        let from_header = response
            .header(&self.retry_after_header)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        from_header.unwrap_or(DEFAULT_DELAY).min(self.max_delay)
    }
}

/// True for the statuses that signal rate limiting.
fn is_rate_limited(status: u16) -> bool {
    status == 429 || status == 503
}

/// Executes `request`, transparently retrying rate-limited responses.
///
/// # Errors
///
/// [`Error::RateLimitExceeded`] once the budget is spent; transport
/// failures propagate unchanged and are never retried here.
pub(crate) fn execute_with_retry(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    config: &RetryConfig,
) -> Result<HttpResponse> {
    let mut attempts: u32 = 0;
    let mut total_delay = Duration::ZERO;
    loop {
        let response = transport.execute(request)?;
        attempts += 1;
        if !is_rate_limited(response.status) {
            return Ok(response);
        }
        if attempts > config.max_retries {
            return Err(Error::RateLimitExceeded {
                attempts,
                status: response.status,
                total_delay,
            });
        }
        let delay = config.delay_for(&response);
        warn!(
            target: "restq::retry",
            status = response.status,
            attempt = attempts,
            delay_secs = delay.as_secs(),
            "rate limited; backing off"
        );
        thread::sleep(delay);
        total_delay += delay;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn limited(header: Option<(&str, &str)>) -> HttpResponse {
        let mut headers = HashMap::new();
        if let Some((k, v)) = header {
            headers.insert(k.to_ascii_lowercase(), v.to_string());
        }
        HttpResponse {
            status: 429,
            headers,
            body: String::new(),
        }
    }

    #[test]
    fn delay_reads_the_configured_header() {
        let config = RetryConfig::default();
        let resp = limited(Some(("X-Rate-Limit-Reset", "5")));
        assert_eq!(config.delay_for(&resp), Duration::from_secs(5));
    }

    #[test]
    fn delay_respects_a_custom_header_name() {
        let config = RetryConfig {
            retry_after_header: "Retry-After".to_string(),
            ..RetryConfig::default()
        };
        let resp = limited(Some(("Retry-After", "2")));
        assert_eq!(config.delay_for(&resp), Duration::from_secs(2));
    }

    #[test]
    fn missing_header_falls_back_to_one_second() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(&limited(None)), Duration::from_secs(1));
    }

    #[test]
    fn unparseable_and_negative_values_fall_back() {
        let config = RetryConfig::default();
        let garbage = limited(Some(("X-Rate-Limit-Reset", "soon")));
        assert_eq!(config.delay_for(&garbage), Duration::from_secs(1));
        // A negative duration makes no sense; the unsigned parse rejects it.
        let negative = limited(Some(("X-Rate-Limit-Reset", "-30")));
        assert_eq!(config.delay_for(&negative), Duration::from_secs(1));
    }

    #[test]
    fn delay_is_clamped_to_the_ceiling() {
        let config = RetryConfig::default();
        let resp = limited(Some(("X-Rate-Limit-Reset", "86400")));
        assert_eq!(
            config.delay_for(&resp),
            config.max_delay,
            "an hour-plus wait must be clamped"
        );
    }

    #[test]
    fn disabled_config_reports_not_enabled() {
        assert!(!RetryConfig::disabled().enabled());
        assert!(RetryConfig::default().enabled());
    }
}
