//! Integration tests for the token lifecycle under concurrency: a burst
//! of threads needing a token must produce exactly one exchange.

mod common;

use common::{json_response, MockTransport};
use restq::connection::Connection;
use restq::retry::RetryConfig;
use std::sync::Arc;
use std::thread;

/// Serves the token endpoint with a token stamped with the hit number,
/// so every distinct exchange is observable in the token text.
fn token_server() -> Arc<MockTransport> {
    MockTransport::new(|req, hit| {
        assert!(
            req.url.path().ends_with("/tokens"),
            "only the token endpoint should be hit, got {}",
            req.url
        );
        json_response(
            200,
            serde_json::json!({ "access_token": format!("tok-{hit}"), "expires_in": 3600 }),
        )
    })
}

fn password_connection(transport: Arc<MockTransport>) -> Arc<Connection> {
    Arc::new(
        Connection::builder("https://api.example.test/api/v1")
            .transport(transport)
            .credentials("auditor", "s3cret")
            .token_endpoint("tokens")
            .multi_threaded(true)
            .retry(RetryConfig::disabled())
            .build()
            .expect("test connection"),
    )
}

#[test]
fn fifty_threads_share_a_single_token_exchange() {
    let transport = token_server();
    let conn = password_connection(transport.clone());

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let conn = conn.clone();
            thread::spawn(move || conn.token_factory().token_synchronized().unwrap())
        })
        .collect();
    let tokens: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(transport.hits(), 1, "one exchange serves the whole burst");
    assert!(
        tokens.iter().all(|t| t == "tok-0"),
        "every thread must see the same token, got {tokens:?}"
    );
}

#[test]
fn invalidation_forces_a_fresh_exchange() {
    let transport = token_server();
    let conn = password_connection(transport.clone());

    let first = conn.token_factory().token_synchronized().unwrap();
    let again = conn.token_factory().token_synchronized().unwrap();
    assert_eq!(first, again, "a valid cached token is reused");
    assert_eq!(transport.hits(), 1);

    conn.token_factory().invalidate();
    let fresh = conn.token_factory().token_synchronized().unwrap();
    assert_eq!(fresh, "tok-1");
    assert_eq!(transport.hits(), 2);
}

#[test]
fn exchange_posts_basic_credentials() {
    let transport = token_server();
    let conn = password_connection(transport.clone());

    conn.token_factory().token_synchronized().unwrap();

    let requests = transport.requests();
    let exchange = &requests[0];
    assert_eq!(exchange.method.as_str(), "POST");
    let authorization = exchange
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value.clone())
        .expect("exchange carries basic credentials");
    assert!(
        authorization.starts_with("Basic "),
        "got {authorization:?}"
    );
    assert!(exchange.form.is_some(), "token exchange is a form post");
}

#[test]
fn pre_issued_tokens_never_touch_the_token_endpoint() {
    let transport = MockTransport::new(|req, _| {
        panic!("no request expected, got {} {}", req.method, req.url);
    });
    let conn = Arc::new(
        Connection::builder("https://api.example.test/api/v1")
            .transport(transport.clone())
            .token("pre-issued")
            .build()
            .expect("test connection"),
    );

    assert_eq!(conn.token_factory().token_synchronized().unwrap(), "pre-issued");
    assert_eq!(transport.hits(), 0);
}
