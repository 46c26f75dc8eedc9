//! Integration tests for on-demand properties flowing through the query
//! pipeline: resolution on first read, memoization, serialization
//! behavior, and failure policies.

mod common;

use common::{connection, json_response, MockTransport};
use restq::document::Value;
use restq::error::Error;
use restq::lazy::{OnDemandEnricher, OnDemandPolicy};
use restq::paging::OffsetLimit;
use restq::query::Query;
use std::sync::Arc;

/// Serves a two-item collection plus a detail endpoint per item.
fn detail_server() -> Arc<MockTransport> {
    MockTransport::new(|req, _| {
        let path = req.url.path();
        if let Some(rest) = path.strip_suffix("/details") {
            let id = rest.rsplit('/').next().unwrap_or("?");
            json_response(200, serde_json::json!({ "note": format!("detail-{id}") }))
        } else {
            json_response(
                200,
                serde_json::json!({
                    "items": [{ "id": 1 }, { "id": 2 }],
                    "totalCount": 2
                }),
            )
        }
    })
}

fn issues_with_details(
    conn: Arc<restq::connection::Connection>,
    policy: OnDemandPolicy,
) -> restq::document::DocumentList {
    Query::builder(conn.clone())
        .append_path("api/issues")
        .paging(OffsetLimit)
        .pre_processor(OnDemandEnricher::query(
            "details",
            "api/issues/${id}/details",
            conn,
            policy,
        ))
        .build()
        .unwrap()
        .get_all()
        .unwrap()
}

#[test]
fn listing_installs_the_property_without_fetching_it() {
    let transport = detail_server();
    let conn = connection(transport.clone());

    let all = issues_with_details(conn, OnDemandPolicy::Fail);

    assert_eq!(all.len(), 2);
    assert_eq!(transport.hits(), 1, "no detail request until someone reads the property");
    assert!(all.first().unwrap().raw("details").is_some_and(Value::is_lazy));
}

#[test]
fn first_read_resolves_and_later_reads_are_memoized() {
    let transport = detail_server();
    let conn = connection(transport.clone());

    let all = issues_with_details(conn, OnDemandPolicy::Fail);
    let issue = all.first().unwrap();

    let first = issue.get("details").unwrap().expect("resolved value");
    let second = issue.get("details").unwrap().expect("resolved value");

    assert_eq!(transport.hits(), 2, "one listing request plus exactly one detail request");
    match (&first, &second) {
        (Value::Doc(a), Value::Doc(b)) => {
            assert_eq!(a.get_str("note").unwrap().as_deref(), Some("detail-1"));
            assert_eq!(b.get_str("note").unwrap().as_deref(), Some("detail-1"));
        }
        other => panic!("expected documents, got {other:?}"),
    }
}

#[test]
fn clones_share_the_resolution() {
    let transport = detail_server();
    let conn = connection(transport.clone());

    let all = issues_with_details(conn, OnDemandPolicy::Fail);
    let original = all.first().unwrap().clone();
    let copy = original.clone();

    original.get("details").unwrap();
    copy.get("details").unwrap();

    assert_eq!(
        transport.hits(),
        2,
        "a clone made before resolution still shares the memoized slot"
    );
}

#[test]
fn serialization_never_triggers_resolution() {
    let transport = detail_server();
    let conn = connection(transport.clone());

    let all = issues_with_details(conn, OnDemandPolicy::Fail);
    let issue = all.first().unwrap();

    let json = issue.to_json();
    assert_eq!(transport.hits(), 1, "to_json must not perform I/O");
    assert_eq!(
        json.get("details"),
        Some(&serde_json::Value::Null),
        "an unresolved property serializes as null"
    );

    issue.get("details").unwrap();
    let json = issue.to_json();
    assert_eq!(
        json.get("details").and_then(|d| d.get("note")),
        Some(&serde_json::json!("detail-1")),
        "a resolved property serializes as its value"
    );
}

#[test]
fn fail_policy_surfaces_the_error_and_leaves_the_slot_retryable() {
    let transport = MockTransport::new(|req, hit| {
        if req.url.path().ends_with("/details") {
            // First detail attempt fails, the retry succeeds.
            if hit == 1 {
                json_response(500, serde_json::json!({ "message": "boom" }))
            } else {
                json_response(200, serde_json::json!({ "note": "recovered" }))
            }
        } else {
            json_response(200, serde_json::json!({ "items": [{ "id": 1 }], "totalCount": 1 }))
        }
    });
    let conn = connection(transport.clone());

    let all = issues_with_details(conn, OnDemandPolicy::Fail);
    let issue = all.first().unwrap();

    let err = issue.get("details").unwrap_err();
    match &err {
        Error::OnDemand { property, .. } => assert_eq!(property, "details"),
        other => panic!("expected OnDemand error, got {other:?}"),
    }

    let value = issue.get("details").unwrap().expect("second attempt resolves");
    match value {
        Value::Doc(doc) => {
            assert_eq!(doc.get_str("note").unwrap().as_deref(), Some("recovered"))
        }
        other => panic!("expected a document, got {other:?}"),
    }
}

#[test]
fn swallowing_policy_memoizes_null_and_never_retries() {
    let transport = MockTransport::new(|req, _| {
        if req.url.path().ends_with("/details") {
            json_response(500, serde_json::json!({ "message": "boom" }))
        } else {
            json_response(200, serde_json::json!({ "items": [{ "id": 1 }], "totalCount": 1 }))
        }
    });
    let conn = connection(transport.clone());

    let all = issues_with_details(conn, OnDemandPolicy::Ignore);
    let issue = all.first().unwrap();

    assert_eq!(issue.get("details").unwrap(), Some(Value::Null));
    assert_eq!(issue.get("details").unwrap(), Some(Value::Null));
    assert_eq!(
        transport.hits(),
        2,
        "the failed resolution is memoized as null, not retried"
    );
}
