//! Unit tests for request ids and submission responses.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;

use agent_bridge::session::correlator::{Posted, RequestIds};

/// Concurrent callers never receive the same id.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ids_are_distinct() {
    let ids = Arc::new(RequestIds::new());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let ids = Arc::clone(&ids);
        handles.push(tokio::spawn(async move {
            (0..250).map(|_| ids.next_id()).collect::<Vec<_>>()
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.expect("task must not panic") {
            assert!(seen.insert(id), "id {id} handed out twice");
        }
    }
    assert_eq!(seen.len(), 16 * 250);
}

/// Ids start at 1 and increase.
#[test]
fn ids_start_at_one_and_increase() {
    let ids = RequestIds::default();
    assert_eq!(ids.next_id(), 1);
    assert_eq!(ids.next_id(), 2);
    assert_eq!(ids.next_id(), 3);
}

/// Only 200 and 202 count as acceptance.
#[test]
fn acceptance_statuses() {
    let posted = |status| Posted {
        status,
        body: String::new(),
    };
    assert!(posted(StatusCode::OK).accepted());
    assert!(posted(StatusCode::ACCEPTED).accepted());
    assert!(!posted(StatusCode::NO_CONTENT).accepted());
    assert!(!posted(StatusCode::NOT_FOUND).accepted());
    assert!(!posted(StatusCode::INTERNAL_SERVER_ERROR).accepted());
}

/// A JSON object body is an inline response; anything else is not.
#[test]
fn inline_body_detection() {
    let inline = Posted {
        status: StatusCode::OK,
        body: " {\"jsonrpc\":\"2.0\",\"id\":3,\"result\":{}}\n".into(),
    };
    assert_eq!(
        inline.inline(),
        Some(json!({"jsonrpc": "2.0", "id": 3, "result": {}}))
    );

    let accepted = Posted {
        status: StatusCode::ACCEPTED,
        body: "Accepted".into(),
    };
    assert_eq!(accepted.inline(), None);

    let broken = Posted {
        status: StatusCode::OK,
        body: "{not json".into(),
    };
    assert_eq!(broken.inline(), None);
}
