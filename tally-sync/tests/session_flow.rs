//! End-to-end session flows: scripted backend, in-process hub.

mod common;

use std::sync::Arc;

use tokio::time::{timeout, Duration};

use common::{dead_hub_url, eventually, FakeHub, MockApi};
use tally_core::{ItemId, OperatingGroupId, ScanResponse, ScanStatus, SessionId, StateId, ZoneId};
use tally_sync::{
    ApiError, FinishFailure, HubClient, HubConfig, SessionConfig, SessionError, SessionManager,
    SessionRole, StaticToken, StoreHandle, SubmissionError,
};

fn manager(api: &Arc<MockApi>, hub_url: String) -> SessionManager {
    let channel = HubClient::new(
        HubConfig::for_testing(hub_url),
        Arc::new(StaticToken::new("token")),
    );
    SessionManager::new(
        api.clone(),
        Arc::new(channel),
        StoreHandle::new(),
        SessionConfig::default(),
    )
}

async fn wait_until_scanned(manager: &SessionManager, item: i64) {
    let store = manager.store().clone();
    eventually(|| {
        let store = store.clone();
        async move { store.is_scanned(ItemId(item)).await }
    })
    .await;
}

#[tokio::test]
async fn test_host_counts_broadcasts_once_per_item() {
    let hub = FakeHub::start().await;
    let api = MockApi::new();
    let host = manager(&api, hub.url());

    let ticket = host
        .start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();
    assert_eq!(ticket.session_id, SessionId(101));
    assert_eq!(ticket.invitation_code.as_deref(), Some("D8K4"));
    assert_eq!(hub.joins(), vec!["101".to_string()]);

    // 4 distinct items, one redelivered, one event for another session
    for item in [1, 2, 4, 2] {
        hub.confirm(101, item);
    }
    hub.push(
        "101",
        "ItemConfirmed",
        serde_json::json!({"itemId": 3, "sessionId": 202}),
    );
    hub.confirm(101, 5);
    wait_until_scanned(&host, 5).await;

    let store = host.store();
    assert_eq!(store.scanned_count().await, 4);
    assert_eq!(store.expected_count().await, 5);
    assert!(!store.is_scanned(ItemId(3)).await);

    let report = host.completion().await;
    assert!(!report.is_complete);
    assert_eq!(report.missing, 1);
    assert_eq!(report.to_string(), "4 of 5 scanned, 1 missing");

    let view = store.derived_view().await;
    assert_eq!(view.categories[0].scanned_count, 2);
    assert_eq!(view.categories[1].scanned_count, 2);
}

#[tokio::test]
async fn test_guest_and_host_converge() {
    let hub = FakeHub::start().await;
    let api = MockApi::new();
    let host = manager(&api, hub.url());
    let guest = manager(&api, hub.url());

    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();
    let joined = guest.join_session("  d8k4 ").await.unwrap();
    assert_eq!(joined.session_id, SessionId(101));
    assert_eq!(joined.zone_id, ZoneId(3));
    assert_eq!(*api.join_codes.lock().unwrap(), vec!["D8K4".to_string()]);
    assert_eq!(guest.active_session().unwrap().role, SessionRole::Guest);

    hub.wait_for_joins(2).await;
    hub.confirm(101, 4);
    hub.confirm(101, 1);

    wait_until_scanned(&host, 1).await;
    wait_until_scanned(&guest, 1).await;
    assert!(host.store().is_scanned(ItemId(4)).await);
    assert!(guest.store().is_scanned(ItemId(4)).await);
    assert_eq!(
        host.store().derived_view().await,
        guest.store().derived_view().await
    );
}

#[tokio::test]
async fn test_correct_scan_waits_for_broadcast() {
    let hub = FakeHub::start().await;
    let api = MockApi::new();
    let host = manager(&api, hub.url());
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();

    let outcome = host.submit_scan("Code: F-1 ", StateId(1)).await.unwrap();
    assert_eq!(outcome.status, ScanStatus::Correct);
    assert_eq!(outcome.item_id, Some(ItemId(1)));
    assert_eq!(*api.scanned_codes.lock().unwrap(), vec!["F-1".to_string()]);

    // the response alone never touches the scanned set
    assert_eq!(host.store().scanned_count().await, 0);

    hub.confirm(101, 1);
    wait_until_scanned(&host, 1).await;
    assert_eq!(host.store().scanned_count().await, 1);
}

#[tokio::test]
async fn test_duplicate_outcome_is_not_a_submission_error() {
    let hub = FakeHub::start().await;
    let api = MockApi::new();
    let host = manager(&api, hub.url());
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();
    hub.confirm(101, 1);
    wait_until_scanned(&host, 1).await;

    *api.scan.lock().unwrap() = Ok(ScanResponse {
        item_id: Some(ItemId(1)),
        is_valid: false,
        status: ScanStatus::Duplicate,
    });
    let outcome = host.submit_scan("F-1", StateId(1)).await.unwrap();

    assert_eq!(outcome.status, ScanStatus::Duplicate);
    assert_eq!(outcome.feedback().message, "Item already scanned previously.");
    assert_eq!(host.store().scanned_count().await, 1);
}

#[tokio::test]
async fn test_unreachable_scan_is_submission_error() {
    let api = MockApi::new();
    let host = manager(&api, dead_hub_url().await);
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();

    *api.scan.lock().unwrap() = Err(ApiError::Transport("connection refused".into()));
    let err = host.submit_scan("F-1", StateId(1)).await.unwrap_err();

    match err {
        SessionError::Submission(submission) => {
            assert!(matches!(submission, SubmissionError::Unreachable(_)));
            assert_eq!(
                submission.user_message(),
                "Could not send the scan. Check your connection."
            );
        }
        other => panic!("expected SubmissionError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_scan_never_reaches_server() {
    let api = MockApi::new();
    let host = manager(&api, dead_hub_url().await);
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();

    let err = host.submit_scan("Code:  ", StateId(1)).await.unwrap_err();
    assert_eq!(err, SessionError::Submission(SubmissionError::EmptyCode));
    assert_eq!(api.calls_to("scan"), 0);
}

#[tokio::test]
async fn test_scan_without_session_is_rejected() {
    let api = MockApi::new();
    let idle = manager(&api, dead_hub_url().await);

    let err = idle.submit_scan("F-1", StateId(1)).await.unwrap_err();
    assert_eq!(err, SessionError::NoActiveSession);
    assert_eq!(api.calls_to("scan"), 0);
}

#[tokio::test]
async fn test_invalid_code_leaves_manager_idle() {
    let api = MockApi::new();
    *api.join.lock().unwrap() = Err(ApiError::Status {
        status: 400,
        body: r#"{"message": "Invitation code expired."}"#.into(),
    });
    let guest = manager(&api, dead_hub_url().await);

    let err = guest.join_session("OLD1").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::InvalidCode("Invitation code expired.".into())
    );
    assert!(!guest.has_active_session());
    assert!(guest.active_session().is_none());
    assert_eq!(api.calls_to("categories"), 0);
}

#[tokio::test]
async fn test_blank_code_is_rejected_locally() {
    let api = MockApi::new();
    let guest = manager(&api, dead_hub_url().await);

    let err = guest.join_session("   ").await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidCode(_)));
    assert_eq!(api.calls_to("join"), 0);
}

#[tokio::test]
async fn test_finish_without_session_makes_no_call() {
    let api = MockApi::new();
    let idle = manager(&api, dead_hub_url().await);

    let err = idle.finish_session("done").await.unwrap_err();
    assert_eq!(err, SessionError::NoActiveSession);
    assert_eq!(api.calls_to("finish"), 0);
}

#[tokio::test]
async fn test_group_join_failure_keeps_session() {
    let api = MockApi::new();
    let host = manager(&api, dead_hub_url().await);

    let ticket = timeout(
        Duration::from_secs(5),
        host.start_session(ZoneId(3), OperatingGroupId(1)),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(ticket.session_id, SessionId(101));
    assert!(host.has_active_session());
    assert_eq!(host.store().expected_count().await, 5);
}

#[tokio::test]
async fn test_missing_session_id_is_create_error() {
    let api = MockApi::new();
    *api.start.lock().unwrap() = Ok(tally_sync::api::StartResponse {
        session_id: None,
        invitation_code: None,
    });
    let host = manager(&api, dead_hub_url().await);

    let err = host
        .start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionCreate(_)));
    assert!(!host.has_active_session());
}

#[tokio::test]
async fn test_catalog_failure_keeps_session_with_error_state() {
    let api = MockApi::new();
    *api.categories.lock().unwrap() = Err(ApiError::Status {
        status: 500,
        body: String::new(),
    });
    let host = manager(&api, dead_hub_url().await);

    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();

    assert!(host.has_active_session());
    assert_eq!(
        host.store().catalog_error().await.as_deref(),
        Some("Could not load categories.")
    );
    assert!(host.store().derived_view().await.categories.is_empty());
}

#[tokio::test]
async fn test_second_start_is_already_active() {
    let api = MockApi::new();
    let host = manager(&api, dead_hub_url().await);
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();

    let err = host
        .start_session(ZoneId(4), OperatingGroupId(1))
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::AlreadyActive(SessionId(101)));
    assert_eq!(api.calls_to("start"), 1);

    let err = host.join_session("D8K4").await.unwrap_err();
    assert_eq!(err, SessionError::AlreadyActive(SessionId(101)));
}

#[tokio::test]
async fn test_finish_error_kinds_keep_session_active() {
    let api = MockApi::new();
    let host = manager(&api, dead_hub_url().await);
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();

    *api.finish.lock().unwrap() = Err(ApiError::Status {
        status: 404,
        body: String::new(),
    });
    let err = host.finish_session("").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::Finish {
            kind: FinishFailure::NotFound,
            message: "Inventory not found.".into(),
        }
    );
    assert!(host.has_active_session());

    *api.finish.lock().unwrap() = Err(ApiError::Status {
        status: 400,
        body: r#"{"message": "Observations are too long"}"#.into(),
    });
    let err = host.finish_session("x").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::Finish {
            kind: FinishFailure::InvalidData,
            message: "Observations are too long".into(),
        }
    );
    assert!(host.has_active_session());
}

#[tokio::test]
async fn test_finish_clears_session_store_and_group() {
    let hub = FakeHub::start().await;
    let api = MockApi::new();
    let host = manager(&api, hub.url());
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();
    hub.confirm(101, 2);
    wait_until_scanned(&host, 2).await;

    host.finish_session("All rooms checked").await.unwrap();

    assert!(!host.has_active_session());
    assert_eq!(host.store().scanned_count().await, 0);
    assert_eq!(host.store().expected_count().await, 0);
    assert!(host.channel().joined_groups().await.is_empty());
    assert_eq!(api.calls_to("finish"), 1);

    // late broadcasts for the closed session are ignored
    hub.confirm(101, 3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(host.store().scanned_count().await, 0);
}

#[tokio::test]
async fn test_reset_returns_to_idle() {
    let api = MockApi::new();
    let host = manager(&api, dead_hub_url().await);
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();

    host.reset().await;

    assert!(!host.has_active_session());
    assert_eq!(host.store().expected_count().await, 0);
    assert_eq!(api.calls_to("finish"), 0);
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();
    assert!(host.has_active_session());
}

#[tokio::test]
async fn test_overlapping_starts_create_one_server_session() {
    let api = MockApi::new();
    *api.start_delay.lock().unwrap() = Duration::from_millis(100);
    let host = manager(&api, dead_hub_url().await);

    let (first, second) = tokio::join!(
        host.start_session(ZoneId(3), OperatingGroupId(1)),
        host.start_session(ZoneId(3), OperatingGroupId(1)),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| *r == Err(SessionError::AlreadyActive(SessionId(101)))));
    assert_eq!(api.calls_to("start"), 1);
}

#[tokio::test]
async fn test_join_outage_is_server_error_not_invalid_code() {
    let api = MockApi::new();
    *api.join.lock().unwrap() = Err(ApiError::Status {
        status: 503,
        body: r#"{"title": "Service Unavailable"}"#.into(),
    });
    let guest = manager(&api, dead_hub_url().await);

    let err = guest.join_session("D8K4").await.unwrap_err();
    assert_eq!(
        err,
        SessionError::Server {
            status: 503,
            message: "Service Unavailable".into(),
        }
    );
    assert!(!guest.has_active_session());
}

#[tokio::test]
async fn test_untagged_event_from_finished_session_is_ignored() {
    let hub = FakeHub::start().await;
    let api = MockApi::new();
    let host = manager(&api, hub.url());
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();
    host.finish_session("").await.unwrap();

    *api.start.lock().unwrap() = Ok(tally_sync::api::StartResponse {
        session_id: Some(SessionId(202)),
        invitation_code: Some("Q7M2".into()),
    });
    host.start_session(ZoneId(3), OperatingGroupId(1))
        .await
        .unwrap();
    hub.wait_for_joins(2).await;

    // the connection is still a member of group 101 on the hub
    hub.push("101", "ItemConfirmed", serde_json::json!({"itemId": 3}));
    hub.confirm(202, 4);
    wait_until_scanned(&host, 4).await;

    assert!(!host.store().is_scanned(ItemId(3)).await);
    assert_eq!(host.store().scanned_count().await, 1);
}
