//! Grant acquisition and the expiry sweep.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use drawkeeper::error::{CoreError, DispatchError};
use drawkeeper::grant::reconciler::{GrantReconciler, SweepReport};
use drawkeeper::grant::GrantService;
use drawkeeper::model::{GrantSpec, NewGrant, Target};
use drawkeeper::storage::{GrantStore, SqliteStore};

use common::{store, FlakyStore, RecordingDispatcher, NOW};

fn grant_spec(owner: &str, duration: Option<&str>) -> GrantSpec {
    GrantSpec {
        owner_id: owner.to_string(),
        scope_id: "g1".to_string(),
        kind: "role".to_string(),
        capability_id: "vip-role".to_string(),
        name: "VIP".to_string(),
        duration: duration.map(str::to_string),
    }
}

fn seed(store: &SqliteStore, owner: &str, expires: Option<i64>) -> i64 {
    store
        .insert_grant(&NewGrant {
            owner_id: owner.to_string(),
            scope_id: "g1".to_string(),
            kind: "role".to_string(),
            capability_id: format!("cap-{}", owner),
            name: String::new(),
            expires,
        })
        .unwrap()
        .id
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn acquire_applies_then_records() {
    let store = store();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let svc = GrantService::new(store.clone(), dispatcher.clone());

    let grant = svc.acquire_at(grant_spec("u1", Some("1d")), NOW).await.unwrap();
    assert_eq!(grant.expires, Some(NOW + 86_400));
    assert_eq!(grant.capability_id, "vip-role");

    let calls = dispatcher.calls("grant");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target, Target { scope_id: "g1".to_string(), member_id: "u1".to_string() });
    assert_eq!(svc.list("u1", "g1").unwrap(), vec![grant]);
}

#[tokio::test]
async fn acquire_without_duration_is_permanent() {
    let svc = GrantService::new(store(), Arc::new(RecordingDispatcher::default()));
    let grant = svc.acquire_at(grant_spec("u1", None), NOW).await.unwrap();
    assert_eq!(grant.expires, None);
}

#[tokio::test]
async fn refused_grant_is_not_recorded() {
    let dispatcher = Arc::new(RecordingDispatcher::failing(DispatchError::PermissionDenied(
        "role above bot".to_string(),
    )));
    let svc = GrantService::new(store(), dispatcher);

    let res = svc.acquire_at(grant_spec("u1", Some("1h")), NOW).await;
    assert!(matches!(res, Err(CoreError::Dispatch(DispatchError::PermissionDenied(_)))));
    assert!(svc.list("u1", "g1").unwrap().is_empty());
}

#[tokio::test]
async fn bad_duration_never_reaches_the_platform() {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let svc = GrantService::new(store(), dispatcher.clone());
    let res = svc.acquire_at(grant_spec("u1", Some("1x")), NOW).await;
    assert!(matches!(res, Err(CoreError::Validation(_))));
    assert!(dispatcher.calls("grant").is_empty());
}

// ---------------------------------------------------------------------------
// Expiry sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expired_grant_removed_exactly_once() {
    let store = store();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let id = seed(&store, "u1", Some(NOW - 1));
    let reconciler = GrantReconciler::new(store.clone(), dispatcher.clone());

    let first = reconciler.tick(NOW).await.unwrap();
    assert_eq!(first, SweepReport { expired: 1, removed: 1, failed: 0, revoke_failures: 0 });
    let second = reconciler.tick(NOW).await.unwrap();
    assert_eq!(second, SweepReport::default());

    let revokes = dispatcher.calls("revoke");
    assert_eq!(revokes.len(), 1);
    assert_eq!(revokes[0].capability_id, "cap-u1");
    assert!(!store.delete_grant(id).unwrap());
}

#[tokio::test]
async fn permanent_and_future_grants_are_left_alone() {
    let store = store();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    seed(&store, "forever", None);
    seed(&store, "later", Some(NOW + 60));
    let reconciler = GrantReconciler::new(store.clone(), dispatcher.clone());

    assert_eq!(reconciler.tick(NOW).await.unwrap().expired, 0);
    // far future: only the dated grant qualifies
    let report = reconciler.tick(i64::MAX).await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(store.grants_for("forever", "g1").unwrap().len(), 1);
    assert!(dispatcher.calls("revoke").iter().all(|c| c.capability_id == "cap-later"));
}

#[tokio::test]
async fn failed_revoke_still_deletes() {
    let store = store();
    let dispatcher = Arc::new(RecordingDispatcher::failing(DispatchError::TargetMissing(
        "member left".to_string(),
    )));
    seed(&store, "gone", Some(NOW - 10));
    let reconciler = GrantReconciler::new(store.clone(), dispatcher.clone());

    let report = reconciler.tick(NOW).await.unwrap();
    assert_eq!(report, SweepReport { expired: 1, removed: 1, failed: 0, revoke_failures: 1 });
    assert!(store.grants_for("gone", "g1").unwrap().is_empty());
    // no retry of the revoke on later passes
    reconciler.tick(NOW + 60).await.unwrap();
    assert_eq!(dispatcher.calls("revoke").len(), 1);
}

#[tokio::test]
async fn stalled_revoke_times_out() {
    let store = store();
    let dispatcher = Arc::new(RecordingDispatcher::slow(Duration::from_secs(5)));
    seed(&store, "u1", Some(NOW - 1));
    let reconciler = GrantReconciler::new(store.clone(), dispatcher)
        .with_dispatch_timeout(Duration::from_millis(20));

    let report = reconciler.tick(NOW).await.unwrap();
    assert_eq!((report.removed, report.revoke_failures), (1, 1));
}

#[tokio::test]
async fn overlapping_sweeps_revoke_once() {
    let store = store();
    let dispatcher = Arc::new(RecordingDispatcher::default());
    for i in 0..10 {
        seed(&store, &format!("u{}", i), Some(NOW - 5));
    }
    let a = GrantReconciler::new(store.clone(), dispatcher.clone());
    let b = GrantReconciler::new(store.clone(), dispatcher.clone());

    let (ra, rb) = tokio::join!(a.tick(NOW), b.tick(NOW));
    assert_eq!(ra.unwrap().removed + rb.unwrap().removed, 10);
    assert_eq!(dispatcher.calls("revoke").len(), 10);
}

#[tokio::test]
async fn sweep_isolates_record_failures() {
    let flaky = Arc::new(FlakyStore::new(store()));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let stuck = seed(&flaky.inner, "stuck", Some(NOW - 1));
    seed(&flaky.inner, "fine", Some(NOW - 1));
    flaky.fail_grants.lock().unwrap().insert(stuck);
    let reconciler = GrantReconciler::new(flaky.clone(), dispatcher.clone());

    let report = reconciler.tick(NOW).await.unwrap();
    assert_eq!((report.expired, report.removed, report.failed), (2, 1, 1));
    assert_eq!(dispatcher.calls("revoke").len(), 1);

    flaky.fail_grants.lock().unwrap().clear();
    let report = reconciler.tick(NOW).await.unwrap();
    assert_eq!((report.expired, report.removed), (1, 1));
    assert_eq!(dispatcher.calls("revoke").len(), 2);
}

#[tokio::test]
async fn sweep_aborts_when_store_is_down() {
    let flaky = Arc::new(FlakyStore::new(store()));
    let dispatcher = Arc::new(RecordingDispatcher::default());
    seed(&flaky.inner, "u1", Some(NOW - 1));
    flaky.fail_queries.store(true, Ordering::SeqCst);

    let res = GrantReconciler::new(flaky.clone(), dispatcher.clone()).tick(NOW).await;
    assert!(matches!(res, Err(e) if e.is_store_unavailable()));
    assert!(dispatcher.calls("revoke").is_empty());
    assert_eq!(flaky.inner.grants_for("u1", "g1").unwrap().len(), 1);
}
