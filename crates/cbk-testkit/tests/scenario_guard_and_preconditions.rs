//! Submission preconditions.
//!
//! GREEN when:
//! - A submission inside the guard window of the previous one is refused.
//! - A second bootstrap against a live chain is refused.
//! - A failed external fetch aborts the submission with nothing persisted.
//! - A store-level chain conflict surfaces as a precondition failure.

use chrono::{DateTime, Duration, Utc};

use cbk_runtime::{RuntimeError, SubmitRequest};
use cbk_schemas::PhysicalInput;
use cbk_testkit::{revenue_of, rig};

fn t0() -> DateTime<Utc> {
    "2026-02-10T18:30:00Z".parse().unwrap()
}

fn req(sugar_kg: f64, bootstrap: bool) -> SubmitRequest {
    let mut input = PhysicalInput::default();
    input.set_count("raw_sugar", sugar_kg);
    SubmitRequest {
        raw_input: input,
        wastage_items: Vec::new(),
        runner_tokens: Default::default(),
        field_timestamps: Default::default(),
        actor: "farooq".to_string(),
        is_bootstrap: bootstrap,
        notes: String::new(),
    }
}

#[tokio::test]
async fn resubmission_inside_guard_window_is_refused() {
    let rig = rig();
    rig.manager.submit(req(10.0, true), t0()).await.unwrap();

    // 90 seconds later, inside the default 120 s window: almost certainly
    // a double tap on the submit button.
    let err = rig
        .manager
        .submit(req(10.0, false), t0() + Duration::seconds(90))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Precondition(_)), "{err}");
    assert_eq!(rig.store.settlement_count().await, 1);

    // Past the window the same submission goes through.
    rig.sales.set_revenue(revenue_of(0.0, &[]));
    rig.manager
        .submit(req(10.0, false), t0() + Duration::seconds(121))
        .await
        .unwrap();
    assert_eq!(rig.store.settlement_count().await, 2);
}

#[tokio::test]
async fn second_bootstrap_is_refused() {
    let rig = rig();
    rig.manager.submit(req(10.0, true), t0()).await.unwrap();

    let err = rig
        .manager
        .submit(req(8.0, true), t0() + Duration::days(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Precondition(_)));
}

#[tokio::test]
async fn missing_actor_is_a_validation_error() {
    let rig = rig();
    let mut r = req(10.0, true);
    r.actor = "  ".to_string();
    let err = rig.manager.submit(r, t0()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Validation(_)));
}

#[tokio::test]
async fn failed_sales_fetch_aborts_with_nothing_persisted() {
    let rig = rig();
    rig.manager.submit(req(10.0, true), t0()).await.unwrap();

    rig.sales.set_failing(true);
    let err = rig
        .manager
        .submit(req(9.0, false), t0() + Duration::days(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ExternalFetch(_)), "{err}");
    // No partial settlement ever lands.
    assert_eq!(rig.store.settlement_count().await, 1);

    // The source recovers; the same submission succeeds.
    rig.sales.set_failing(false);
    rig.manager
        .submit(req(9.0, false), t0() + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(rig.store.settlement_count().await, 2);
}

#[tokio::test]
async fn failed_purchase_fetch_aborts_too() {
    let rig = rig();
    rig.manager.submit(req(10.0, true), t0()).await.unwrap();

    rig.purchases.set_failing(true);
    let err = rig
        .manager
        .submit(req(9.0, false), t0() + Duration::days(1))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::ExternalFetch(_)));
    assert_eq!(rig.store.settlement_count().await, 1);
}
