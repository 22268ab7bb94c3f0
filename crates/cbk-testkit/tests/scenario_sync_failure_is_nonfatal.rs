//! Inventory sync is a best-effort side effect.
//!
//! GREEN when:
//! - A failing sync target does not fail the submission; the settlement
//!   persists and the error is reported in the response.
//! - The failure is recorded in the audit log.
//! - A later submission pushes again once the target recovers.

use chrono::{DateTime, Duration, Utc};

use cbk_audit::{AuditKind, ChainStatus};
use cbk_runtime::SubmitRequest;
use cbk_schemas::{MaterialId, PhysicalInput};
use cbk_testkit::{revenue_of, rig};

const SUGAR: MaterialId = MaterialId(1097);

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
async fn settlement_survives_a_dead_sync_target() {
    let rig = rig();
    rig.sync.set_failing(true);

    let out = rig.manager.submit(req(10.0, true), t0()).await.unwrap();
    assert!(out.sync_error.is_some(), "failure is reported, not fatal");
    assert_eq!(rig.store.settlement_count().await, 1);
    assert!(rig.sync.pushes().is_empty());

    // Bootstrap + sync-failure events, chain intact.
    let content = std::fs::read_to_string(&rig.audit_path).unwrap();
    assert!(matches!(
        cbk_audit::verify_chain_str(&content).unwrap(),
        ChainStatus::Intact { events: 2 }
    ));
    let kinds: Vec<AuditKind> = content
        .lines()
        .map(|l| serde_json::from_str::<cbk_audit::AuditEvent>(l).unwrap().kind)
        .collect();
    assert_eq!(kinds, vec![AuditKind::Bootstrap, AuditKind::SyncFailure]);

    // Target recovers; the next settlement pushes its closing stock.
    rig.sync.set_failing(false);
    rig.sales.set_revenue(revenue_of(0.0, &[]));
    let out = rig
        .manager
        .submit(req(8.0, false), t0() + Duration::days(1))
        .await
        .unwrap();
    assert!(out.sync_error.is_none());
    let pushes = rig.sync.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].1[&SUGAR], 8.0);
}
