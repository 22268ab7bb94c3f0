//! Expected consumption, discrepancy sign, and the runner-token carry.
//!
//! GREEN when:
//! - Expected {tea 0.1 kg} (100 units × 0.001 kg/unit) against actual
//!   {tea 0.08 kg} with no wastage yields a −0.02 kg surplus.
//! - Recorded wastage explains part of the gap before discrepancy.
//! - The flagship product's expected consumption uses
//!   `pos_qty − current_unsold + previous_unsold`.

use chrono::{DateTime, Duration, Utc};

use cbk_catalog::loader::RuntimeSettings;
use cbk_catalog::{Catalog, Product};
use cbk_runtime::SubmitRequest;
use cbk_schemas::{MaterialId, PhysicalInput, ProductId, TokenCounts, WastageItem};
use cbk_testkit::{revenue_of, rig_with};

const TEA: MaterialId = MaterialId(1098);
const CUTLET: MaterialId = MaterialId(1106);
const MILK: MaterialId = MaterialId(1095);

fn t0() -> DateTime<Utc> {
    "2026-02-10T18:30:00Z".parse().unwrap()
}

/// Builtin catalog plus a plain-tea product consuming exactly 1 g/unit.
fn catalog_with_plain_tea() -> Catalog {
    let mut cat = Catalog::builtin();
    cat.products.insert(
        ProductId(3001),
        Product {
            name: "Plain Tea".to_string(),
            code: "TST-PT".to_string(),
            price: 10.0,
            materials: [(TEA, 0.001)].into_iter().collect(),
        },
    );
    cat
}

fn req(input: PhysicalInput, bootstrap: bool) -> SubmitRequest {
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
async fn surplus_discrepancy_is_negative() {
    let rig = rig_with(catalog_with_plain_tea(), RuntimeSettings::default());

    let mut input = PhysicalInput::default();
    input.set_count("raw_tea_powder", 0.2);
    rig.manager.submit(req(input, true), t0()).await.unwrap();

    // 100 plain teas sold; 0.12 kg left ⇒ actual 0.08, expected 0.1.
    rig.sales
        .set_revenue(revenue_of(1000.0, &[(3001, 100.0, 1000.0)]));
    let mut input = PhysicalInput::default();
    input.set_count("raw_tea_powder", 0.12);
    let out = rig
        .manager
        .submit(req(input, false), t0() + Duration::days(1))
        .await
        .unwrap();

    let s = &out.settlement;
    assert_eq!(s.consumption[&TEA], 0.08);
    assert_eq!(s.expected_consumption[&TEA], 0.1);
    let line = &s.discrepancy[&TEA];
    assert_eq!(line.qty, -0.02, "negative = surplus");
    // Priced at the tea fallback cost of ₹500/kg.
    assert_eq!(line.value, -10.0);
    assert_eq!(s.discrepancy_value, -10.0);
    // Surplus adds back into the adjusted figure.
    assert_eq!(s.adjusted_net_profit, s.net_profit + 10.0);
}

#[tokio::test]
async fn recorded_wastage_reduces_discrepancy() {
    let rig = rig_with(Catalog::builtin(), RuntimeSettings::default());

    let mut input = PhysicalInput::default();
    input.set_count("raw_cutlets", 10.0);
    rig.manager.submit(req(input, true), t0()).await.unwrap();

    // 3 sold, 2 dropped in the fryer, 5 left: fully explained.
    rig.sales
        .set_revenue(revenue_of(75.0, &[(1031, 3.0, 75.0)]));
    let mut input = PhysicalInput::default();
    input.set_count("raw_cutlets", 5.0);
    let mut r = req(input, false);
    r.wastage_items = vec![WastageItem::Stated {
        item: "cutlet".to_string(),
        state: "raw".to_string(),
        qty: 2.0,
        reason: "dropped".to_string(),
    }];
    let out = rig
        .manager
        .submit(r, t0() + Duration::days(1))
        .await
        .unwrap();

    let s = &out.settlement;
    assert_eq!(s.consumption[&CUTLET], 5.0);
    assert_eq!(s.expected_consumption[&CUTLET], 3.0);
    assert!(
        !s.discrepancy.contains_key(&CUTLET),
        "wastage accounts for the remaining 2 units"
    );
    // Wastage is still priced: 2 cutlets at ₹15.
    assert_eq!(s.wastage_value, 30.0);
}

#[tokio::test]
async fn token_carry_shifts_flagship_expected_consumption() {
    let rig = rig_with(Catalog::builtin(), RuntimeSettings::default());

    // Bootstrap with 5 unsold runner tokens on record.
    let mut input = PhysicalInput::default();
    input.set_count("raw_buffalo_milk", 20.0);
    let mut boot = req(input, true);
    boot.runner_tokens = TokenCounts::from([("jafar".to_string(), 5u32)]);
    rig.manager.submit(boot, t0()).await.unwrap();

    // 100 chai rung up; 3 tokens unsold tonight.
    // Effective cups brewed = 100 − 3 + 5 = 102.
    rig.sales
        .set_revenue(revenue_of(2000.0, &[(1028, 100.0, 2000.0)]));
    let mut input = PhysicalInput::default();
    input.set_count("raw_buffalo_milk", 11.0);
    let mut r = req(input, false);
    r.runner_tokens = TokenCounts::from([("jafar".to_string(), 3u32)]);
    let out = rig
        .manager
        .submit(r, t0() + Duration::days(1))
        .await
        .unwrap();

    let s = &out.settlement;
    let expected_milk = (102.0_f64 * 0.05742 * 10_000.0).round() / 10_000.0;
    assert_eq!(s.expected_consumption[&MILK], expected_milk);
    assert_eq!(s.runner_tokens_total, 3);
    assert_eq!(s.runner_tokens[&"jafar".to_string()], 3);
}
