//! In-process scenario tests for cbk-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket:
//! each builds `routes::build_router` over an in-memory testkit rig and
//! drives it via `tower::ServiceExt::oneshot`.
//!
//! GREEN when:
//! - /v1/health reports the service.
//! - An empty chain prepares with needs_bootstrap=true.
//! - A bootstrap submission persists and returns the baseline.
//! - A non-bootstrap submission without a chain is refused with 409.
//! - An amend by a non-privileged actor is refused with 403.
//! - An expense with an unknown category is refused with 400.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt; // oneshot

use cbk_daemon::{routes, state};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_router() -> axum::Router {
    let manager = cbk_testkit::rig().into_manager();
    let st = Arc::new(state::AppState::new(manager));
    routes::build_router(st)
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let (status, body) = call(make_router(), get("/v1/health")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "cbk-daemon");
}

#[tokio::test]
async fn empty_chain_prepares_with_needs_bootstrap() {
    let (status, body) = call(make_router(), get("/v1/settlement/prepare")).await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["needs_bootstrap"], true);
    assert!(json["previous"].is_null());
}

#[tokio::test]
async fn bootstrap_submission_persists_baseline() {
    let router = make_router();

    let (status, body) = call(
        router.clone(),
        post_json(
            "/v1/settlement/submit",
            serde_json::json!({
                "raw_input": {"raw_sugar": 4.0, "plain_buns": 20.0},
                "actor": "farooq",
                "is_bootstrap": true,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let json = parse_json(body);
    assert_eq!(json["settlement"]["status"], "bootstrap");
    assert_eq!(json["settlement"]["closing_stock"]["1097"], 4.0);
    assert_eq!(json["settlement"]["closing_stock"]["1104"], 20.0);
    assert!(json["sync_error"].is_null());

    // The baseline now shows up in history.
    let (status, body) = call(router, get("/v1/settlement/history?limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = parse_json(body);
    assert_eq!(rows.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn submission_without_chain_is_refused() {
    let (status, body) = call(
        make_router(),
        post_json(
            "/v1/settlement/submit",
            serde_json::json!({
                "raw_input": {"raw_sugar": 4.0},
                "actor": "farooq",
                "is_bootstrap": false,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let json = parse_json(body);
    assert!(
        json["error"].as_str().unwrap().contains("bootstrap"),
        "{json}"
    );
}

#[tokio::test]
async fn amend_by_wrong_actor_is_forbidden() {
    let (status, _body) = call(
        make_router(),
        post_json(
            &format!("/v1/settlement/{}/amend", uuid::Uuid::new_v4()),
            serde_json::json!({
                "actor": "farooq",
                "corrections": [
                    {"type": "closing", "material_id": 1097, "new_value": 3.0}
                ],
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_expense_category_is_rejected() {
    let (status, body) = call(
        make_router(),
        post_json(
            "/v1/expenses",
            serde_json::json!({"amount": 150.0, "category": "bribes"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json = parse_json(body);
    assert!(json["error"].as_str().unwrap().contains("category"), "{json}");
}

#[tokio::test]
async fn vessels_roundtrip_through_the_registry() {
    let router = make_router();

    let (status, _) = call(
        router.clone(),
        post_json(
            "/v1/vessels",
            serde_json::json!({
                "code": "CTR-MILK-2",
                "name": "Spare Counter Samawar",
                "liquid_type": "boiled_milk",
                "location": "counter",
                "tare_kg": 9.4,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(router, get("/v1/vessels")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = parse_json(body);
    assert_eq!(rows[0]["code"], "CTR-MILK-2");
    assert_eq!(rows[0]["tare_kg"], 9.4);
}

#[tokio::test]
async fn catalog_endpoint_serves_the_registry() {
    let (status, body) = call(make_router(), get("/v1/catalog")).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert!(json["materials"]["1097"]["name"]
        .as_str()
        .unwrap()
        .contains("Sugar"));
    assert!(json["fields"]["tea_decoction"].is_object());
}
