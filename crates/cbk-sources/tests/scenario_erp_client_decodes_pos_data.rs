//! ERP JSON-RPC client decoding tests.
//!
//! GREEN when:
//! - Revenue splits by register, excludes complimentary orders from the
//!   total, and groups product lines.
//! - Gap-window product queries sum line quantities.
//! - An application-level RPC error surfaces as `SourceError::Api`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use httpmock::prelude::*;
use serde_json::json;

use cbk_schemas::{MaterialId, ProductId};
use cbk_sources::erp::{ErpClient, ErpConfig, ErpIds};
use cbk_sources::{SalesSource, SourceError};

fn client(server: &MockServer) -> ErpClient {
    ErpClient::new(
        ErpConfig {
            url: server.url("/jsonrpc"),
            db: "main".to_string(),
            uid: 2,
            api_key: "test-key".to_string(),
        },
        ErpIds::default(),
        BTreeMap::from([(MaterialId(1095), 80.0)]),
    )
}

fn window() -> (DateTime<Utc>, DateTime<Utc>) {
    (
        "2026-02-10T18:30:00Z".parse().unwrap(),
        "2026-02-11T18:30:00Z".parse().unwrap(),
    )
}

#[tokio::test]
async fn revenue_splits_channels_and_excludes_complimentary() {
    let server = MockServer::start();

    // Order 101: cash counter. Order 102: runner counter, paid with the
    // complimentary method — non-revenue.
    server.mock(|when, then| {
        when.method(POST)
            .path("/jsonrpc")
            .body_contains(r#""pos.order","search_read""#);
        then.status(200).json_body(json!({
            "jsonrpc": "2.0", "id": 1,
            "result": [
                {"id": 101, "config_id": [27, "Cash Counter"], "amount_total": 60.0, "payment_ids": [9001]},
                {"id": 102, "config_id": [28, "Runner Counter"], "amount_total": 20.0, "payment_ids": [9002]},
            ],
        }));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/jsonrpc")
            .body_contains(r#""pos.payment""#);
        then.status(200).json_body(json!({
            "jsonrpc": "2.0", "id": 2,
            "result": [
                {"id": 9001, "pos_order_id": [101, "Order 101"], "payment_method_id": [37, "Cash"]},
                {"id": 9002, "pos_order_id": [102, "Order 102"], "payment_method_id": [49, "Complimentary"]},
            ],
        }));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/jsonrpc")
            .body_contains(r#""pos.order.line","search_read""#);
        then.status(200).json_body(json!({
            "jsonrpc": "2.0", "id": 3,
            "result": [
                {"product_id": [1028, "Irani Chai"], "qty": 2.0, "price_subtotal_incl": 40.0},
                {"product_id": [1030, "Osmania Biscuit"], "qty": 1.0, "price_subtotal_incl": 8.0},
                {"product_id": [1028, "Irani Chai"], "qty": 1.0, "price_subtotal_incl": 12.0},
            ],
        }));
    });

    let (from, to) = window();
    let revenue = client(&server).fetch_revenue(from, to).await.unwrap();

    assert_eq!(revenue.cash_counter, 60.0);
    assert_eq!(revenue.runner_counter, 0.0);
    assert_eq!(revenue.complimentary, 20.0);
    // Total comes from billable lines only.
    assert_eq!(revenue.total, 60.0);

    let chai = &revenue.products[&ProductId(1028)];
    assert_eq!(chai.qty, 3.0);
    assert_eq!(chai.amount, 52.0);
    assert_eq!(chai.name, "Irani Chai");
}

#[tokio::test]
async fn product_sales_sum_line_quantities() {
    let server = MockServer::start();

    server.mock(|when, then| {
        when.method(POST)
            .path("/jsonrpc")
            .body_contains(r#""pos.order","search""#);
        then.status(200)
            .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": [201, 202]}));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/jsonrpc")
            .body_contains(r#""pos.order.line""#);
        then.status(200).json_body(json!({
            "jsonrpc": "2.0", "id": 2,
            "result": [
                {"product_id": [1028, "Irani Chai"], "qty": 2.0},
                {"product_id": [1028, "Irani Chai"], "qty": 1.0},
            ],
        }));
    });

    let (from, to) = window();
    let sold = client(&server)
        .fetch_product_sales(&[ProductId(1028)], from, to)
        .await
        .unwrap();
    assert_eq!(sold[&ProductId(1028)], 3.0);
}

#[tokio::test]
async fn empty_window_yields_default_revenue() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/jsonrpc");
        then.status(200)
            .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": []}));
    });

    let (from, to) = window();
    let revenue = client(&server).fetch_revenue(from, to).await.unwrap();
    assert_eq!(revenue.total, 0.0);
    assert!(revenue.products.is_empty());
}

#[tokio::test]
async fn rpc_error_surfaces_as_api_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/jsonrpc");
        then.status(200).json_body(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"message": "Odoo Server Error", "data": {"message": "Access Denied"}},
        }));
    });

    let (from, to) = window();
    let err = client(&server).fetch_revenue(from, to).await.unwrap_err();
    match err {
        SourceError::Api { message } => assert!(message.contains("Access Denied"), "{message}"),
        other => panic!("expected api error, got {other}"),
    }
}
