//! ERP-backed sources over JSON-RPC.
//!
//! The shop's POS and purchasing live in the hosted ERP; everything is
//! reached through a single `execute_kw` JSON-RPC endpoint. The API key is
//! read by the caller and passed in; do not log it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use cbk_schemas::{
    MaterialId, MaterialMap, ProductId, ProductSales, PurchaseReceipt, Revenue,
};

use crate::{InventorySync, PurchaseSource, SalesSource, SourceError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection parameters for the ERP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct ErpConfig {
    pub url: String,
    pub db: String,
    pub uid: i64,
    pub api_key: String,
}

/// ERP object ids the queries filter on. These identify *this shop's*
/// registers, warehouse and company inside the ERP.
#[derive(Debug, Clone)]
pub struct ErpIds {
    /// POS register ids per sales channel.
    pub cash_counter: i64,
    pub runner_counter: i64,
    pub delivery: i64,
    /// Payment method marking a complimentary (non-revenue) order.
    pub complimentary_method: i64,
    pub company: i64,
    /// Stock location the closing-stock push adjusts.
    pub stock_location: i64,
}

impl Default for ErpIds {
    fn default() -> Self {
        ErpIds {
            cash_counter: 27,
            runner_counter: 28,
            delivery: 29,
            complimentary_method: 49,
            company: 10,
            stock_location: 41,
        }
    }
}

/// Order states that count as realized sales.
const SALE_STATES: [&str; 4] = ["paid", "done", "invoiced", "posted"];

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ErpClient {
    http: reqwest::Client,
    config: ErpConfig,
    ids: ErpIds,
    /// Static reference costs for materials with no purchase-order price.
    fallback_costs: BTreeMap<MaterialId, f64>,
    next_rpc_id: AtomicU64,
}

impl ErpClient {
    pub fn new(config: ErpConfig, ids: ErpIds, fallback_costs: BTreeMap<MaterialId, f64>) -> Self {
        ErpClient {
            http: reqwest::Client::new(),
            config,
            ids,
            fallback_costs,
            next_rpc_id: AtomicU64::new(1),
        }
    }

    /// One `execute_kw` round trip.
    async fn call(
        &self,
        model: &str,
        method: &str,
        positional: Value,
        kwargs: Value,
    ) -> Result<Value, SourceError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": {
                "service": "object",
                "method": "execute_kw",
                "args": [
                    self.config.db,
                    self.config.uid,
                    self.config.api_key,
                    model,
                    method,
                    positional,
                    kwargs,
                ],
            },
            "id": self.next_rpc_id.fetch_add(1, Ordering::Relaxed),
        });

        let resp = self
            .http
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let body: RpcResponse = resp
            .json()
            .await
            .map_err(|e| SourceError::Decode(format!("{model}.{method}: {e}")))?;

        if let Some(err) = body.error {
            return Err(SourceError::Api {
                message: format!("{model}.{method}: {}", err.summary()),
            });
        }
        Ok(body.result.unwrap_or(Value::Null))
    }

    fn window_domain(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Value {
        json!([
            ["config_id", "in", [self.ids.cash_counter, self.ids.runner_counter, self.ids.delivery]],
            ["date_order", ">=", erp_datetime(from)],
            ["date_order", "<", erp_datetime(to)],
            ["state", "in", SALE_STATES],
        ])
    }
}

/// ERP datetime strings are UTC without a timezone suffix.
fn erp_datetime(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: Option<String>,
    data: Option<Value>,
}

impl RpcError {
    fn summary(&self) -> String {
        self.data
            .as_ref()
            .and_then(|d| d.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

// ---------------------------------------------------------------------------
// Value helpers — ERP relation fields arrive as [id, display_name] pairs.
// ---------------------------------------------------------------------------

fn rel_id(v: &Value) -> Option<i64> {
    v.as_array()?.first()?.as_i64()
}

fn rel_name(v: &Value) -> String {
    v.as_array()
        .and_then(|a| a.get(1))
        .and_then(|n| n.as_str())
        .unwrap_or("")
        .to_string()
}

fn rows(v: Value, what: &str) -> Result<Vec<Value>, SourceError> {
    match v {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        other => Err(SourceError::Decode(format!(
            "{what}: expected an array, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// SalesSource
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl SalesSource for ErpClient {
    async fn fetch_revenue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Revenue, SourceError> {
        let orders = rows(
            self.call(
                "pos.order",
                "search_read",
                json!([self.window_domain(from, to)]),
                json!({"fields": ["id", "config_id", "amount_total", "payment_ids"]}),
            )
            .await?,
            "pos.order",
        )?;

        if orders.is_empty() {
            return Ok(Revenue::default());
        }

        // Complimentary orders are identified by their payment method and
        // excluded from revenue; their amount is tracked for display only.
        let payment_ids: Vec<i64> = orders
            .iter()
            .filter_map(|o| o.get("payment_ids"))
            .filter_map(|p| p.as_array())
            .flatten()
            .filter_map(|id| id.as_i64())
            .collect();
        let mut comp_orders: BTreeSet<i64> = BTreeSet::new();
        if !payment_ids.is_empty() {
            let payments = rows(
                self.call(
                    "pos.payment",
                    "search_read",
                    json!([[["id", "in", payment_ids]]]),
                    json!({"fields": ["id", "pos_order_id", "payment_method_id"]}),
                )
                .await?,
                "pos.payment",
            )?;
            for p in &payments {
                let method = p.get("payment_method_id").and_then(rel_id);
                if method == Some(self.ids.complimentary_method) {
                    if let Some(oid) = p.get("pos_order_id").and_then(rel_id) {
                        comp_orders.insert(oid);
                    }
                }
            }
        }

        let mut revenue = Revenue::default();
        let mut billable_orders: Vec<i64> = Vec::new();
        for o in &orders {
            let oid = o.get("id").and_then(|v| v.as_i64()).unwrap_or(0);
            let amount = o
                .get("amount_total")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            if comp_orders.contains(&oid) {
                revenue.complimentary += amount;
                continue;
            }
            billable_orders.push(oid);
            let config = o.get("config_id").and_then(rel_id).unwrap_or(0);
            if config == self.ids.cash_counter {
                revenue.cash_counter += amount;
            } else if config == self.ids.runner_counter {
                revenue.runner_counter += amount;
            } else if config == self.ids.delivery {
                revenue.delivery += amount;
            }
        }

        if billable_orders.is_empty() {
            return Ok(revenue);
        }

        let lines = rows(
            self.call(
                "pos.order.line",
                "search_read",
                json!([[["order_id", "in", billable_orders]]]),
                json!({"fields": ["product_id", "qty", "price_subtotal_incl"]}),
            )
            .await?,
            "pos.order.line",
        )?;

        for line in &lines {
            let Some(pid) = line.get("product_id").and_then(rel_id) else {
                continue;
            };
            let qty = line.get("qty").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let amount = line
                .get("price_subtotal_incl")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let entry = revenue
                .products
                .entry(ProductId(pid as u32))
                .or_insert_with(|| ProductSales {
                    name: rel_name(&line["product_id"]),
                    qty: 0.0,
                    amount: 0.0,
                });
            entry.qty += qty;
            entry.amount += amount;
            revenue.total += amount;
        }

        Ok(revenue)
    }

    async fn fetch_product_sales(
        &self,
        products: &[ProductId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<ProductId, f64>, SourceError> {
        let order_ids = rows(
            self.call(
                "pos.order",
                "search",
                json!([self.window_domain(from, to)]),
                json!({}),
            )
            .await?,
            "pos.order ids",
        )?;
        let order_ids: Vec<i64> = order_ids.iter().filter_map(|v| v.as_i64()).collect();
        if order_ids.is_empty() {
            return Ok(BTreeMap::new());
        }

        let product_ids: Vec<i64> = products.iter().map(|p| i64::from(p.0)).collect();
        let lines = rows(
            self.call(
                "pos.order.line",
                "search_read",
                json!([[["order_id", "in", order_ids], ["product_id", "in", product_ids]]]),
                json!({"fields": ["product_id", "qty"]}),
            )
            .await?,
            "pos.order.line",
        )?;

        let mut sold = BTreeMap::new();
        for line in &lines {
            let Some(pid) = line.get("product_id").and_then(rel_id) else {
                continue;
            };
            let qty = line.get("qty").and_then(|v| v.as_f64()).unwrap_or(0.0);
            *sold.entry(ProductId(pid as u32)).or_insert(0.0) += qty;
        }
        Ok(sold)
    }
}

// ---------------------------------------------------------------------------
// PurchaseSource
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl PurchaseSource for ErpClient {
    async fn fetch_received(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PurchaseReceipt>, SourceError> {
        let pickings = rows(
            self.call(
                "stock.picking",
                "search_read",
                json!([[
                    ["state", "=", "done"],
                    ["picking_type_id.code", "=", "incoming"],
                    ["date_done", ">=", erp_datetime(from)],
                    ["date_done", "<", erp_datetime(to)],
                    ["company_id", "=", self.ids.company],
                ]]),
                json!({"fields": ["id", "origin", "move_ids"]}),
            )
            .await?,
            "stock.picking",
        )?;
        if pickings.is_empty() {
            return Ok(Vec::new());
        }

        let move_ids: Vec<i64> = pickings
            .iter()
            .filter_map(|p| p.get("move_ids"))
            .filter_map(|m| m.as_array())
            .flatten()
            .filter_map(|id| id.as_i64())
            .collect();
        if move_ids.is_empty() {
            return Ok(Vec::new());
        }

        let moves = rows(
            self.call(
                "stock.move",
                "read",
                json!([move_ids]),
                json!({"fields": ["product_id", "quantity"]}),
            )
            .await?,
            "stock.move",
        )?;

        // Weighted-average unit cost per product across the matching
        // purchase orders.
        let po_names: BTreeSet<String> = pickings
            .iter()
            .filter_map(|p| p.get("origin"))
            .filter_map(|o| o.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let mut unit_costs: BTreeMap<i64, f64> = BTreeMap::new();
        if !po_names.is_empty() {
            let po_lines = rows(
                self.call(
                    "purchase.order.line",
                    "search_read",
                    json!([[["order_id.name", "in", po_names.iter().collect::<Vec<_>>()]]]),
                    json!({"fields": ["product_id", "price_unit", "product_qty"]}),
                )
                .await?,
                "purchase.order.line",
            )?;
            let mut acc: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
            for pl in &po_lines {
                let Some(pid) = pl.get("product_id").and_then(rel_id) else {
                    continue;
                };
                let price = pl.get("price_unit").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let qty = pl.get("product_qty").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let e = acc.entry(pid).or_insert((0.0, 0.0));
                e.0 += price * qty;
                e.1 += qty;
            }
            for (pid, (cost, qty)) in acc {
                if qty > 0.0 {
                    unit_costs.insert(pid, cost / qty);
                }
            }
        }

        let mut receipts = Vec::new();
        for m in &moves {
            let Some(pid) = m.get("product_id").and_then(rel_id) else {
                continue;
            };
            let qty = m.get("quantity").and_then(|v| v.as_f64()).unwrap_or(0.0);
            let material_id = MaterialId(pid as u32);
            let unit_cost = unit_costs
                .get(&pid)
                .copied()
                .or_else(|| self.fallback_costs.get(&material_id).copied())
                .unwrap_or(0.0);
            receipts.push(PurchaseReceipt {
                material_id,
                material_name: rel_name(&m["product_id"]),
                qty,
                unit_cost,
                cost: qty * unit_cost,
            });
        }
        Ok(receipts)
    }
}

// ---------------------------------------------------------------------------
// InventorySync
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl InventorySync for ErpClient {
    /// Push closing stock as an inventory adjustment per material:
    /// write the counted quantity onto the location's quant and apply.
    async fn push_closing_stock(
        &self,
        _at: DateTime<Utc>,
        stock: &MaterialMap,
    ) -> Result<(), SourceError> {
        for (mid, qty) in stock {
            let quant_ids = rows(
                self.call(
                    "stock.quant",
                    "search",
                    json!([[
                        ["product_id", "=", i64::from(mid.0)],
                        ["location_id", "=", self.ids.stock_location],
                    ]]),
                    json!({}),
                )
                .await?,
                "stock.quant ids",
            )?;
            let quant_ids: Vec<i64> = quant_ids.iter().filter_map(|v| v.as_i64()).collect();

            let target_ids = if quant_ids.is_empty() {
                let created = self
                    .call(
                        "stock.quant",
                        "create",
                        json!([{
                            "product_id": i64::from(mid.0),
                            "location_id": self.ids.stock_location,
                            "inventory_quantity": qty,
                        }]),
                        json!({}),
                    )
                    .await?;
                let id = created
                    .as_i64()
                    .ok_or_else(|| SourceError::Decode("stock.quant create: expected id".into()))?;
                vec![id]
            } else {
                self.call(
                    "stock.quant",
                    "write",
                    json!([quant_ids, {"inventory_quantity": qty}]),
                    json!({}),
                )
                .await?;
                quant_ids
            };

            self.call(
                "stock.quant",
                "action_apply_inventory",
                json!([target_ids]),
                json!({}),
            )
            .await?;
        }
        Ok(())
    }
}
