//! Settlement chain manager.
//!
//! One submission is one logically sequential unit of work: independent
//! external reads scatter-gather up front, the pure engines derive the
//! figures, and the settlement row is written last under a tail
//! compare-and-swap. The inventory sync push happens after the write and
//! never rolls it back. No state lives in memory between operations —
//! the chain tail is re-read from the store every time.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::try_join_all;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use cbk_audit::{AuditKind, AuditLog};
use cbk_catalog::loader::RuntimeSettings;
use cbk_catalog::Catalog;
use cbk_decompose::{decompose, DecomposeOutcome, VesselRegistry};
use cbk_schemas::rounding::round2;
use cbk_schemas::{
    purchases_from_receipts, token_total, AmendmentRecord, Correction, ExpenseEntry,
    FieldTimestamps, MaterialId, MaterialMap, PhysicalInput, ProductId, PurchaseMap, Revenue,
    Settlement, SettlementStatus, SettlementSummary, StaffSalary, TokenCounts, Vessel,
    WastageItem,
};
use cbk_settle::{
    actual_consumption, apply_corrections, apply_gap_adjustments, cogs_actual, cogs_expected,
    compute_pnl, discrepancy, expected_consumption, plan_gap_windows, prorated_salaries,
    wastage_value, wasted_materials, CostTable, TokenCarry,
};
use cbk_sources::{InventorySync, PurchaseSource, SalesSource};

use crate::error::RuntimeError;
use crate::store::SettlementStore;

// ---------------------------------------------------------------------------
// Requests / responses
// ---------------------------------------------------------------------------

/// Non-persisted preview of what the next settlement will cover.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedSettlement {
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: DateTime<Utc>,
    pub needs_bootstrap: bool,
    pub previous: Option<SettlementSummary>,
    pub opening_stock: MaterialMap,
    pub revenue: Revenue,
    pub purchases: PurchaseMap,
    pub expenses_total: f64,
    pub salaries: Vec<StaffSalary>,
    pub prorated_salary_cost: f64,
    pub vessels: Vec<Vessel>,
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub raw_input: PhysicalInput,
    pub wastage_items: Vec<WastageItem>,
    pub runner_tokens: TokenCounts,
    pub field_timestamps: FieldTimestamps,
    pub actor: String,
    pub is_bootstrap: bool,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub settlement: Settlement,
    /// Submitted fields the count registry does not know, unregistered
    /// vessel codes, and direct entries superseded by a weighing.
    pub input_warnings: Vec<String>,
    /// Set when the post-write inventory push failed; the settlement
    /// itself is persisted regardless.
    pub sync_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmendResult {
    pub settlement: Settlement,
    pub record: AmendmentRecord,
    /// True when a later settlement already consumed this record's
    /// pre-amendment closing stock as its opening stock. The correction
    /// does not cascade; the operator re-amends downstream by hand.
    pub downstream_affected: bool,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct SettlementManager {
    store: Arc<dyn SettlementStore>,
    sales: Arc<dyn SalesSource>,
    purchases: Arc<dyn PurchaseSource>,
    sync: Arc<dyn InventorySync>,
    audit: Mutex<AuditLog>,
    catalog: Catalog,
    settings: RuntimeSettings,
}

impl SettlementManager {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        sales: Arc<dyn SalesSource>,
        purchases: Arc<dyn PurchaseSource>,
        sync: Arc<dyn InventorySync>,
        audit: AuditLog,
        catalog: Catalog,
        settings: RuntimeSettings,
    ) -> Self {
        SettlementManager {
            store,
            sales,
            purchases,
            sync,
            audit: Mutex::new(audit),
            catalog,
            settings,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // -- prepare -------------------------------------------------------

    /// Read the chain tail and assemble everything the operator sees
    /// before counting: the open period, external movements within it,
    /// and the opening stock the count will settle against.
    pub async fn prepare(&self, now: DateTime<Utc>) -> Result<PreparedSettlement, RuntimeError> {
        let tail = self.store.tail().await?;

        let Some(tail) = tail else {
            // Nothing to settle against yet; the first count seeds the chain.
            let vessels = self.store.vessels().await?;
            return Ok(PreparedSettlement {
                period_start: None,
                period_end: now,
                needs_bootstrap: true,
                previous: None,
                opening_stock: MaterialMap::new(),
                revenue: Revenue::default(),
                purchases: PurchaseMap::new(),
                expenses_total: 0.0,
                salaries: Vec::new(),
                prorated_salary_cost: 0.0,
                vessels,
            });
        };

        let start = tail.settled_at;
        let (revenue, receipts, expenses, vessels, salaries) = tokio::try_join!(
            async {
                self.sales
                    .fetch_revenue(start, now)
                    .await
                    .map_err(RuntimeError::from)
            },
            async {
                self.purchases
                    .fetch_received(start, now)
                    .await
                    .map_err(RuntimeError::from)
            },
            async {
                self.store
                    .expenses_between(start, now)
                    .await
                    .map_err(RuntimeError::from)
            },
            async { self.store.vessels().await.map_err(RuntimeError::from) },
            async {
                self.store
                    .active_salaries()
                    .await
                    .map_err(RuntimeError::from)
            },
        )?;

        let period_hours = (now - start).num_seconds() as f64 / 3600.0;
        Ok(PreparedSettlement {
            period_start: Some(start),
            period_end: now,
            needs_bootstrap: false,
            previous: Some(SettlementSummary::from(&tail)),
            opening_stock: tail.closing_stock.clone(),
            revenue,
            purchases: purchases_from_receipts(&receipts),
            expenses_total: round2(expenses.iter().map(|e| e.amount).sum()),
            salaries: salaries.clone(),
            prorated_salary_cost: prorated_salaries(&salaries, period_hours),
            vessels,
        })
    }

    // -- submit --------------------------------------------------------

    pub async fn submit(
        &self,
        req: SubmitRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, RuntimeError> {
        if req.actor.trim().is_empty() {
            return Err(RuntimeError::Validation("actor is required".to_string()));
        }

        let tail = self.store.tail().await?;
        match (&tail, req.is_bootstrap) {
            (Some(_), true) => {
                return Err(RuntimeError::Precondition(
                    "chain is already bootstrapped; submit a regular settlement".to_string(),
                ));
            }
            (None, false) => {
                return Err(RuntimeError::Precondition(
                    "no previous settlement found; bootstrap first".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(tail) = &tail {
            let since_last = (now - tail.settled_at).num_seconds();
            if since_last < self.settings.guard_window_secs {
                return Err(RuntimeError::Precondition(format!(
                    "last settlement was {since_last}s ago, within the {}s resubmission guard",
                    self.settings.guard_window_secs
                )));
            }
        }

        let vessels = self.store.vessels().await?;
        let registry = VesselRegistry::new(vessels, &self.catalog.default_vessels);
        let decomposed = decompose(&req.raw_input, &self.catalog, &registry)?;

        let outcome = match tail {
            None => self.submit_bootstrap(req, now, decomposed).await?,
            Some(tail) => self.submit_completed(req, now, decomposed, tail).await?,
        };
        Ok(outcome)
    }

    async fn submit_bootstrap(
        &self,
        req: SubmitRequest,
        now: DateTime<Utc>,
        decomposed: DecomposeOutcome,
    ) -> Result<SubmitOutcome, RuntimeError> {
        let tokens_total = token_total(&req.runner_tokens);
        let settlement = Settlement {
            id: Uuid::new_v4(),
            period_start: now,
            period_end: now,
            settled_at: now,
            settled_by: req.actor.clone(),
            status: SettlementStatus::Bootstrap,
            previous_settlement_id: None,
            raw_input: req.raw_input,
            decomposed: decomposed.inventory.clone(),
            opening_stock: MaterialMap::new(),
            purchases: PurchaseMap::new(),
            closing_stock: decomposed.inventory.clone(),
            consumption: MaterialMap::new(),
            expected_consumption: MaterialMap::new(),
            discrepancy: BTreeMap::new(),
            discrepancy_value: 0.0,
            wastage_items: req.wastage_items,
            wastage_value: 0.0,
            revenue: Revenue::default(),
            cogs_actual: 0.0,
            cogs_expected: 0.0,
            opex_salaries: 0.0,
            opex_expenses: 0.0,
            opex_total: 0.0,
            gross_profit: 0.0,
            net_profit: 0.0,
            adjusted_net_profit: 0.0,
            runner_tokens: req.runner_tokens,
            runner_tokens_total: tokens_total,
            gap_adjustments: Vec::new(),
            warnings: Vec::new(),
            notes: req.notes,
            edit_trail: Default::default(),
        };

        self.store.insert_chained(&settlement, None).await?;
        self.audit_append(
            AuditKind::Bootstrap,
            settlement.id,
            &settlement.settled_by,
            json!({ "materials": settlement.closing_stock.len() }),
        );

        let sync_error = self.push_closing_stock(&settlement).await;
        Ok(SubmitOutcome {
            input_warnings: input_warnings(&decomposed),
            settlement,
            sync_error,
        })
    }

    async fn submit_completed(
        &self,
        req: SubmitRequest,
        now: DateTime<Utc>,
        decomposed: DecomposeOutcome,
        tail: Settlement,
    ) -> Result<SubmitOutcome, RuntimeError> {
        let period_start = tail.settled_at;

        // Independent external reads, joined before any derivation.
        let (revenue, receipts, expenses, salaries, resolved_costs) = tokio::try_join!(
            async {
                self.sales
                    .fetch_revenue(period_start, now)
                    .await
                    .map_err(RuntimeError::from)
            },
            async {
                self.purchases
                    .fetch_received(period_start, now)
                    .await
                    .map_err(RuntimeError::from)
            },
            async {
                self.store
                    .expenses_between(period_start, now)
                    .await
                    .map_err(RuntimeError::from)
            },
            async {
                self.store
                    .active_salaries()
                    .await
                    .map_err(RuntimeError::from)
            },
            async {
                self.store
                    .material_costs_as_of(now)
                    .await
                    .map_err(RuntimeError::from)
            },
        )?;

        // Counting-time skew: fetch each stale field's sales window in
        // parallel, then subtract from the counted snapshot.
        let windows = plan_gap_windows(&req.field_timestamps, &self.catalog);
        let window_sales = try_join_all(windows.iter().map(|w| {
            let products = w.products.clone();
            let (from, to) = (w.from, w.to);
            async move {
                self.sales
                    .fetch_product_sales(&products, from, to)
                    .await
                    .map_err(RuntimeError::from)
            }
        }))
        .await?;
        let sold_windows: Vec<(cbk_settle::GapWindow, BTreeMap<ProductId, f64>)> =
            windows.into_iter().zip(window_sales).collect();
        let (closing_stock, gap_adjustments) =
            apply_gap_adjustments(&decomposed.inventory, &sold_windows, &self.catalog);

        let purchases = purchases_from_receipts(&receipts);
        let consumption = actual_consumption(
            &tail.closing_stock,
            &purchases,
            &closing_stock,
            &self.catalog,
        );
        for w in &consumption.warnings {
            tracing::warn!(
                material = %w.material_name,
                used = w.used,
                "negative consumption: closing exceeds opening plus purchases"
            );
        }

        let tokens = TokenCarry {
            current_unsold: token_total(&req.runner_tokens),
            previous_unsold: tail.runner_tokens_total,
        };
        let expected = expected_consumption(&revenue, &self.catalog, &tokens);
        let wasted = wasted_materials(&req.wastage_items, &self.catalog)?;

        let costs = CostTable::new(resolved_costs, &self.catalog);
        let disc = discrepancy(
            &consumption.consumption,
            &expected,
            &wasted,
            &costs,
            &self.catalog,
        );

        let period_hours = (now - period_start).num_seconds() as f64 / 3600.0;
        let opex_expenses = round2(expenses.iter().map(|e| e.amount).sum());
        let pnl = compute_pnl(
            revenue.total,
            cogs_actual(&consumption.consumption, &costs),
            cogs_expected(&expected, &costs),
            prorated_salaries(&salaries, period_hours),
            opex_expenses,
            disc.total_value,
            wastage_value(&wasted, &costs),
        );

        let tokens_total = token_total(&req.runner_tokens);
        let settlement = Settlement {
            id: Uuid::new_v4(),
            period_start,
            period_end: now,
            settled_at: now,
            settled_by: req.actor.clone(),
            status: SettlementStatus::Completed,
            previous_settlement_id: Some(tail.id),
            raw_input: req.raw_input,
            decomposed: decomposed.inventory.clone(),
            opening_stock: tail.closing_stock.clone(),
            purchases,
            closing_stock,
            consumption: consumption.consumption,
            expected_consumption: expected,
            discrepancy: disc.lines,
            discrepancy_value: disc.total_value,
            wastage_items: req.wastage_items,
            wastage_value: wastage_value(&wasted, &costs),
            revenue,
            cogs_actual: pnl.cogs_actual,
            cogs_expected: pnl.cogs_expected,
            opex_salaries: pnl.opex_salaries,
            opex_expenses: pnl.opex_expenses,
            opex_total: pnl.opex_total,
            gross_profit: pnl.gross_profit,
            net_profit: pnl.net_profit,
            adjusted_net_profit: pnl.adjusted_net_profit,
            runner_tokens: req.runner_tokens,
            runner_tokens_total: tokens_total,
            gap_adjustments,
            warnings: consumption.warnings,
            notes: req.notes,
            edit_trail: Default::default(),
        };

        self.store
            .insert_chained(&settlement, Some(tail.id))
            .await?;
        self.audit_append(
            AuditKind::Submission,
            settlement.id,
            &settlement.settled_by,
            json!({
                "revenue": settlement.revenue.total,
                "net_profit": settlement.net_profit,
                "adjusted_net_profit": settlement.adjusted_net_profit,
                "discrepancy_value": settlement.discrepancy_value,
                "warnings": settlement.warnings.len(),
            }),
        );

        let sync_error = self.push_closing_stock(&settlement).await;
        Ok(SubmitOutcome {
            input_warnings: input_warnings(&decomposed),
            settlement,
            sync_error,
        })
    }

    // -- amend ---------------------------------------------------------

    pub async fn amend(
        &self,
        id: Uuid,
        corrections: Vec<Correction>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<AmendResult, RuntimeError> {
        if actor != self.settings.privileged_actor {
            return Err(RuntimeError::Unauthorized(format!(
                "actor '{actor}' may not amend settlements"
            )));
        }

        let settlement = self
            .store
            .by_id(id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("settlement {id}")))?;

        // Costs as of the settlement's own date, so the recompute prices
        // the way the original run did.
        let resolved_costs = self
            .store
            .material_costs_as_of(settlement.period_end)
            .await?;
        let costs = CostTable::new(resolved_costs, &self.catalog);

        let outcome = apply_corrections(&settlement, &corrections, &costs, &self.catalog, actor, now)?;
        self.store.update_amended(&outcome.settlement).await?;

        let downstream_affected = self.store.has_successor(id).await?;
        self.audit_append(
            AuditKind::Amendment,
            id,
            actor,
            json!({
                "corrections": outcome.record.corrections.len(),
                "previous": outcome.record.previous,
                "downstream_affected": downstream_affected,
            }),
        );

        Ok(AmendResult {
            settlement: outcome.settlement,
            record: outcome.record,
            downstream_affected,
        })
    }

    // -- reads ---------------------------------------------------------

    pub async fn get(&self, id: Uuid) -> Result<Settlement, RuntimeError> {
        self.store
            .by_id(id)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("settlement {id}")))
    }

    pub async fn get_by_date(&self, date: NaiveDate) -> Result<Settlement, RuntimeError> {
        self.store
            .by_date(date)
            .await?
            .ok_or_else(|| RuntimeError::NotFound(format!("no settlement covering {date}")))
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<SettlementSummary>, RuntimeError> {
        Ok(self.store.history(limit).await?)
    }

    // -- owned reference tables ---------------------------------------

    pub async fn vessels(&self) -> Result<Vec<Vessel>, RuntimeError> {
        Ok(self.store.vessels().await?)
    }

    pub async fn save_vessel(&self, vessel: &Vessel) -> Result<(), RuntimeError> {
        if vessel.code.trim().is_empty() {
            return Err(RuntimeError::Validation("vessel code is required".to_string()));
        }
        if !vessel.tare_kg.is_finite() || vessel.tare_kg < 0.0 {
            return Err(RuntimeError::Validation(format!(
                "vessel '{}': tare must be a finite non-negative weight",
                vessel.code
            )));
        }
        Ok(self.store.save_vessel(vessel).await?)
    }

    pub async fn salaries(&self) -> Result<Vec<StaffSalary>, RuntimeError> {
        Ok(self.store.active_salaries().await?)
    }

    pub async fn save_salary(&self, salary: &StaffSalary) -> Result<(), RuntimeError> {
        if salary.name.trim().is_empty() || salary.monthly_salary <= 0.0 {
            return Err(RuntimeError::Validation(
                "salary requires a name and a positive monthly amount".to_string(),
            ));
        }
        Ok(self.store.save_salary(salary).await?)
    }

    pub async fn record_expense(&self, entry: &ExpenseEntry) -> Result<(), RuntimeError> {
        if !entry.amount.is_finite() || entry.amount <= 0.0 {
            return Err(RuntimeError::Validation(
                "expense amount must be positive".to_string(),
            ));
        }
        Ok(self.store.record_expense(entry).await?)
    }

    pub async fn record_material_cost(
        &self,
        material: MaterialId,
        cost_per_unit: f64,
        effective_from: DateTime<Utc>,
    ) -> Result<(), RuntimeError> {
        if !cost_per_unit.is_finite() || cost_per_unit < 0.0 {
            return Err(RuntimeError::Validation(
                "cost per unit must be a finite non-negative amount".to_string(),
            ));
        }
        Ok(self
            .store
            .record_material_cost(material, cost_per_unit, effective_from)
            .await?)
    }

    // -- internals -----------------------------------------------------

    /// Best-effort: the settlement row is already durable, so a failed
    /// push is reported and audited, never propagated.
    async fn push_closing_stock(&self, settlement: &Settlement) -> Option<String> {
        match self
            .sync
            .push_closing_stock(settlement.settled_at, &settlement.closing_stock)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(settlement = %settlement.id, error = %e, "inventory sync push failed");
                self.audit_append(
                    AuditKind::SyncFailure,
                    settlement.id,
                    &settlement.settled_by,
                    json!({ "error": e.to_string() }),
                );
                Some(e.to_string())
            }
        }
    }

    fn audit_append(&self, kind: AuditKind, id: Uuid, actor: &str, payload: serde_json::Value) {
        match self.audit.lock() {
            Ok(mut log) => {
                if let Err(e) = log.append(kind, id, actor, payload) {
                    tracing::warn!(error = %e, "audit append failed");
                }
            }
            Err(_) => tracing::warn!("audit log mutex poisoned; event dropped"),
        }
    }
}

fn input_warnings(outcome: &DecomposeOutcome) -> Vec<String> {
    let mut warnings = Vec::new();
    for f in &outcome.unknown_fields {
        warnings.push(format!("unknown input field '{f}' was ignored"));
    }
    for v in &outcome.unregistered_vessels {
        warnings.push(format!("vessel '{v}' is not registered; assumed zero tare"));
    }
    for f in &outcome.overridden_fields {
        warnings.push(format!(
            "direct entry '{f}' ignored: vessel weighing takes precedence"
        ));
    }
    warnings
}
