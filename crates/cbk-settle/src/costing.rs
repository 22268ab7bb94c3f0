//! Costing and profit & loss.
//!
//! Unit costs are resolved by the caller (latest recorded cost with
//! effective date ≤ settlement date, one batched query) and handed in as a
//! [`CostTable`] with the catalog's static reference costs behind it.
//! Everything here is arithmetic over already-fetched data.

use std::collections::BTreeMap;

use cbk_catalog::Catalog;
use cbk_schemas::rounding::round2;
use cbk_schemas::{MaterialId, MaterialMap, StaffSalary};

// ---------------------------------------------------------------------------
// Cost table
// ---------------------------------------------------------------------------

/// Per-material unit costs: time-scoped resolved costs first, static
/// catalog fallbacks behind them, zero for a material known to neither.
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    resolved: BTreeMap<MaterialId, f64>,
    fallback: BTreeMap<MaterialId, f64>,
}

impl CostTable {
    pub fn new(resolved: BTreeMap<MaterialId, f64>, catalog: &Catalog) -> Self {
        CostTable {
            resolved,
            fallback: catalog.fallback_costs.clone(),
        }
    }

    /// Fallback-only table, for callers with no recorded costs.
    pub fn fallback_only(catalog: &Catalog) -> Self {
        Self::new(BTreeMap::new(), catalog)
    }

    pub fn cost(&self, id: MaterialId) -> f64 {
        self.resolved
            .get(&id)
            .or_else(|| self.fallback.get(&id))
            .copied()
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// COGS / wastage value
// ---------------------------------------------------------------------------

/// Actual cost of goods sold. Negative consumption is a counting artefact,
/// not a cost — clamped to zero here and only here.
pub fn cogs_actual(consumption: &MaterialMap, costs: &CostTable) -> f64 {
    round2(
        consumption
            .iter()
            .map(|(id, qty)| qty.max(0.0) * costs.cost(*id))
            .sum(),
    )
}

/// Recipe-expected COGS, the unclamped reference baseline.
pub fn cogs_expected(expected: &MaterialMap, costs: &CostTable) -> f64 {
    round2(
        expected
            .iter()
            .map(|(id, qty)| qty * costs.cost(*id))
            .sum(),
    )
}

pub fn wastage_value(wasted: &MaterialMap, costs: &CostTable) -> f64 {
    round2(wasted.iter().map(|(id, qty)| qty * costs.cost(*id)).sum())
}

// ---------------------------------------------------------------------------
// Opex
// ---------------------------------------------------------------------------

/// Staff cost prorated to the settlement period: each active salary at
/// monthly/30 per day, scaled by the period's length in hours.
pub fn prorated_salaries(staff: &[StaffSalary], period_hours: f64) -> f64 {
    round2(
        staff
            .iter()
            .filter(|s| s.active)
            .map(|s| s.monthly_salary / 30.0 * (period_hours / 24.0))
            .sum(),
    )
}

// ---------------------------------------------------------------------------
// P&L
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pnl {
    pub cogs_actual: f64,
    pub cogs_expected: f64,
    pub opex_salaries: f64,
    pub opex_expenses: f64,
    pub opex_total: f64,
    pub gross_profit: f64,
    pub net_profit: f64,
    pub adjusted_net_profit: f64,
}

/// Assemble the period's profit figures. `adjusted_net` backs the
/// unexplained losses (discrepancy, wastage) out of net profit so the
/// owner sees what the period *should* have earned.
#[allow(clippy::too_many_arguments)]
pub fn compute_pnl(
    revenue_total: f64,
    cogs_actual: f64,
    cogs_expected: f64,
    opex_salaries: f64,
    opex_expenses: f64,
    discrepancy_value: f64,
    wastage_value: f64,
) -> Pnl {
    let opex_total = round2(opex_salaries + opex_expenses);
    let gross_profit = round2(revenue_total - cogs_actual);
    let net_profit = round2(gross_profit - opex_total);
    let adjusted_net_profit = round2(net_profit - discrepancy_value - wastage_value);
    Pnl {
        cogs_actual,
        cogs_expected,
        opex_salaries,
        opex_expenses,
        opex_total,
        gross_profit,
        net_profit,
        adjusted_net_profit,
    }
}
