//! Shared data shapes for the counterbook settlement ledger.
//!
//! Everything here is plain serde data: ids, sparse material maps, the
//! persisted settlement record, and the wire shapes exchanged with the
//! external sales/purchase sources. No IO and no business arithmetic —
//! the engines in `cbk-decompose` / `cbk-settle` own that.

pub mod rounding;
pub mod sparse;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Raw material identifier (matches the ERP product id of the material).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct MaterialId(pub u32);

impl std::fmt::Display for MaterialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sellable product identifier (ERP POS product id).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct ProductId(pub u32);

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sparse material → quantity map. `BTreeMap` keeps iteration (and thus
/// serialized JSON and all derived figures) deterministic.
pub type MaterialMap = BTreeMap<MaterialId, f64>;

// ---------------------------------------------------------------------------
// Physical input
// ---------------------------------------------------------------------------

/// One weighing of a named vessel: gross weight including tare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselEntry {
    pub vessel_code: String,
    pub weight_kg: f64,
}

/// A single value in a physical count submission: either a plain count /
/// weight / volume number, or a list of vessel weighings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Count(f64),
    Vessels(Vec<VesselEntry>),
}

/// The staff-entered physical count: a named map of heterogeneous values,
/// submitted once per settlement. Field names are resolved against the
/// decomposition registry in `cbk-catalog`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct PhysicalInput(pub BTreeMap<String, FieldValue>);

impl PhysicalInput {
    pub fn count(&self, field: &str) -> Option<f64> {
        match self.0.get(field) {
            Some(FieldValue::Count(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn vessels(&self, field: &str) -> Option<&[VesselEntry]> {
        match self.0.get(field) {
            Some(FieldValue::Vessels(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn set_count(&mut self, field: impl Into<String>, v: f64) {
        self.0.insert(field.into(), FieldValue::Count(v));
    }

    pub fn set_vessels(&mut self, field: impl Into<String>, v: Vec<VesselEntry>) {
        self.0.insert(field.into(), FieldValue::Vessels(v));
    }
}

/// When each physical field was actually counted. Fields absent from the
/// map are treated as counted at the submission instant.
pub type FieldTimestamps = BTreeMap<String, DateTime<Utc>>;

// ---------------------------------------------------------------------------
// Vessels
// ---------------------------------------------------------------------------

/// A registered vessel: code → tare weight and what liquid it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vessel {
    pub code: String,
    pub name: String,
    /// Key into the catalog's liquid density table (e.g. "boiled_milk").
    pub liquid_type: String,
    pub location: String,
    pub tare_kg: f64,
}

// ---------------------------------------------------------------------------
// Sales / revenue
// ---------------------------------------------------------------------------

/// Per-product sales aggregate for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSales {
    pub name: String,
    pub qty: f64,
    pub amount: f64,
}

/// Channel-segmented revenue for a settlement period, as consumed from the
/// sales source. `complimentary` is non-revenue and tracked for display
/// only — it is never added to `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Revenue {
    pub total: f64,
    pub cash_counter: f64,
    pub runner_counter: f64,
    pub delivery: f64,
    pub complimentary: f64,
    pub products: BTreeMap<ProductId, ProductSales>,
}

impl Revenue {
    pub fn qty_sold(&self, product: ProductId) -> f64 {
        self.products.get(&product).map(|p| p.qty).unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Purchases
// ---------------------------------------------------------------------------

/// Aggregate received quantity and cost for one material over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PurchaseLine {
    pub qty: f64,
    pub cost: f64,
}

impl PurchaseLine {
    /// Unit cost implied by this line; `None` when qty is zero.
    pub fn implied_unit_cost(&self) -> Option<f64> {
        if self.qty.abs() < f64::EPSILON {
            None
        } else {
            Some(self.cost / self.qty)
        }
    }
}

pub type PurchaseMap = BTreeMap<MaterialId, PurchaseLine>;

/// One received purchase as reported by the purchases source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub material_id: MaterialId,
    pub material_name: String,
    pub qty: f64,
    /// Weighted-average unit cost across the matching orders.
    pub unit_cost: f64,
    pub cost: f64,
}

/// Fold receipts into the per-material purchase map.
pub fn purchases_from_receipts(receipts: &[PurchaseReceipt]) -> PurchaseMap {
    let mut out = PurchaseMap::new();
    for r in receipts {
        let line = out.entry(r.material_id).or_default();
        line.qty += r.qty;
        line.cost += r.cost;
    }
    out
}

// ---------------------------------------------------------------------------
// Wastage
// ---------------------------------------------------------------------------

/// A recorded loss. `Stated` entries name an item in a physical state
/// ("fried" vs "raw") and are decomposed through the catalog's state ratio
/// table; `Direct` entries are the legacy shape naming a raw material
/// outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WastageItem {
    Stated {
        item: String,
        state: String,
        qty: f64,
        #[serde(default)]
        reason: String,
    },
    Direct {
        material_id: MaterialId,
        qty: f64,
    },
}

// ---------------------------------------------------------------------------
// Derived figures
// ---------------------------------------------------------------------------

/// Per-material discrepancy: signed quantity (positive = shortage) and its
/// monetary value at the resolved unit cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyLine {
    pub qty: f64,
    pub value: f64,
    pub uom: String,
}

/// Non-fatal finding: closing stock exceeded opening + purchases for a
/// material, so computed consumption went negative. Signals a miscount or
/// an unlogged delivery; never corrected automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionWarning {
    pub material_id: MaterialId,
    pub material_name: String,
    pub opening: f64,
    pub purchased: f64,
    pub closing: f64,
    pub used: f64,
    pub message: String,
}

/// One counting-time-skew correction applied to closing stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapAdjustment {
    pub field: String,
    pub gap_seconds: i64,
    pub products_sold: BTreeMap<ProductId, f64>,
    pub materials_subtracted: MaterialMap,
}

// ---------------------------------------------------------------------------
// Amendments
// ---------------------------------------------------------------------------

/// An authorized retroactive correction to a persisted settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Correction {
    /// Replace a purchase quantity; cost is recomputed at the previously
    /// implied unit cost.
    Purchase {
        material_id: MaterialId,
        new_qty: f64,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Replace a closing-stock value.
    Closing {
        material_id: MaterialId,
        new_value: f64,
        #[serde(default)]
        reason: Option<String>,
    },
}

impl Correction {
    pub fn material_id(&self) -> MaterialId {
        match self {
            Correction::Purchase { material_id, .. } => *material_id,
            Correction::Closing { material_id, .. } => *material_id,
        }
    }
}

/// The value a correction replaced, captured before the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreviousValue {
    Purchase {
        material_id: MaterialId,
        qty: f64,
        cost: f64,
    },
    Closing {
        material_id: MaterialId,
        value: f64,
    },
}

/// One applied amendment, appended to the settlement's edit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendmentRecord {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub corrections: Vec<Correction>,
    pub previous: Vec<PreviousValue>,
}

/// Append-only amendment history. Entries are never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EditTrail {
    pub amendments: Vec<AmendmentRecord>,
}

// ---------------------------------------------------------------------------
// Settlement record
// ---------------------------------------------------------------------------

/// Counts of unsold runner tokens at settlement time, keyed by runner name.
pub type TokenCounts = BTreeMap<String, u32>;

pub fn token_total(tokens: &TokenCounts) -> u32 {
    tokens.values().sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// First-ever count: establishes the baseline inventory, no P&L.
    Bootstrap,
    Completed,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Bootstrap => "bootstrap",
            SettlementStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bootstrap" => Some(SettlementStatus::Bootstrap),
            "completed" => Some(SettlementStatus::Completed),
            _ => None,
        }
    }
}

/// One reconciliation record covering a bounded period, seeded by a
/// physical count. Created once at submission; amended only through the
/// amendment engine; never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
    pub settled_by: String,
    pub status: SettlementStatus,
    /// Chain link: the settlement whose closing stock seeded this opening
    /// stock. `None` only for bootstrap.
    pub previous_settlement_id: Option<Uuid>,

    pub raw_input: PhysicalInput,
    /// Canonical raw-material snapshot produced by decomposition.
    pub decomposed: MaterialMap,
    pub opening_stock: MaterialMap,
    pub purchases: PurchaseMap,
    /// Post gap-adjustment closing stock; seeds the next opening stock.
    pub closing_stock: MaterialMap,

    pub consumption: MaterialMap,
    pub expected_consumption: MaterialMap,
    pub discrepancy: BTreeMap<MaterialId, DiscrepancyLine>,
    pub discrepancy_value: f64,
    pub wastage_items: Vec<WastageItem>,
    pub wastage_value: f64,

    pub revenue: Revenue,
    pub cogs_actual: f64,
    pub cogs_expected: f64,
    pub opex_salaries: f64,
    pub opex_expenses: f64,
    pub opex_total: f64,
    pub gross_profit: f64,
    pub net_profit: f64,
    pub adjusted_net_profit: f64,

    pub runner_tokens: TokenCounts,
    pub runner_tokens_total: u32,
    pub gap_adjustments: Vec<GapAdjustment>,
    pub warnings: Vec<ConsumptionWarning>,
    pub notes: String,
    pub edit_trail: EditTrail,
}

impl Settlement {
    pub fn is_bootstrap(&self) -> bool {
        self.status == SettlementStatus::Bootstrap
    }
}

/// Headline row for history listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub id: Uuid,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
    pub settled_by: String,
    pub status: SettlementStatus,
    pub revenue_total: f64,
    pub cogs_actual: f64,
    pub gross_profit: f64,
    pub opex_total: f64,
    pub net_profit: f64,
    pub adjusted_net_profit: f64,
    pub discrepancy_value: f64,
    pub wastage_value: f64,
    pub runner_tokens_total: u32,
    pub amendment_count: usize,
}

impl From<&Settlement> for SettlementSummary {
    fn from(s: &Settlement) -> Self {
        SettlementSummary {
            id: s.id,
            period_start: s.period_start,
            period_end: s.period_end,
            settled_at: s.settled_at,
            settled_by: s.settled_by.clone(),
            status: s.status,
            revenue_total: s.revenue.total,
            cogs_actual: s.cogs_actual,
            gross_profit: s.gross_profit,
            opex_total: s.opex_total,
            net_profit: s.net_profit,
            adjusted_net_profit: s.adjusted_net_profit,
            discrepancy_value: s.discrepancy_value,
            wastage_value: s.wastage_value,
            runner_tokens_total: s.runner_tokens_total,
            amendment_count: s.edit_trail.amendments.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Staff / expenses
// ---------------------------------------------------------------------------

/// Active staff member for salary proration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffSalary {
    pub name: String,
    pub role: String,
    pub monthly_salary: f64,
    pub active: bool,
}

/// A manually recorded period expense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenseEntry {
    pub amount: f64,
    pub category: String,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
