//! Persistence boundary for the settlement chain.
//!
//! The runtime never talks SQL: it sees this trait. `cbk-db` implements
//! it over Postgres; `cbk-testkit` provides an in-memory implementation
//! so the full pipeline runs in tests without a database.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use cbk_schemas::{
    ExpenseEntry, MaterialId, Settlement, SettlementSummary, StaffSalary, Vessel,
};

#[derive(Debug)]
pub enum StoreError {
    /// The chain tail moved between the caller's read and this write; the
    /// settlement was NOT persisted.
    ChainConflict { expected: Option<Uuid> },
    Backend(anyhow::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChainConflict { expected } => write!(
                f,
                "chain tail moved: expected previous settlement {expected:?}; a concurrent submission won"
            ),
            Self::Backend(e) => write!(f, "store backend error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Backend(e)
    }
}

/// Append-only settlement store plus the owned reference tables
/// (vessels, salaries, expenses, material costs).
#[async_trait::async_trait]
pub trait SettlementStore: Send + Sync {
    /// Most recently settled record — the chain tail. `None` only before
    /// bootstrap.
    async fn tail(&self) -> Result<Option<Settlement>, StoreError>;

    async fn by_id(&self, id: Uuid) -> Result<Option<Settlement>, StoreError>;

    /// Settlement whose period covers the given calendar date (UTC).
    async fn by_date(&self, date: NaiveDate) -> Result<Option<Settlement>, StoreError>;

    async fn history(&self, limit: usize) -> Result<Vec<SettlementSummary>, StoreError>;

    /// Persist a new settlement, guarded by a compare-and-swap on the
    /// expected tail id: if the tail is no longer `expected_tail`, the
    /// write must fail with [`StoreError::ChainConflict`] and persist
    /// nothing.
    async fn insert_chained(
        &self,
        settlement: &Settlement,
        expected_tail: Option<Uuid>,
    ) -> Result<(), StoreError>;

    /// Overwrite an amended settlement in place. Only the amendment
    /// engine calls this; the edit trail inside the record carries the
    /// change history.
    async fn update_amended(&self, settlement: &Settlement) -> Result<(), StoreError>;

    /// Whether any settlement already consumed this record's closing
    /// stock as its opening stock.
    async fn has_successor(&self, id: Uuid) -> Result<bool, StoreError>;

    // -- owned reference tables ---------------------------------------

    async fn vessels(&self) -> Result<Vec<Vessel>, StoreError>;
    async fn save_vessel(&self, vessel: &Vessel) -> Result<(), StoreError>;

    async fn active_salaries(&self) -> Result<Vec<StaffSalary>, StoreError>;
    async fn save_salary(&self, salary: &StaffSalary) -> Result<(), StoreError>;

    async fn expenses_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExpenseEntry>, StoreError>;
    async fn record_expense(&self, entry: &ExpenseEntry) -> Result<(), StoreError>;

    /// Latest recorded unit cost per material with effective date ≤ `at`,
    /// resolved in one batch.
    async fn material_costs_as_of(
        &self,
        at: DateTime<Utc>,
    ) -> Result<BTreeMap<MaterialId, f64>, StoreError>;
    async fn record_material_cost(
        &self,
        material: MaterialId,
        cost_per_unit: f64,
        effective_from: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
