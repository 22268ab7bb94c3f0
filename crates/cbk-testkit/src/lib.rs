//! Test doubles for the settlement pipeline.
//!
//! [`MemoryStore`] implements the runtime's store trait in memory with the
//! same chain CAS semantics as Postgres; the mock sources return whatever
//! the test configures. [`rig`] wires everything into a ready
//! [`SettlementManager`] so scenario tests run the real submit pipeline
//! with no database and no network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use cbk_audit::AuditLog;
use cbk_catalog::loader::RuntimeSettings;
use cbk_catalog::Catalog;
use cbk_runtime::store::{SettlementStore, StoreError};
use cbk_runtime::SettlementManager;
use cbk_schemas::{
    ExpenseEntry, MaterialId, MaterialMap, ProductId, PurchaseReceipt, Revenue, Settlement,
    SettlementSummary, StaffSalary, Vessel,
};
use cbk_sources::{InventorySync, PurchaseSource, SalesSource, SourceError};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    settlements: Vec<Settlement>,
    vessels: Vec<Vessel>,
    salaries: Vec<StaffSalary>,
    expenses: Vec<ExpenseEntry>,
    costs: Vec<(MaterialId, f64, DateTime<Utc>)>,
}

/// In-memory settlement store with real chain-CAS behavior.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_vessel(&self, vessel: Vessel) {
        self.state.write().await.vessels.push(vessel);
    }

    pub async fn seed_salary(&self, salary: StaffSalary) {
        self.state.write().await.salaries.push(salary);
    }

    pub async fn seed_expense(&self, entry: ExpenseEntry) {
        self.state.write().await.expenses.push(entry);
    }

    pub async fn seed_cost(&self, material: MaterialId, cost: f64, effective_from: DateTime<Utc>) {
        self.state
            .write()
            .await
            .costs
            .push((material, cost, effective_from));
    }

    pub async fn settlement_count(&self) -> usize {
        self.state.read().await.settlements.len()
    }
}

#[async_trait::async_trait]
impl SettlementStore for MemoryStore {
    async fn tail(&self) -> Result<Option<Settlement>, StoreError> {
        Ok(self.state.read().await.settlements.last().cloned())
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<Settlement>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .settlements
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn by_date(&self, date: NaiveDate) -> Result<Option<Settlement>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .settlements
            .iter()
            .rev()
            .find(|s| s.period_start.date_naive() <= date && s.period_end.date_naive() >= date)
            .cloned())
    }

    async fn history(&self, limit: usize) -> Result<Vec<SettlementSummary>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .settlements
            .iter()
            .rev()
            .take(limit)
            .map(SettlementSummary::from)
            .collect())
    }

    async fn insert_chained(
        &self,
        settlement: &Settlement,
        expected_tail: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let tail_id = state.settlements.last().map(|s| s.id);
        if tail_id != expected_tail {
            return Err(StoreError::ChainConflict {
                expected: expected_tail,
            });
        }
        state.settlements.push(settlement.clone());
        Ok(())
    }

    async fn update_amended(&self, settlement: &Settlement) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let slot = state
            .settlements
            .iter_mut()
            .find(|s| s.id == settlement.id)
            .ok_or_else(|| {
                StoreError::Backend(anyhow_err(format!(
                    "update_amended: settlement {} not found",
                    settlement.id
                )))
            })?;
        *slot = settlement.clone();
        Ok(())
    }

    async fn has_successor(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .settlements
            .iter()
            .any(|s| s.previous_settlement_id == Some(id)))
    }

    async fn vessels(&self) -> Result<Vec<Vessel>, StoreError> {
        Ok(self.state.read().await.vessels.clone())
    }

    async fn save_vessel(&self, vessel: &Vessel) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.vessels.retain(|v| v.code != vessel.code);
        state.vessels.push(vessel.clone());
        Ok(())
    }

    async fn active_salaries(&self) -> Result<Vec<StaffSalary>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .salaries
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn save_salary(&self, salary: &StaffSalary) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        for existing in state.salaries.iter_mut().filter(|s| s.name == salary.name) {
            existing.active = false;
        }
        state.salaries.push(salary.clone());
        Ok(())
    }

    async fn expenses_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExpenseEntry>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .expenses
            .iter()
            .filter(|e| e.recorded_at >= from && e.recorded_at < to)
            .cloned()
            .collect())
    }

    async fn record_expense(&self, entry: &ExpenseEntry) -> Result<(), StoreError> {
        self.state.write().await.expenses.push(entry.clone());
        Ok(())
    }

    async fn material_costs_as_of(
        &self,
        at: DateTime<Utc>,
    ) -> Result<BTreeMap<MaterialId, f64>, StoreError> {
        let state = self.state.read().await;
        let mut latest: BTreeMap<MaterialId, (DateTime<Utc>, f64)> = BTreeMap::new();
        for (mid, cost, effective) in &state.costs {
            if *effective > at {
                continue;
            }
            match latest.get(mid) {
                Some((seen, _)) if seen >= effective => {}
                _ => {
                    latest.insert(*mid, (*effective, *cost));
                }
            }
        }
        Ok(latest.into_iter().map(|(k, (_, c))| (k, c)).collect())
    }

    async fn record_material_cost(
        &self,
        material: MaterialId,
        cost_per_unit: f64,
        effective_from: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .costs
            .push((material, cost_per_unit, effective_from));
        Ok(())
    }
}

fn anyhow_err(msg: String) -> anyhow::Error {
    anyhow::anyhow!(msg)
}

// ---------------------------------------------------------------------------
// Mock sources
// ---------------------------------------------------------------------------

/// Sales source returning whatever the test set. `window_sales` answers
/// every gap-window query with the same per-product quantities.
#[derive(Default)]
pub struct MockSalesSource {
    revenue: Mutex<Revenue>,
    window_sales: Mutex<BTreeMap<ProductId, f64>>,
    fail: AtomicBool,
}

impl MockSalesSource {
    pub fn set_revenue(&self, revenue: Revenue) {
        *self.revenue.lock().expect("revenue lock") = revenue;
    }

    pub fn set_window_sales(&self, sold: BTreeMap<ProductId, f64>) {
        *self.window_sales.lock().expect("window lock") = sold;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl SalesSource for MockSalesSource {
    async fn fetch_revenue(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Revenue, SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transport("sales source down".to_string()));
        }
        Ok(self.revenue.lock().expect("revenue lock").clone())
    }

    async fn fetch_product_sales(
        &self,
        products: &[ProductId],
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<BTreeMap<ProductId, f64>, SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transport("sales source down".to_string()));
        }
        let all = self.window_sales.lock().expect("window lock");
        Ok(products
            .iter()
            .filter_map(|p| all.get(p).map(|q| (*p, *q)))
            .collect())
    }
}

#[derive(Default)]
pub struct MockPurchaseSource {
    receipts: Mutex<Vec<PurchaseReceipt>>,
    fail: AtomicBool,
}

impl MockPurchaseSource {
    pub fn set_receipts(&self, receipts: Vec<PurchaseReceipt>) {
        *self.receipts.lock().expect("receipts lock") = receipts;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PurchaseSource for MockPurchaseSource {
    async fn fetch_received(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<PurchaseReceipt>, SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transport("purchase source down".to_string()));
        }
        Ok(self.receipts.lock().expect("receipts lock").clone())
    }
}

/// Records every closing-stock push; flips to failing on demand.
#[derive(Default)]
pub struct RecordingSync {
    pushes: Mutex<Vec<(DateTime<Utc>, MaterialMap)>>,
    fail: AtomicBool,
}

impl RecordingSync {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn pushes(&self) -> Vec<(DateTime<Utc>, MaterialMap)> {
        self.pushes.lock().expect("pushes lock").clone()
    }
}

#[async_trait::async_trait]
impl InventorySync for RecordingSync {
    async fn push_closing_stock(
        &self,
        at: DateTime<Utc>,
        stock: &MaterialMap,
    ) -> Result<(), SourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Transport("sync target down".to_string()));
        }
        self.pushes
            .lock()
            .expect("pushes lock")
            .push((at, stock.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rig
// ---------------------------------------------------------------------------

/// A fully wired manager over in-memory doubles.
pub struct TestRig {
    pub store: Arc<MemoryStore>,
    pub sales: Arc<MockSalesSource>,
    pub purchases: Arc<MockPurchaseSource>,
    pub sync: Arc<RecordingSync>,
    pub manager: SettlementManager,
    pub audit_path: std::path::PathBuf,
    _audit_dir: tempfile::TempDir,
}

impl TestRig {
    /// Consume the rig, keeping its temp resources alive for the rest of
    /// the process. For tests that only need the manager.
    pub fn into_manager(self) -> SettlementManager {
        let TestRig {
            manager, _audit_dir, ..
        } = self;
        std::mem::forget(_audit_dir);
        manager
    }
}

pub fn rig() -> TestRig {
    rig_with(Catalog::builtin(), RuntimeSettings::default())
}

pub fn rig_with(catalog: Catalog, settings: RuntimeSettings) -> TestRig {
    let store = Arc::new(MemoryStore::new());
    let sales = Arc::new(MockSalesSource::default());
    let purchases = Arc::new(MockPurchaseSource::default());
    let sync = Arc::new(RecordingSync::default());

    let audit_dir = tempfile::tempdir().expect("tempdir");
    let audit_path = audit_dir.path().join("audit.jsonl");
    let audit = AuditLog::open(&audit_path).expect("audit log");

    let manager = SettlementManager::new(
        Arc::clone(&store) as Arc<dyn SettlementStore>,
        Arc::clone(&sales) as Arc<dyn SalesSource>,
        Arc::clone(&purchases) as Arc<dyn PurchaseSource>,
        Arc::clone(&sync) as Arc<dyn InventorySync>,
        audit,
        catalog,
        settings,
    );

    TestRig {
        store,
        sales,
        purchases,
        sync,
        manager,
        audit_path,
        _audit_dir: audit_dir,
    }
}

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

pub fn material_map(pairs: &[(u32, f64)]) -> MaterialMap {
    pairs.iter().map(|&(id, v)| (MaterialId(id), v)).collect()
}

pub fn revenue_of(total: f64, products: &[(u32, f64, f64)]) -> Revenue {
    let mut r = Revenue::default();
    r.total = total;
    r.cash_counter = total;
    for &(pid, qty, amount) in products {
        r.products.insert(
            ProductId(pid),
            cbk_schemas::ProductSales {
                name: format!("product-{pid}"),
                qty,
                amount,
            },
        );
    }
    r
}

pub fn receipt(material: u32, qty: f64, unit_cost: f64) -> PurchaseReceipt {
    PurchaseReceipt {
        material_id: MaterialId(material),
        material_name: format!("material-{material}"),
        qty,
        unit_cost,
        cost: qty * unit_cost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_cas_rejects_stale_tail() {
        let rig = rig();
        let store = &rig.store;

        let mut s = sample_settlement();
        store.insert_chained(&s, None).await.unwrap();

        // A second writer that still believes the chain is empty loses.
        let mut racer = sample_settlement();
        racer.id = Uuid::new_v4();
        let err = store.insert_chained(&racer, None).await.unwrap_err();
        assert!(matches!(err, StoreError::ChainConflict { .. }));

        // Chained on the real tail succeeds.
        racer.previous_settlement_id = Some(s.id);
        store.insert_chained(&racer, Some(s.id)).await.unwrap();
        assert_eq!(store.settlement_count().await, 2);

        s.notes = "amended".to_string();
        store.update_amended(&s).await.unwrap();
        assert_eq!(store.by_id(s.id).await.unwrap().unwrap().notes, "amended");
    }

    #[tokio::test]
    async fn cost_resolution_picks_latest_effective() {
        let rig = rig();
        let t0: DateTime<Utc> = "2026-02-01T00:00:00Z".parse().unwrap();
        let sugar = MaterialId(1097);
        rig.store.seed_cost(sugar, 40.0, t0).await;
        rig.store
            .seed_cost(sugar, 46.0, t0 + chrono::Duration::days(5))
            .await;
        rig.store
            .seed_cost(sugar, 50.0, t0 + chrono::Duration::days(50))
            .await;

        let costs = rig
            .store
            .material_costs_as_of(t0 + chrono::Duration::days(10))
            .await
            .unwrap();
        assert_eq!(costs[&sugar], 46.0);
    }

    fn sample_settlement() -> Settlement {
        let now: DateTime<Utc> = "2026-02-10T18:30:00Z".parse().unwrap();
        Settlement {
            id: Uuid::new_v4(),
            period_start: now,
            period_end: now,
            settled_at: now,
            settled_by: "farooq".to_string(),
            status: cbk_schemas::SettlementStatus::Bootstrap,
            previous_settlement_id: None,
            raw_input: Default::default(),
            decomposed: MaterialMap::new(),
            opening_stock: MaterialMap::new(),
            purchases: Default::default(),
            closing_stock: MaterialMap::new(),
            consumption: MaterialMap::new(),
            expected_consumption: MaterialMap::new(),
            discrepancy: Default::default(),
            discrepancy_value: 0.0,
            wastage_items: Vec::new(),
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
            runner_tokens: Default::default(),
            runner_tokens_total: 0,
            gap_adjustments: Vec::new(),
            warnings: Vec::new(),
            notes: String::new(),
            edit_trail: Default::default(),
        }
    }
}
