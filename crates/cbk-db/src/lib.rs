//! Postgres persistence for the settlement ledger.
//!
//! Settlements are stored whole as JSONB (one record, one source of
//! truth) with a few indexed columns for chain and history queries.
//! [`PgStore`] implements the runtime's [`SettlementStore`] trait; the
//! chain compare-and-swap is a conditional insert backed by a unique
//! index on the predecessor link.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use cbk_runtime::store::{SettlementStore, StoreError};
use cbk_schemas::{
    ExpenseEntry, MaterialId, Settlement, SettlementSummary, StaffSalary, Vessel,
};

pub const ENV_DB_URL: &str = "CBK_DATABASE_URL";

/// Connect to Postgres using CBK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='settlements'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_settlements_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_settlements_table: bool,
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    fn decode_settlement(row: &sqlx::postgres::PgRow) -> Result<Settlement> {
        let payload: serde_json::Value = row.try_get("payload")?;
        serde_json::from_value(payload).context("settlement payload decode failed")
    }
}

const SETTLEMENT_COLUMNS: &str = "id, period_start, period_end, settled_at, settled_by, status, previous_settlement_id, payload";

/// Detect a Postgres unique constraint violation by index name.
fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}

#[async_trait::async_trait]
impl SettlementStore for PgStore {
    async fn tail(&self) -> Result<Option<Settlement>, StoreError> {
        let row = sqlx::query(&format!(
            "select {SETTLEMENT_COLUMNS} from settlements order by settled_at desc, created_at desc limit 1"
        ))
        .fetch_optional(&self.pool)
        .await
        .context("tail query failed")?;

        row.map(|r| Self::decode_settlement(&r))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<Settlement>, StoreError> {
        let row = sqlx::query(&format!(
            "select {SETTLEMENT_COLUMNS} from settlements where id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("by_id query failed")?;

        row.map(|r| Self::decode_settlement(&r))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn by_date(&self, date: NaiveDate) -> Result<Option<Settlement>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            select {SETTLEMENT_COLUMNS} from settlements
            where period_start::date <= $1 and period_end::date >= $1
            order by settled_at desc
            limit 1
            "#
        ))
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .context("by_date query failed")?;

        row.map(|r| Self::decode_settlement(&r))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn history(&self, limit: usize) -> Result<Vec<SettlementSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "select {SETTLEMENT_COLUMNS} from settlements order by settled_at desc limit $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("history query failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            let s = Self::decode_settlement(r)?;
            out.push(SettlementSummary::from(&s));
        }
        Ok(out)
    }

    async fn insert_chained(
        &self,
        settlement: &Settlement,
        expected_tail: Option<Uuid>,
    ) -> Result<(), StoreError> {
        let payload =
            serde_json::to_value(settlement).context("settlement payload encode failed")?;

        // CAS: the insert only lands if the current tail is still the one
        // the caller derived this settlement from. The unique chain-link
        // index closes the remaining race between the subquery and the
        // insert.
        let res = sqlx::query(
            r#"
            insert into settlements
              (id, period_start, period_end, settled_at, settled_by, status, previous_settlement_id, payload)
            select $1, $2, $3, $4, $5, $6, $7, $8
            where (
                select id from settlements
                order by settled_at desc, created_at desc
                limit 1
            ) is not distinct from $7
            "#,
        )
        .bind(settlement.id)
        .bind(settlement.period_start)
        .bind(settlement.period_end)
        .bind(settlement.settled_at)
        .bind(&settlement.settled_by)
        .bind(settlement.status.as_str())
        .bind(expected_tail)
        .bind(&payload)
        .execute(&self.pool)
        .await;

        match res {
            Ok(done) if done.rows_affected() == 1 => Ok(()),
            Ok(_) => Err(StoreError::ChainConflict {
                expected: expected_tail,
            }),
            Err(e) if is_unique_violation(&e, "uq_settlements_chain_link") => {
                Err(StoreError::ChainConflict {
                    expected: expected_tail,
                })
            }
            Err(e) => Err(StoreError::Backend(
                anyhow::Error::new(e).context("insert_chained failed"),
            )),
        }
    }

    async fn update_amended(&self, settlement: &Settlement) -> Result<(), StoreError> {
        let payload =
            serde_json::to_value(settlement).context("settlement payload encode failed")?;
        let done = sqlx::query("update settlements set payload = $2 where id = $1")
            .bind(settlement.id)
            .bind(&payload)
            .execute(&self.pool)
            .await
            .context("update_amended failed")?;
        if done.rows_affected() == 0 {
            return Err(StoreError::Backend(anyhow!(
                "update_amended: settlement {} not found",
                settlement.id
            )));
        }
        Ok(())
    }

    async fn has_successor(&self, id: Uuid) -> Result<bool, StoreError> {
        let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
            "select exists (select 1 from settlements where previous_settlement_id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("has_successor query failed")?;
        Ok(exists)
    }

    // -- owned reference tables ---------------------------------------

    async fn vessels(&self) -> Result<Vec<Vessel>, StoreError> {
        let rows = sqlx::query(
            "select code, name, liquid_type, location, tare_kg from vessels order by location, name",
        )
        .fetch_all(&self.pool)
        .await
        .context("vessels query failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(Vessel {
                code: r.try_get("code").context("vessels.code")?,
                name: r.try_get("name").context("vessels.name")?,
                liquid_type: r.try_get("liquid_type").context("vessels.liquid_type")?,
                location: r.try_get("location").context("vessels.location")?,
                tare_kg: r.try_get("tare_kg").context("vessels.tare_kg")?,
            });
        }
        Ok(out)
    }

    async fn save_vessel(&self, vessel: &Vessel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into vessels (code, name, liquid_type, location, tare_kg, updated_at)
            values ($1, $2, $3, $4, $5, now())
            on conflict (code) do update
              set name = $2, liquid_type = $3, location = $4, tare_kg = $5, updated_at = now()
            "#,
        )
        .bind(&vessel.code)
        .bind(&vessel.name)
        .bind(&vessel.liquid_type)
        .bind(&vessel.location)
        .bind(vessel.tare_kg)
        .execute(&self.pool)
        .await
        .context("save_vessel failed")?;
        Ok(())
    }

    async fn active_salaries(&self) -> Result<Vec<StaffSalary>, StoreError> {
        let rows = sqlx::query(
            "select name, role, monthly_salary, active from staff_salaries where active order by name",
        )
        .fetch_all(&self.pool)
        .await
        .context("active_salaries query failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(StaffSalary {
                name: r.try_get("name").context("staff_salaries.name")?,
                role: r.try_get("role").context("staff_salaries.role")?,
                monthly_salary: r
                    .try_get("monthly_salary")
                    .context("staff_salaries.monthly_salary")?,
                active: r.try_get("active").context("staff_salaries.active")?,
            });
        }
        Ok(out)
    }

    async fn save_salary(&self, salary: &StaffSalary) -> Result<(), StoreError> {
        // A new row per change keeps the roster history; prior rows for
        // the same name are deactivated.
        let mut tx = self
            .pool
            .begin()
            .await
            .context("save_salary begin failed")?;
        sqlx::query("update staff_salaries set active = false, updated_at = now() where name = $1")
            .bind(&salary.name)
            .execute(&mut *tx)
            .await
            .context("save_salary deactivate failed")?;
        sqlx::query(
            r#"
            insert into staff_salaries (name, role, monthly_salary, active, updated_at)
            values ($1, $2, $3, $4, now())
            "#,
        )
        .bind(&salary.name)
        .bind(&salary.role)
        .bind(salary.monthly_salary)
        .bind(salary.active)
        .execute(&mut *tx)
        .await
        .context("save_salary insert failed")?;
        tx.commit().await.context("save_salary commit failed")?;
        Ok(())
    }

    async fn expenses_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExpenseEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            select amount, category, description, recorded_at
            from counter_expenses
            where recorded_at >= $1 and recorded_at < $2
            order by recorded_at
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("expenses_between query failed")?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(ExpenseEntry {
                amount: r.try_get("amount").context("counter_expenses.amount")?,
                category: r.try_get("category").context("counter_expenses.category")?,
                description: r
                    .try_get("description")
                    .context("counter_expenses.description")?,
                recorded_at: r
                    .try_get("recorded_at")
                    .context("counter_expenses.recorded_at")?,
            });
        }
        Ok(out)
    }

    async fn record_expense(&self, entry: &ExpenseEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into counter_expenses (amount, category, description, recorded_at)
            values ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.amount)
        .bind(&entry.category)
        .bind(&entry.description)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await
        .context("record_expense failed")?;
        Ok(())
    }

    async fn material_costs_as_of(
        &self,
        at: DateTime<Utc>,
    ) -> Result<BTreeMap<MaterialId, f64>, StoreError> {
        // Latest cost per material with effective date ≤ the settlement
        // date, resolved in one batch.
        let rows = sqlx::query(
            r#"
            select distinct on (material_id) material_id, cost_per_unit
            from material_costs
            where effective_from <= $1
            order by material_id, effective_from desc
            "#,
        )
        .bind(at)
        .fetch_all(&self.pool)
        .await
        .context("material_costs_as_of query failed")?;

        let mut out = BTreeMap::new();
        for r in &rows {
            let material_id: i64 = r.try_get("material_id").context("material_costs.material_id")?;
            let cost: f64 = r
                .try_get("cost_per_unit")
                .context("material_costs.cost_per_unit")?;
            out.insert(MaterialId(material_id as u32), cost);
        }
        Ok(out)
    }

    async fn record_material_cost(
        &self,
        material: MaterialId,
        cost_per_unit: f64,
        effective_from: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into material_costs (material_id, cost_per_unit, effective_from)
            values ($1, $2, $3)
            "#,
        )
        .bind(i64::from(material.0))
        .bind(cost_per_unit)
        .bind(effective_from)
        .execute(&self.pool)
        .await
        .context("record_material_cost failed")?;
        Ok(())
    }
}
