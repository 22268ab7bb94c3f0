//! Settlement calculation engine.
//!
//! Pure derivations over the decomposed snapshots: actual and
//! recipe-expected consumption, wastage decomposition, discrepancy,
//! costing and P&L, counting-time gap correction, and retroactive
//! amendment recompute. No IO and no clock — callers supply instants and
//! externally fetched data, so every function here is deterministic and
//! directly testable.

pub mod amend;
pub mod consumption;
pub mod costing;
pub mod discrepancy;
pub mod expected;
pub mod gap;
pub mod wastage;

pub use amend::{apply_corrections, AmendError, AmendOutcome};
pub use consumption::{actual_consumption, ConsumptionResult};
pub use costing::{
    cogs_actual, cogs_expected, compute_pnl, prorated_salaries, wastage_value, CostTable, Pnl,
};
pub use discrepancy::{discrepancy, DiscrepancyResult};
pub use expected::{expected_consumption, TokenCarry};
pub use gap::{apply_gap_adjustments, plan_gap_windows, GapWindow};
pub use wastage::{wasted_materials, WastageError};
