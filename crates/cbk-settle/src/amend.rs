//! Retroactive settlement correction.
//!
//! Corrections replace a purchase quantity (cost recomputed at the
//! previously-implied unit cost) or a closing-stock value, then everything
//! downstream of those inputs — consumption, discrepancy, actual COGS and
//! the profit lines — is re-derived from scratch. Revenue, opex, expected
//! consumption and the wastage record are inputs the correction cannot
//! touch, so they are carried unchanged. Every amendment appends to the
//! settlement's edit trail; trail entries are never rewritten.

use chrono::{DateTime, Utc};

use cbk_catalog::Catalog;
use cbk_schemas::rounding::{round2, round4};
use cbk_schemas::{
    AmendmentRecord, Correction, MaterialId, PreviousValue, Settlement, SettlementStatus,
};

use crate::consumption::actual_consumption;
use crate::costing::{cogs_actual, CostTable};
use crate::discrepancy::discrepancy;
use crate::wastage::{wasted_materials, WastageError};

#[derive(Debug, Clone, PartialEq)]
pub enum AmendError {
    /// An amendment with no corrections is a no-op and almost certainly a
    /// caller bug.
    NoCorrections,
    /// A bootstrap record is a baseline count, not a derived settlement;
    /// there is nothing to recompute.
    BootstrapSettlement,
    /// A purchase correction named a material with no purchase line.
    UnknownPurchase { material_id: MaterialId },
    /// The original purchase had zero quantity, so no unit cost can be
    /// implied for the corrected line.
    NoImpliedUnitCost { material_id: MaterialId },
    /// A corrected value was negative, NaN, or infinite.
    InvalidValue { material_id: MaterialId, value: f64 },
    /// The stored wastage record no longer decomposes against the current
    /// catalog.
    Wastage(WastageError),
}

impl std::fmt::Display for AmendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCorrections => write!(f, "amendment contains no corrections"),
            Self::BootstrapSettlement => {
                write!(f, "bootstrap settlements carry no derived figures to amend")
            }
            Self::UnknownPurchase { material_id } => {
                write!(f, "no purchase line for material {material_id}")
            }
            Self::NoImpliedUnitCost { material_id } => write!(
                f,
                "purchase for material {material_id} has zero quantity; unit cost cannot be implied"
            ),
            Self::InvalidValue { material_id, value } => write!(
                f,
                "material {material_id}: corrected value must be a finite non-negative number, got {value}"
            ),
            Self::Wastage(e) => write!(f, "wastage recompute failed: {e}"),
        }
    }
}

impl std::error::Error for AmendError {}

impl From<WastageError> for AmendError {
    fn from(e: WastageError) -> Self {
        AmendError::Wastage(e)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmendOutcome {
    /// The corrected settlement, re-derived and with the trail appended.
    pub settlement: Settlement,
    /// The trail entry that was appended (also present in the settlement).
    pub record: AmendmentRecord,
}

/// Apply corrections to a persisted settlement and re-derive its figures.
///
/// The caller has already authenticated the actor and resolved `costs` as
/// of the settlement date; this function is pure.
pub fn apply_corrections(
    settlement: &Settlement,
    corrections: &[Correction],
    costs: &CostTable,
    catalog: &Catalog,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<AmendOutcome, AmendError> {
    if corrections.is_empty() {
        return Err(AmendError::NoCorrections);
    }
    if settlement.status == SettlementStatus::Bootstrap {
        return Err(AmendError::BootstrapSettlement);
    }

    let mut amended = settlement.clone();
    let mut previous = Vec::with_capacity(corrections.len());

    for c in corrections {
        match c {
            Correction::Purchase {
                material_id,
                new_qty,
                ..
            } => {
                if !new_qty.is_finite() || *new_qty < 0.0 {
                    return Err(AmendError::InvalidValue {
                        material_id: *material_id,
                        value: *new_qty,
                    });
                }
                let line = amended.purchases.get_mut(material_id).ok_or(
                    AmendError::UnknownPurchase {
                        material_id: *material_id,
                    },
                )?;
                let implied = line
                    .implied_unit_cost()
                    .ok_or(AmendError::NoImpliedUnitCost {
                        material_id: *material_id,
                    })?;
                previous.push(PreviousValue::Purchase {
                    material_id: *material_id,
                    qty: line.qty,
                    cost: line.cost,
                });
                line.qty = round4(*new_qty);
                line.cost = round2(new_qty * implied);
            }
            Correction::Closing {
                material_id,
                new_value,
                ..
            } => {
                if !new_value.is_finite() || *new_value < 0.0 {
                    return Err(AmendError::InvalidValue {
                        material_id: *material_id,
                        value: *new_value,
                    });
                }
                previous.push(PreviousValue::Closing {
                    material_id: *material_id,
                    value: amended
                        .closing_stock
                        .get(material_id)
                        .copied()
                        .unwrap_or(0.0),
                });
                amended.closing_stock.insert(*material_id, round4(*new_value));
            }
        }
    }

    // Re-derive from the corrected inputs. Expected consumption depends
    // only on revenue and tokens, both untouched, so it is carried over.
    let consumption = actual_consumption(
        &amended.opening_stock,
        &amended.purchases,
        &amended.closing_stock,
        catalog,
    );
    let wasted = wasted_materials(&amended.wastage_items, catalog)?;
    let disc = discrepancy(
        &consumption.consumption,
        &amended.expected_consumption,
        &wasted,
        costs,
        catalog,
    );

    amended.consumption = consumption.consumption;
    amended.warnings = consumption.warnings;
    amended.discrepancy = disc.lines;
    amended.discrepancy_value = disc.total_value;
    amended.cogs_actual = cogs_actual(&amended.consumption, costs);
    amended.gross_profit = round2(amended.revenue.total - amended.cogs_actual);
    amended.net_profit = round2(amended.gross_profit - amended.opex_total);
    amended.adjusted_net_profit =
        round2(amended.net_profit - amended.discrepancy_value - amended.wastage_value);

    let record = AmendmentRecord {
        at,
        actor: actor.to_string(),
        corrections: corrections.to_vec(),
        previous,
    };
    amended.edit_trail.amendments.push(record.clone());

    Ok(AmendOutcome {
        settlement: amended,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbk_schemas::{MaterialMap, PurchaseLine, Revenue};
    use uuid::Uuid;

    const SUGAR: MaterialId = MaterialId(1097);

    fn t0() -> DateTime<Utc> {
        "2026-02-11T18:00:00Z".parse().unwrap()
    }

    /// A completed settlement with a single sugar purchase:
    /// opening 10, purchased 10 @ ₹50/kg, closing 12 → consumption 8.
    fn settlement() -> Settlement {
        let catalog = Catalog::builtin();
        let costs = CostTable::fallback_only(&catalog);
        let opening: MaterialMap = [(SUGAR, 10.0)].into_iter().collect();
        let closing: MaterialMap = [(SUGAR, 12.0)].into_iter().collect();
        let purchases = [(
            SUGAR,
            PurchaseLine {
                qty: 10.0,
                cost: 500.0,
            },
        )]
        .into_iter()
        .collect();

        let consumption = actual_consumption(&opening, &purchases, &closing, &catalog);
        let mut revenue = Revenue::default();
        revenue.total = 1000.0;

        let mut s = Settlement {
            id: Uuid::new_v4(),
            period_start: t0() - chrono::Duration::days(1),
            period_end: t0(),
            settled_at: t0(),
            settled_by: "farooq".to_string(),
            status: SettlementStatus::Completed,
            previous_settlement_id: Some(Uuid::new_v4()),
            raw_input: Default::default(),
            decomposed: closing.clone(),
            opening_stock: opening,
            purchases,
            closing_stock: closing,
            consumption: consumption.consumption,
            expected_consumption: MaterialMap::new(),
            discrepancy: Default::default(),
            discrepancy_value: 0.0,
            wastage_items: Vec::new(),
            wastage_value: 0.0,
            revenue,
            cogs_actual: 0.0,
            cogs_expected: 0.0,
            opex_salaries: 100.0,
            opex_expenses: 50.0,
            opex_total: 150.0,
            gross_profit: 0.0,
            net_profit: 0.0,
            adjusted_net_profit: 0.0,
            runner_tokens: Default::default(),
            runner_tokens_total: 0,
            gap_adjustments: Vec::new(),
            warnings: Vec::new(),
            notes: String::new(),
            edit_trail: Default::default(),
        };
        s.cogs_actual = cogs_actual(&s.consumption, &costs);
        s.gross_profit = round2(s.revenue.total - s.cogs_actual);
        s.net_profit = round2(s.gross_profit - s.opex_total);
        s.adjusted_net_profit = s.net_profit;
        s
    }

    #[test]
    fn purchase_correction_recomputes_at_implied_unit_cost() {
        let catalog = Catalog::builtin();
        let costs = CostTable::fallback_only(&catalog);
        let s = settlement();

        let out = apply_corrections(
            &s,
            &[Correction::Purchase {
                material_id: SUGAR,
                new_qty: 8.0,
                reason: Some("supplier short-delivered".to_string()),
            }],
            &costs,
            &catalog,
            "manager",
            t0() + chrono::Duration::hours(2),
        )
        .unwrap();

        let line = &out.settlement.purchases[&SUGAR];
        // Implied ₹50/kg: 8 kg → ₹400.
        assert_eq!(line.qty, 8.0);
        assert_eq!(line.cost, 400.0);
        // Consumption re-derived: 10 + 8 − 12 = 6.
        assert_eq!(out.settlement.consumption[&SUGAR], 6.0);
        // COGS re-priced at the sugar fallback cost.
        assert_eq!(out.settlement.cogs_actual, round2(6.0 * 44.0));
        assert_eq!(
            out.settlement.gross_profit,
            round2(1000.0 - out.settlement.cogs_actual)
        );
        assert_eq!(
            out.settlement.net_profit,
            round2(out.settlement.gross_profit - 150.0)
        );
    }

    #[test]
    fn closing_correction_rederives_consumption() {
        let catalog = Catalog::builtin();
        let costs = CostTable::fallback_only(&catalog);
        let s = settlement();

        let out = apply_corrections(
            &s,
            &[Correction::Closing {
                material_id: SUGAR,
                new_value: 11.0,
                reason: None,
            }],
            &costs,
            &catalog,
            "manager",
            t0(),
        )
        .unwrap();

        assert_eq!(out.settlement.closing_stock[&SUGAR], 11.0);
        assert_eq!(out.settlement.consumption[&SUGAR], 9.0);
    }

    #[test]
    fn edit_trail_records_old_and_new_values() {
        let catalog = Catalog::builtin();
        let costs = CostTable::fallback_only(&catalog);
        let s = settlement();

        let out = apply_corrections(
            &s,
            &[Correction::Purchase {
                material_id: SUGAR,
                new_qty: 8.0,
                reason: None,
            }],
            &costs,
            &catalog,
            "manager",
            t0(),
        )
        .unwrap();

        assert_eq!(out.settlement.edit_trail.amendments.len(), 1);
        let rec = &out.settlement.edit_trail.amendments[0];
        assert_eq!(rec.actor, "manager");
        assert_eq!(
            rec.previous,
            vec![PreviousValue::Purchase {
                material_id: SUGAR,
                qty: 10.0,
                cost: 500.0
            }]
        );
        assert_eq!(rec.corrections.len(), 1);
        assert_eq!(out.record, *rec);
    }

    #[test]
    fn second_amendment_appends_not_overwrites() {
        let catalog = Catalog::builtin();
        let costs = CostTable::fallback_only(&catalog);
        let s = settlement();

        let first = apply_corrections(
            &s,
            &[Correction::Closing {
                material_id: SUGAR,
                new_value: 11.0,
                reason: None,
            }],
            &costs,
            &catalog,
            "manager",
            t0(),
        )
        .unwrap();
        let second = apply_corrections(
            &first.settlement,
            &[Correction::Closing {
                material_id: SUGAR,
                new_value: 11.5,
                reason: None,
            }],
            &costs,
            &catalog,
            "manager",
            t0() + chrono::Duration::minutes(5),
        )
        .unwrap();

        let trail = &second.settlement.edit_trail.amendments;
        assert_eq!(trail.len(), 2);
        // The second entry's previous value is the first correction's result.
        assert_eq!(
            trail[1].previous,
            vec![PreviousValue::Closing {
                material_id: SUGAR,
                value: 11.0
            }]
        );
    }

    #[test]
    fn unknown_purchase_is_rejected() {
        let catalog = Catalog::builtin();
        let costs = CostTable::fallback_only(&catalog);
        let s = settlement();

        let err = apply_corrections(
            &s,
            &[Correction::Purchase {
                material_id: MaterialId(1095),
                new_qty: 5.0,
                reason: None,
            }],
            &costs,
            &catalog,
            "manager",
            t0(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            AmendError::UnknownPurchase {
                material_id: MaterialId(1095)
            }
        );
    }

    #[test]
    fn empty_corrections_are_rejected() {
        let catalog = Catalog::builtin();
        let costs = CostTable::fallback_only(&catalog);
        let err =
            apply_corrections(&settlement(), &[], &costs, &catalog, "manager", t0()).unwrap_err();
        assert_eq!(err, AmendError::NoCorrections);
    }

    #[test]
    fn bootstrap_settlement_cannot_be_amended() {
        let catalog = Catalog::builtin();
        let costs = CostTable::fallback_only(&catalog);
        let mut s = settlement();
        s.status = SettlementStatus::Bootstrap;

        let err = apply_corrections(
            &s,
            &[Correction::Closing {
                material_id: SUGAR,
                new_value: 1.0,
                reason: None,
            }],
            &costs,
            &catalog,
            "manager",
            t0(),
        )
        .unwrap_err();
        assert_eq!(err, AmendError::BootstrapSettlement);
    }
}
