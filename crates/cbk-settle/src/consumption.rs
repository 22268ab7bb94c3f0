//! Actual material consumption for a settlement period.
//!
//! `consumption = opening + purchased − closing`, per material, over the
//! union of the three maps. Negative consumption means closing stock
//! exceeded what opening plus purchases can explain — a miscount or an
//! unlogged delivery. It is preserved and surfaced as a warning, never
//! corrected automatically; clamping happens only where consumption is
//! priced into COGS.

use cbk_catalog::Catalog;
use cbk_schemas::rounding::{round4, QTY_EPSILON};
use cbk_schemas::sparse;
use cbk_schemas::{ConsumptionWarning, MaterialMap, PurchaseMap};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConsumptionResult {
    pub consumption: MaterialMap,
    pub warnings: Vec<ConsumptionWarning>,
}

pub fn actual_consumption(
    opening: &MaterialMap,
    purchases: &PurchaseMap,
    closing: &MaterialMap,
    catalog: &Catalog,
) -> ConsumptionResult {
    let purchased_qty: MaterialMap = purchases.iter().map(|(id, l)| (*id, l.qty)).collect();

    let mut result = ConsumptionResult::default();
    for id in sparse::key_union(&[opening, &purchased_qty, closing]) {
        let o = sparse::qty(opening, id);
        let p = sparse::qty(&purchased_qty, id);
        let c = sparse::qty(closing, id);
        let used = round4(o + p - c);

        // Materials that were never present and never moved stay out of
        // the map; a zero with positive opening/purchases is meaningful
        // (fully consumed vs fully held) and is kept.
        if used != 0.0 || o > 0.0 || p > 0.0 {
            result.consumption.insert(id, used);
            if used < -QTY_EPSILON {
                result.warnings.push(ConsumptionWarning {
                    material_id: id,
                    material_name: catalog.material_name(id),
                    opening: o,
                    purchased: p,
                    closing: c,
                    used,
                    message: format!(
                        "Negative consumption: closing ({c}) > opening ({o}) + purchased ({p}). \
                         Possible unrecorded delivery or counting error."
                    ),
                });
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbk_schemas::{MaterialId, PurchaseLine};

    const SUGAR: MaterialId = MaterialId(1097);
    const MILK: MaterialId = MaterialId(1095);

    fn m(pairs: &[(MaterialId, f64)]) -> MaterialMap {
        pairs.iter().copied().collect()
    }

    fn p(pairs: &[(MaterialId, f64)]) -> PurchaseMap {
        pairs
            .iter()
            .map(|&(id, qty)| (id, PurchaseLine { qty, cost: 0.0 }))
            .collect()
    }

    #[test]
    fn opening_plus_purchases_minus_closing() {
        // opening 10kg sugar, purchased 5kg, closing 12kg => used 3kg.
        let r = actual_consumption(
            &m(&[(SUGAR, 10.0)]),
            &p(&[(SUGAR, 5.0)]),
            &m(&[(SUGAR, 12.0)]),
            &Catalog::builtin(),
        );
        assert_eq!(r.consumption[&SUGAR], 3.0);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn union_covers_materials_missing_from_some_maps() {
        let r = actual_consumption(
            &m(&[(SUGAR, 2.0)]),
            &p(&[(MILK, 10.0)]),
            &m(&[]),
            &Catalog::builtin(),
        );
        assert_eq!(r.consumption[&SUGAR], 2.0);
        assert_eq!(r.consumption[&MILK], 10.0);
    }

    #[test]
    fn negative_consumption_is_preserved_and_warned() {
        let r = actual_consumption(
            &m(&[(SUGAR, 1.0)]),
            &p(&[]),
            &m(&[(SUGAR, 4.0)]),
            &Catalog::builtin(),
        );
        assert_eq!(r.consumption[&SUGAR], -3.0);
        assert_eq!(r.warnings.len(), 1);
        assert_eq!(r.warnings[0].material_id, SUGAR);
        assert!(r.warnings[0].message.contains("Negative consumption"));
    }

    #[test]
    fn fully_consumed_material_keeps_zero_closing_entry() {
        let r = actual_consumption(
            &m(&[(SUGAR, 5.0)]),
            &p(&[]),
            &m(&[(SUGAR, 5.0)]),
            &Catalog::builtin(),
        );
        // used == 0 but opening > 0: entry retained at 0.
        assert_eq!(r.consumption[&SUGAR], 0.0);
    }

    #[test]
    fn zero_entry_with_no_movement_is_dropped() {
        let r = actual_consumption(
            &m(&[]),
            &p(&[]),
            &m(&[(SUGAR, 0.0)]),
            &Catalog::builtin(),
        );
        assert!(r.consumption.is_empty());
    }

    #[test]
    fn result_is_rounded_to_four_decimals() {
        let r = actual_consumption(
            &m(&[(MILK, 10.1234567)]),
            &p(&[]),
            &m(&[(MILK, 0.0000001)]),
            &Catalog::builtin(),
        );
        assert_eq!(r.consumption[&MILK], 10.1235);
    }
}
