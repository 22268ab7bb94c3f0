//! Inventory discrepancy: actual − expected − wasted, per material.
//!
//! Positive quantity means shortage (more left the shelf than sales and
//! recorded wastage explain), negative means surplus. Sub-epsilon noise
//! from ratio arithmetic is dropped; retained lines are annotated with
//! unit of measure and priced at the resolved unit cost.

use std::collections::BTreeMap;

use cbk_catalog::Catalog;
use cbk_schemas::rounding::{round2, round4, QTY_EPSILON};
use cbk_schemas::sparse;
use cbk_schemas::{DiscrepancyLine, MaterialId, MaterialMap};

use crate::costing::CostTable;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscrepancyResult {
    pub lines: BTreeMap<MaterialId, DiscrepancyLine>,
    /// Σ of line values, 2-dp. Positive = money lost to shortage.
    pub total_value: f64,
}

/// Compare actual against expected consumption over the union of both
/// key sets — a material expected but absent from every stock count must
/// still surface as a discrepancy.
pub fn discrepancy(
    actual: &MaterialMap,
    expected: &MaterialMap,
    wasted: &MaterialMap,
    costs: &CostTable,
    catalog: &Catalog,
) -> DiscrepancyResult {
    let mut result = DiscrepancyResult::default();
    let mut total = 0.0;
    for id in sparse::key_union(&[actual, expected]) {
        let disc = round4(
            sparse::qty(actual, id) - sparse::qty(expected, id) - sparse::qty(wasted, id),
        );
        if disc.abs() > QTY_EPSILON {
            let value = round2(disc * costs.cost(id));
            total += value;
            result.lines.insert(
                id,
                DiscrepancyLine {
                    qty: disc,
                    value,
                    uom: catalog.uom(id),
                },
            );
        }
    }
    result.total_value = round2(total);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUGAR: MaterialId = MaterialId(1097);
    const TEA: MaterialId = MaterialId(1098);
    const CUTLET: MaterialId = MaterialId(1106);

    fn m(pairs: &[(MaterialId, f64)]) -> MaterialMap {
        pairs.iter().copied().collect()
    }

    fn table(cat: &Catalog) -> CostTable {
        CostTable::fallback_only(cat)
    }

    #[test]
    fn shortage_is_positive_surplus_is_negative() {
        let cat = Catalog::builtin();
        // Tea: used 0.08, expected 0.1 — surplus of 0.02.
        let r = discrepancy(
            &m(&[(TEA, 0.08)]),
            &m(&[(TEA, 0.1)]),
            &m(&[]),
            &table(&cat),
            &cat,
        );
        let line = &r.lines[&TEA];
        assert_eq!(line.qty, -0.02);
        assert_eq!(line.value, round2(-0.02 * 500.0));
        assert_eq!(line.uom, "kg");
        assert_eq!(r.total_value, line.value);
    }

    #[test]
    fn wastage_explains_part_of_the_gap() {
        let cat = Catalog::builtin();
        // 5 cutlets gone, 3 sold, 2 recorded wasted: no discrepancy.
        let r = discrepancy(
            &m(&[(CUTLET, 5.0)]),
            &m(&[(CUTLET, 3.0)]),
            &m(&[(CUTLET, 2.0)]),
            &table(&cat),
            &cat,
        );
        assert!(r.lines.is_empty());
        assert_eq!(r.total_value, 0.0);
    }

    #[test]
    fn expected_but_never_counted_material_surfaces() {
        let cat = Catalog::builtin();
        // Sugar consumed per recipes but absent from all stock maps.
        let r = discrepancy(
            &m(&[]),
            &m(&[(SUGAR, 0.5)]),
            &m(&[]),
            &table(&cat),
            &cat,
        );
        assert_eq!(r.lines[&SUGAR].qty, -0.5);
    }

    #[test]
    fn sub_epsilon_noise_is_dropped() {
        let cat = Catalog::builtin();
        let r = discrepancy(
            &m(&[(SUGAR, 1.0005)]),
            &m(&[(SUGAR, 1.0)]),
            &m(&[]),
            &table(&cat),
            &cat,
        );
        assert!(r.lines.is_empty());
    }

    #[test]
    fn total_value_sums_across_lines() {
        let cat = Catalog::builtin();
        let r = discrepancy(
            &m(&[(SUGAR, 2.0), (TEA, 0.1)]),
            &m(&[(SUGAR, 1.0), (TEA, 0.2)]),
            &m(&[]),
            &table(&cat),
            &cat,
        );
        // Sugar short 1kg at 44, tea over 0.1kg at 500.
        assert_eq!(r.total_value, round2(44.0 - 50.0));
    }
}
