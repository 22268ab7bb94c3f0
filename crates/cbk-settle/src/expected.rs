//! Recipe-expected material consumption.
//!
//! What the period's sales *should* have consumed: every sold unit expanded
//! through its product recipe. The flagship token product gets a carry
//! correction because its POS sales and physical preparation are decoupled
//! by the runner token hand-off — a cup rung up today may be brewed
//! tomorrow, against a token counted tonight.

use cbk_catalog::Catalog;
use cbk_schemas::rounding::round4;
use cbk_schemas::{MaterialMap, Revenue};

/// Unsold-token totals on both sides of the period boundary.
///
/// `effective_qty = pos_qty − current_unsold + previous_unsold`: tokens
/// still unsold tonight were rung up but not yet brewed (subtract); tokens
/// unsold at the previous settlement were brewed this period against an
/// earlier period's sale (add back).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenCarry {
    pub current_unsold: u32,
    pub previous_unsold: u32,
}

impl TokenCarry {
    pub fn effective_qty(&self, pos_qty: f64) -> f64 {
        pos_qty - f64::from(self.current_unsold) + f64::from(self.previous_unsold)
    }
}

/// Expand the period's sales through the catalog recipes.
///
/// Products absent from the sales data contribute nothing, including the
/// token product: no recorded sale means no expectation to correct.
pub fn expected_consumption(
    revenue: &Revenue,
    catalog: &Catalog,
    tokens: &TokenCarry,
) -> MaterialMap {
    let mut expected = MaterialMap::new();
    for (pid, product) in &catalog.products {
        let Some(sold) = revenue.products.get(pid) else {
            continue;
        };
        let qty_sold = if Some(*pid) == catalog.token_product {
            tokens.effective_qty(sold.qty)
        } else {
            sold.qty
        };
        for (mid, per_unit) in &product.materials {
            let entry = expected.entry(*mid).or_insert(0.0);
            *entry = round4(*entry + qty_sold * per_unit);
        }
    }
    expected
}
