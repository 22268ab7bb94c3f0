//! Wastage decomposition.
//!
//! Recorded losses are decomposed into raw materials the same way sales
//! are: a wasted fried cutlet carries the raw cutlet *and* the oil it
//! absorbed, a wasted raw cutlet only the cutlet. Legacy entries name a
//! material directly and are taken as-is.

use cbk_catalog::Catalog;
use cbk_schemas::rounding::round4;
use cbk_schemas::sparse;
use cbk_schemas::{MaterialMap, WastageItem};

#[derive(Debug, Clone, PartialEq)]
pub enum WastageError {
    /// The item/state pair has no registered ratio table.
    UnknownState { item: String, state: String },
    /// A wastage quantity was negative, NaN, or infinite.
    InvalidQty { item: String, qty: f64 },
}

impl std::fmt::Display for WastageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownState { item, state } => {
                write!(f, "no wastage ratio registered for '{item}' in state '{state}'")
            }
            Self::InvalidQty { item, qty } => {
                write!(f, "wastage '{item}': qty must be a finite non-negative number, got {qty}")
            }
        }
    }
}

impl std::error::Error for WastageError {}

/// Total raw materials lost across all wastage entries, 4-dp rounded.
pub fn wasted_materials(
    items: &[WastageItem],
    catalog: &Catalog,
) -> Result<MaterialMap, WastageError> {
    let mut wasted = MaterialMap::new();
    for w in items {
        match w {
            WastageItem::Stated { item, state, qty, .. } => {
                if !qty.is_finite() || *qty < 0.0 {
                    return Err(WastageError::InvalidQty {
                        item: item.clone(),
                        qty: *qty,
                    });
                }
                let ratios = catalog.wastage_ratio(item, state).ok_or_else(|| {
                    WastageError::UnknownState {
                        item: item.clone(),
                        state: state.clone(),
                    }
                })?;
                for (mid, per_unit) in ratios {
                    sparse::add(&mut wasted, *mid, qty * per_unit);
                }
            }
            WastageItem::Direct { material_id, qty } => {
                if !qty.is_finite() || *qty < 0.0 {
                    return Err(WastageError::InvalidQty {
                        item: material_id.to_string(),
                        qty: *qty,
                    });
                }
                sparse::add(&mut wasted, *material_id, *qty);
            }
        }
    }
    for v in wasted.values_mut() {
        *v = round4(*v);
    }
    Ok(wasted)
}
