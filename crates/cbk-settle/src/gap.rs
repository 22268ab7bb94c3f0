//! Counting-time skew correction ("phantom stock").
//!
//! A field counted early but frozen in the submitted snapshot overstates
//! closing stock by whatever sold between its count and the submission —
//! those units are physically gone. The correction is split in two so the
//! engine stays pure: [`plan_gap_windows`] decides *which* sales windows
//! need fetching, the caller fetches them (fan-out), and
//! [`apply_gap_adjustments`] subtracts the decomposed sales from closing
//! stock, floored at zero per material.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use cbk_catalog::Catalog;
use cbk_schemas::rounding::round4;
use cbk_schemas::sparse;
use cbk_schemas::{FieldTimestamps, GapAdjustment, MaterialMap, ProductId};

/// A sales window the caller must fetch before closing stock is final:
/// products mapped to `field`, sold within `[from, to)`.
#[derive(Debug, Clone, PartialEq)]
pub struct GapWindow {
    pub field: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub gap_seconds: i64,
    pub products: Vec<ProductId>,
}

/// Which fields were counted long enough before the reference instant
/// (the latest of all provided timestamps) to exceed their zone's gap
/// tolerance. Deterministic given its inputs; fields without a zone or
/// without mapped products never produce a window.
pub fn plan_gap_windows(timestamps: &FieldTimestamps, catalog: &Catalog) -> Vec<GapWindow> {
    let Some(reference) = timestamps.values().max().copied() else {
        return Vec::new();
    };

    let mut windows = Vec::new();
    for (field, ts) in timestamps {
        let Some(tolerance) = catalog.gap_tolerance_secs(field) else {
            continue;
        };
        let gap_seconds = (reference - *ts).num_seconds();
        if gap_seconds <= tolerance {
            continue;
        }
        let Some(spec) = catalog.fields.get(field) else {
            continue;
        };
        if spec.products.is_empty() {
            continue;
        }
        windows.push(GapWindow {
            field: field.clone(),
            from: *ts,
            to: reference,
            gap_seconds,
            products: spec.products.clone(),
        });
    }
    windows
}

/// Subtract gap-window sales, decomposed through recipes, from closing
/// stock. No material ever goes below zero; the recorded adjustment
/// carries what was actually removed, not what the sales implied.
pub fn apply_gap_adjustments(
    closing: &MaterialMap,
    sold_windows: &[(GapWindow, BTreeMap<ProductId, f64>)],
    catalog: &Catalog,
) -> (MaterialMap, Vec<GapAdjustment>) {
    let mut adjusted = closing.clone();
    let mut adjustments = Vec::new();

    for (window, sold) in sold_windows {
        // Decompose the window's sales into raw materials.
        let mut implied = MaterialMap::new();
        for (pid, qty) in sold {
            let Some(recipe) = catalog.recipe(*pid) else {
                continue;
            };
            for (mid, per_unit) in recipe {
                sparse::add(&mut implied, *mid, qty * per_unit);
            }
        }

        let mut subtracted = MaterialMap::new();
        for (mid, qty) in &implied {
            let before = sparse::qty(&adjusted, *mid);
            let after = round4((before - qty).max(0.0));
            let removed = round4(before - after);
            if removed > 0.0 {
                adjusted.insert(*mid, after);
                subtracted.insert(*mid, removed);
            }
        }

        adjustments.push(GapAdjustment {
            field: window.field.clone(),
            gap_seconds: window.gap_seconds,
            products_sold: sold.clone(),
            materials_subtracted: subtracted,
        });
    }

    (adjusted, adjustments)
}
