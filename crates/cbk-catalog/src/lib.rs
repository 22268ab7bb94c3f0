//! Reference data for the settlement engine.
//!
//! Everything the engine needs to interpret a physical count lives here as
//! *data*, not code: the material catalog, product recipes, the per-field
//! decomposition rule registry, count zones with gap tolerances, wastage
//! state ratios, vessel defaults, and fallback unit costs. New physical
//! input types are added by registering a field, never by editing the
//! decomposition algorithm.
//!
//! [`Catalog::builtin`] carries the current shop dataset; `loader` merges
//! layered YAML overrides on top and hashes the effective config.

pub mod builtin;
pub mod loader;

use std::collections::BTreeMap;

use cbk_schemas::{MaterialId, MaterialMap, ProductId, Vessel};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Materials & products
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMaterial {
    pub name: String,
    pub code: String,
    /// Unit of measure: "kg", "L", "Units".
    pub uom: String,
}

/// A sellable POS product and its recipe: raw-material quantity consumed
/// per unit sold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub code: String,
    pub price: f64,
    pub materials: BTreeMap<MaterialId, f64>,
}

// ---------------------------------------------------------------------------
// Decomposition rules
// ---------------------------------------------------------------------------

/// How a physical input field converts into raw-material quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecompositionRule {
    /// Value added 1:1 to the mapped material.
    Direct { material: MaterialId },
    /// Vessel weighings: net kg = max(0, gross − tare), volume = net /
    /// density(liquid), summed across entries, then multiplied through the
    /// per-liter ratio table.
    VesselWeight {
        liquid: String,
        ratios: BTreeMap<MaterialId, f64>,
    },
    /// Count scaled through a fixed per-unit material multiplier map
    /// (boxes, packets).
    CompositeCount { per_unit: BTreeMap<MaterialId, f64> },
    /// Base material 1:1 plus secondary materials at fixed per-unit ratios
    /// (fried items, prepared buns).
    PreparedItem {
        base: MaterialId,
        extras: BTreeMap<MaterialId, f64>,
    },
}

/// One registered physical input field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub rule: DecompositionRule,
    /// Superseded legacy field names whose values are summed into this
    /// field before the rule applies. No double rule application: the
    /// alias itself is never registered.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Name of a direct-entry field this one supersedes when populated.
    /// A non-empty weighing array wins over the direct value; this is a
    /// precedence, not a merge.
    #[serde(default)]
    pub overrides: Option<String>,
    /// Count zone this field is physically located in.
    #[serde(default)]
    pub zone: Option<String>,
    /// Products whose sales deplete this field's stock between count time
    /// and submission time (gap adjustment).
    #[serde(default)]
    pub products: Vec<ProductId>,
}

/// A physical count zone. Slow-moving storage zones tolerate longer gaps
/// between counting and submission than fast-moving counter zones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub gap_tolerance_secs: i64,
}

/// State-specific wastage decomposition: the same item wasted in
/// different physical states carries different material sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WastageState {
    pub item: String,
    pub state: String,
    pub materials: MaterialMap,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub materials: BTreeMap<MaterialId, RawMaterial>,
    pub products: BTreeMap<ProductId, Product>,
    pub fields: BTreeMap<String, FieldSpec>,
    pub zones: BTreeMap<String, Zone>,
    /// Liquid type → density in kg/L, for vessel weight → volume.
    pub densities: BTreeMap<String, f64>,
    pub wastage_states: Vec<WastageState>,
    /// Static vessel table backing codes not registered in the DB.
    pub default_vessels: Vec<Vessel>,
    /// Static reference unit costs, used when no time-scoped cost exists.
    pub fallback_costs: BTreeMap<MaterialId, f64>,
    /// The flagship product whose recorded sales are decoupled from
    /// physical preparation by the token hand-off; its expected
    /// consumption applies the token-carry correction.
    pub token_product: Option<ProductId>,
}

impl Catalog {
    pub fn material_name(&self, id: MaterialId) -> String {
        self.materials
            .get(&id)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn uom(&self, id: MaterialId) -> String {
        self.materials
            .get(&id)
            .map(|m| m.uom.clone())
            .unwrap_or_default()
    }

    pub fn density(&self, liquid: &str) -> Option<f64> {
        self.densities.get(liquid).copied()
    }

    pub fn recipe(&self, product: ProductId) -> Option<&BTreeMap<MaterialId, f64>> {
        self.products.get(&product).map(|p| &p.materials)
    }

    /// Gap tolerance for a field, resolved through its zone. `None` when
    /// the field has no zone (gap adjustment does not apply to it).
    pub fn gap_tolerance_secs(&self, field: &str) -> Option<i64> {
        let spec = self.fields.get(field)?;
        let zone = spec.zone.as_deref()?;
        self.zones.get(zone).map(|z| z.gap_tolerance_secs)
    }

    pub fn wastage_ratio(&self, item: &str, state: &str) -> Option<&MaterialMap> {
        self.wastage_states
            .iter()
            .find(|w| w.item == item && w.state == state)
            .map(|w| &w.materials)
    }

    pub fn default_vessel(&self, code: &str) -> Option<&Vessel> {
        self.default_vessels.iter().find(|v| v.code == code)
    }
}
