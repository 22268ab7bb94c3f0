//! Unit decomposition engine.
//!
//! Converts a staff-entered physical count into the canonical raw-material
//! snapshot. Deterministic and pure: identical input, catalog, and vessel
//! registry yield a bit-identical [`cbk_schemas::MaterialMap`] — no IO, no
//! time, no randomness.
//!
//! Rules come from the catalog's field registry; this module only
//! dispatches them. See [`cbk_catalog::DecompositionRule`].

use std::collections::{BTreeMap, BTreeSet};

use cbk_catalog::{Catalog, DecompositionRule, FieldSpec};
use cbk_schemas::rounding::round4;
use cbk_schemas::{MaterialId, MaterialMap, PhysicalInput, Vessel, VesselEntry};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum DecomposeError {
    /// A numeric field was negative, NaN, or infinite.
    InvalidCount { field: String, value: f64 },
    /// A vessel weighing was negative, NaN, or infinite.
    InvalidWeight { vessel_code: String, value: f64 },
    /// The input value shape does not match the registered rule (e.g. a
    /// weighing array submitted for a plain-count field).
    FieldShape { field: String, expected: &'static str },
    /// The field's rule names a liquid absent from the density table.
    UnknownLiquid { field: String, liquid: String },
}

impl std::fmt::Display for DecomposeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCount { field, value } => {
                write!(f, "field '{field}': count must be a finite non-negative number, got {value}")
            }
            Self::InvalidWeight { vessel_code, value } => {
                write!(f, "vessel '{vessel_code}': weight must be a finite non-negative number, got {value}")
            }
            Self::FieldShape { field, expected } => {
                write!(f, "field '{field}': expected {expected}")
            }
            Self::UnknownLiquid { field, liquid } => {
                write!(f, "field '{field}': no density registered for liquid '{liquid}'")
            }
        }
    }
}

impl std::error::Error for DecomposeError {}

// ---------------------------------------------------------------------------
// Vessel registry
// ---------------------------------------------------------------------------

/// Registered vessels by code, with the catalog's static defaults behind
/// them. An entirely unknown code resolves to a zero tare — a soft fail
/// recorded in the outcome, not an error, so a mislabeled vessel never
/// blocks a settlement.
#[derive(Debug, Clone, Default)]
pub struct VesselRegistry {
    registered: BTreeMap<String, Vessel>,
    defaults: BTreeMap<String, Vessel>,
}

impl VesselRegistry {
    pub fn new(registered: Vec<Vessel>, defaults: &[Vessel]) -> Self {
        VesselRegistry {
            registered: registered.into_iter().map(|v| (v.code.clone(), v)).collect(),
            defaults: defaults.iter().cloned().map(|v| (v.code.clone(), v)).collect(),
        }
    }

    pub fn from_catalog(catalog: &Catalog) -> Self {
        Self::new(Vec::new(), &catalog.default_vessels)
    }

    pub fn lookup(&self, code: &str) -> Option<&Vessel> {
        self.registered.get(code).or_else(|| self.defaults.get(code))
    }

    pub fn tare_kg(&self, code: &str) -> Option<f64> {
        self.lookup(code).map(|v| v.tare_kg)
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecomposeOutcome {
    /// Canonical raw-material quantities, 4-dp rounded, never negative.
    pub inventory: MaterialMap,
    /// Input fields with no registry entry; surfaced so a typo in a field
    /// name is visible instead of silently dropping stock.
    pub unknown_fields: Vec<String>,
    /// Vessel codes that resolved to no registration and no default.
    pub unregistered_vessels: Vec<String>,
    /// Direct-entry fields ignored because their superseding weighing
    /// field was populated.
    pub overridden_fields: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Decompose a physical count into raw-material totals.
pub fn decompose(
    input: &PhysicalInput,
    catalog: &Catalog,
    vessels: &VesselRegistry,
) -> Result<DecomposeOutcome, DecomposeError> {
    let mut out = DecomposeOutcome::default();

    // Direct fields suppressed by a populated superseding weighing field.
    // Precedence, not a merge: the weighing is the higher-fidelity reading.
    let mut suppressed: BTreeSet<&str> = BTreeSet::new();
    for (name, spec) in &catalog.fields {
        if let Some(direct) = spec.overrides.as_deref() {
            let populated = matches!(input.vessels(name), Some(entries) if !entries.is_empty());
            if populated && input.0.contains_key(direct) {
                tracing::warn!(field = direct, weighed = %name, "direct entry ignored: weighing takes precedence");
                suppressed.insert(direct);
            }
        }
    }

    for (name, spec) in &catalog.fields {
        if suppressed.contains(name.as_str()) {
            out.overridden_fields.push(name.clone());
            continue;
        }
        apply_field(name, spec, input, catalog, vessels, &mut out)?;
    }

    // Anything submitted that no field (or alias) claims.
    let mut claimed: BTreeSet<&str> = BTreeSet::new();
    for (name, spec) in &catalog.fields {
        claimed.insert(name.as_str());
        for a in &spec.aliases {
            claimed.insert(a.as_str());
        }
    }
    for key in input.0.keys() {
        if !claimed.contains(key.as_str()) {
            out.unknown_fields.push(key.clone());
        }
    }

    Ok(out)
}

fn apply_field(
    name: &str,
    spec: &FieldSpec,
    input: &PhysicalInput,
    catalog: &Catalog,
    vessels: &VesselRegistry,
    out: &mut DecomposeOutcome,
) -> Result<(), DecomposeError> {
    match &spec.rule {
        DecompositionRule::Direct { material } => {
            let qty = gather_count(name, spec, input)?;
            if qty > 0.0 {
                add(&mut out.inventory, *material, qty);
            }
        }
        DecompositionRule::CompositeCount { per_unit } => {
            let qty = gather_count(name, spec, input)?;
            if qty > 0.0 {
                for (mid, per) in per_unit {
                    add(&mut out.inventory, *mid, qty * per);
                }
            }
        }
        DecompositionRule::PreparedItem { base, extras } => {
            let qty = gather_count(name, spec, input)?;
            if qty > 0.0 {
                add(&mut out.inventory, *base, qty);
                for (mid, per) in extras {
                    add(&mut out.inventory, *mid, qty * per);
                }
            }
        }
        DecompositionRule::VesselWeight { liquid, ratios } => {
            let density = catalog
                .density(liquid)
                .ok_or_else(|| DecomposeError::UnknownLiquid {
                    field: name.to_string(),
                    liquid: liquid.clone(),
                })?;
            let entries = gather_vessels(name, spec, input)?;
            let litres = vessel_litres(&entries, vessels, density, out)?;
            if litres > 0.0 {
                for (mid, ratio_per_l) in ratios {
                    add(&mut out.inventory, *mid, litres * ratio_per_l);
                }
            }
        }
    }
    Ok(())
}

/// Field value plus all its legacy aliases, summed. Aliases are superseded
/// single-field predecessors; summing before the rule applies keeps old
/// submissions valid without applying the rule twice.
fn gather_count(
    name: &str,
    spec: &FieldSpec,
    input: &PhysicalInput,
) -> Result<f64, DecomposeError> {
    let mut total = 0.0;
    for key in std::iter::once(name).chain(spec.aliases.iter().map(|a| a.as_str())) {
        match input.0.get(key) {
            None => {}
            Some(cbk_schemas::FieldValue::Count(v)) => {
                if !v.is_finite() || *v < 0.0 {
                    return Err(DecomposeError::InvalidCount {
                        field: key.to_string(),
                        value: *v,
                    });
                }
                total += v;
            }
            Some(cbk_schemas::FieldValue::Vessels(_)) => {
                return Err(DecomposeError::FieldShape {
                    field: key.to_string(),
                    expected: "a plain count",
                });
            }
        }
    }
    Ok(total)
}

fn gather_vessels(
    name: &str,
    spec: &FieldSpec,
    input: &PhysicalInput,
) -> Result<Vec<VesselEntry>, DecomposeError> {
    let mut entries = Vec::new();
    for key in std::iter::once(name).chain(spec.aliases.iter().map(|a| a.as_str())) {
        match input.0.get(key) {
            None => {}
            Some(cbk_schemas::FieldValue::Vessels(v)) => entries.extend(v.iter().cloned()),
            Some(cbk_schemas::FieldValue::Count(_)) => {
                return Err(DecomposeError::FieldShape {
                    field: key.to_string(),
                    expected: "a list of vessel weighings",
                });
            }
        }
    }
    Ok(entries)
}

/// Total net litres across a field's weighings, 4-dp rounded.
/// Net weight is floored at zero so an over-estimated tare can never
/// produce negative stock.
fn vessel_litres(
    entries: &[VesselEntry],
    vessels: &VesselRegistry,
    density_kg_per_l: f64,
    out: &mut DecomposeOutcome,
) -> Result<f64, DecomposeError> {
    let mut total = 0.0;
    for entry in entries {
        if !entry.weight_kg.is_finite() || entry.weight_kg < 0.0 {
            return Err(DecomposeError::InvalidWeight {
                vessel_code: entry.vessel_code.clone(),
                value: entry.weight_kg,
            });
        }
        let tare = match vessels.tare_kg(&entry.vessel_code) {
            Some(t) => t,
            None => {
                tracing::warn!(vessel = %entry.vessel_code, "unregistered vessel: assuming zero tare");
                out.unregistered_vessels.push(entry.vessel_code.clone());
                0.0
            }
        };
        let net_kg = (entry.weight_kg - tare).max(0.0);
        total += net_kg / density_kg_per_l;
    }
    Ok(round4(total))
}

/// Rounded accumulation: the running total stays 4-dp after every add, so
/// a persisted snapshot re-reads to identical figures.
fn add(inventory: &mut MaterialMap, id: MaterialId, qty: f64) {
    let entry = inventory.entry(id).or_insert(0.0);
    *entry = round4(*entry + qty);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
