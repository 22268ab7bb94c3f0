//! Request/response bodies for the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cbk_schemas::{
    Correction, FieldTimestamps, MaterialId, PhysicalInput, TokenCounts, WastageItem,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of POST /v1/settlement/submit.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitBody {
    pub raw_input: PhysicalInput,
    #[serde(default)]
    pub wastage_items: Vec<WastageItem>,
    #[serde(default)]
    pub runner_tokens: TokenCounts,
    #[serde(default)]
    pub field_timestamps: FieldTimestamps,
    pub actor: String,
    #[serde(default)]
    pub is_bootstrap: bool,
    #[serde(default)]
    pub notes: String,
}

/// Body of POST /v1/settlement/:id/amend.
#[derive(Debug, Clone, Deserialize)]
pub struct AmendBody {
    pub corrections: Vec<Correction>,
    pub actor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Body of POST /v1/expenses.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpenseBody {
    pub amount: f64,
    pub category: String,
    #[serde(default)]
    pub description: String,
}

/// Body of POST /v1/costs.
#[derive(Debug, Clone, Deserialize)]
pub struct CostBody {
    pub material_id: MaterialId,
    pub cost_per_unit: f64,
    /// Defaults to now: the new cost applies from this instant forward.
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedResponse {
    pub saved: bool,
}
