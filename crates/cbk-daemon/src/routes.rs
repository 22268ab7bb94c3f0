//! Axum router and all HTTP handlers for cbk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and
//! attaches middleware layers. Handlers are thin: decode, call the
//! manager, map [`RuntimeError`] onto a status code.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use cbk_runtime::{RuntimeError, SubmitRequest};
use cbk_schemas::{ExpenseEntry, StaffSalary, Vessel};

use crate::api_types::{
    AmendBody, CostBody, ErrorResponse, ExpenseBody, HealthResponse, HistoryQuery, SavedResponse,
    SubmitBody,
};
use crate::state::AppState;

const EXPENSE_CATEGORIES: [&str; 4] = ["police", "supplies", "transport", "other"];

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/settlement/prepare", get(prepare))
        .route("/v1/settlement/submit", post(submit))
        .route("/v1/settlement/history", get(history))
        .route("/v1/settlement/by-date/:date", get(by_date))
        .route("/v1/settlement/:id", get(by_id))
        .route("/v1/settlement/:id/amend", post(amend))
        .route("/v1/vessels", get(list_vessels).post(save_vessel))
        .route("/v1/salaries", get(list_salaries).post(save_salary))
        .route("/v1/expenses", post(record_expense))
        .route("/v1/costs", post(record_cost))
        .route("/v1/catalog", get(catalog))
        .with_state(state)
}

/// Map a runtime error onto the HTTP status it deserves.
fn error_response(e: RuntimeError) -> Response {
    let status = match &e {
        RuntimeError::Validation(_) => StatusCode::BAD_REQUEST,
        RuntimeError::Unauthorized(_) => StatusCode::FORBIDDEN,
        RuntimeError::NotFound(_) => StatusCode::NOT_FOUND,
        RuntimeError::Precondition(_) => StatusCode::CONFLICT,
        RuntimeError::ExternalFetch(_) => StatusCode::BAD_GATEWAY,
        RuntimeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

pub(crate) async fn prepare(State(st): State<Arc<AppState>>) -> Response {
    match st.manager.prepare(Utc::now()).await {
        Ok(preview) => (StatusCode::OK, Json(preview)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn submit(
    State(st): State<Arc<AppState>>,
    Json(body): Json<SubmitBody>,
) -> Response {
    let req = SubmitRequest {
        raw_input: body.raw_input,
        wastage_items: body.wastage_items,
        runner_tokens: body.runner_tokens,
        field_timestamps: body.field_timestamps,
        actor: body.actor,
        is_bootstrap: body.is_bootstrap,
        notes: body.notes,
    };
    match st.manager.submit(req, Utc::now()).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn amend(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<AmendBody>,
) -> Response {
    match st
        .manager
        .amend(id, body.corrections, &body.actor, Utc::now())
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn history(
    State(st): State<Arc<AppState>>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    match st.manager.history(q.limit.unwrap_or(30)).await {
        Ok(rows) => (StatusCode::OK, Json(rows)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn by_id(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match st.manager.get(id).await {
        Ok(s) => (StatusCode::OK, Json(s)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn by_date(
    State(st): State<Arc<AppState>>,
    Path(date): Path<NaiveDate>,
) -> Response {
    match st.manager.get_by_date(date).await {
        Ok(s) => (StatusCode::OK, Json(s)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn list_vessels(State(st): State<Arc<AppState>>) -> Response {
    match st.manager.vessels().await {
        Ok(v) => (StatusCode::OK, Json(v)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn save_vessel(
    State(st): State<Arc<AppState>>,
    Json(vessel): Json<Vessel>,
) -> Response {
    match st.manager.save_vessel(&vessel).await {
        Ok(()) => (StatusCode::OK, Json(SavedResponse { saved: true })).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn list_salaries(State(st): State<Arc<AppState>>) -> Response {
    match st.manager.salaries().await {
        Ok(s) => (StatusCode::OK, Json(s)).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn save_salary(
    State(st): State<Arc<AppState>>,
    Json(salary): Json<StaffSalary>,
) -> Response {
    match st.manager.save_salary(&salary).await {
        Ok(()) => (StatusCode::OK, Json(SavedResponse { saved: true })).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn record_expense(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ExpenseBody>,
) -> Response {
    if !EXPENSE_CATEGORIES.contains(&body.category.as_str()) {
        return error_response(RuntimeError::Validation(format!(
            "invalid expense category '{}'; use one of: {}",
            body.category,
            EXPENSE_CATEGORIES.join(", ")
        )));
    }
    let entry = ExpenseEntry {
        amount: body.amount,
        category: body.category,
        description: body.description,
        recorded_at: Utc::now(),
    };
    match st.manager.record_expense(&entry).await {
        Ok(()) => (StatusCode::OK, Json(SavedResponse { saved: true })).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn record_cost(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CostBody>,
) -> Response {
    let effective = body.effective_from.unwrap_or_else(Utc::now);
    match st
        .manager
        .record_material_cost(body.material_id, body.cost_per_unit, effective)
        .await
    {
        Ok(()) => (StatusCode::OK, Json(SavedResponse { saved: true })).into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn catalog(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.manager.catalog().clone()))
}
