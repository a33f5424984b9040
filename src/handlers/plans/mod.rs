use axum::{
    Router,
    extract::{Path, State},
    routing::get,
};

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::Json;
use crate::models::{Plan, PlanLookup};

pub async fn list_plans(State(state): State<AppState>) -> Result<Json<Vec<Plan>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_plans(&conn)?))
}

/// Map a Stripe product id to `{plan, key}`; both null when unknown.
pub async fn plan_by_product(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> Result<Json<PlanLookup>> {
    let conn = state.db.get()?;
    Ok(Json(queries::get_plan_number_by_product(&conn, &product_id)?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/plans/by-product/{product_id}", get(plan_by_product))
}
