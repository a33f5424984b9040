pub mod checkout;
pub mod plans;
pub mod webhooks;

use axum::{
    Json, Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Browser calls only come from the frontend; Stripe does not send CORS preflights.
fn cors(frontend_url: &str) -> CorsLayer {
    let origin = match frontend_url.parse::<HeaderValue>() {
        Ok(value) => AllowOrigin::exact(value),
        Err(_) => {
            tracing::warn!("FRONTEND_URL {} is not a valid origin; allowing any", frontend_url);
            AllowOrigin::any()
        }
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
}

/// The full HTTP surface with state applied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(plans::router())
        .merge(webhooks::router())
        .merge(checkout::router(state.clone()))
        .layer(cors(&state.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
