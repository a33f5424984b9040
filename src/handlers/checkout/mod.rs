mod add_on;
mod open_call;
mod subscription;

pub use add_on::*;
pub use open_call::*;
pub use subscription::*;

use axum::{Router, middleware, routing::post};
use serde::Serialize;

use crate::db::AppState;
use crate::middleware::user_auth;
use crate::util::frontend_link;

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

/// Where Stripe sends the buyer after paying or backing out.
fn redirect_urls(state: &AppState, path: &str) -> (String, String) {
    (
        frontend_link(
            &state.frontend_url,
            path,
            &[("status", "success"), ("session_id", "{CHECKOUT_SESSION_ID}")],
        ),
        frontend_link(&state.frontend_url, path, &[("status", "canceled")]),
    )
}

fn meta(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/checkout/subscription", post(create_subscription_checkout))
        .route("/checkout/open-call", post(create_open_call_checkout))
        .route("/checkout/add-on", post(create_add_on_checkout))
        .layer(middleware::from_fn_with_state(state, user_auth))
}
