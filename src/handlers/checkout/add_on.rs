use axum::{Extension, extract::State};
use serde::Deserialize;

use super::{CheckoutResponse, meta, redirect_urls};
use crate::billing::ONE_TIME_PAYMENT;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::UserContext;
use crate::payments::{CheckoutLineItem, CheckoutMode, CheckoutRequest};

#[derive(Debug, Deserialize)]
pub struct AddOnCheckoutRequest {
    pub event_id: String,
}

pub async fn create_add_on_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(request): Json<AddOnCheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let event = {
        let conn = state.db.get()?;
        queries::get_online_event_by_id(&conn, &request.event_id)?
            .ok_or_else(|| AppError::NotFound("Event not found".into()))?
    };

    // Seats are only counted when the webhook lands, so this is best effort
    if event.is_full() {
        return Err(AppError::BadRequest("Event is full".into()));
    }

    let (success_url, cancel_url) = redirect_urls(&state, "dashboard/events");
    let checkout = state
        .gateway
        .create_checkout_session(&CheckoutRequest {
            mode: CheckoutMode::Payment,
            line_item: CheckoutLineItem {
                name: event.name.clone(),
                unit_amount: event.price,
                currency: event.currency.clone(),
                interval: None,
                product_id: None,
            },
            customer_id: ctx.user.stripe_customer_id.clone(),
            customer_email: Some(ctx.user.email.clone()),
            success_url,
            cancel_url,
            discounts: Vec::new(),
            metadata: vec![
                meta("user_id", ctx.user.id.as_str()),
                meta("is_add_on", "true"),
                meta("event_id", event.id.as_str()),
                meta("payment_type", ONE_TIME_PAYMENT),
            ],
        })
        .await?;

    tracing::info!("Add-on checkout {} for event {}", checkout.id, event.id);

    Ok(Json(CheckoutResponse {
        url: checkout.url,
        session_id: checkout.id,
    }))
}
