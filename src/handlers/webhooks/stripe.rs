use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Value, json};

use crate::billing::{self, EventOutcome};
use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::models::CreateWebhookEvent;
use crate::payments::{StripeWebhookEvent, verify_webhook_signature};

fn received() -> Response {
    (StatusCode::OK, Json(json!({ "message": "Webhook received!" }))).into_response()
}

/// Check the `stripe-signature` header against the configured endpoint secret.
fn check_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
    let header = headers
        .get("stripe-signature")
        .ok_or_else(|| AppError::BadRequest("Missing stripe-signature header".into()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("Invalid signature header".into()))?;

    if !verify_webhook_signature(secret, body, header, Utc::now().timestamp())? {
        return Err(AppError::BadRequest("Invalid signature".into()));
    }
    Ok(())
}

/// Stripe webhook receiver.
///
/// Every well-formed delivery is logged to `stripe_webhook_events` before any
/// type-specific work, and answered with 200 whatever the branch does with it.
/// Only a bad signature, a non-JSON body, or a failed log write produce an
/// error status.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.webhooks.signing_secret.as_deref() {
        if let Err(e) = check_signature(secret, &headers, &body) {
            tracing::warn!("Rejected Stripe webhook: {}", e);
            return e.into_response();
        }
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid JSON", "details": e.to_string() })),
            )
                .into_response();
        }
    };

    let conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return AppError::from(e).into_response();
        }
    };

    let log = match queries::record_webhook_event(
        &conn,
        &CreateWebhookEvent {
            event_id: value["id"].as_str().map(String::from),
            event_type: value["type"].as_str().unwrap_or("unknown").to_string(),
            livemode: value["livemode"].as_bool().unwrap_or(false),
            payload: String::from_utf8_lossy(&body).into_owned(),
            stripe_created_at: value["created"].as_i64(),
        },
    ) {
        Ok(log) => log,
        Err(e) => {
            tracing::error!("Failed to log Stripe webhook: {}", e);
            return e.into_response();
        }
    };

    let event: StripeWebhookEvent = match serde_json::from_value(value) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Stripe webhook {} is not an event: {}", log.id, e);
            return received();
        }
    };

    if state.webhooks.dedupe {
        if let Some(event_id) = &event.id {
            match queries::webhook_event_seen_before(&conn, event_id, &log.id) {
                Ok(true) => {
                    tracing::info!("Stripe event {} already processed, skipping", event_id);
                    return received();
                }
                Ok(false) => {}
                Err(e) => tracing::error!("Redelivery check failed for {}: {}", event_id, e),
            }
        }
    }

    match billing::process_event(&conn, &state.webhooks, &event) {
        Ok(EventOutcome::Applied(what)) => {
            tracing::info!("Stripe {} ({:?}): {}", event.event_type, event.id, what)
        }
        Ok(EventOutcome::Skipped(why)) => {
            tracing::info!("Stripe {} ({:?}) skipped: {}", event.event_type, event.id, why)
        }
        Ok(EventOutcome::Ignored) => {}
        Err(e) => tracing::error!(
            "Failed to process Stripe {} ({:?}): {}",
            event.event_type,
            event.id,
            e
        ),
    }

    received()
}
