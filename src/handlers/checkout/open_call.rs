use axum::{Extension, extract::State};
use serde::Deserialize;

use super::{CheckoutResponse, meta, redirect_urls};
use crate::billing::ONE_TIME_PAYMENT;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::UserContext;
use crate::models::AccountType;
use crate::payments::{CheckoutLineItem, CheckoutMode, CheckoutRequest};

#[derive(Debug, Deserialize)]
pub struct OpenCallCheckoutRequest {
    pub open_call_id: String,
    pub plan_key: String,
}

/// Listing fee for an open call. An organization's first listing is free
/// when a free-call coupon is configured.
pub async fn create_open_call_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(request): Json<OpenCallCheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let (open_call, plan, first_listing) = {
        let conn = state.db.get()?;

        let open_call = queries::get_open_call_by_id(&conn, &request.open_call_id)?
            .ok_or_else(|| AppError::NotFound("Event not found".into()))?;

        let org = queries::get_organization_by_id(&conn, &open_call.organization_id)?
            .ok_or_else(|| AppError::NotFound("Organization not found".into()))?;
        if org.owner_id != ctx.user.id {
            return Err(AppError::Forbidden("Not the organization owner".into()));
        }
        if open_call.paid {
            return Err(AppError::BadRequest("Open call is already paid".into()));
        }

        let plan = queries::get_plan_by_key(&conn, &request.plan_key)?
            .ok_or_else(|| AppError::NotFound("Plan not found".into()))?;

        let first_listing = !queries::organization_has_paid_open_call(&conn, &org.id)?;
        (open_call, plan, first_listing)
    };

    let unit_amount = plan
        .one_time_price
        .ok_or_else(|| AppError::BadRequest("Plan has no one-time price".into()))?;

    let discounts: Vec<String> = match &state.webhooks.free_call_coupon {
        Some(coupon) if first_listing => vec![coupon.clone()],
        _ => Vec::new(),
    };

    let (success_url, cancel_url) = redirect_urls(&state, "dashboard/organizer/open-calls");
    let checkout = state
        .gateway
        .create_checkout_session(&CheckoutRequest {
            mode: CheckoutMode::Payment,
            line_item: CheckoutLineItem {
                name: format!("{}: {}", plan.name, open_call.title),
                unit_amount,
                currency: "usd".to_string(),
                interval: None,
                product_id: plan.stripe_product_id.clone(),
            },
            customer_id: ctx.user.stripe_customer_id.clone(),
            customer_email: Some(ctx.user.email.clone()),
            success_url,
            cancel_url,
            discounts,
            metadata: vec![
                meta("user_id", ctx.user.id.as_str()),
                meta("account_type", AccountType::Organizer.as_ref()),
                meta("payment_type", ONE_TIME_PAYMENT),
                meta("open_call_id", open_call.id.as_str()),
                meta("organization_id", open_call.organization_id.as_str()),
                meta("plan_key", plan.key.as_str()),
            ],
        })
        .await?;

    tracing::info!(
        "Open call checkout {} for open call {} (first listing: {})",
        checkout.id,
        open_call.id,
        first_listing
    );

    Ok(Json(CheckoutResponse {
        url: checkout.url,
        session_id: checkout.id,
    }))
}
