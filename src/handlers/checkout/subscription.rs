use axum::{Extension, extract::State};
use serde::Deserialize;

use super::{CheckoutResponse, meta, redirect_urls};
use crate::billing::RECURRING_PAYMENT;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::UserContext;
use crate::models::{AccountType, CreateSubscription, SubscriptionKind};
use crate::payments::{CheckoutLineItem, CheckoutMode, CheckoutRequest};

#[derive(Debug, Deserialize)]
pub struct SubscriptionCheckoutRequest {
    pub plan_key: String,
    /// "month" or "year"
    pub interval: String,
    /// Defaults to the caller's own account type
    #[serde(default)]
    pub account_type: Option<AccountType>,
    /// Required for organizer subscriptions
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub coupon: Option<String>,
}

pub async fn create_subscription_checkout(
    State(state): State<AppState>,
    Extension(ctx): Extension<UserContext>,
    Json(request): Json<SubscriptionCheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    if request.interval != "month" && request.interval != "year" {
        return Err(AppError::BadRequest("interval must be \"month\" or \"year\"".into()));
    }
    let kind: SubscriptionKind = request.account_type.unwrap_or(ctx.user.account_type).into();

    let (plan, owner_id, customer_id) = {
        let conn = state.db.get()?;

        let plan = queries::get_plan_by_key(&conn, &request.plan_key)?
            .ok_or_else(|| AppError::NotFound("Plan not found".into()))?;

        let owner_id = match kind {
            SubscriptionKind::Artist => ctx.user.id.clone(),
            SubscriptionKind::Organizer => {
                let org_id = request.organization_id.as_deref().ok_or_else(|| {
                    AppError::BadRequest("organization_id is required for organizer plans".into())
                })?;
                let org = queries::get_organization_by_id(&conn, org_id)?
                    .ok_or_else(|| AppError::NotFound("Organization not found".into()))?;
                if org.owner_id != ctx.user.id {
                    return Err(AppError::Forbidden("Not the organization owner".into()));
                }
                org.id
            }
        };

        let existing = queries::get_subscription_by_owner(&conn, kind, &owner_id)?;
        let customer_id = existing
            .as_ref()
            .and_then(|s| s.customer_id.clone())
            .or_else(|| ctx.user.stripe_customer_id.clone());

        if existing.is_none() {
            queries::create_subscription(
                &conn,
                &CreateSubscription {
                    kind,
                    owner_id: owner_id.clone(),
                    customer_id: customer_id.clone(),
                    status: "pending".to_string(),
                    paid_status: false,
                },
            )?;
        }

        (plan, owner_id, customer_id)
    };

    let unit_amount = match request.interval.as_str() {
        "year" => plan.yearly_price,
        _ => plan.monthly_price,
    }
    .ok_or_else(|| {
        AppError::BadRequest(format!("Plan has no {}ly price", request.interval))
    })?;

    let mut metadata = vec![
        meta("user_id", ctx.user.id.as_str()),
        meta("account_type", kind.as_ref()),
        meta("plan_key", plan.key.as_str()),
        meta("interval", request.interval.as_str()),
        meta("payment_type", RECURRING_PAYMENT),
    ];
    if kind == SubscriptionKind::Organizer {
        metadata.push(meta("organization_id", owner_id.as_str()));
    }

    let (success_url, cancel_url) = redirect_urls(&state, "dashboard/billing");
    let checkout = state
        .gateway
        .create_checkout_session(&CheckoutRequest {
            mode: CheckoutMode::Subscription,
            line_item: CheckoutLineItem {
                name: plan.name.clone(),
                unit_amount,
                currency: "usd".to_string(),
                interval: Some(request.interval.clone()),
                product_id: plan.stripe_product_id.clone(),
            },
            customer_email: Some(ctx.user.email.clone()),
            customer_id,
            success_url,
            cancel_url,
            discounts: request.coupon.into_iter().collect(),
            metadata,
        })
        .await?;

    if kind == SubscriptionKind::Artist && ctx.user.stripe_customer_id.is_none() {
        if let Some(customer) = &checkout.customer_id {
            let conn = state.db.get()?;
            queries::set_user_customer_id(&conn, &ctx.user.id, customer)?;
        }
    }

    tracing::info!(
        "Subscription checkout {} for {} {} (plan {})",
        checkout.id,
        kind.as_ref(),
        owner_id,
        plan.key
    );

    Ok(Json(CheckoutResponse {
        url: checkout.url,
        session_id: checkout.id,
    }))
}
