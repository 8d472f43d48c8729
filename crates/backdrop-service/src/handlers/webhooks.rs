//! Payment provider webhook.
//!
//! A confirmed payment credits the purchased amount to the account. The
//! provider's `payment_ref` is the idempotency key, so redelivered events
//! are acknowledged without crediting twice.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use backdrop_core::AccountId;

use crate::crypto::verify_hmac_sha256_hex;
use crate::error::ApiError;
use crate::ledger::PurchaseOutcome;
use crate::state::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Largest credit amount a single payment event may carry.
pub const MAX_PURCHASE_CREDITS: i64 = 1_000_000;

/// Payment event body.
#[derive(Debug, Deserialize)]
pub struct PaymentEvent {
    /// Provider payment reference.
    pub payment_ref: String,
    /// Account to credit.
    pub account_id: String,
    /// Credits bought.
    pub credits: i64,
}

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Always true once the event is accepted.
    pub received: bool,
    /// Whether this `payment_ref` had already been applied.
    pub duplicate: bool,
    /// Balance after the event.
    pub balance: i64,
}

/// Handle a payment confirmation.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    verify_signature(&state, &headers, &body)?;

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid payment event: {e}")))?;

    if event.credits > MAX_PURCHASE_CREDITS {
        tracing::warn!(
            payment_ref = %event.payment_ref,
            credits = event.credits,
            "Payment event exceeds the per-purchase credit limit"
        );
        return Err(ApiError::BadRequest(format!(
            "credits must not exceed {MAX_PURCHASE_CREDITS}"
        )));
    }

    let account_id = event
        .account_id
        .parse::<AccountId>()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))?;

    let response = match state
        .ledger
        .add_purchase(&account_id, event.credits, &event.payment_ref)?
    {
        PurchaseOutcome::Credited { new_balance } => {
            tracing::info!(
                account_id = %account_id,
                payment_ref = %event.payment_ref,
                credits = event.credits,
                "Purchase credited"
            );
            WebhookResponse {
                received: true,
                duplicate: false,
                balance: new_balance,
            }
        }
        PurchaseOutcome::Duplicate { balance } => {
            tracing::info!(
                payment_ref = %event.payment_ref,
                "Duplicate payment event acknowledged"
            );
            WebhookResponse {
                received: true,
                duplicate: true,
                balance,
            }
        }
    };

    Ok(Json(response))
}

/// Check the body signature when a webhook secret is configured.
///
/// Without a secret, events are accepted unsigned outside production and
/// rejected in production.
fn verify_signature(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let Some(secret) = state.config.payment_webhook_secret.as_deref() else {
        if state.config.is_production() {
            tracing::error!("PAYMENT_WEBHOOK_SECRET not configured in production - rejecting webhook");
            return Err(ApiError::Unauthorized);
        }
        tracing::warn!("Accepting unsigned payment webhook (no secret configured)");
        return Ok(());
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Payment webhook missing signature header");
            ApiError::Unauthorized
        })?;

    if !verify_hmac_sha256_hex(secret, body, signature) {
        tracing::warn!("Payment webhook signature mismatch");
        return Err(ApiError::Unauthorized);
    }

    Ok(())
}
