//! Account and tier handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use backdrop_core::{Account, AccountId, Tier, TierConfig};

use crate::auth::{AdminAuth, AuthUser};
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    /// Account ID.
    pub account_id: String,
    /// Current tier.
    pub tier: Tier,
    /// Spendable credits.
    pub credits_balance: i64,
    /// Credits granted per reset.
    pub monthly_credits: i64,
    /// Maximum credits carried over.
    pub rollover_cap: i64,
    /// Credits used this period.
    pub credits_used_this_month: i64,
    /// Last reset.
    pub last_credit_reset: DateTime<Utc>,
    /// Created timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id.to_string(),
            tier: account.tier,
            credits_balance: account.credits_balance,
            monthly_credits: account.monthly_credits,
            rollover_cap: account.rollover_cap,
            credits_used_this_month: account.credits_used_this_month,
            last_credit_reset: account.last_credit_reset,
            created_at: account.created_at,
        }
    }
}

fn parse_tier(name: &str) -> Result<Tier, ApiError> {
    name.parse::<Tier>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

fn parse_account_id(raw: &str) -> Result<AccountId, ApiError> {
    raw.parse::<AccountId>()
        .map_err(|_| ApiError::BadRequest("Invalid account ID".into()))
}

/// Open the caller's account on the free tier and grant its allocation.
///
/// Paid tiers are only reachable through the admin routes.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let account = state.ledger.open_account(auth.account_id, Tier::Free)?;

    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// Admin account opening request.
#[derive(Debug, Deserialize)]
pub struct AdminCreateAccountRequest {
    /// Account to open (the user's session subject).
    pub account_id: String,
    /// Starting tier (default: free).
    #[serde(default)]
    pub tier: Option<String>,
}

/// Open an account on any tier (admin only, used by the signup collaborator).
pub async fn admin_create_account(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AdminCreateAccountRequest>,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let account_id = parse_account_id(&body.account_id)?;
    let tier = body.tier.as_deref().map_or(Ok(Tier::Free), parse_tier)?;

    let account = state.ledger.open_account(account_id, tier)?;

    tracing::info!(
        admin_id = %admin.admin_id,
        account_id = %account_id,
        tier = %tier,
        "Admin opened account"
    );

    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// Get the current user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state.ledger.get_account(&auth.account_id)?;

    Ok(Json(AccountResponse::from(&account)))
}

/// Tier change request.
#[derive(Debug, Deserialize)]
pub struct UpdateTierRequest {
    /// Target tier name.
    pub tier: String,
}

/// Move an account to another tier (admin only).
pub async fn admin_update_tier(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(account_id): Path<String>,
    Json(body): Json<UpdateTierRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let account_id = parse_account_id(&account_id)?;
    let tier = parse_tier(&body.tier)?;

    let account = state.ledger.update_tier(&account_id, tier)?;

    tracing::info!(
        admin_id = %admin.admin_id,
        account_id = %account_id,
        tier = %tier,
        "Admin changed tier"
    );

    Ok(Json(AccountResponse::from(&account)))
}

/// One plan in the tier listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierResponse {
    /// Wire name.
    pub tier: Tier,
    /// Display name.
    pub display_name: &'static str,
    /// Credits granted per reset.
    pub monthly_credits: i64,
    /// Maximum credits carried over.
    pub rollover_cap: i64,
    /// Price in cents per month.
    pub monthly_price_cents: i64,
}

impl From<TierConfig> for TierResponse {
    fn from(config: TierConfig) -> Self {
        Self {
            tier: config.tier,
            display_name: config.display_name,
            monthly_credits: config.monthly_credits,
            rollover_cap: config.rollover_cap,
            monthly_price_cents: config.monthly_price_cents,
        }
    }
}

/// Tier listing response.
#[derive(Debug, Serialize)]
pub struct TiersResponse {
    /// Every plan, cheapest first.
    pub tiers: Vec<TierResponse>,
}

/// List the available plans.
pub async fn list_tiers() -> Json<TiersResponse> {
    Json(TiersResponse {
        tiers: Tier::ALL
            .into_iter()
            .map(|tier| TierResponse::from(tier.config()))
            .collect(),
    })
}
