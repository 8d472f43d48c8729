//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, credits, cron, health, jobs, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent job submissions.
/// Each submission buffers its images and fans out uploads.
const JOBS_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/tiers` - List plans
///
/// ## Accounts (session JWT auth)
/// - `POST /v1/accounts` - Open account on the free tier
/// - `GET /v1/accounts/me` - Get current user's account
///
/// ## Credits (session JWT auth)
/// - `GET /v1/credits/summary` - Balance, allocation and reset dates
/// - `GET /v1/credits/transactions` - List transaction history
///
/// ## Jobs (session JWT auth, rate-limited)
/// - `POST /v1/jobs` - Submit a batch (multipart)
/// - `GET /v1/jobs/:id` - Get a job
///
/// ## Admin (admin key auth)
/// - `POST /v1/admin/accounts` - Open an account on any tier
/// - `POST /v1/admin/accounts/:id/tier` - Change an account's tier
///
/// ## Cron (bearer secret in production)
/// - `GET|POST /v1/cron/reset-credits` - Run the monthly reset
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payments` - Payment confirmations
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let job_routes = Router::new()
        .route("/", post(jobs::submit_job))
        .route("/:id", get(jobs::get_job))
        .layer(ConcurrencyLimitLayer::new(JOBS_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        .route("/tiers", get(accounts::list_tiers))
        // Credits
        .route("/credits/summary", get(credits::get_summary))
        .route("/credits/transactions", get(credits::list_transactions))
        // Admin
        .route("/admin/accounts", post(accounts::admin_create_account))
        .route(
            "/admin/accounts/:id/tier",
            post(accounts::admin_update_tier),
        )
        // Jobs (with their own concurrency limit)
        .nest("/jobs", job_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Scheduled trigger (no rate limit - invoked by the scheduler)
        .route(
            "/cron/reset-credits",
            get(cron::reset_credits).post(cron::reset_credits),
        );

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by external services)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
