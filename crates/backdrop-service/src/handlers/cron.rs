//! Scheduled monthly reset trigger.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::auth::CronAuth;
use crate::error::ApiError;
use crate::scheduler::ResetReport;
use crate::state::AppState;

/// Reset trigger response.
#[derive(Debug, Serialize)]
pub struct ResetResponse {
    /// Whether the batch ran to completion.
    pub success: bool,
    /// Per-batch counters.
    pub results: ResetReport,
}

/// Run the monthly reset for every due account.
///
/// Individual account failures are reported in `results.errors`; only a
/// failure to enumerate accounts fails the request.
pub async fn reset_credits(
    State(state): State<Arc<AppState>>,
    _auth: CronAuth,
) -> Result<Json<ResetResponse>, ApiError> {
    let report = state.scheduler.run_reset().await?;

    tracing::info!(
        total = report.total,
        successful = report.successful,
        failed = report.failed,
        skipped = report.skipped,
        "Monthly reset batch finished"
    );

    Ok(Json(ResetResponse {
        success: true,
        results: report,
    }))
}
