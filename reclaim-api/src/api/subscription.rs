//! Subscription tiers and usage

use axum::{extract::State, routing::get, Json, Router};
use reclaim_common::db::SubscriptionTier;
use reclaim_common::time;
use serde::Serialize;

use crate::api::AuthUser;
use crate::error::ApiResult;
use crate::services::feature_gate::{tier_catalogue, usage_summary, LimitCheck, TierInfo};
use crate::AppState;

/// GET /api/subscription/tiers (public)
pub async fn list_tiers() -> Json<Vec<TierInfo>> {
    Json(tier_catalogue())
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub tier: SubscriptionTier,
    /// `YYYY-MM`, UTC
    pub billing_period: String,
    pub features: Vec<LimitCheck>,
}

/// GET /api/usage
pub async fn get_usage(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<UsageResponse>> {
    let features = usage_summary(&state.db, user.user_id, user.tier()).await?;

    Ok(Json(UsageResponse {
        tier: user.tier(),
        billing_period: time::billing_period(time::now()),
        features,
    }))
}

/// Tier catalogue is public; usage is merged into the protected router
pub fn subscription_routes() -> Router<AppState> {
    Router::new().route("/api/subscription/tiers", get(list_tiers))
}

pub fn usage_routes() -> Router<AppState> {
    Router::new().route("/api/usage", get(get_usage))
}
