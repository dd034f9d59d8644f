//! Profile endpoints

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use reclaim_common::db::Profile;
use serde::Deserialize;

use crate::api::{ApiJson, AuthUser};
use crate::db::profiles;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

const MAX_DISPLAY_NAME_CHARS: usize = 100;

/// GET /api/profile
pub async fn get_profile(user: AuthUser) -> Json<Profile> {
    Json(user.profile)
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    /// `null` or blank clears the display name
    pub display_name: Option<String>,
}

/// PATCH /api/profile
pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<Profile>> {
    if let Some(name) = &request.display_name {
        if name.trim().chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(ApiError::BadRequest(format!(
                "display_name must be at most {} characters",
                MAX_DISPLAY_NAME_CHARS
            )));
        }
    }

    let profile = profiles::update_display_name(&state.db, user.user_id, request.display_name.as_deref())
        .await?
        .ok_or_else(|| ApiError::NotFound("Profile not found".to_string()))?;

    Ok(Json(profile))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/api/profile", get(get_profile).patch(update_profile))
}
