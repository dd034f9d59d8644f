//! Personal boundary endpoints
//!
//! Category and status arrive as strings and are parsed here so that an
//! unknown value answers 400 rather than a deserialization rejection.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use reclaim_common::db::{Boundary, BoundaryCategory, BoundaryStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::{ApiJson, AuthUser};
use crate::db::boundaries::{self, BoundaryPatch};
use crate::error::{ApiError, ApiResult};
use crate::services::feature_gate::{consume, Feature};
use crate::AppState;

const MAX_TITLE_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
pub struct CreateBoundaryRequest {
    pub title: String,
    pub description: Option<String>,
    /// Defaults to `other`
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBoundaryRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

fn validate_title(title: &str) -> ApiResult<String> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "title must be 1 to {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(title.to_string())
}

/// POST /api/boundaries
pub async fn create_boundary(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateBoundaryRequest>,
) -> ApiResult<(StatusCode, Json<Boundary>)> {
    let title = validate_title(&request.title)?;
    let category = match request.category.as_deref() {
        Some(c) => c.parse::<BoundaryCategory>()?,
        None => BoundaryCategory::Other,
    };
    let description = request
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    consume(&state.db, user.user_id, user.tier(), Feature::Boundaries).await?;

    let boundary =
        boundaries::insert_boundary(&state.db, user.user_id, &title, description, category).await?;

    tracing::info!(user_id = %user.user_id, boundary_id = %boundary.id, "Boundary created");
    Ok((StatusCode::CREATED, Json(boundary)))
}

/// GET /api/boundaries?status=active|archived
pub async fn list_boundaries(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Boundary>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<BoundaryStatus>)
        .transpose()?;

    Ok(Json(
        boundaries::list_boundaries(&state.db, user.user_id, status).await?,
    ))
}

/// PATCH /api/boundaries/:id
pub async fn update_boundary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    ApiJson(request): ApiJson<UpdateBoundaryRequest>,
) -> ApiResult<Json<Boundary>> {
    let patch = BoundaryPatch {
        title: request.title.as_deref().map(validate_title).transpose()?,
        description: request.description,
        category: request
            .category
            .as_deref()
            .map(str::parse::<BoundaryCategory>)
            .transpose()?,
        status: request
            .status
            .as_deref()
            .map(str::parse::<BoundaryStatus>)
            .transpose()?,
    };

    boundaries::update_boundary(&state.db, user.user_id, id, patch)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

/// DELETE /api/boundaries/:id
pub async fn delete_boundary(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !boundaries::delete_boundary(&state.db, user.user_id, id).await? {
        return Err(not_found(id));
    }
    Ok(StatusCode::NO_CONTENT)
}

fn not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Boundary not found: {}", id))
}

pub fn boundary_routes() -> Router<AppState> {
    Router::new()
        .route("/api/boundaries", get(list_boundaries).post(create_boundary))
        .route(
            "/api/boundaries/:id",
            patch(update_boundary).delete(delete_boundary),
        )
}
