//! Bearer-token authentication
//!
//! `require_auth` resolves `Authorization: Bearer <token>` to a profile and
//! stores it as an [`AuthUser`] request extension. Handlers behind the
//! middleware take `AuthUser` as an extractor.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use reclaim_common::api::{parse_bearer, ApiAuthError};
use reclaim_common::db::{Profile, SubscriptionTier};
use reclaim_common::time;
use tracing::debug;
use uuid::Uuid;

use crate::db::{profiles, tokens};
use crate::error::ApiError;
use crate::AppState;

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub profile: Profile,
}

impl AuthUser {
    pub fn tier(&self) -> SubscriptionTier {
        self.profile.subscription_tier
    }
}

/// Authentication middleware
///
/// Returns 401 for a missing, malformed, unknown or expired token, and for
/// a token whose profile no longer exists.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| unauthorized(ApiAuthError::MissingToken))?
        .to_str()
        .map_err(|_| unauthorized(ApiAuthError::MalformedHeader))?;

    let token = parse_bearer(header).map_err(unauthorized)?;

    let user_id = tokens::find_user_for_token(&state.db, token, time::now())
        .await?
        .ok_or_else(|| unauthorized(ApiAuthError::InvalidToken))?;

    let profile = profiles::get_profile(&state.db, user_id)
        .await?
        .ok_or_else(|| unauthorized(ApiAuthError::InvalidToken))?;

    debug!(user_id = %user_id, path = %request.uri().path(), "Authenticated request");

    request.extensions_mut().insert(AuthUser { user_id, profile });
    Ok(next.run(request).await)
}

fn unauthorized(err: ApiAuthError) -> ApiError {
    ApiError::Unauthorized(err.to_string())
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| unauthorized(ApiAuthError::MissingToken))
    }
}
