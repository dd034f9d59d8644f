//! JSON body extractor that reports bad payloads in the API error shape

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// `Json<T>` whose rejections become `400 BAD_REQUEST` API errors
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(rejection_to_error(rejection)),
        }
    }
}

fn rejection_to_error(rejection: JsonRejection) -> ApiError {
    tracing::debug!(status = %rejection.status(), "Rejected JSON body");
    ApiError::BadRequest(rejection.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Payload {
        #[allow(dead_code)]
        count: u32,
    }

    fn json_request(body: &'static str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_type_mismatch_is_bad_request() {
        let result = ApiJson::<Payload>::from_request(json_request(r#"{"count":"abc"}"#), &()).await;
        match result {
            Err(ApiError::BadRequest(msg)) => assert!(msg.contains("count"), "{}", msg),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_missing_content_type_is_bad_request() {
        let request = axum::http::Request::builder()
            .method("POST")
            .body(Body::from(r#"{"count":1}"#))
            .unwrap();
        assert!(matches!(
            ApiJson::<Payload>::from_request(request, &()).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
