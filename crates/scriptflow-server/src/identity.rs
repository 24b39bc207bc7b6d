//! Caller identity.
//!
//! Sign-in happens at the identity provider; the gateway in front of this
//! server forwards the authenticated user id in the `x-user-id` header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use scriptflow_core::error::FlowError;

use crate::error::AppError;

pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or_else(|| AppError(FlowError::Unauthenticated.into()))
    }
}
