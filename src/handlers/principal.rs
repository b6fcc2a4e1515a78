//! Resolves the calling user for a request.
//!
//! Authentication happens upstream; by the time a request arrives here the
//! gateway has put the user's id in the `x-owner-id` header.

use crate::errors::AppError;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Identity of the user making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerId(pub Uuid);

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("user not logged in"))?;
        let owner = Uuid::parse_str(value.trim())
            .map_err(|_| AppError::unauthorized("invalid owner id"))?;
        Ok(OwnerId(owner))
    }
}
