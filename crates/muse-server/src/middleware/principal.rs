//! Caller identity
//!
//! The identity collaborator in front of this service verifies the caller
//! and forwards the result as headers: the owner id, the role claim, and
//! optionally the account email used to provision the owner record on
//! first upload. A request without a usable owner id is rejected with 401.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use muse_common::ids::parse_uuid;
use std::str::FromStr;

use crate::{
    error::AppError,
    models::{Principal, Role},
};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const EMAIL_HEADER: &str = "x-user-email";

/// Verified principal for the current request
#[derive(Debug, Clone)]
pub struct Caller {
    pub principal: Principal,
    pub email: Option<String>,
}

impl Caller {
    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing caller identity".to_string()))?;
        let owner_id = parse_uuid("owner_id", raw_id)
            .map_err(|_| AppError::Unauthorized("malformed caller identity".to_string()))?;

        let role = match header(parts, ROLE_HEADER) {
            Some(raw) => Role::from_str(raw).map_err(AppError::validation)?,
            None => Role::Subscriber,
        };

        Ok(Caller {
            principal: Principal::new(owner_id, role),
            email: header(parts, EMAIL_HEADER).map(str::to_string),
        })
    }
}
