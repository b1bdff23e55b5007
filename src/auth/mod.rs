pub mod resolver;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::error::CatalogError;
use crate::store::AppState;

/// Authenticated caller extracted from the Authorization header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub is_admin: bool,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let header = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = CatalogError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(CatalogError::Unauthorized)?;
        let username = state
            .auth
            .resolve(token)
            .await
            .map_err(CatalogError::Internal)?
            .ok_or(CatalogError::Unauthorized)?;
        let is_admin = state.config.is_admin(&username);
        Ok(Self { username, is_admin })
    }
}

/// Optional auth for endpoints readable by anyone. A missing header yields
/// `None`; a present but invalid token is still rejected.
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for OptionalAuthUser {
    type Rejection = CatalogError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if bearer_token(parts).is_none() {
            return Ok(Self(None));
        }
        let user = AuthUser::from_request_parts(parts, state).await?;
        Ok(Self(Some(user)))
    }
}

impl OptionalAuthUser {
    /// The caller, or `Unauthorized` if none authenticated.
    pub fn require(&self) -> Result<&AuthUser, CatalogError> {
        self.0.as_ref().ok_or(CatalogError::Unauthorized)
    }

    pub fn require_admin(&self) -> Result<&AuthUser, CatalogError> {
        let user = self.require()?;
        if !user.is_admin {
            return Err(CatalogError::PermissionDenied(
                "administrator privileges required".into(),
            ));
        }
        Ok(user)
    }
}
