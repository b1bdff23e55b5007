use serde_json::{Value, json};

use crate::auth::OptionalAuthUser;
use crate::error::CatalogError;
use crate::registry::ModuleSelector;
use crate::release::{self, ReviewReleaseParams};
use crate::store::AppState;

use super::{empty, one, required};

#[tracing::instrument(skip(state, user, params))]
pub async fn push_dev_to_beta(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let caller = user.require()?;
    let selector: ModuleSelector = required(params, 0)?;
    release::push_dev_to_beta(state, &selector, &caller.username, caller.is_admin).await?;
    empty()
}

#[tracing::instrument(skip(state, user, params))]
pub async fn request_release(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let caller = user.require()?;
    let selector: ModuleSelector = required(params, 0)?;
    release::request_release(state, &selector, &caller.username, caller.is_admin).await?;
    empty()
}

pub fn list_requested_releases(
    state: &AppState,
    user: &OptionalAuthUser,
) -> Result<Vec<Value>, CatalogError> {
    user.require_admin()?;
    one(release::list_requested_releases(&state.store))
}

#[tracing::instrument(skip(state, user, params))]
pub async fn review_release_request(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let input: ReviewReleaseParams = required(params, 0)?;
    release::review_release_request(state, &input, &admin.username).await?;
    state.audit.record(
        &admin.username,
        "review_release_request",
        &input.request_id.to_string(),
        Some(json!({ "decision": input.decision })),
    );
    empty()
}
