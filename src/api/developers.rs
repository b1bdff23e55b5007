use serde_json::Value;

use crate::auth::OptionalAuthUser;
use crate::error::CatalogError;
use crate::store::AppState;
use crate::validation;

use super::{empty, one, required};

pub fn is_approved_developer(
    state: &AppState,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let usernames: Vec<String> = required(params, 0)?;
    let flags: Vec<bool> = usernames
        .iter()
        .map(|u| state.store.is_approved_developer(u))
        .collect();
    one(flags)
}

pub fn list_approved_developers(state: &AppState) -> Result<Vec<Value>, CatalogError> {
    one(state.store.list_approved_developers())
}

#[tracing::instrument(skip(state, user, params))]
pub fn approve_developer(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let username: String = required(params, 0)?;
    validation::check_username(&username)?;
    state.store.approve_developer(&username);
    state
        .audit
        .record(&admin.username, "approve_developer", &username, None);
    empty()
}

#[tracing::instrument(skip(state, user, params))]
pub fn revoke_developer(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let username: String = required(params, 0)?;
    state.store.revoke_developer(&username);
    state
        .audit
        .record(&admin.username, "revoke_developer", &username, None);
    empty()
}

pub fn is_admin(user: &OptionalAuthUser) -> Result<Vec<Value>, CatalogError> {
    let caller = user.require()?;
    one(caller.is_admin)
}
