use serde_json::{Value, json};

use crate::auth::OptionalAuthUser;
use crate::error::CatalogError;
use crate::pipeline::{
    self, GetBuildLogParams, ListBuildParams, RegisterRepoParams, SetRegistrationStateParams,
};
use crate::registry::ModuleSelector;
use crate::store::AppState;

use super::{empty, one, optional, required};

#[tracing::instrument(skip(state, user, params))]
pub fn register_repo(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let caller = user.require()?;
    let input: RegisterRepoParams = required(params, 0)?;
    let info = pipeline::register_repo(state, &input, &caller.username, caller.is_admin)?;
    one(info)
}

pub fn get_repo_last_timestamp(
    state: &AppState,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let selector: ModuleSelector = required(params, 0)?;
    one(pipeline::get_repo_last_timestamp(&state.store, &selector)?)
}

pub fn get_build_log(state: &AppState, params: &[Value]) -> Result<Vec<Value>, CatalogError> {
    let registration_id: String = required(params, 0)?;
    one(pipeline::get_build_log(&state.store, &registration_id)?)
}

pub fn get_parsed_build_log(
    state: &AppState,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let input: GetBuildLogParams = required(params, 0)?;
    one(pipeline::get_parsed_build_log(&state.store, &input)?)
}

pub fn list_builds(state: &AppState, params: &[Value]) -> Result<Vec<Value>, CatalogError> {
    let input: ListBuildParams = optional(params, 0)?;
    one(pipeline::list_builds(&state.store, &input))
}

#[tracing::instrument(skip(state, user, params))]
pub fn set_registration_state(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let input: SetRegistrationStateParams = required(params, 0)?;
    pipeline::set_registration_state(&state.store, &input)?;
    state.audit.record(
        &admin.username,
        "set_registration_state",
        input.registration_id.as_deref().unwrap_or(""),
        Some(json!({ "registration_state": input.registration_state })),
    );
    empty()
}
