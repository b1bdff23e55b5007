use serde_json::Value;

use crate::auth::{AuthUser, OptionalAuthUser};
use crate::configs::{
    self, ClientGroupConfig, ClientGroupFilter, GetConfigParams, ModifyConfigParams, ParamScope,
    VolumeMountConfig, VolumeMountFilter,
};
use crate::error::CatalogError;
use crate::registry::{self, ModuleSelector};
use crate::store::AppState;

use super::{empty, one, optional, required};

fn require_owner_or_admin(
    state: &AppState,
    caller: &AuthUser,
    module_name: &str,
) -> Result<(), CatalogError> {
    if caller.is_admin {
        return Ok(());
    }
    let mut selector = ModuleSelector::by_name(module_name);
    selector.include_disabled = true;
    let module = registry::resolve(&state.store, &selector)?;
    if module.is_owner(&caller.username) {
        return Ok(());
    }
    Err(CatalogError::PermissionDenied(format!(
        "user '{}' is not an owner of module '{module_name}'",
        caller.username
    )))
}

// ---------------------------------------------------------------------------
// Secure parameters: readable by owners, writable only by admins.
// ---------------------------------------------------------------------------

pub fn get_secure_params(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let caller = user.require()?;
    let input: GetConfigParams = required(params, 0)?;
    require_owner_or_admin(state, caller, &input.module_name)?;
    one(configs::get_params(&state.store, ParamScope::Secure, &input)?)
}

#[tracing::instrument(skip(state, user, params))]
pub fn modify_secure_params(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let input: ModifyConfigParams = required(params, 0)?;
    configs::modify_params(&state.store, ParamScope::Secure, &input.data)?;
    audit_param_batch(state, admin, "modify_secure_config_params", &input.data);
    empty()
}

#[tracing::instrument(skip(state, user, params))]
pub fn remove_secure_params(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let input: ModifyConfigParams = required(params, 0)?;
    configs::remove_params(&state.store, ParamScope::Secure, &input.data)?;
    audit_param_batch(state, admin, "remove_secure_config_params", &input.data);
    empty()
}

// ---------------------------------------------------------------------------
// Hidden parameters: owners and admins, both directions.
// ---------------------------------------------------------------------------

pub fn get_hidden_params(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let caller = user.require()?;
    let input: GetConfigParams = required(params, 0)?;
    require_owner_or_admin(state, caller, &input.module_name)?;
    one(configs::get_params(&state.store, ParamScope::Hidden, &input)?)
}

#[tracing::instrument(skip(state, user, params))]
pub fn modify_hidden_params(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let caller = user.require()?;
    let input: ModifyConfigParams = required(params, 0)?;
    for param in &input.data {
        require_owner_or_admin(state, caller, &param.module_name)?;
    }
    configs::modify_params(&state.store, ParamScope::Hidden, &input.data)?;
    audit_param_batch(state, caller, "modify_hidden_config_params", &input.data);
    empty()
}

#[tracing::instrument(skip(state, user, params))]
pub fn remove_hidden_params(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let caller = user.require()?;
    let input: ModifyConfigParams = required(params, 0)?;
    for param in &input.data {
        require_owner_or_admin(state, caller, &param.module_name)?;
    }
    configs::remove_params(&state.store, ParamScope::Hidden, &input.data)?;
    audit_param_batch(state, caller, "remove_hidden_config_params", &input.data);
    empty()
}

fn audit_param_batch(
    state: &AppState,
    caller: &AuthUser,
    action: &str,
    data: &[configs::ConfigParameter],
) {
    for param in data {
        // Values are never written to the audit trail.
        state.audit.record(
            &caller.username,
            action,
            &format!("{}/{}/{}", param.module_name, param.version, param.param_name),
            None,
        );
    }
}

// ---------------------------------------------------------------------------
// Client groups
// ---------------------------------------------------------------------------

pub fn get_client_groups(state: &AppState) -> Result<Vec<Value>, CatalogError> {
    one(configs::list_client_groups(
        &state.store,
        &ClientGroupFilter::default(),
    ))
}

#[tracing::instrument(skip(state, user, params))]
pub fn set_client_group(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let config: ClientGroupConfig = required(params, 0)?;
    configs::set_client_group(&state.store, &config)?;
    state.audit.record(
        &admin.username,
        "set_client_group_config",
        &format!("{}/{}", config.module_name, config.function_name),
        None,
    );
    empty()
}

#[tracing::instrument(skip(state, user, params))]
pub fn remove_client_group(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let config: ClientGroupConfig = required(params, 0)?;
    configs::remove_client_group(&state.store, &config);
    state.audit.record(
        &admin.username,
        "remove_client_group_config",
        &format!("{}/{}", config.module_name, config.function_name),
        None,
    );
    empty()
}

pub fn list_client_groups(state: &AppState, params: &[Value]) -> Result<Vec<Value>, CatalogError> {
    let filter: ClientGroupFilter = optional(params, 0)?;
    one(configs::list_client_groups(&state.store, &filter))
}

// ---------------------------------------------------------------------------
// Volume mounts. Host paths are deployment internals, so even listing is
// admin-only.
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, user, params))]
pub fn set_volume_mount(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let config: VolumeMountConfig = required(params, 0)?;
    configs::set_volume_mount(&state.store, &config)?;
    state.audit.record(
        &admin.username,
        "set_volume_mount",
        &format!(
            "{}/{}/{}",
            config.module_name, config.function_name, config.client_group
        ),
        None,
    );
    empty()
}

#[tracing::instrument(skip(state, user, params))]
pub fn remove_volume_mount(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let config: VolumeMountConfig = required(params, 0)?;
    configs::remove_volume_mount(&state.store, &config);
    state.audit.record(
        &admin.username,
        "remove_volume_mount",
        &format!(
            "{}/{}/{}",
            config.module_name, config.function_name, config.client_group
        ),
        None,
    );
    empty()
}

pub fn list_volume_mounts(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    user.require_admin()?;
    let filter: VolumeMountFilter = optional(params, 0)?;
    one(configs::list_volume_mounts(&state.store, &filter))
}
