use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::auth::OptionalAuthUser;
use crate::error::CatalogError;
use crate::registry::{self, ModuleSelector, VersionQuery};
use crate::store::AppState;

use super::{empty, one, optional, required};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListModulesFilter {
    #[serde(default)]
    pub include_disabled: bool,
}

#[derive(Debug, Serialize)]
pub struct BasicModuleInfo {
    pub module_name: String,
    pub git_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub dynamic_service: bool,
    pub owners: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct GetVersionInfoParams {
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(flatten)]
    pub query: VersionQuery,
}

#[derive(Debug, Deserialize)]
pub struct MigrateParams {
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub git_url: Option<String>,
    pub new_git_url: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub fn version() -> Result<Vec<Value>, CatalogError> {
    one(env!("CARGO_PKG_VERSION"))
}

pub fn status() -> Result<Vec<Value>, CatalogError> {
    one(json!({ "state": "OK", "version": env!("CARGO_PKG_VERSION") }))
}

pub fn is_registered(state: &AppState, params: &[Value]) -> Result<Vec<Value>, CatalogError> {
    let selector: ModuleSelector = required(params, 0)?;
    one(registry::is_registered(&state.store, &selector)?)
}

pub fn list_basic_module_info(
    state: &AppState,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let filter: ListModulesFilter = optional(params, 0)?;
    let modules: Vec<BasicModuleInfo> = registry::list(&state.store, filter.include_disabled)
        .into_iter()
        .filter_map(|m| {
            Some(BasicModuleInfo {
                module_name: m.module_name?,
                git_url: m.git_url,
                language: m.language,
                dynamic_service: m.dynamic_service,
                owners: m.owners,
                active: m.active,
            })
        })
        .collect();
    one(modules)
}

pub fn get_module_info(state: &AppState, params: &[Value]) -> Result<Vec<Value>, CatalogError> {
    let selector: ModuleSelector = required(params, 0)?;
    one(registry::resolve(&state.store, &selector)?)
}

pub fn get_version_info(state: &AppState, params: &[Value]) -> Result<Vec<Value>, CatalogError> {
    let input: GetVersionInfoParams = required(params, 0)?;
    let selector = ModuleSelector {
        module_name: input.module_name,
        git_url: input.git_url,
        include_disabled: false,
    };
    let module = registry::resolve(&state.store, &selector)?;
    one(registry::resolve_version(&module, &input.query)?)
}

pub fn list_released_module_versions(
    state: &AppState,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let selector: ModuleSelector = required(params, 0)?;
    let module = registry::resolve(&state.store, &selector)?;
    one(module.released_versions)
}

pub fn get_module_state(state: &AppState, params: &[Value]) -> Result<Vec<Value>, CatalogError> {
    let selector: ModuleSelector = required(params, 0)?;
    one(registry::module_state(&state.store, &selector)?)
}

#[tracing::instrument(skip(state, user, params))]
pub fn set_active(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
    active: bool,
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let selector: ModuleSelector = required(params, 0)?;
    registry::set_active(&state.store, &selector, active)?;
    state.audit.record(
        &admin.username,
        if active { "set_to_active" } else { "set_to_inactive" },
        &describe(&selector),
        None,
    );
    empty()
}

#[tracing::instrument(skip(state, user, params))]
pub fn delete_module(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let selector: ModuleSelector = required(params, 0)?;
    registry::delete_module(&state.store, &selector)?;
    state
        .audit
        .record(&admin.username, "delete_module", &describe(&selector), None);
    empty()
}

#[tracing::instrument(skip(state, user, params))]
pub fn migrate_git_url(
    state: &AppState,
    user: &OptionalAuthUser,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    let admin = user.require_admin()?;
    let input: MigrateParams = required(params, 0)?;
    let selector = ModuleSelector {
        module_name: input.module_name,
        git_url: input.git_url,
        include_disabled: true,
    };
    registry::migrate_git_url(&state.store, &selector, &input.new_git_url)?;
    state.audit.record(
        &admin.username,
        "migrate_module_to_new_git_url",
        &describe(&selector),
        Some(json!({ "new_git_url": input.new_git_url })),
    );
    empty()
}

fn describe(selector: &ModuleSelector) -> String {
    selector
        .module_name
        .clone()
        .or_else(|| selector.git_url.clone())
        .unwrap_or_default()
}
