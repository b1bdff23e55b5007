pub mod builds;
pub mod configs;
pub mod developers;
pub mod modules;
pub mod releases;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::auth::OptionalAuthUser;
use crate::error::CatalogError;
use crate::store::AppState;

pub const RPC_VERSION: &str = "1.1";

/// Request envelope. `method` may carry the `Catalog.` service prefix;
/// params are positional.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rpc", post(rpc))
        .route("/", post(rpc))
}

async fn rpc(
    State(state): State<AppState>,
    user: OptionalAuthUser,
    Json(req): Json<RpcRequest>,
) -> Response {
    let method = req.method.strip_prefix("Catalog.").unwrap_or(&req.method);
    match dispatch(&state, &user, method, &req.params).await {
        Ok(result) => (
            StatusCode::OK,
            Json(json!({ "version": RPC_VERSION, "id": req.id, "result": result })),
        )
            .into_response(),
        Err(err) => (
            err.status(),
            Json(json!({ "error": err.to_fault(), "id": req.id })),
        )
            .into_response(),
    }
}

async fn dispatch(
    state: &AppState,
    user: &OptionalAuthUser,
    method: &str,
    params: &[Value],
) -> Result<Vec<Value>, CatalogError> {
    match method {
        "version" => modules::version(),
        "status" => modules::status(),
        "is_registered" => modules::is_registered(state, params),
        "list_basic_module_info" => modules::list_basic_module_info(state, params),
        "get_module_info" => modules::get_module_info(state, params),
        "get_version_info" => modules::get_version_info(state, params),
        "list_released_module_versions" => {
            modules::list_released_module_versions(state, params)
        }
        "get_module_state" => modules::get_module_state(state, params),
        "set_to_active" => modules::set_active(state, user, params, true),
        "set_to_inactive" => modules::set_active(state, user, params, false),
        "delete_module" => modules::delete_module(state, user, params),
        "migrate_module_to_new_git_url" => modules::migrate_git_url(state, user, params),

        "register_repo" => builds::register_repo(state, user, params),
        "get_repo_last_timestamp" => builds::get_repo_last_timestamp(state, params),
        "get_build_log" => builds::get_build_log(state, params),
        "get_parsed_build_log" => builds::get_parsed_build_log(state, params),
        "list_builds" => builds::list_builds(state, params),
        "set_registration_state" => builds::set_registration_state(state, user, params),

        "push_dev_to_beta" => releases::push_dev_to_beta(state, user, params).await,
        "request_release" => releases::request_release(state, user, params).await,
        "list_requested_releases" => releases::list_requested_releases(state, user),
        "review_release_request" => {
            releases::review_release_request(state, user, params).await
        }

        "is_approved_developer" => developers::is_approved_developer(state, params),
        "list_approved_developers" => developers::list_approved_developers(state),
        "approve_developer" => developers::approve_developer(state, user, params),
        "revoke_developer" => developers::revoke_developer(state, user, params),
        "is_admin" => developers::is_admin(user),

        "get_secure_config_params" => configs::get_secure_params(state, user, params),
        "modify_secure_config_params" => configs::modify_secure_params(state, user, params),
        "remove_secure_config_params" => configs::remove_secure_params(state, user, params),
        "get_hidden_config_params" => configs::get_hidden_params(state, user, params),
        "modify_hidden_config_params" => configs::modify_hidden_params(state, user, params),
        "remove_hidden_config_params" => configs::remove_hidden_params(state, user, params),
        "get_client_groups" => configs::get_client_groups(state),
        "set_client_group_config" => configs::set_client_group(state, user, params),
        "remove_client_group_config" => configs::remove_client_group(state, user, params),
        "list_client_group_configs" => configs::list_client_groups(state, params),
        "set_volume_mount" => configs::set_volume_mount(state, user, params),
        "remove_volume_mount" => configs::remove_volume_mount(state, user, params),
        "list_volume_mounts" => configs::list_volume_mounts(state, user, params),

        other => Err(CatalogError::MethodNotFound(other.to_owned())),
    }
}

// ---------------------------------------------------------------------------
// Param and result helpers
// ---------------------------------------------------------------------------

/// Deserialize the positional parameter at `idx`; missing or mistyped
/// values are validation errors.
fn required<T: DeserializeOwned>(params: &[Value], idx: usize) -> Result<T, CatalogError> {
    let value = params.get(idx).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| CatalogError::InvalidParams(format!("parameter {idx}: {e}")))
}

/// Like [`required`] but an absent or null parameter yields the default.
fn optional<T: DeserializeOwned + Default>(
    params: &[Value],
    idx: usize,
) -> Result<T, CatalogError> {
    match params.get(idx) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| CatalogError::InvalidParams(format!("parameter {idx}: {e}"))),
    }
}

/// Single-element result array.
fn one<T: serde::Serialize>(value: T) -> Result<Vec<Value>, CatalogError> {
    let value = serde_json::to_value(value).map_err(|e| CatalogError::Internal(e.into()))?;
    Ok(vec![value])
}

/// Empty result array for methods without a return value.
fn empty() -> Result<Vec<Value>, CatalogError> {
    Ok(Vec::new())
}
