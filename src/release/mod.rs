use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::registry::{self, ModuleSelector, ModuleVersion};
use crate::store::{AppState, CatalogStore, now_ms};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
}

/// An owner's ask to promote the module's current beta to release. At most
/// one pending request exists per module.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseRequest {
    pub id: Uuid,
    pub module_name: String,
    pub git_url: String,
    pub version: ModuleVersion,
    pub status: RequestStatus,
    pub requested_by: String,
    pub requested_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewReleaseParams {
    pub request_id: Uuid,
    /// "approve" or "deny".
    pub decision: String,
    #[serde(default)]
    pub review_message: Option<String>,
}

fn pending_request(store: &CatalogStore, git_url: &str) -> Option<ReleaseRequest> {
    store
        .requests
        .iter()
        .filter(|e| e.value().git_url == git_url && e.value().status == RequestStatus::Pending)
        .map(|e| e.value().clone())
        .next()
}

fn require_owner(
    module: &registry::Module,
    requester: &str,
    is_admin: bool,
) -> Result<(), CatalogError> {
    if module.is_owner(requester) || is_admin {
        return Ok(());
    }
    Err(CatalogError::PermissionDenied(format!(
        "user '{requester}' is not an owner of this module"
    )))
}

// ---------------------------------------------------------------------------
// Promotion operations
// ---------------------------------------------------------------------------

/// Overwrite `beta` with the current `dev` version. Blocked while a release
/// request is pending, since the admin is reviewing a specific commit.
pub async fn push_dev_to_beta(
    state: &AppState,
    selector: &ModuleSelector,
    requester: &str,
    is_admin: bool,
) -> Result<(), CatalogError> {
    let module = registry::resolve(&state.store, selector)?;
    require_owner(&module, requester, is_admin)?;

    let lock = state.store.module_lock(&module.git_url);
    let _guard = lock.lock().await;

    if pending_request(&state.store, &module.git_url).is_some() {
        return Err(CatalogError::Conflict(
            "a release request is pending for this module".into(),
        ));
    }
    let mut entry = state
        .store
        .modules
        .get_mut(&module.git_url)
        .ok_or_else(|| CatalogError::NotFound("module".into()))?;
    let dev = entry
        .dev
        .clone()
        .ok_or_else(|| CatalogError::InvalidState("module has no dev version".into()))?;
    entry.beta = Some(dev);
    Ok(())
}

/// Create a release request referencing the current beta version.
pub async fn request_release(
    state: &AppState,
    selector: &ModuleSelector,
    requester: &str,
    is_admin: bool,
) -> Result<Uuid, CatalogError> {
    let module = registry::resolve(&state.store, selector)?;
    require_owner(&module, requester, is_admin)?;

    let lock = state.store.module_lock(&module.git_url);
    let _guard = lock.lock().await;

    if pending_request(&state.store, &module.git_url).is_some() {
        return Err(CatalogError::Conflict(
            "a release request is already pending for this module".into(),
        ));
    }
    let current = state
        .store
        .modules
        .get(&module.git_url)
        .map(|e| e.value().clone())
        .ok_or_else(|| CatalogError::NotFound("module".into()))?;
    let beta = current
        .beta
        .ok_or_else(|| CatalogError::InvalidState("module has no beta version".into()))?;
    let module_name = current
        .module_name
        .ok_or_else(|| CatalogError::InvalidState("module has never been built".into()))?;

    let request = ReleaseRequest {
        id: Uuid::new_v4(),
        module_name,
        git_url: current.git_url,
        version: beta,
        status: RequestStatus::Pending,
        requested_by: requester.to_owned(),
        requested_at: now_ms(),
        reviewed_by: None,
        review_message: None,
    };
    let id = request.id;
    state.store.requests.insert(id, request);
    Ok(id)
}

/// All pending requests, oldest first.
pub fn list_requested_releases(store: &CatalogStore) -> Vec<ReleaseRequest> {
    let mut pending: Vec<ReleaseRequest> = store
        .requests
        .iter()
        .filter(|e| e.value().status == RequestStatus::Pending)
        .map(|e| e.value().clone())
        .collect();
    pending.sort_by_key(|r| (r.requested_at, r.id));
    pending
}

/// Approve or deny a pending request. Approval moves the referenced version
/// into `release` and appends it to the release history; denial only
/// records the outcome. Reviewing a non-pending request is refused.
pub async fn review_release_request(
    state: &AppState,
    params: &ReviewReleaseParams,
    reviewer: &str,
) -> Result<(), CatalogError> {
    let approve = match params.decision.as_str() {
        "approve" => true,
        "deny" => false,
        other => {
            return Err(CatalogError::InvalidParams(format!(
                "decision must be 'approve' or 'deny', got '{other}'"
            )));
        }
    };

    let request = state
        .store
        .requests
        .get(&params.request_id)
        .map(|e| e.value().clone())
        .ok_or_else(|| CatalogError::NotFound(format!("release request {}", params.request_id)))?;

    let lock = state.store.module_lock(&request.git_url);
    let _guard = lock.lock().await;

    // Re-check under the lock; a concurrent review may have resolved it.
    let mut entry = state
        .store
        .requests
        .get_mut(&params.request_id)
        .ok_or_else(|| CatalogError::NotFound(format!("release request {}", params.request_id)))?;
    if entry.status != RequestStatus::Pending {
        return Err(CatalogError::InvalidState(
            "release request has already been reviewed".into(),
        ));
    }

    if approve {
        let mut module = state
            .store
            .modules
            .get_mut(&request.git_url)
            .ok_or_else(|| CatalogError::NotFound("module".into()))?;
        let duplicate = module
            .released_versions
            .last()
            .is_some_and(|v| v.timestamp == request.version.timestamp);
        if !duplicate {
            module.released_versions.push(request.version.clone());
        }
        module.release = Some(request.version.clone());
        entry.status = RequestStatus::Approved;
    } else {
        entry.status = RequestStatus::Denied;
    }
    entry.reviewed_by = Some(reviewer.to_owned());
    entry.review_message = params.review_message.clone();

    tracing::info!(
        request_id = %params.request_id,
        module = %request.module_name,
        approved = approve,
        reviewer,
        "release request reviewed"
    );
    Ok(())
}

/// (release_approval, review_message) for a module's state summary, taken
/// from its most recent request.
pub fn approval_state(store: &CatalogStore, git_url: &str) -> (String, Option<String>) {
    let latest = store
        .requests
        .iter()
        .filter(|e| e.value().git_url == git_url)
        .map(|e| e.value().clone())
        .max_by_key(|r| (r.requested_at, r.id));
    match latest {
        None => ("not_requested".into(), None),
        Some(r) => {
            let label = match r.status {
                RequestStatus::Pending => "under_review",
                RequestStatus::Approved => "approved",
                RequestStatus::Denied => "denied",
            };
            (label.into(), r.review_message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(git_url: &str, at: i64, status: RequestStatus) -> ReleaseRequest {
        ReleaseRequest {
            id: Uuid::new_v4(),
            module_name: "M".into(),
            git_url: git_url.into(),
            version: ModuleVersion {
                timestamp: at,
                registration_id: format!("r{at}"),
                version: None,
                git_commit_hash: "abc".into(),
                git_commit_message: "msg".into(),
                docker_image_name: "img".into(),
                function_ids: vec![],
            },
            status,
            requested_by: "alice".into(),
            requested_at: at,
            reviewed_by: None,
            review_message: None,
        }
    }

    #[test]
    fn pending_request_ignores_resolved_and_other_modules() {
        let store = CatalogStore::new();
        for r in [
            request("https://x/M", 1, RequestStatus::Denied),
            request("https://x/Other", 2, RequestStatus::Pending),
        ] {
            store.requests.insert(r.id, r);
        }
        assert!(pending_request(&store, "https://x/M").is_none());

        let r = request("https://x/M", 3, RequestStatus::Pending);
        store.requests.insert(r.id, r);
        assert!(pending_request(&store, "https://x/M").is_some());
    }

    #[test]
    fn listing_orders_pending_oldest_first() {
        let store = CatalogStore::new();
        for r in [
            request("https://x/A", 5, RequestStatus::Pending),
            request("https://x/B", 1, RequestStatus::Pending),
            request("https://x/C", 3, RequestStatus::Approved),
        ] {
            store.requests.insert(r.id, r);
        }
        let pending = list_requested_releases(&store);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].git_url, "https://x/B");
        assert_eq!(pending[1].git_url, "https://x/A");
    }

    #[test]
    fn approval_state_tracks_latest_request() {
        let store = CatalogStore::new();
        assert_eq!(approval_state(&store, "https://x/M").0, "not_requested");

        let mut old = request("https://x/M", 1, RequestStatus::Denied);
        old.review_message = Some("needs tests".into());
        store.requests.insert(old.id, old);
        let (label, message) = approval_state(&store, "https://x/M");
        assert_eq!(label, "denied");
        assert_eq!(message.as_deref(), Some("needs tests"));

        let newer = request("https://x/M", 2, RequestStatus::Pending);
        store.requests.insert(newer.id, newer);
        assert_eq!(approval_state(&store, "https://x/M").0, "under_review");
    }
}
