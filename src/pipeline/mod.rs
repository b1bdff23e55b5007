pub mod runner;

use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::registry::{self, ModuleSelector, ModuleVersion};
use crate::store::{AppState, CatalogStore, now_ms};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Build pipeline states. `ready` and `disabled` are terminal; transitions
/// for one registration id never move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Pending,
    Building,
    Testing,
    Ready,
    Disabled,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Disabled)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Building => 1,
            Self::Testing => 2,
            Self::Ready | Self::Disabled => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Building => "building",
            Self::Testing => "testing",
            Self::Ready => "ready",
            Self::Disabled => "disabled",
        }
    }
}

impl std::str::FromStr for BuildState {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "building" => Ok(Self::Building),
            "testing" => Ok(Self::Testing),
            "ready" => Ok(Self::Ready),
            "disabled" => Ok(Self::Disabled),
            other => Err(CatalogError::InvalidParams(format!(
                "unknown registration state '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildLogLine {
    pub content: String,
    pub is_error: bool,
}

/// One pipeline run. The log is append-only; lines are kept in append
/// order and immutable once written.
#[derive(Debug, Clone)]
pub struct BuildJob {
    pub registration_id: String,
    pub timestamp: i64,
    pub git_url: String,
    pub module_name: Option<String>,
    pub state: BuildState,
    pub error_message: Option<String>,
    pub requested_by: String,
    pub log: Vec<BuildLogLine>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRepoParams {
    pub git_url: String,
    /// Register a specific commit instead of the default branch head.
    #[serde(default)]
    pub git_commit_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegistrationInfo {
    pub registration_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct GetBuildLogParams {
    pub registration_id: String,
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub first_n: Option<usize>,
    #[serde(default)]
    pub last_n: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ParsedBuildLog {
    pub registration_id: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    pub git_url: String,
    pub registration: BuildState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub log: Vec<BuildLogLine>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListBuildParams {
    #[serde(default)]
    pub only_running: bool,
    #[serde(default)]
    pub only_error: bool,
    #[serde(default)]
    pub only_complete: bool,
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub modules: Vec<ModuleSelector>,
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub timestamp: i64,
    pub registration_id: String,
    pub registration: BuildState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    pub git_url: String,
}

#[derive(Debug, Deserialize)]
pub struct SetRegistrationStateParams {
    #[serde(default)]
    pub registration_id: Option<String>,
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub git_url: Option<String>,
    pub registration_state: String,
    #[serde(default)]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Registration admission
// ---------------------------------------------------------------------------

/// Enqueue a build for a git URL and spawn the pipeline task. Fails fast on
/// permission problems, malformed input, or a build already in flight for
/// this module; build failures after admission surface only through
/// `get_module_state` / the build log.
pub fn register_repo(
    state: &AppState,
    params: &RegisterRepoParams,
    requester: &str,
    is_admin: bool,
) -> Result<RegistrationInfo, CatalogError> {
    if !state.store.is_approved_developer(requester) && !is_admin {
        return Err(CatalogError::PermissionDenied(format!(
            "user '{requester}' is not an approved developer"
        )));
    }
    registry::ensure_module(&state.store, &params.git_url, requester, is_admin)?;

    let timestamp = now_ms();
    let registration_id = format!("{timestamp}_{}", Uuid::new_v4());

    // Claim the admission slot atomically; the entry guard serializes
    // concurrent registrations for the same URL.
    match state.store.in_flight.entry(params.git_url.clone()) {
        Entry::Occupied(_) => {
            return Err(CatalogError::Conflict(
                "a registration for this module is already in progress".into(),
            ));
        }
        Entry::Vacant(slot) => {
            slot.insert(registration_id.clone());
        }
    }

    let module_name = state
        .store
        .modules
        .get(&params.git_url)
        .and_then(|m| m.module_name.clone());

    let job = BuildJob {
        registration_id: registration_id.clone(),
        timestamp,
        git_url: params.git_url.clone(),
        module_name,
        state: BuildState::Pending,
        error_message: None,
        requested_by: requester.to_owned(),
        log: vec![BuildLogLine {
            content: format!("Registration of {} queued.", params.git_url),
            is_error: false,
        }],
    };
    state.store.builds.insert(registration_id.clone(), job);

    tracing::info!(%registration_id, git_url = %params.git_url, requester, "registration queued");

    let task_state = state.clone();
    let task_id = registration_id.clone();
    let commit = params.git_commit_hash.clone();
    tokio::spawn(async move {
        run_build(task_state, task_id, commit).await;
    });

    Ok(RegistrationInfo {
        registration_id,
        timestamp,
    })
}

pub fn has_build_in_flight(store: &CatalogStore, git_url: &str) -> bool {
    store
        .builds
        .iter()
        .any(|e| e.value().git_url == git_url && !e.value().state.is_terminal())
}

/// The most recent build for a module, by registration timestamp.
pub fn latest_build(store: &CatalogStore, git_url: &str) -> Option<BuildJob> {
    store
        .builds
        .iter()
        .filter(|e| e.value().git_url == git_url)
        .max_by_key(|e| (e.value().timestamp, e.value().registration_id.clone()))
        .map(|e| e.value().clone())
}

// ---------------------------------------------------------------------------
// Pipeline execution
// ---------------------------------------------------------------------------

#[tracing::instrument(skip(state, commit), fields(%registration_id))]
async fn run_build(state: AppState, registration_id: String, commit: Option<String>) {
    let Some(git_url) = state
        .store
        .builds
        .get(&registration_id)
        .map(|j| j.git_url.clone())
    else {
        return;
    };

    // One build at a time per module; promotions take the same lock.
    let lock = state.store.module_lock(&git_url);
    let _guard = lock.lock().await;

    if let Err(err) = execute(&state, &registration_id, &git_url, commit.as_deref()).await {
        tracing::warn!(%registration_id, error = %err, "build failed");
        fail_build(&state.store, &registration_id, &err.to_string());
    }

    let workdir = state.config.temp_dir.join(&registration_id);
    let _ = tokio::fs::remove_dir_all(&workdir).await;
}

async fn execute(
    state: &AppState,
    registration_id: &str,
    git_url: &str,
    commit: Option<&str>,
) -> anyhow::Result<()> {
    let store = &state.store;

    advance(store, registration_id, BuildState::Building)?;
    append_line(
        store,
        registration_id,
        format!("Fetching {git_url} and reading module manifest."),
        false,
    );

    let workdir = state.config.temp_dir.join(registration_id);
    tokio::fs::create_dir_all(&workdir).await?;
    let checkout = state.runner.checkout(git_url, commit, &workdir).await?;
    let manifest = &checkout.manifest;

    registry::bind_module_name(store, git_url, &manifest.module_name)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(mut job) = store.builds.get_mut(registration_id) {
        job.module_name = Some(manifest.module_name.clone());
    }
    append_line(
        store,
        registration_id,
        format!(
            "Module name is '{}' (language: {}).",
            manifest.module_name, manifest.service_language
        ),
        false,
    );

    let image = format!(
        "{}/{}:{}",
        state.config.docker_registry,
        manifest.module_name.to_lowercase(),
        short_hash(&checkout.commit_hash)
    );
    append_line(
        store,
        registration_id,
        format!("Building image {image}."),
        false,
    );
    state.runner.build_image(&image, &workdir).await?;

    advance(store, registration_id, BuildState::Testing)?;
    append_line(store, registration_id, "Running module tests.".into(), false);
    state.runner.run_tests(&image, &workdir).await?;

    let timestamp = store
        .builds
        .get(registration_id)
        .map(|j| j.timestamp)
        .unwrap_or_else(now_ms);
    let version = ModuleVersion {
        timestamp,
        registration_id: registration_id.to_owned(),
        version: manifest.module_version.clone(),
        git_commit_hash: checkout.commit_hash.clone(),
        git_commit_message: checkout.commit_message.clone(),
        docker_image_name: image,
        function_ids: manifest.function_ids.clone(),
    };
    registry::set_dev_version(
        store,
        git_url,
        &manifest.service_language,
        manifest.dynamic_service,
        version,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    advance(store, registration_id, BuildState::Ready)?;
    append_line(
        store,
        registration_id,
        "Registration complete; dev version updated.".into(),
        false,
    );
    tracing::info!(%registration_id, git_url, "registration complete");
    Ok(())
}

fn advance(
    store: &CatalogStore,
    registration_id: &str,
    next: BuildState,
) -> Result<(), CatalogError> {
    let git_url = {
        let mut job = store
            .builds
            .get_mut(registration_id)
            .ok_or_else(|| CatalogError::NotFound(format!("build '{registration_id}'")))?;
        if job.state.is_terminal() || next.rank() <= job.state.rank() {
            return Err(CatalogError::InvalidState(format!(
                "cannot move build from '{}' to '{next}'",
                job.state
            )));
        }
        job.state = next;
        job.log.push(BuildLogLine {
            content: format!("Registration state set to '{next}'."),
            is_error: false,
        });
        job.git_url.clone()
    };
    if next.is_terminal() {
        release_admission(store, &git_url, registration_id);
    }
    Ok(())
}

fn fail_build(store: &CatalogStore, registration_id: &str, message: &str) {
    let git_url = {
        let Some(mut job) = store.builds.get_mut(registration_id) else {
            return;
        };
        if job.state.is_terminal() {
            return;
        }
        job.state = BuildState::Disabled;
        job.error_message = Some(message.to_owned());
        job.log.push(BuildLogLine {
            content: format!("Registration failed: {message}"),
            is_error: true,
        });
        job.git_url.clone()
    };
    release_admission(store, &git_url, registration_id);
}

/// Free the admission slot once a build reaches a terminal state. Keyed by
/// registration id so a stale clear cannot evict a newer build's claim.
fn release_admission(store: &CatalogStore, git_url: &str, registration_id: &str) {
    store
        .in_flight
        .remove_if(git_url, |_, id| id == registration_id);
}

/// Abbreviated commit hash for image tags. Falls back to the full hash
/// when byte 12 is not a char boundary.
fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn append_line(store: &CatalogStore, registration_id: &str, content: String, is_error: bool) {
    if let Some(mut job) = store.builds.get_mut(registration_id) {
        job.log.push(BuildLogLine { content, is_error });
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn get_build_log(store: &CatalogStore, registration_id: &str) -> Result<String, CatalogError> {
    let job = store
        .builds
        .get(registration_id)
        .ok_or_else(|| CatalogError::NotFound(format!("build '{registration_id}'")))?;
    Ok(job
        .log
        .iter()
        .map(|l| l.content.as_str())
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Default window when no range is given.
const DEFAULT_LOG_TAIL: usize = 5000;

pub fn get_parsed_build_log(
    store: &CatalogStore,
    params: &GetBuildLogParams,
) -> Result<ParsedBuildLog, CatalogError> {
    let job = store
        .builds
        .get(&params.registration_id)
        .map(|e| e.value().clone())
        .ok_or_else(|| CatalogError::NotFound(format!("build '{}'", params.registration_id)))?;

    let total = job.log.len();
    let (start, end) = if let Some(first_n) = params.first_n {
        (0, first_n.min(total))
    } else if let Some(last_n) = params.last_n {
        (total.saturating_sub(last_n), total)
    } else if params.skip.is_some() || params.limit.is_some() {
        let skip = params.skip.unwrap_or(0).min(total);
        let limit = params.limit.unwrap_or(DEFAULT_LOG_TAIL);
        (skip, skip.saturating_add(limit).min(total))
    } else {
        (total.saturating_sub(DEFAULT_LOG_TAIL), total)
    };

    Ok(ParsedBuildLog {
        registration_id: job.registration_id,
        timestamp: job.timestamp,
        module_name: job.module_name,
        git_url: job.git_url,
        registration: job.state,
        error_message: job.error_message,
        log: job.log[start..end].to_vec(),
    })
}

pub fn list_builds(store: &CatalogStore, params: &ListBuildParams) -> Vec<BuildInfo> {
    // Pre-resolve module filters to git URLs; unknown selectors match nothing.
    let url_filter: Option<Vec<String>> = if params.modules.is_empty() {
        None
    } else {
        Some(
            params
                .modules
                .iter()
                .filter_map(|sel| {
                    let mut sel = sel.clone();
                    sel.include_disabled = true;
                    registry::resolve(store, &sel).ok().map(|m| m.git_url)
                })
                .collect(),
        )
    };

    let mut builds: Vec<BuildInfo> = store
        .builds
        .iter()
        .filter(|e| {
            let job = e.value();
            if params.only_running && job.state.is_terminal() {
                return false;
            }
            if params.only_error && job.state != BuildState::Disabled {
                return false;
            }
            if params.only_complete && job.state != BuildState::Ready {
                return false;
            }
            url_filter
                .as_ref()
                .is_none_or(|urls| urls.contains(&job.git_url))
        })
        .map(|e| {
            let job = e.value();
            BuildInfo {
                timestamp: job.timestamp,
                registration_id: job.registration_id.clone(),
                registration: job.state,
                error_message: job.error_message.clone(),
                module_name: job.module_name.clone(),
                git_url: job.git_url.clone(),
            }
        })
        .collect();

    // Newest first; oldest builds are last.
    builds.sort_by(|a, b| {
        (b.timestamp, &b.registration_id).cmp(&(a.timestamp, &a.registration_id))
    });

    let skip = params.skip.unwrap_or(0).min(builds.len());
    let limit = params.limit.unwrap_or(1000);
    builds.into_iter().skip(skip).take(limit).collect()
}

pub fn get_repo_last_timestamp(
    store: &CatalogStore,
    selector: &ModuleSelector,
) -> Result<i64, CatalogError> {
    let mut sel = selector.clone();
    sel.include_disabled = true;
    let module = registry::resolve(store, &sel)?;
    latest_build(store, &module.git_url)
        .map(|b| b.timestamp)
        .ok_or_else(|| CatalogError::NotFound("no builds for module".into()))
}

// ---------------------------------------------------------------------------
// Admin override
// ---------------------------------------------------------------------------

/// Force a build forward (recovery path for stuck registrations). Terminal
/// builds and backward transitions are refused.
pub fn set_registration_state(
    store: &CatalogStore,
    params: &SetRegistrationStateParams,
) -> Result<(), CatalogError> {
    let next: BuildState = params.registration_state.parse()?;

    let registration_id = match &params.registration_id {
        Some(id) => id.clone(),
        None => {
            let selector = ModuleSelector {
                module_name: params.module_name.clone(),
                git_url: params.git_url.clone(),
                include_disabled: true,
            };
            let module = registry::resolve(store, &selector)?;
            latest_build(store, &module.git_url)
                .map(|b| b.registration_id)
                .ok_or_else(|| CatalogError::NotFound("no builds for module".into()))?
        }
    };

    if next == BuildState::Disabled {
        let current = store
            .builds
            .get(&registration_id)
            .map(|j| j.state)
            .ok_or_else(|| CatalogError::NotFound(format!("build '{registration_id}'")))?;
        if current.is_terminal() {
            return Err(CatalogError::InvalidState(format!(
                "cannot move build from '{current}' to '{next}'"
            )));
        }
        let message = params
            .error_message
            .clone()
            .unwrap_or_else(|| "registration disabled by admin".into());
        fail_build(store, &registration_id, &message);
        return Ok(());
    }

    advance(store, &registration_id, next)?;
    if let Some(message) = &params.error_message {
        if let Some(mut job) = store.builds.get_mut(&registration_id) {
            job.error_message = Some(message.clone());
        }
    }
    Ok(())
}
