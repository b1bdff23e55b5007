use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::auth::resolver::TokenResolver;
use crate::config::Config;
use crate::configs::{ClientGroupConfig, ConfigParameter, VolumeMountConfig};
use crate::pipeline::BuildJob;
use crate::pipeline::runner::BuildRunner;
use crate::registry::Module;
use crate::release::ReleaseRequest;

/// Shared handle cloned into every handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CatalogStore>,
    pub runner: Arc<dyn BuildRunner>,
    pub auth: Arc<dyn TokenResolver>,
    pub audit: Arc<AuditLog>,
    pub config: Arc<Config>,
}

/// Composite key for config parameters: (module, version-or-tag, name),
/// module lowercased. An empty version means "applies to all versions".
pub type ParamKey = (String, String, String);

/// (module, function) — module lowercased.
pub type GroupKey = (String, String);

/// (module, function, client group) — module lowercased.
pub type MountKey = (String, String, String);

/// In-memory authoritative state. Each component owns its own maps; the
/// per-module lock table serializes builds and promotions for one module
/// while leaving unrelated modules concurrent.
pub struct CatalogStore {
    /// Module records keyed by git URL.
    pub(crate) modules: DashMap<String, Module>,
    /// Lowercased module name -> git URL.
    pub(crate) name_index: DashMap<String, String>,
    /// Build jobs keyed by registration id.
    pub(crate) builds: DashMap<String, BuildJob>,
    /// Admission marker: git URL -> registration id of the one non-terminal
    /// build. Claimed atomically via the entry API before a job is created
    /// and cleared when the job reaches a terminal state.
    pub(crate) in_flight: DashMap<String, String>,
    /// Release requests keyed by request id.
    pub(crate) requests: DashMap<Uuid, ReleaseRequest>,
    /// Approved developer usernames.
    pub(crate) developers: RwLock<BTreeSet<String>>,
    pub(crate) secure_params: DashMap<ParamKey, ConfigParameter>,
    pub(crate) hidden_params: DashMap<ParamKey, ConfigParameter>,
    pub(crate) client_groups: DashMap<GroupKey, ClientGroupConfig>,
    pub(crate) volume_mounts: DashMap<MountKey, VolumeMountConfig>,
    module_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self {
            modules: DashMap::new(),
            name_index: DashMap::new(),
            builds: DashMap::new(),
            in_flight: DashMap::new(),
            requests: DashMap::new(),
            developers: RwLock::new(BTreeSet::new()),
            secure_params: DashMap::new(),
            hidden_params: DashMap::new(),
            client_groups: DashMap::new(),
            volume_mounts: DashMap::new(),
            module_locks: DashMap::new(),
        }
    }

    /// The mutual-exclusion lock for one module, keyed by git URL. Held for
    /// the duration of a build and across promotion writes.
    pub fn module_lock(&self, git_url: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.module_locks
            .entry(git_url.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    // -- approved developers --

    pub fn approve_developer(&self, username: &str) {
        self.developers
            .write()
            .expect("developer set poisoned")
            .insert(username.to_owned());
    }

    pub fn revoke_developer(&self, username: &str) {
        self.developers
            .write()
            .expect("developer set poisoned")
            .remove(username);
    }

    pub fn is_approved_developer(&self, username: &str) -> bool {
        self.developers
            .read()
            .expect("developer set poisoned")
            .contains(username)
    }

    pub fn list_approved_developers(&self) -> Vec<String> {
        self.developers
            .read()
            .expect("developer set poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Current instant as milliseconds since the epoch; doubles as the
/// monotonic-enough version id on the wire.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
