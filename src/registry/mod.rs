use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::pipeline;
use crate::release;
use crate::store::CatalogStore;
use crate::validation;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One immutable built version of a module. Created at the end of a
/// successful build, then only ever referenced by the `dev`/`beta`/`release`
/// pointers and the release history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub timestamp: i64,
    pub registration_id: String,
    pub version: Option<String>,
    pub git_commit_hash: String,
    pub git_commit_message: String,
    pub docker_image_name: String,
    pub function_ids: Vec<String>,
}

/// A registered module. Keyed by git URL; the name is bound during the
/// first build once the repository manifest has been parsed.
#[derive(Debug, Clone, Serialize)]
pub struct Module {
    pub module_name: Option<String>,
    pub git_url: String,
    pub language: Option<String>,
    pub dynamic_service: bool,
    pub owners: Vec<String>,
    pub active: bool,
    pub dev: Option<ModuleVersion>,
    pub beta: Option<ModuleVersion>,
    pub release: Option<ModuleVersion>,
    pub released_versions: Vec<ModuleVersion>,
}

impl Module {
    fn new(git_url: String, owner: String) -> Self {
        Self {
            module_name: None,
            git_url,
            language: None,
            dynamic_service: false,
            owners: vec![owner],
            active: true,
            dev: None,
            beta: None,
            release: None,
            released_versions: Vec::new(),
        }
    }

    pub fn is_owner(&self, username: &str) -> bool {
        self.owners.iter().any(|o| o == username)
    }

    pub fn released(&self) -> bool {
        !self.released_versions.is_empty()
    }
}

/// How to find a single module: by name or by the git URL it was
/// registered with.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleSelector {
    pub module_name: Option<String>,
    pub git_url: Option<String>,
    #[serde(default)]
    pub include_disabled: bool,
}

impl ModuleSelector {
    pub fn by_name(name: &str) -> Self {
        Self {
            module_name: Some(name.to_owned()),
            ..Self::default()
        }
    }

    pub fn by_git_url(git_url: &str) -> Self {
        Self {
            git_url: Some(git_url.to_owned()),
            ..Self::default()
        }
    }
}

/// Aggregate status of a module: registry flags plus the latest build and
/// release-review outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleState {
    pub active: bool,
    pub released: bool,
    pub release_approval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_message: Option<String>,
    pub registration: pipeline::BuildState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Resolve a selector to a module snapshot. Disabled modules are hidden
/// unless `include_disabled` is set.
pub fn resolve(store: &CatalogStore, selector: &ModuleSelector) -> Result<Module, CatalogError> {
    let module = lookup(store, selector)?;
    if !module.active && !selector.include_disabled {
        return Err(CatalogError::NotFound(describe(selector)));
    }
    Ok(module)
}

fn lookup(store: &CatalogStore, selector: &ModuleSelector) -> Result<Module, CatalogError> {
    if let Some(name) = selector.module_name.as_deref().filter(|n| !n.is_empty()) {
        let git_url = store
            .name_index
            .get(&name.to_lowercase())
            .map(|e| e.value().clone())
            .ok_or_else(|| CatalogError::NotFound(format!("module '{name}'")))?;
        return store
            .modules
            .get(&git_url)
            .map(|e| e.value().clone())
            .ok_or_else(|| CatalogError::NotFound(format!("module '{name}'")));
    }
    if let Some(git_url) = selector.git_url.as_deref().filter(|u| !u.is_empty()) {
        return store
            .modules
            .get(git_url)
            .map(|e| e.value().clone())
            .ok_or_else(|| CatalogError::NotFound(format!("module with git_url '{git_url}'")));
    }
    Err(CatalogError::InvalidParams(
        "either module_name or git_url must be given".into(),
    ))
}

fn describe(selector: &ModuleSelector) -> String {
    match (&selector.module_name, &selector.git_url) {
        (Some(name), _) => format!("module '{name}'"),
        (_, Some(url)) => format!("module with git_url '{url}'"),
        _ => "module".into(),
    }
}

pub fn is_registered(store: &CatalogStore, selector: &ModuleSelector) -> Result<bool, CatalogError> {
    match lookup(store, selector) {
        Ok(_) => Ok(true),
        Err(CatalogError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// All named modules, stable order by lowercased module name. Modules whose
/// first build has not yet bound a name are omitted.
pub fn list(store: &CatalogStore, include_disabled: bool) -> Vec<Module> {
    let mut modules: Vec<Module> = store
        .modules
        .iter()
        .filter(|e| e.value().module_name.is_some())
        .filter(|e| include_disabled || e.value().active)
        .map(|e| e.value().clone())
        .collect();
    modules.sort_by_key(|m| m.module_name.as_deref().unwrap_or("").to_lowercase());
    modules
}

/// Narrowing criteria for a single module version. At most one field is
/// honored, in the order timestamp, commit hash, tag-or-semver; with none
/// set the most released of release/beta/dev wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub git_commit_hash: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

pub fn resolve_version(
    module: &Module,
    query: &VersionQuery,
) -> Result<ModuleVersion, CatalogError> {
    let mut candidates: Vec<&ModuleVersion> = module.released_versions.iter().collect();
    for pointer in [&module.dev, &module.beta, &module.release] {
        if let Some(v) = pointer {
            if !candidates.iter().any(|c| c.timestamp == v.timestamp) {
                candidates.push(v);
            }
        }
    }

    if let Some(ts) = query.timestamp {
        return candidates
            .iter()
            .find(|v| v.timestamp == ts)
            .map(|v| (*v).clone())
            .ok_or_else(|| CatalogError::NotFound(format!("no version with timestamp {ts}")));
    }
    if let Some(hash) = query.git_commit_hash.as_deref().filter(|h| !h.is_empty()) {
        return candidates
            .iter()
            .find(|v| v.git_commit_hash == hash)
            .map(|v| (*v).clone())
            .ok_or_else(|| {
                CatalogError::NotFound(format!("no version with commit hash '{hash}'"))
            });
    }
    if let Some(wanted) = query.version.as_deref().filter(|s| !s.is_empty()) {
        let tagged = match wanted {
            "dev" => Some(&module.dev),
            "beta" => Some(&module.beta),
            "release" => Some(&module.release),
            _ => None,
        };
        if let Some(pointer) = tagged {
            return pointer
                .clone()
                .ok_or_else(|| CatalogError::NotFound(format!("module has no '{wanted}' version")));
        }
        // Semantic version string; newest matching release wins.
        return module
            .released_versions
            .iter()
            .rev()
            .find(|v| v.version.as_deref() == Some(wanted))
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("no released version '{wanted}'")));
    }

    module
        .release
        .clone()
        .or_else(|| module.beta.clone())
        .or_else(|| module.dev.clone())
        .ok_or_else(|| CatalogError::NotFound("module has no built versions".into()))
}

// ---------------------------------------------------------------------------
// Registration-side mutations
// ---------------------------------------------------------------------------

/// Create the module record for a git URL if absent; the requester becomes
/// the sole owner. For an existing record the requester must already be an
/// owner (admins bypass).
pub fn ensure_module(
    store: &CatalogStore,
    git_url: &str,
    requester: &str,
    is_admin: bool,
) -> Result<(), CatalogError> {
    validation::check_git_url(git_url)?;
    if let Some(module) = store.modules.get(git_url) {
        if !module.is_owner(requester) && !is_admin {
            return Err(CatalogError::PermissionDenied(format!(
                "user '{requester}' is not an owner of this module"
            )));
        }
        return Ok(());
    }
    store
        .modules
        .insert(git_url.to_owned(), Module::new(git_url.to_owned(), requester.to_owned()));
    Ok(())
}

/// Bind a manifest name to the module registered under `git_url`.
/// A name already claimed by a different git URL is a conflict; module
/// names never change once bound.
pub fn bind_module_name(
    store: &CatalogStore,
    git_url: &str,
    name: &str,
) -> Result<(), CatalogError> {
    validation::check_module_name(name)?;
    let key = name.to_lowercase();

    // Claim the name first; the entry guard makes check-and-insert atomic,
    // so two builds racing for one name cannot both win.
    let claimed = match store.name_index.entry(key.clone()) {
        Entry::Occupied(existing) => {
            if existing.get() != git_url {
                return Err(CatalogError::Conflict(format!(
                    "module name '{name}' is already registered to a different git_url"
                )));
            }
            false
        }
        Entry::Vacant(slot) => {
            slot.insert(git_url.to_owned());
            true
        }
    };

    let release_claim = |store: &CatalogStore| {
        if claimed {
            store.name_index.remove_if(&key, |_, url| url == git_url);
        }
    };

    let Some(mut module) = store.modules.get_mut(git_url) else {
        release_claim(store);
        return Err(CatalogError::NotFound(format!(
            "module with git_url '{git_url}'"
        )));
    };
    if let Some(bound) = module.module_name.as_deref() {
        if !bound.eq_ignore_ascii_case(name) {
            let bound = bound.to_owned();
            drop(module);
            release_claim(store);
            return Err(CatalogError::Conflict(format!(
                "module name cannot change from '{bound}' to '{name}'"
            )));
        }
    }
    module.module_name = Some(name.to_owned());
    Ok(())
}

/// Record the outcome of a successful build: metadata from the manifest and
/// the new dev version.
pub fn set_dev_version(
    store: &CatalogStore,
    git_url: &str,
    language: &str,
    dynamic_service: bool,
    version: ModuleVersion,
) -> Result<(), CatalogError> {
    let mut module = store
        .modules
        .get_mut(git_url)
        .ok_or_else(|| CatalogError::NotFound(format!("module with git_url '{git_url}'")))?;
    module.language = Some(language.to_owned());
    module.dynamic_service = dynamic_service;
    module.dev = Some(version);
    Ok(())
}

// ---------------------------------------------------------------------------
// Admin mutations
// ---------------------------------------------------------------------------

pub fn set_active(
    store: &CatalogStore,
    selector: &ModuleSelector,
    active: bool,
) -> Result<(), CatalogError> {
    let module = lookup(store, selector)?;
    let mut entry = store
        .modules
        .get_mut(&module.git_url)
        .ok_or_else(|| CatalogError::NotFound(describe(selector)))?;
    entry.active = active;
    Ok(())
}

/// Delete a module that has never been released. Its build history is kept.
pub fn delete_module(store: &CatalogStore, selector: &ModuleSelector) -> Result<(), CatalogError> {
    let module = lookup(store, selector)?;
    if module.released() || module.release.is_some() {
        return Err(CatalogError::InvalidState(
            "modules with released versions cannot be deleted".into(),
        ));
    }
    store.modules.remove(&module.git_url);
    if let Some(name) = &module.module_name {
        store.name_index.remove(&name.to_lowercase());
    }
    Ok(())
}

/// Re-key a module under a new git URL (repository moved). Refused while a
/// build is in flight, since the pipeline locks on the old key.
pub fn migrate_git_url(
    store: &CatalogStore,
    selector: &ModuleSelector,
    new_git_url: &str,
) -> Result<(), CatalogError> {
    validation::check_git_url(new_git_url)?;
    let module = lookup(store, selector)?;
    if store.modules.contains_key(new_git_url) {
        return Err(CatalogError::Conflict(format!(
            "git_url '{new_git_url}' is already registered"
        )));
    }
    if pipeline::has_build_in_flight(store, &module.git_url) {
        return Err(CatalogError::Conflict(
            "a registration is in progress for this module".into(),
        ));
    }
    let old_url = module.git_url.clone();
    let Some((_, mut moved)) = store.modules.remove(&old_url) else {
        return Err(CatalogError::NotFound(describe(selector)));
    };
    moved.git_url = new_git_url.to_owned();
    store.modules.insert(new_git_url.to_owned(), moved);
    if let Some(name) = &module.module_name {
        store
            .name_index
            .insert(name.to_lowercase(), new_git_url.to_owned());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// State aggregation
// ---------------------------------------------------------------------------

pub fn module_state(
    store: &CatalogStore,
    selector: &ModuleSelector,
) -> Result<ModuleState, CatalogError> {
    let module = lookup(store, selector)?;
    let build = pipeline::latest_build(store, &module.git_url)
        .ok_or_else(|| CatalogError::NotFound(format!("no builds for {}", describe(selector))))?;
    let (release_approval, review_message) = release::approval_state(store, &module.git_url);
    Ok(ModuleState {
        active: module.active,
        released: module.released() || module.release.is_some(),
        release_approval,
        review_message,
        registration: build.state,
        error_message: build.error_message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CatalogStore;

    fn store() -> CatalogStore {
        CatalogStore::new()
    }

    #[test]
    fn ensure_module_creates_with_sole_owner() {
        let s = store();
        ensure_module(&s, "https://x/M", "alice", false).unwrap();
        let module = s.modules.get("https://x/M").unwrap().clone();
        assert_eq!(module.owners, vec!["alice"]);
        assert!(module.active);
        assert!(module.module_name.is_none());
    }

    #[test]
    fn ensure_module_rejects_non_owner() {
        let s = store();
        ensure_module(&s, "https://x/M", "alice", false).unwrap();
        let err = ensure_module(&s, "https://x/M", "bob", false).unwrap_err();
        assert!(matches!(err, CatalogError::PermissionDenied(_)));
        // admins bypass ownership
        ensure_module(&s, "https://x/M", "bob", true).unwrap();
    }

    #[test]
    fn ensure_module_rejects_bad_url() {
        let s = store();
        let err = ensure_module(&s, "not a url", "alice", false).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidParams(_)));
    }

    #[test]
    fn bind_name_then_resolve_by_name() {
        let s = store();
        ensure_module(&s, "https://x/M", "alice", false).unwrap();
        bind_module_name(&s, "https://x/M", "MyModule").unwrap();
        let module = resolve(&s, &ModuleSelector::by_name("mymodule")).unwrap();
        assert_eq!(module.git_url, "https://x/M");
    }

    #[test]
    fn bind_name_conflicts_across_git_urls() {
        let s = store();
        ensure_module(&s, "https://x/A", "alice", false).unwrap();
        ensure_module(&s, "https://x/B", "bob", false).unwrap();
        bind_module_name(&s, "https://x/A", "Shared").unwrap();
        let err = bind_module_name(&s, "https://x/B", "Shared").unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn concurrent_binds_admit_exactly_one_claim() {
        use std::sync::{Arc, Barrier};

        for _ in 0..100 {
            let s = Arc::new(store());
            ensure_module(&s, "https://x/A", "alice", false).unwrap();
            ensure_module(&s, "https://x/B", "bob", false).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = ["https://x/A", "https://x/B"]
                .into_iter()
                .map(|url| {
                    let s = Arc::clone(&s);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        bind_module_name(&s, url, "Shared").map(|()| url)
                    })
                })
                .collect();
            let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let winners: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1, "exactly one bind may win: {outcomes:?}");
            assert!(outcomes
                .iter()
                .filter_map(|o| o.as_ref().err())
                .all(|e| matches!(e, CatalogError::Conflict(_))));

            // The index points at the winner and the loser stays unnamed.
            let winner = *winners[0];
            assert_eq!(s.name_index.get("shared").unwrap().value(), winner);
            let named: Vec<_> = s
                .modules
                .iter()
                .filter(|m| m.value().module_name.is_some())
                .map(|m| m.key().clone())
                .collect();
            assert_eq!(named, vec![winner.to_owned()]);
        }
    }

    #[test]
    fn bind_name_is_idempotent_case_insensitive() {
        let s = store();
        ensure_module(&s, "https://x/A", "alice", false).unwrap();
        bind_module_name(&s, "https://x/A", "MyMod").unwrap();
        bind_module_name(&s, "https://x/A", "mymod").unwrap();
        let err = bind_module_name(&s, "https://x/A", "Other").unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[test]
    fn resolve_hides_disabled_unless_asked() {
        let s = store();
        ensure_module(&s, "https://x/M", "alice", false).unwrap();
        bind_module_name(&s, "https://x/M", "M").unwrap();
        set_active(&s, &ModuleSelector::by_name("M"), false).unwrap();

        let err = resolve(&s, &ModuleSelector::by_name("M")).unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));

        let mut with_disabled = ModuleSelector::by_name("M");
        with_disabled.include_disabled = true;
        assert!(!resolve(&s, &with_disabled).unwrap().active);
    }

    #[test]
    fn empty_selector_is_invalid() {
        let s = store();
        let err = resolve(&s, &ModuleSelector::default()).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidParams(_)));
    }

    #[test]
    fn list_sorts_by_name_and_skips_unnamed() {
        let s = store();
        for (url, name) in [
            ("https://x/b", Some("Zeta")),
            ("https://x/a", Some("alpha")),
            ("https://x/c", None),
        ] {
            ensure_module(&s, url, "alice", false).unwrap();
            if let Some(name) = name {
                bind_module_name(&s, url, name).unwrap();
            }
        }
        let names: Vec<_> = list(&s, false)
            .into_iter()
            .map(|m| m.module_name.unwrap())
            .collect();
        assert_eq!(names, vec!["alpha", "Zeta"]);
    }

    #[test]
    fn delete_refuses_released_module() {
        let s = store();
        ensure_module(&s, "https://x/M", "alice", false).unwrap();
        bind_module_name(&s, "https://x/M", "M").unwrap();
        {
            let mut module = s.modules.get_mut("https://x/M").unwrap();
            module.released_versions.push(ModuleVersion {
                timestamp: 1,
                registration_id: "r1".into(),
                version: Some("1.0.0".into()),
                git_commit_hash: "abc".into(),
                git_commit_message: "init".into(),
                docker_image_name: "img".into(),
                function_ids: vec![],
            });
        }
        let err = delete_module(&s, &ModuleSelector::by_name("M")).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidState(_)));
    }

    fn version(ts: i64, semver: Option<&str>, hash: &str) -> ModuleVersion {
        ModuleVersion {
            timestamp: ts,
            registration_id: format!("r{ts}"),
            version: semver.map(str::to_owned),
            git_commit_hash: hash.into(),
            git_commit_message: "msg".into(),
            docker_image_name: "img".into(),
            function_ids: vec![],
        }
    }

    #[test]
    fn resolve_version_default_prefers_release_then_beta_then_dev() {
        let mut module = Module::new("https://x/M".into(), "alice".into());
        module.dev = Some(version(3, None, "c3"));
        assert_eq!(
            resolve_version(&module, &VersionQuery::default())
                .unwrap()
                .timestamp,
            3
        );

        module.beta = Some(version(2, None, "c2"));
        assert_eq!(
            resolve_version(&module, &VersionQuery::default())
                .unwrap()
                .timestamp,
            2
        );

        module.release = Some(version(1, Some("1.0.0"), "c1"));
        assert_eq!(
            resolve_version(&module, &VersionQuery::default())
                .unwrap()
                .timestamp,
            1
        );
    }

    #[test]
    fn resolve_version_by_timestamp_hash_tag_and_semver() {
        let mut module = Module::new("https://x/M".into(), "alice".into());
        module.released_versions = vec![version(1, Some("1.0.0"), "c1"), version(2, Some("1.1.0"), "c2")];
        module.release = Some(version(2, Some("1.1.0"), "c2"));
        module.dev = Some(version(5, None, "c5"));

        let by_ts = resolve_version(
            &module,
            &VersionQuery {
                timestamp: Some(1),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_ts.git_commit_hash, "c1");

        let by_hash = resolve_version(
            &module,
            &VersionQuery {
                git_commit_hash: Some("c5".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_hash.timestamp, 5);

        let by_tag = resolve_version(
            &module,
            &VersionQuery {
                version: Some("dev".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_tag.timestamp, 5);

        let by_semver = resolve_version(
            &module,
            &VersionQuery {
                version: Some("1.0.0".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(by_semver.timestamp, 1);

        let missing = resolve_version(
            &module,
            &VersionQuery {
                version: Some("9.9.9".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(missing, CatalogError::NotFound(_)));
    }

    #[test]
    fn migrate_rekeys_module_and_index() {
        let s = store();
        ensure_module(&s, "https://x/old", "alice", false).unwrap();
        bind_module_name(&s, "https://x/old", "M").unwrap();
        migrate_git_url(&s, &ModuleSelector::by_name("M"), "https://x/new").unwrap();

        assert!(!s.modules.contains_key("https://x/old"));
        let module = resolve(&s, &ModuleSelector::by_name("M")).unwrap();
        assert_eq!(module.git_url, "https://x/new");
    }
}
