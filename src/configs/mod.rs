use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::registry::{self, ModuleSelector};
use crate::store::CatalogStore;

// ---------------------------------------------------------------------------
// Config parameters
// ---------------------------------------------------------------------------

/// One module configuration parameter. `version` is a tag (`release`,
/// `beta`, `dev`), a semantic version, or the empty string meaning "all
/// versions". Writes are last-write-wins upserts on
/// `(module_name, version, param_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigParameter {
    pub module_name: String,
    #[serde(default)]
    pub version: String,
    pub param_name: String,
    #[serde(default)]
    pub param_value: String,
    #[serde(default)]
    pub is_password: bool,
}

/// Which parameter store to hit. Secure parameters feed credentials into
/// the job runner; hidden parameters are module settings kept out of
/// public listings.
#[derive(Debug, Clone, Copy)]
pub enum ParamScope {
    Secure,
    Hidden,
}

#[derive(Debug, Deserialize)]
pub struct ModifyConfigParams {
    pub data: Vec<ConfigParameter>,
}

#[derive(Debug, Deserialize)]
pub struct GetConfigParams {
    pub module_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub load_all_versions: bool,
}

fn params_map(
    store: &CatalogStore,
    scope: ParamScope,
) -> &dashmap::DashMap<crate::store::ParamKey, ConfigParameter> {
    match scope {
        ParamScope::Secure => &store.secure_params,
        ParamScope::Hidden => &store.hidden_params,
    }
}

fn require_known_module(store: &CatalogStore, module_name: &str) -> Result<(), CatalogError> {
    let mut selector = ModuleSelector::by_name(module_name);
    selector.include_disabled = true;
    registry::resolve(store, &selector).map(|_| ())
}

/// Upsert a batch of parameters. Later writes overwrite earlier ones for
/// the same composite key.
pub fn modify_params(
    store: &CatalogStore,
    scope: ParamScope,
    data: &[ConfigParameter],
) -> Result<(), CatalogError> {
    for param in data {
        if param.param_name.is_empty() {
            return Err(CatalogError::InvalidParams("param_name must be given".into()));
        }
        require_known_module(store, &param.module_name)?;
        let key = (
            param.module_name.to_lowercase(),
            param.version.clone(),
            param.param_name.clone(),
        );
        params_map(store, scope).insert(key, param.clone());
    }
    Ok(())
}

/// Remove a batch of parameters by composite key; absent keys are ignored.
pub fn remove_params(
    store: &CatalogStore,
    scope: ParamScope,
    data: &[ConfigParameter],
) -> Result<(), CatalogError> {
    for param in data {
        let key = (
            param.module_name.to_lowercase(),
            param.version.clone(),
            param.param_name.clone(),
        );
        params_map(store, scope).remove(&key);
    }
    Ok(())
}

/// Look up parameters for one module. An empty `version` resolves to the
/// `release` tag. Per parameter the exact-version entry wins, falling back
/// to the version-independent (`""`) entry. `load_all_versions` bypasses
/// resolution and returns every stored entry for the module.
pub fn get_params(
    store: &CatalogStore,
    scope: ParamScope,
    input: &GetConfigParams,
) -> Result<Vec<ConfigParameter>, CatalogError> {
    require_known_module(store, &input.module_name)?;
    let module_key = input.module_name.to_lowercase();
    let map = params_map(store, scope);

    if input.load_all_versions {
        let mut all: Vec<ConfigParameter> = map
            .iter()
            .filter(|e| e.key().0 == module_key)
            .map(|e| e.value().clone())
            .collect();
        all.sort_by(|a, b| (&a.version, &a.param_name).cmp(&(&b.version, &b.param_name)));
        return Ok(all);
    }

    let requested = if input.version.is_empty() {
        "release".to_owned()
    } else {
        input.version.clone()
    };

    // param_name -> entry, version-specific entries shadowing "" entries
    let mut merged: BTreeMap<String, ConfigParameter> = BTreeMap::new();
    for entry in map.iter().filter(|e| e.key().0 == module_key) {
        let version = &entry.key().1;
        let name = &entry.key().2;
        if *version == requested {
            merged.insert(name.clone(), entry.value().clone());
        } else if version.is_empty() && !merged.contains_key(name) {
            merged.insert(name.clone(), entry.value().clone());
        }
    }
    // A second pass is needed because iteration order is arbitrary: an ""
    // entry seen first must not survive a later exact match.
    for entry in map.iter().filter(|e| e.key().0 == module_key) {
        if entry.key().1 == requested {
            merged.insert(entry.key().2.clone(), entry.value().clone());
        }
    }
    Ok(merged.into_values().collect())
}

// ---------------------------------------------------------------------------
// Client-group routing
// ---------------------------------------------------------------------------

/// Routing rule directing a module function to particular execution
/// infrastructure. Consulted by the job dispatcher, never by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientGroupConfig {
    pub module_name: String,
    pub function_name: String,
    #[serde(default)]
    pub client_groups: Vec<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ClientGroupFilter {
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
}

pub fn set_client_group(
    store: &CatalogStore,
    config: &ClientGroupConfig,
) -> Result<(), CatalogError> {
    if config.function_name.is_empty() {
        return Err(CatalogError::InvalidParams("function_name must be given".into()));
    }
    require_known_module(store, &config.module_name)?;
    let key = (
        config.module_name.to_lowercase(),
        config.function_name.clone(),
    );
    store.client_groups.insert(key, config.clone());
    Ok(())
}

pub fn remove_client_group(store: &CatalogStore, config: &ClientGroupConfig) {
    let key = (
        config.module_name.to_lowercase(),
        config.function_name.clone(),
    );
    store.client_groups.remove(&key);
}

pub fn list_client_groups(
    store: &CatalogStore,
    filter: &ClientGroupFilter,
) -> Vec<ClientGroupConfig> {
    let module_key = filter.module_name.as_ref().map(|m| m.to_lowercase());
    let mut groups: Vec<ClientGroupConfig> = store
        .client_groups
        .iter()
        .filter(|e| {
            module_key.as_ref().is_none_or(|m| &e.key().0 == m)
                && filter
                    .function_name
                    .as_ref()
                    .is_none_or(|f| &e.key().1 == f)
        })
        .map(|e| e.value().clone())
        .collect();
    groups.sort_by(|a, b| {
        (&a.module_name, &a.function_name).cmp(&(&b.module_name, &b.function_name))
    });
    groups
}

// ---------------------------------------------------------------------------
// Volume mounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_dir: String,
    pub container_dir: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Host directories mounted into a module function's container for a given
/// client group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeMountConfig {
    pub module_name: String,
    pub function_name: String,
    pub client_group: String,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct VolumeMountFilter {
    #[serde(default)]
    pub module_name: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub client_group: Option<String>,
}

pub fn set_volume_mount(
    store: &CatalogStore,
    config: &VolumeMountConfig,
) -> Result<(), CatalogError> {
    if config.function_name.is_empty() || config.client_group.is_empty() {
        return Err(CatalogError::InvalidParams(
            "function_name and client_group must be given".into(),
        ));
    }
    require_known_module(store, &config.module_name)?;
    let key = (
        config.module_name.to_lowercase(),
        config.function_name.clone(),
        config.client_group.clone(),
    );
    store.volume_mounts.insert(key, config.clone());
    Ok(())
}

pub fn remove_volume_mount(store: &CatalogStore, config: &VolumeMountConfig) {
    let key = (
        config.module_name.to_lowercase(),
        config.function_name.clone(),
        config.client_group.clone(),
    );
    store.volume_mounts.remove(&key);
}

pub fn list_volume_mounts(
    store: &CatalogStore,
    filter: &VolumeMountFilter,
) -> Vec<VolumeMountConfig> {
    let module_key = filter.module_name.as_ref().map(|m| m.to_lowercase());
    let mut mounts: Vec<VolumeMountConfig> = store
        .volume_mounts
        .iter()
        .filter(|e| {
            module_key.as_ref().is_none_or(|m| &e.key().0 == m)
                && filter
                    .function_name
                    .as_ref()
                    .is_none_or(|f| &e.key().1 == f)
                && filter
                    .client_group
                    .as_ref()
                    .is_none_or(|g| &e.key().2 == g)
        })
        .map(|e| e.value().clone())
        .collect();
    mounts.sort_by(|a, b| {
        (&a.module_name, &a.function_name, &a.client_group).cmp(&(
            &b.module_name,
            &b.function_name,
            &b.client_group,
        ))
    });
    mounts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;

    fn store_with_module(name: &str) -> CatalogStore {
        let store = CatalogStore::new();
        let git_url = format!("https://x/{name}");
        registry::ensure_module(&store, &git_url, "alice", false).unwrap();
        registry::bind_module_name(&store, &git_url, name).unwrap();
        store
    }

    fn param(module: &str, version: &str, name: &str, value: &str) -> ConfigParameter {
        ConfigParameter {
            module_name: module.into(),
            version: version.into(),
            param_name: name.into(),
            param_value: value.into(),
            is_password: false,
        }
    }

    #[test]
    fn version_independent_entry_answers_any_version() {
        let s = store_with_module("M");
        modify_params(&s, ParamScope::Secure, &[param("M", "", "p", "v1")]).unwrap();

        let got = get_params(
            &s,
            ParamScope::Secure,
            &GetConfigParams {
                module_name: "M".into(),
                version: "2.0".into(),
                load_all_versions: false,
            },
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].param_value, "v1");
    }

    #[test]
    fn exact_version_shadows_fallback() {
        let s = store_with_module("M");
        modify_params(&s, ParamScope::Secure, &[param("M", "", "p", "v1")]).unwrap();
        modify_params(&s, ParamScope::Secure, &[param("M", "2.0", "p", "v2")]).unwrap();

        let got = get_params(
            &s,
            ParamScope::Secure,
            &GetConfigParams {
                module_name: "M".into(),
                version: "2.0".into(),
                load_all_versions: false,
            },
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].param_value, "v2");

        // other versions still see the fallback
        let other = get_params(
            &s,
            ParamScope::Secure,
            &GetConfigParams {
                module_name: "M".into(),
                version: "3.0".into(),
                load_all_versions: false,
            },
        )
        .unwrap();
        assert_eq!(other[0].param_value, "v1");
    }

    #[test]
    fn empty_version_resolves_to_release_tag() {
        let s = store_with_module("M");
        modify_params(
            &s,
            ParamScope::Hidden,
            &[param("M", "release", "p", "rel"), param("M", "dev", "p", "dev")],
        )
        .unwrap();

        let got = get_params(
            &s,
            ParamScope::Hidden,
            &GetConfigParams {
                module_name: "M".into(),
                version: String::new(),
                load_all_versions: false,
            },
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].param_value, "rel");
    }

    #[test]
    fn load_all_versions_bypasses_resolution() {
        let s = store_with_module("M");
        modify_params(
            &s,
            ParamScope::Secure,
            &[
                param("M", "", "p", "v1"),
                param("M", "2.0", "p", "v2"),
                param("M", "2.0", "q", "v3"),
            ],
        )
        .unwrap();

        let all = get_params(
            &s,
            ParamScope::Secure,
            &GetConfigParams {
                module_name: "M".into(),
                version: "ignored".into(),
                load_all_versions: true,
            },
        )
        .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn upsert_overwrites_and_remove_is_idempotent() {
        let s = store_with_module("M");
        modify_params(&s, ParamScope::Secure, &[param("M", "", "p", "old")]).unwrap();
        modify_params(&s, ParamScope::Secure, &[param("M", "", "p", "new")]).unwrap();
        assert_eq!(s.secure_params.len(), 1);

        remove_params(&s, ParamScope::Secure, &[param("M", "", "p", "")]).unwrap();
        remove_params(&s, ParamScope::Secure, &[param("M", "", "p", "")]).unwrap();
        assert!(s.secure_params.is_empty());
    }

    #[test]
    fn params_require_registered_module() {
        let s = CatalogStore::new();
        let err = modify_params(&s, ParamScope::Secure, &[param("Ghost", "", "p", "v")])
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn secure_and_hidden_stores_are_separate() {
        let s = store_with_module("M");
        modify_params(&s, ParamScope::Secure, &[param("M", "", "p", "sec")]).unwrap();
        let hidden = get_params(
            &s,
            ParamScope::Hidden,
            &GetConfigParams {
                module_name: "M".into(),
                version: "1.0".into(),
                load_all_versions: false,
            },
        )
        .unwrap();
        assert!(hidden.is_empty());
    }

    #[test]
    fn client_group_upsert_and_filter() {
        let s = store_with_module("M");
        set_client_group(
            &s,
            &ClientGroupConfig {
                module_name: "M".into(),
                function_name: "run".into(),
                client_groups: vec!["bigmem".into()],
            },
        )
        .unwrap();
        set_client_group(
            &s,
            &ClientGroupConfig {
                module_name: "M".into(),
                function_name: "run".into(),
                client_groups: vec!["gpu".into()],
            },
        )
        .unwrap();

        let groups = list_client_groups(
            &s,
            &ClientGroupFilter {
                module_name: Some("m".into()),
                function_name: Some("run".into()),
            },
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].client_groups, vec!["gpu"]);

        remove_client_group(
            &s,
            &ClientGroupConfig {
                module_name: "M".into(),
                function_name: "run".into(),
                client_groups: vec![],
            },
        );
        assert!(list_client_groups(&s, &ClientGroupFilter::default()).is_empty());
    }

    #[test]
    fn volume_mount_keyed_by_client_group() {
        let s = store_with_module("M");
        for group in ["bigmem", "gpu"] {
            set_volume_mount(
                &s,
                &VolumeMountConfig {
                    module_name: "M".into(),
                    function_name: "run".into(),
                    client_group: group.into(),
                    volume_mounts: vec![VolumeMount {
                        host_dir: "/data".into(),
                        container_dir: "/mnt".into(),
                        read_only: true,
                    }],
                },
            )
            .unwrap();
        }

        let all = list_volume_mounts(&s, &VolumeMountFilter::default());
        assert_eq!(all.len(), 2);

        let gpu_only = list_volume_mounts(
            &s,
            &VolumeMountFilter {
                client_group: Some("gpu".into()),
                ..Default::default()
            },
        );
        assert_eq!(gpu_only.len(), 1);
        assert_eq!(gpu_only[0].client_group, "gpu");
    }
}
