#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use catalog::audit::AuditLog;
use catalog::auth::resolver::StaticTokenResolver;
use catalog::config::Config;
use catalog::pipeline::BuildState;
use catalog::pipeline::runner::{BuildRunner, ModuleManifest, RepoCheckout};
use catalog::store::{AppState, CatalogStore};

pub const ADMIN_TOKEN: &str = "admintok";
pub const ALICE_TOKEN: &str = "alicetok";
pub const BOB_TOKEN: &str = "bobtok";

pub const TEST_COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Checkout,
    Build,
    Test,
}

/// Scripted stand-in for the git/docker runner. Yields a fixed manifest,
/// optionally fails at a chosen step, and can be gated so a build stays
/// in flight until the test releases it.
pub struct ScriptedRunner {
    pub module_name: String,
    pub module_version: Option<String>,
    pub function_ids: Vec<String>,
    pub fail_at: Option<FailAt>,
    pub gate: Option<Arc<tokio::sync::Semaphore>>,
}

impl ScriptedRunner {
    pub fn named(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_owned(),
            module_version: Some("1.0.0".into()),
            function_ids: vec!["run".into()],
            fail_at: None,
            gate: None,
        }
    }

    pub fn failing(module_name: &str, fail_at: FailAt) -> Self {
        Self {
            fail_at: Some(fail_at),
            ..Self::named(module_name)
        }
    }

    pub fn gated(module_name: &str, gate: Arc<tokio::sync::Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::named(module_name)
        }
    }
}

#[async_trait]
impl BuildRunner for ScriptedRunner {
    async fn checkout(
        &self,
        _git_url: &str,
        _commit: Option<&str>,
        _workdir: &Path,
    ) -> anyhow::Result<RepoCheckout> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await?;
        }
        if self.fail_at == Some(FailAt::Checkout) {
            anyhow::bail!("clone failed: repository not found");
        }
        Ok(RepoCheckout {
            commit_hash: TEST_COMMIT.to_owned(),
            commit_message: "test commit".to_owned(),
            manifest: ModuleManifest {
                module_name: self.module_name.clone(),
                module_version: self.module_version.clone(),
                service_language: "rust".to_owned(),
                dynamic_service: false,
                function_ids: self.function_ids.clone(),
            },
        })
    }

    async fn build_image(&self, _image: &str, _workdir: &Path) -> anyhow::Result<()> {
        if self.fail_at == Some(FailAt::Build) {
            anyhow::bail!("docker build failed: missing Dockerfile");
        }
        Ok(())
    }

    async fn run_tests(&self, _image: &str, _workdir: &Path) -> anyhow::Result<()> {
        if self.fail_at == Some(FailAt::Test) {
            anyhow::bail!("module tests failed");
        }
        Ok(())
    }
}

/// Build a test `AppState` with static tokens (admin/alice/bob), `admin` as
/// the sole admin, and `alice` pre-approved as a developer.
pub fn test_state(runner: impl BuildRunner + 'static) -> AppState {
    let config = Config {
        listen: "127.0.0.1:0".into(),
        admin_users: vec!["admin".into()],
        approved_developers: vec!["alice".into()],
        auth_url: None,
        dev_tokens: vec![],
        temp_dir: std::env::temp_dir().join(format!("catalog-test-{}", Uuid::new_v4())),
        docker_registry: "registry.test".into(),
    };

    let store = Arc::new(CatalogStore::new());
    for username in &config.approved_developers {
        store.approve_developer(username);
    }

    let auth = StaticTokenResolver::new([
        (ADMIN_TOKEN.to_owned(), "admin".to_owned()),
        (ALICE_TOKEN.to_owned(), "alice".to_owned()),
        (BOB_TOKEN.to_owned(), "bob".to_owned()),
    ]);

    AppState {
        store,
        runner: Arc::new(runner),
        auth: Arc::new(auth),
        audit: Arc::new(AuditLog::default()),
        config: Arc::new(config),
    }
}

/// Build the full router with the given state.
pub fn test_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .merge(catalog::api::router())
        .with_state(state)
}

/// Send one RPC call with Bearer auth. An empty token omits the header.
pub async fn rpc(app: &Router, token: &str, method: &str, params: Value) -> (StatusCode, Value) {
    rpc_raw(app, token, &format!("Catalog.{method}"), params).await
}

/// Like [`rpc`] but sends the method name exactly as given.
pub async fn rpc_raw(
    app: &Router,
    token: &str,
    method: &str,
    params: Value,
) -> (StatusCode, Value) {
    let envelope = json!({
        "version": "1.1",
        "id": 1,
        "method": method,
        "params": params,
    });
    let mut builder = Request::builder()
        .method("POST")
        .uri("/rpc")
        .header("Content-Type", "application/json");
    if !token.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let req = builder
        .body(Body::from(serde_json::to_string(&envelope).unwrap()))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// The single value inside a successful result array.
pub fn result(body: &Value) -> &Value {
    &body["result"][0]
}

/// Register a repo as alice and wait for the build to finish. Returns the
/// registration id.
pub async fn register_and_wait(app: &Router, state: &AppState, git_url: &str) -> String {
    let (status, body) = rpc(
        app,
        ALICE_TOKEN,
        "register_repo",
        json!([{ "git_url": git_url }]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register_repo failed: {body}");
    let registration_id = result(&body)["registration_id"].as_str().unwrap().to_owned();

    let state_reached = wait_for_build(state, &registration_id).await;
    assert_eq!(state_reached, BuildState::Ready, "build did not succeed");
    registration_id
}

/// Poll until the build reaches a terminal state.
pub async fn wait_for_build(state: &AppState, registration_id: &str) -> BuildState {
    for _ in 0..200 {
        let (_, body) = rpc(
            &test_router(state.clone()),
            "",
            "get_parsed_build_log",
            json!([{ "registration_id": registration_id }]),
        )
        .await;
        let current: BuildState =
            serde_json::from_value(result(&body)["registration"].clone()).unwrap();
        if current.is_terminal() {
            return current;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("build {registration_id} did not reach a terminal state");
}
