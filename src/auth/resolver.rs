use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Maps a bearer token to a username. `Ok(None)` means the token is not
/// recognized; `Err` means the lookup itself failed.
#[async_trait]
pub trait TokenResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<String>>;
}

/// Fixed token table, used in tests and single-node deployments.
pub struct StaticTokenResolver {
    tokens: HashMap<String, String>,
}

impl StaticTokenResolver {
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: pairs.into_iter().collect(),
        }
    }
}

#[async_trait]
impl TokenResolver for StaticTokenResolver {
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<String>> {
        Ok(self.tokens.get(token).cloned())
    }
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct ValidateResponse {
    user: String,
}

/// Validates tokens against an external auth service.
pub struct RemoteTokenResolver {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteTokenResolver {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TokenResolver for RemoteTokenResolver {
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<String>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ValidateRequest { token })
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let body: ValidateResponse = response.json().await?;
        Ok(Some(body.user))
    }
}

/// Tries each resolver in order, returning the first hit. Lets locally
/// configured tokens coexist with a remote auth service.
pub struct ChainedResolver {
    resolvers: Vec<Box<dyn TokenResolver>>,
}

impl ChainedResolver {
    pub fn new(resolvers: Vec<Box<dyn TokenResolver>>) -> Self {
        Self { resolvers }
    }
}

#[async_trait]
impl TokenResolver for ChainedResolver {
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<String>> {
        for resolver in &self.resolvers {
            if let Some(user) = resolver.resolve(token).await? {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }
}

/// Builds the resolver stack from configuration: static dev tokens first,
/// then the remote auth service if one is configured.
pub fn from_config(config: &Config) -> ChainedResolver {
    let mut resolvers: Vec<Box<dyn TokenResolver>> = Vec::new();
    if !config.dev_tokens.is_empty() {
        resolvers.push(Box::new(StaticTokenResolver::new(
            config.dev_tokens.iter().cloned(),
        )));
    }
    if let Some(url) = &config.auth_url {
        resolvers.push(Box::new(RemoteTokenResolver::new(url.clone())));
    }
    ChainedResolver::new(resolvers)
}
