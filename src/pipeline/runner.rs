use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;

/// Module manifest (`module.yaml`) expected at the repository root.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    pub module_name: String,
    #[serde(default)]
    pub module_version: Option<String>,
    pub service_language: String,
    #[serde(default)]
    pub dynamic_service: bool,
    #[serde(default)]
    pub function_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RepoCheckout {
    pub commit_hash: String,
    pub commit_message: String,
    pub manifest: ModuleManifest,
}

/// Seam between the pipeline state machine and the tools that actually
/// fetch, build, and test a module. Tests substitute a scripted
/// implementation; production uses git and docker subprocesses.
#[async_trait]
pub trait BuildRunner: Send + Sync {
    /// Clone the repository (optionally at a specific commit) into
    /// `workdir` and parse its manifest.
    async fn checkout(
        &self,
        git_url: &str,
        commit: Option<&str>,
        workdir: &Path,
    ) -> anyhow::Result<RepoCheckout>;

    /// Build and tag the module image from the checked-out tree.
    async fn build_image(&self, image: &str, workdir: &Path) -> anyhow::Result<()>;

    /// Run the module's test entrypoint in the built image.
    async fn run_tests(&self, image: &str, workdir: &Path) -> anyhow::Result<()>;
}

pub const MANIFEST_FILE: &str = "module.yaml";

pub fn parse_manifest(raw: &str) -> anyhow::Result<ModuleManifest> {
    serde_yaml::from_str(raw).context("invalid module.yaml")
}

/// Production runner shelling out to git and docker.
pub struct GitBuildRunner;

impl GitBuildRunner {
    async fn run_command(program: &str, args: &[&str], cwd: &Path) -> anyhow::Result<String> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .with_context(|| format!("failed to run {program}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{program} {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

#[async_trait]
impl BuildRunner for GitBuildRunner {
    async fn checkout(
        &self,
        git_url: &str,
        commit: Option<&str>,
        workdir: &Path,
    ) -> anyhow::Result<RepoCheckout> {
        Self::run_command("git", &["clone", git_url, "."], workdir).await?;
        if let Some(commit) = commit {
            Self::run_command("git", &["checkout", commit], workdir).await?;
        }

        let commit_hash = Self::run_command("git", &["log", "-1", "--format=%H"], workdir).await?;
        let commit_message =
            Self::run_command("git", &["log", "-1", "--format=%s"], workdir).await?;

        let manifest_path = workdir.join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&manifest_path)
            .await
            .with_context(|| format!("repository has no {MANIFEST_FILE}"))?;
        let manifest = parse_manifest(&raw)?;

        Ok(RepoCheckout {
            commit_hash,
            commit_message,
            manifest,
        })
    }

    async fn build_image(&self, image: &str, workdir: &Path) -> anyhow::Result<()> {
        Self::run_command("docker", &["build", "-t", image, "."], workdir).await?;
        Ok(())
    }

    async fn run_tests(&self, image: &str, workdir: &Path) -> anyhow::Result<()> {
        Self::run_command("docker", &["run", "--rm", image, "test"], workdir).await?;
        Ok(())
    }
}
