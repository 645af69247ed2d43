//! Version control for built archive trees.
//!
//! Local operations shell out to the `git` executable. Hosted repositories
//! are created through a [`Forge`]; [`GithubForge`] speaks the GitHub REST
//! API.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Output};
use std::time::Duration;

use crate::config::{ForgeConfig, OwnerKind};

const FALLBACK_NAME: &str = "CBT2GIT";
const FALLBACK_EMAIL: &str = "cbt2git@localhost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// First commit of a new repository.
    Initial,
    Committed,
    NothingToCommit,
}

pub fn is_repository(dir: &Path) -> bool {
    dir.join(".git").exists()
}

/// Stage everything under `dir` and commit it on `branch`, initialising
/// the repository first when needed.
pub fn commit(dir: &Path, message: &str, branch: &str) -> Result<CommitOutcome> {
    let fresh = !is_repository(dir);
    if fresh {
        run_git(dir, &["init", "--quiet"])?;
        run_git(
            dir,
            &["symbolic-ref", "HEAD", &format!("refs/heads/{}", branch)],
        )?;
    }

    run_git(dir, &["add", "--all", "."])?;
    let status = run_git(dir, &["status", "--porcelain"])?;
    if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
        return Ok(CommitOutcome::NothingToCommit);
    }

    let mut args: Vec<String> = Vec::new();
    if !has_identity(dir) {
        args.extend([
            "-c".to_string(),
            format!("user.name={}", FALLBACK_NAME),
            "-c".to_string(),
            format!("user.email={}", FALLBACK_EMAIL),
        ]);
    }
    args.extend(["commit", "--quiet", "-m", message].map(String::from));
    let refs: Vec<&str> = args.iter().map(String::as_str).collect();
    run_git(dir, &refs)?;

    Ok(if fresh {
        CommitOutcome::Initial
    } else {
        CommitOutcome::Committed
    })
}

/// A hosted repository.
#[derive(Debug, Clone)]
pub struct RemoteRepo {
    pub push_url: String,
    pub created: bool,
}

#[async_trait]
pub trait Forge: Send + Sync {
    /// Look up repository `name`, creating it when it does not exist.
    async fn ensure_repo(&self, name: &str, description: &str) -> Result<RemoteRepo>;
}

/// Make sure `dir` has an `origin` on the forge and push `branch` to it.
pub async fn ensure_pushed(
    dir: &Path,
    remote_name: &str,
    forge: &dyn Forge,
    description: &str,
    branch: &str,
) -> Result<RemoteRepo> {
    let repo = forge.ensure_repo(remote_name, description).await?;
    if git(dir, &["remote", "get-url", "origin"])?.status.success() {
        run_git(dir, &["remote", "set-url", "origin", &repo.push_url])?;
    } else {
        run_git(dir, &["remote", "add", "origin", &repo.push_url])?;
    }
    run_git(dir, &["push", "--quiet", "-u", "origin", branch])?;
    Ok(repo)
}

fn has_identity(dir: &Path) -> bool {
    ["user.name", "user.email"].into_iter().all(|key| {
        git(dir, &["config", "--get", key])
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}

fn git(dir: &Path, args: &[&str]) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))
}

fn run_git(dir: &Path, args: &[&str]) -> Result<Output> {
    let output = git(dir, args)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {} failed: {}", args[0], stderr.trim());
    }
    Ok(output)
}

/// GitHub, or a GitHub Enterprise instance at `api_url`.
pub struct GithubForge {
    client: reqwest::Client,
    api_url: String,
    owner: String,
    owner_kind: OwnerKind,
    private: bool,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    ssh_url: Option<String>,
    clone_url: Option<String>,
}

impl RepoResponse {
    fn push_url(self) -> Result<String> {
        self.ssh_url
            .or(self.clone_url)
            .ok_or_else(|| anyhow::anyhow!("Forge response carries no repository URL"))
    }
}

impl GithubForge {
    pub fn from_config(forge: &ForgeConfig) -> Result<Self> {
        let token = std::env::var(&forge.token_env)
            .with_context(|| format!("Forge token not set: ${}", forge.token_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("cbt2git/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: forge.api_url.trim_end_matches('/').to_string(),
            owner: forge.owner.clone(),
            owner_kind: forge.owner_kind,
            private: forge.private,
            token,
        })
    }

    fn create_url(&self) -> String {
        match self.owner_kind {
            OwnerKind::Org => format!("{}/orgs/{}/repos", self.api_url, self.owner),
            OwnerKind::User => format!("{}/user/repos", self.api_url),
        }
    }
}

#[async_trait]
impl Forge for GithubForge {
    async fn ensure_repo(&self, name: &str, description: &str) -> Result<RemoteRepo> {
        let lookup = format!("{}/repos/{}/{}", self.api_url, self.owner, name);
        let resp = self
            .client
            .get(&lookup)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .with_context(|| format!("Failed to query {}", lookup))?;

        if resp.status().is_success() {
            let repo: RepoResponse = resp.json().await?;
            return Ok(RemoteRepo {
                push_url: repo.push_url()?,
                created: false,
            });
        }
        if resp.status() != reqwest::StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Forge lookup failed ({}): {}", status, body);
        }

        let body = serde_json::json!({
            "name": name,
            "description": description,
            "private": self.private,
        });
        let resp = self
            .client
            .post(self.create_url())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .context("Failed to create repository")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Forge refused to create {} ({}): {}", name, status, body);
        }
        let repo: RepoResponse = resp.json().await?;
        tracing::info!(repo = name, owner = %self.owner, "created hosted repository");
        Ok(RemoteRepo {
            push_url: repo.push_url()?,
            created: true,
        })
    }
}
