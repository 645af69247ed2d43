use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::unpack::{UnpackOptions, DEFAULT_MAX_DEPTH};

/// Upper bound on concurrent downloads from the mirror.
pub const MAX_WORKERS: usize = 15;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub unpack: UnpackConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub forge: Option<ForgeConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Where downloaded archives land.
    #[serde(default = "default_stage")]
    pub stage: PathBuf,
    /// Copies of the archives that were last converted.
    #[serde(default = "default_cbtfiles")]
    pub cbtfiles: PathBuf,
    /// One repository directory per archive.
    #[serde(default = "default_repos")]
    pub repos: PathBuf,
    #[serde(default = "default_batch_log")]
    pub batch_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            stage: default_stage(),
            cbtfiles: default_cbtfiles(),
            repos: default_repos(),
            batch_log: default_batch_log(),
        }
    }
}

fn default_stage() -> PathBuf {
    PathBuf::from("./stage")
}
fn default_cbtfiles() -> PathBuf {
    PathBuf::from("./cbtfiles")
}
fn default_repos() -> PathBuf {
    PathBuf::from("./repos")
}
fn default_batch_log() -> PathBuf {
    PathBuf::from("./cbt2git.log")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/cbt2git.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct UnpackConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            include_globs: default_include_globs(),
        }
    }
}

impl UnpackConfig {
    /// Options for converting an archive into a repository.
    pub fn options(&self) -> UnpackOptions {
        UnpackOptions {
            max_depth: self.max_depth,
            require_partitioned: true,
        }
    }
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}
fn default_include_globs() -> Vec<String> {
    vec!["CBT*.zip".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the table of contents, relative to `base_url`.
    #[serde(default = "default_listing")]
    pub listing: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            listing: default_listing(),
            workers: default_workers(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.cbttape.org/ftp/".to_string()
}
fn default_listing() -> String {
    "updates/UPDATESTOC.txt".to_string()
}
fn default_workers() -> usize {
    MAX_WORKERS
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            branch: default_branch(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Org,
    User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForgeConfig {
    /// Organization or user that owns the repositories.
    pub owner: String,
    #[serde(default = "default_owner_kind")]
    pub owner_kind: OwnerKind,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_true")]
    pub private: bool,
}

fn default_owner_kind() -> OwnerKind {
    OwnerKind::Org
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Config {
    /// Defaults only; enough for commands that touch a single archive.
    pub fn minimal() -> Self {
        Self {
            paths: PathsConfig::default(),
            db: DbConfig::default(),
            unpack: UnpackConfig::default(),
            remote: RemoteConfig::default(),
            git: GitConfig::default(),
            forge: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.unpack.max_depth < 1 {
        anyhow::bail!("unpack.max_depth must be >= 1");
    }

    if config.unpack.include_globs.is_empty() {
        anyhow::bail!("unpack.include_globs must name at least one pattern");
    }

    if !(1..=MAX_WORKERS).contains(&config.remote.workers) {
        anyhow::bail!("remote.workers must be in [1, {}]", MAX_WORKERS);
    }

    if !config.remote.base_url.ends_with('/') {
        anyhow::bail!("remote.base_url must end with '/'");
    }

    if config.git.branch.trim().is_empty() {
        anyhow::bail!("git.branch must not be empty");
    }

    if let Some(forge) = &config.forge {
        if forge.owner.trim().is_empty() {
            anyhow::bail!("forge.owner must not be empty");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_gets_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.unpack.max_depth, 4);
        assert_eq!(config.unpack.include_globs, vec!["CBT*.zip"]);
        assert_eq!(config.remote.workers, 15);
        assert_eq!(config.git.branch, "main");
        assert!(config.forge.is_none());
    }

    #[test]
    fn forge_section_parses() {
        let file = write_config(
            r#"
[forge]
owner = "cbttape"
owner_kind = "user"
private = false
"#,
        );
        let forge = load_config(file.path()).unwrap().forge.unwrap();
        assert_eq!(forge.owner, "cbttape");
        assert_eq!(forge.owner_kind, OwnerKind::User);
        assert_eq!(forge.token_env, "GITHUB_TOKEN");
        assert!(!forge.private);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let file = write_config("[unpack]\nmax_depth = 0\n");
        assert!(load_config(file.path()).is_err());
        let file = write_config("[remote]\nworkers = 16\n");
        assert!(load_config(file.path()).is_err());
    }
}
