//! Keeping the local stage in step with the remote mirror.
//!
//! The remote side is behind [`RemoteStore`] so batch logic can be tested
//! without a network. [`HttpMirror`] talks to the cbttape.org web mirror.
//! Downloads run on a bounded pool of tokio tasks; a file is fetched when
//! its remote size differs from the staged copy, or always with `force`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{Config, RemoteConfig};
use crate::progress::{BatchPhase, ProgressEvent, ProgressReporter};
use crate::toc::{parse_toc, TocEntry};
use crate::{catalog, db, migrate};

/// Bytes of one remote object.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub bytes: Vec<u8>,
    pub size: u64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Text of the table of contents.
    async fn listing(&self) -> Result<String>;

    /// Size of a remote object, `None` when it does not exist.
    async fn size(&self, path: &str) -> Result<Option<u64>>;

    async fn fetch(&self, path: &str) -> Result<RemoteObject>;
}

/// HTTP(S) mirror rooted at `base_url`.
pub struct HttpMirror {
    client: reqwest::Client,
    base_url: String,
    listing: String,
}

impl HttpMirror {
    pub fn new(remote: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cbt2git/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: remote.base_url.clone(),
            listing: remote.listing.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteStore for HttpMirror {
    async fn listing(&self) -> Result<String> {
        let url = self.url(&self.listing);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to get {}", url))?;
        if !resp.status().is_success() {
            bail!("Listing request failed (HTTP {}) for {}", resp.status(), url);
        }
        Ok(resp.text().await?)
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        let url = self.url(path);
        let resp = self
            .client
            .head(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query {}", url))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("Size request failed (HTTP {}) for {}", resp.status(), url);
        }
        Ok(resp.content_length())
    }

    async fn fetch(&self, path: &str) -> Result<RemoteObject> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to get {}", url))?;
        if !resp.status().is_success() {
            bail!("Download failed (HTTP {}) for {}", resp.status(), url);
        }
        let bytes = resp.bytes().await?.to_vec();
        Ok(RemoteObject {
            size: bytes.len() as u64,
            bytes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Download regardless of size.
    pub force: bool,
    /// Only entries flagged as updated.
    pub updates_only: bool,
    pub workers: usize,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub checked: usize,
    pub downloaded: usize,
    pub up_to_date: usize,
    /// Listed in the table of contents but absent remotely.
    pub missing: Vec<String>,
    /// `(path, error)` of downloads that failed.
    pub failed: Vec<(String, String)>,
}

/// Bring `stage` up to date with the entries of a table of contents.
///
/// Updated entries are processed first; the rest follow unless
/// `updates_only` is set.
pub async fn refresh_stage(
    store: Arc<dyn RemoteStore>,
    entries: &[TocEntry],
    stage: &Path,
    opts: &FetchOptions,
    progress: &dyn ProgressReporter,
) -> Result<FetchReport> {
    std::fs::create_dir_all(stage)
        .with_context(|| format!("Failed to create stage directory: {}", stage.display()))?;

    let mut queue: Vec<&TocEntry> = entries.iter().filter(|e| e.updated).collect();
    if !opts.updates_only {
        queue.extend(entries.iter().filter(|e| !e.updated));
    }

    let mut report = FetchReport::default();
    let permits = Arc::new(Semaphore::new(opts.workers.max(1)));
    let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();
    let total = queue.len() as u64;

    progress.report(ProgressEvent::Discovering {
        phase: BatchPhase::Fetching,
    });

    for (i, entry) in queue.into_iter().enumerate() {
        report.checked += 1;
        progress.report(ProgressEvent::Advancing {
            phase: BatchPhase::Fetching,
            archive: entry.archive_id(),
            n: i as u64 + 1,
            total,
        });

        let remote_size = match store.size(&entry.path).await {
            Ok(Some(size)) => size,
            Ok(None) => {
                report.missing.push(entry.path.clone());
                continue;
            }
            Err(e) => {
                report.failed.push((entry.path.clone(), e.to_string()));
                continue;
            }
        };
        let target = stage.join(entry.file_name());
        let local_size = std::fs::metadata(&target).map(|m| m.len()).ok();
        if !opts.force && local_size == Some(remote_size) {
            report.up_to_date += 1;
            continue;
        }

        let permit = permits.clone().acquire_owned().await?;
        let store = store.clone();
        let path = entry.path.clone();
        tasks.spawn(async move {
            let outcome = download(store.as_ref(), &path, target).await;
            drop(permit);
            (path, outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        let (path, outcome) = joined.context("Download task panicked")?;
        match outcome {
            Ok(()) => report.downloaded += 1,
            Err(e) => {
                tracing::warn!(path = %path, "download failed: {:#}", e);
                report.failed.push((path, format!("{:#}", e)));
            }
        }
    }

    Ok(report)
}

/// `cbt2git fetch`: read the remote table of contents, record it in the
/// catalog and refresh the stage.
pub async fn run_fetch(
    config: &Config,
    opts: &FetchOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    let store: Arc<dyn RemoteStore> = Arc::new(HttpMirror::new(&config.remote)?);
    let listing = store.listing().await?;
    let toc = parse_toc(&listing);
    if toc.entries.is_empty() {
        bail!("Table of contents at {} lists no archives", config.remote.listing);
    }
    let listed = catalog::upsert_toc(&pool, &toc.entries).await?;

    let report = refresh_stage(store, &toc.entries, &config.paths.stage, opts, progress).await?;

    println!("fetch {}", config.remote.base_url);
    println!("  listed: {} ({} updated)", listed, toc.updated().count());
    println!("  checked: {}", report.checked);
    println!("  downloaded: {}", report.downloaded);
    println!("  up to date: {}", report.up_to_date);
    for path in &report.missing {
        println!("  missing: {}", path);
    }
    for (path, reason) in &report.failed {
        println!("  failed: {} ({})", path, reason);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

async fn download(store: &dyn RemoteStore, path: &str, target: PathBuf) -> Result<()> {
    let object = store.fetch(path).await?;
    tokio::fs::write(&target, &object.bytes)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;
    tracing::debug!(path, size = object.size, "downloaded");
    Ok(())
}
