//! Batch conversion: staged archives into version-controlled trees.
//!
//! Drives the whole flow for every new or changed archive: stage sync,
//! unpack, build, archive log, commit, push and catalog bookkeeping. A
//! failing archive is logged and counted; it never stops the batch.

use anyhow::{Context, Result};
use chrono::Local;
use sqlx::SqlitePool;
use std::path::Path;

use crate::config::Config;
use crate::decode_log::{ArchiveLog, LogSink};
use crate::git::{self, CommitOutcome, Forge, GithubForge};
use crate::layout::{self, BuildOptions, OutputTree, LOG_FILE};
use crate::progress::{BatchPhase, ProgressEvent, ProgressReporter};
use crate::unpack::{unpack_archive, UnpackOptions};
use crate::stage::PendingArchive;
use crate::{catalog, db, migrate, stage, toc};

const UPDATE_MESSAGE: &str = "Updates from cbttape.org";

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Only this archive number.
    pub only: Option<u32>,
    /// Convert even when the staged copy is unchanged.
    pub force: bool,
    pub no_commit: bool,
    pub no_push: bool,
}

/// Unpack one distribution zip and lay it out under `dest_root/<archive_id>`,
/// appending the archive's decode log to its `cbt2git.log`.
pub fn convert_archive(
    zip_bytes: &[u8],
    archive_id: &str,
    dest_root: &Path,
    unpack_opts: &UnpackOptions,
    log: &mut ArchiveLog<'_>,
) -> crate::error::Result<OutputTree> {
    let result = unpack_archive(zip_bytes, unpack_opts, log)?;
    let opts = BuildOptions {
        archive_id: archive_id.to_string(),
        stamp: Local::now().naive_local(),
    };
    let tree = layout::build(&result, dest_root, &opts, log)?;
    log.append_to_file(&tree.root.join(LOG_FILE))?;
    Ok(tree)
}

pub fn commit_message(archive_id: &str, new_repository: bool) -> String {
    if new_repository {
        format!("{} : Initial commit", archive_id)
    } else {
        UPDATE_MESSAGE.to_string()
    }
}

pub async fn run_convert(
    config: &Config,
    opts: &ConvertOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    progress.report(ProgressEvent::Discovering {
        phase: BatchPhase::Converting,
    });
    let sync = stage::sync_stage(
        &config.paths.stage,
        &config.paths.cbtfiles,
        &config.unpack.include_globs,
        opts.only,
        opts.force,
    )?;

    let commit_enabled = config.git.enabled && !opts.no_commit;
    let forge: Option<Box<dyn Forge>> = match (&config.forge, commit_enabled && !opts.no_push) {
        (Some(forge), true) => Some(Box::new(GithubForge::from_config(forge)?)),
        _ => None,
    };

    std::fs::create_dir_all(&config.paths.repos).with_context(|| {
        format!(
            "Failed to create repository root: {}",
            config.paths.repos.display()
        )
    })?;

    let mut sink = LogSink::new();
    let batch = Batch {
        config,
        pool: &pool,
        unpack_opts: config.unpack.options(),
        commit_enabled,
        forge: forge.as_deref(),
    };
    let tally = batch.run(&sync.pending, &mut sink, progress).await;

    if !sink.is_empty() {
        sink.write_consolidated(&config.paths.batch_log)
            .with_context(|| {
                format!(
                    "Failed to write batch log: {}",
                    config.paths.batch_log.display()
                )
            })?;
    }

    println!("convert");
    println!("  archives staged: {}", sync.staged);
    println!("  unchanged: {}", sync.unchanged);
    println!("  converted: {}", tally.converted);
    println!("  skipped: {}", tally.skipped);
    if commit_enabled {
        println!("  committed: {}", tally.committed);
    }
    if forge.is_some() {
        println!("  pushed: {}", tally.pushed);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct BatchTally {
    converted: u64,
    skipped: u64,
    committed: u64,
    pushed: u64,
}

/// Everything a batch needs besides the archives themselves.
struct Batch<'a> {
    config: &'a Config,
    pool: &'a SqlitePool,
    unpack_opts: UnpackOptions,
    commit_enabled: bool,
    forge: Option<&'a dyn Forge>,
}

impl Batch<'_> {
    async fn run(
        &self,
        pending: &[PendingArchive],
        sink: &mut LogSink,
        progress: &dyn ProgressReporter,
    ) -> BatchTally {
        let mut tally = BatchTally::default();
        let total = pending.len() as u64;
        for (i, archive) in pending.iter().enumerate() {
            let id = archive.archive_id.as_str();
            progress.report(ProgressEvent::Advancing {
                phase: BatchPhase::Converting,
                archive: id.to_string(),
                n: i as u64 + 1,
                total,
            });
            let mut log = sink.archive(id);
            match self.convert_one(archive, &mut log, &mut tally).await {
                Ok(()) => tally.converted += 1,
                Err(e) => {
                    log.warn(format!("Skipped {}: {:#}", id, e));
                    tally.skipped += 1;
                }
            }
        }
        tally
    }

    async fn convert_one(
        &self,
        archive: &PendingArchive,
        log: &mut ArchiveLog<'_>,
        tally: &mut BatchTally,
    ) -> Result<()> {
        let id = archive.archive_id.as_str();
        let repos = &self.config.paths.repos;
        let bytes = std::fs::read(&archive.path)
            .with_context(|| format!("Failed to read {}", archive.path.display()))?;
        let new_repository = !git::is_repository(&repos.join(id));

        let tree = convert_archive(&bytes, id, repos, &self.unpack_opts, log)?;
        tracing::info!(
            archive = id,
            datasets = tree.datasets.len(),
            files = tree.files.len(),
            "converted"
        );

        if self.commit_enabled {
            let message = commit_message(id, new_repository);
            match git::commit(&tree.root, &message, &self.config.git.branch)
                .context("Commit failed")?
            {
                CommitOutcome::NothingToCommit => tracing::info!(archive = id, "nothing to commit"),
                _ => tally.committed += 1,
            }
        }

        if let Some(forge) = self.forge {
            let description = self.description(id, log).await;
            match git::ensure_pushed(&tree.root, id, forge, &description, &self.config.git.branch)
                .await
            {
                Ok(_) => tally.pushed += 1,
                Err(e) => log.warn(format!("Push failed: {:#}", e)),
            }
        }

        catalog::record_conversion(self.pool, id, &archive.content_hash)
            .await
            .context("Failed to record conversion")?;
        Ok(())
    }

    /// Repository description: the catalog comment, else the archive id.
    async fn description(&self, id: &str, log: &mut ArchiveLog<'_>) -> String {
        let listed = match toc::parse_archive_id(id) {
            Some(n) => catalog::get_archive(self.pool, n).await.unwrap_or_else(|e| {
                log.warn(format!("Catalog lookup failed: {:#}", e));
                None
            }),
            None => None,
        };
        listed
            .map(|r| r.entry.comment)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| id.to_string())
    }
}

/// Convert a single archive file without catalog or version control.
pub fn run_unpack(
    config: &Config,
    archive: &Path,
    into: &Path,
    archive_id: Option<&str>,
) -> Result<()> {
    let bytes = std::fs::read(archive)
        .with_context(|| format!("Failed to read archive: {}", archive.display()))?;
    let id = match archive_id {
        Some(id) => id.to_string(),
        None => archive
            .file_stem()
            .map(|s| s.to_string_lossy().to_uppercase())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive an archive id from {}", archive.display()))?,
    };

    let mut sink = LogSink::new();
    let mut log = sink.archive(&id);
    let tree = convert_archive(&bytes, &id, into, &config.unpack.options(), &mut log)
        .with_context(|| format!("Failed to convert {}", archive.display()))?;

    println!("unpack {}", id);
    println!("  root: {}", tree.root.display());
    for dataset in &tree.datasets {
        println!("  dataset: {}", dataset.ledger_line());
    }
    println!("  files written: {}", tree.files.len());
    if let Some(member) = &tree.readme_member {
        println!("  readme from: {}", member);
    }
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    #[test]
    fn commit_messages() {
        assert_eq!(commit_message("CBT001", true), "CBT001 : Initial commit");
        assert_eq!(commit_message("CBT001", false), "Updates from cbttape.org");
    }

    #[tokio::test]
    async fn failing_archives_do_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::minimal();
        config.paths.repos = dir.path().join("repos");
        config.git.enabled = false;
        let pool = db::connect_at(&dir.path().join("catalog.sqlite"))
            .await
            .unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        std::fs::write(dir.path().join("CBT002.zip"), b"garbage").unwrap();

        let pending = vec![
            PendingArchive {
                archive_id: "CBT001".to_string(),
                path: dir.path().join("gone/CBT001.zip"),
                content_hash: "0".to_string(),
            },
            PendingArchive {
                archive_id: "CBT002".to_string(),
                path: dir.path().join("CBT002.zip"),
                content_hash: "1".to_string(),
            },
        ];
        let batch = Batch {
            config: &config,
            pool: &pool,
            unpack_opts: config.unpack.options(),
            commit_enabled: false,
            forge: None,
        };
        let mut sink = LogSink::new();
        let tally = batch.run(&pending, &mut sink, &NoProgress).await;

        assert_eq!(
            tally,
            BatchTally {
                skipped: 2,
                ..BatchTally::default()
            }
        );
        let messages: Vec<&str> = sink.entries().iter().map(|e| e.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.starts_with("Skipped CBT001: Failed to read")));
        assert!(messages.iter().any(|m| m.starts_with("Skipped CBT002: unsupported container")));
        assert!(catalog::list_archives(&pool).await.unwrap().is_empty());
    }
}
