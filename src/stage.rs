//! The stage directory and its converted twin.
//!
//! `fetch` drops archives into the stage. Before converting, each staged
//! archive is compared with its copy under `cbtfiles`; only new or changed
//! archives are copied over and handed on for conversion.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::toc;

/// One archive file found in the stage.
#[derive(Debug, Clone)]
pub struct StagedArchive {
    pub archive_id: String,
    pub path: PathBuf,
}

impl StagedArchive {
    pub fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path)
            .with_context(|| format!("Failed to read staged archive: {}", self.path.display()))
    }
}

/// An archive that needs converting.
#[derive(Debug, Clone)]
pub struct PendingArchive {
    pub archive_id: String,
    /// Copy under `cbtfiles`.
    pub path: PathBuf,
    pub content_hash: String,
}

#[derive(Debug, Default)]
pub struct StageSync {
    pub staged: usize,
    pub unchanged: usize,
    pub pending: Vec<PendingArchive>,
}

/// Archives in `stage` whose names match `include_globs` and look like
/// `CBTnnn.zip`, optionally only archive `only`, in archive order.
pub fn list_staged(
    stage: &Path,
    include_globs: &[String],
    only: Option<u32>,
) -> Result<Vec<StagedArchive>> {
    if !stage.exists() {
        anyhow::bail!("Stage directory does not exist: {}", stage.display());
    }
    let include_set = build_globset(include_globs)?;

    let mut archives = Vec::new();
    for entry in WalkDir::new(stage).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_set.is_match(&name) {
            continue;
        }
        let Some(cbtnum) = name
            .strip_suffix(".zip")
            .and_then(toc::parse_archive_id)
        else {
            tracing::debug!(file = %name, "not an archive name, skipped");
            continue;
        };
        if only.is_some_and(|n| n != cbtnum) {
            continue;
        }
        archives.push((
            cbtnum,
            StagedArchive {
                archive_id: toc::archive_id(cbtnum),
                path: entry.path().to_path_buf(),
            },
        ));
    }

    archives.sort_by_key(|(n, _)| *n);
    Ok(archives.into_iter().map(|(_, a)| a).collect())
}

/// Copy new or changed staged archives into `cbtfiles`.
///
/// With `force` every staged archive is pending, changed or not.
pub fn sync_stage(
    stage: &Path,
    cbtfiles: &Path,
    include_globs: &[String],
    only: Option<u32>,
    force: bool,
) -> Result<StageSync> {
    std::fs::create_dir_all(cbtfiles)
        .with_context(|| format!("Failed to create directory: {}", cbtfiles.display()))?;

    let staged = list_staged(stage, include_globs, only)?;
    let mut sync = StageSync {
        staged: staged.len(),
        ..StageSync::default()
    };

    for archive in staged {
        let bytes = archive.read()?;
        let staged_hash = content_hash(&bytes);
        let copy = cbtfiles.join(format!("{}.zip", archive.archive_id));
        let copy_hash = match std::fs::read(&copy) {
            Ok(existing) => Some(content_hash(&existing)),
            Err(_) => None,
        };

        if copy_hash.as_deref() == Some(staged_hash.as_str()) && !force {
            sync.unchanged += 1;
            continue;
        }
        if copy_hash.as_deref() != Some(staged_hash.as_str()) {
            std::fs::write(&copy, &bytes)
                .with_context(|| format!("Failed to copy archive to {}", copy.display()))?;
        }
        sync.pending.push(PendingArchive {
            archive_id: archive.archive_id,
            path: copy,
            content_hash: staged_hash,
        });
    }

    Ok(sync)
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Bad glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globs() -> Vec<String> {
        vec!["CBT*.zip".to_string()]
    }

    #[test]
    fn lists_only_archive_names() {
        let stage = tempfile::tempdir().unwrap();
        for name in ["CBT010.zip", "CBT002.zip", "CBTX.zip", "notes.txt"] {
            std::fs::write(stage.path().join(name), b"zip").unwrap();
        }
        let ids: Vec<String> = list_staged(stage.path(), &globs(), None)
            .unwrap()
            .into_iter()
            .map(|a| a.archive_id)
            .collect();
        assert_eq!(ids, vec!["CBT002", "CBT010"]);

        let only = list_staged(stage.path(), &globs(), Some(10)).unwrap();
        assert_eq!(only.len(), 1);
    }

    #[test]
    fn copies_only_changed_archives() {
        let stage = tempfile::tempdir().unwrap();
        let cbtfiles = tempfile::tempdir().unwrap();
        std::fs::write(stage.path().join("CBT001.zip"), b"one").unwrap();
        std::fs::write(stage.path().join("CBT002.zip"), b"two").unwrap();
        std::fs::write(cbtfiles.path().join("CBT002.zip"), b"two").unwrap();

        let sync = sync_stage(stage.path(), cbtfiles.path(), &globs(), None, false).unwrap();
        assert_eq!(sync.staged, 2);
        assert_eq!(sync.unchanged, 1);
        assert_eq!(sync.pending.len(), 1);
        assert_eq!(sync.pending[0].archive_id, "CBT001");
        assert_eq!(sync.pending[0].content_hash, content_hash(b"one"));
        assert_eq!(std::fs::read(cbtfiles.path().join("CBT001.zip")).unwrap(), b"one");

        let again = sync_stage(stage.path(), cbtfiles.path(), &globs(), None, false).unwrap();
        assert!(again.pending.is_empty());
        let forced = sync_stage(stage.path(), cbtfiles.path(), &globs(), None, true).unwrap();
        assert_eq!(forced.pending.len(), 2);
    }
}
