//! `cbt2git scan`: catalog every staged archive without building anything.
//!
//! Rows are stored in the catalog, optionally exported as JSON, and
//! summarised per archive on stdout.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

use crate::config::Config;
use crate::decode_log::LogSink;
use crate::models::CatalogRow;
use crate::progress::{BatchPhase, ProgressEvent, ProgressReporter};
use crate::scan::{self, ERROR, NO_CONTAINER, SUBCONTENT_XMIT};
use crate::{catalog, db, migrate, stage};

#[derive(Serialize)]
struct ExportData<'a> {
    scanned_at: String,
    archives: usize,
    rows: &'a [CatalogRow],
}

/// Per-archive totals for the summary table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub archive_id: String,
    pub datasets: usize,
    pub members: usize,
    pub nested: usize,
    pub errors: usize,
}

pub fn summarize(rows: &[CatalogRow]) -> Vec<ArchiveSummary> {
    let mut out: Vec<ArchiveSummary> = Vec::new();
    let mut datasets: Vec<BTreeSet<&str>> = Vec::new();
    for row in rows {
        if out.last().map(|s| s.archive_id.as_str()) != Some(row.archive_id.as_str()) {
            out.push(ArchiveSummary {
                archive_id: row.archive_id.clone(),
                datasets: 0,
                members: 0,
                nested: 0,
                errors: 0,
            });
            datasets.push(BTreeSet::new());
        }
        let (Some(summary), Some(seen)) = (out.last_mut(), datasets.last_mut()) else {
            continue;
        };
        if row.dataset_name == ERROR || row.dataset_name == NO_CONTAINER {
            summary.errors += 1;
            continue;
        }
        seen.insert(row.dataset_name.as_str());
        summary.datasets = seen.len();
        summary.members += 1;
        if row.subcontent == SUBCONTENT_XMIT {
            summary.nested += 1;
        }
    }
    out
}

pub async fn run_scan(
    config: &Config,
    only: Option<u32>,
    output: Option<&Path>,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;

    progress.report(ProgressEvent::Discovering {
        phase: BatchPhase::Scanning,
    });
    let staged = stage::list_staged(&config.paths.stage, &config.unpack.include_globs, only)?;
    let total = staged.len() as u64;

    let opts = config.unpack.options();
    let mut sink = LogSink::new();
    let mut rows = Vec::new();
    for (i, archive) in staged.iter().enumerate() {
        progress.report(ProgressEvent::Advancing {
            phase: BatchPhase::Scanning,
            archive: archive.archive_id.clone(),
            n: i as u64 + 1,
            total,
        });
        let bytes = archive.read()?;
        let mut log = sink.archive(&archive.archive_id);
        rows.extend(scan::scan_archive(
            &archive.archive_id,
            &bytes,
            &opts,
            &mut log,
        ));
    }

    let stored = catalog::replace_scan_rows(&pool, &rows).await?;

    if let Some(path) = output {
        let export = ExportData {
            scanned_at: chrono::Utc::now().to_rfc3339(),
            archives: staged.len(),
            rows: &rows,
        };
        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write scan export: {}", path.display()))?;
    }

    println!(
        "{:<10} {:>8} {:>8} {:>6} {:>6}",
        "archive", "datasets", "members", "xmit", "errors"
    );
    for s in summarize(&rows) {
        println!(
            "{:<10} {:>8} {:>8} {:>6} {:>6}",
            s.archive_id, s.datasets, s.members, s.nested, s.errors
        );
    }
    println!("scan");
    println!("  archives: {}", staged.len());
    println!("  rows stored: {}", stored);
    if let Some(path) = output {
        println!("  exported: {}", path.display());
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(archive: &str, dataset: &str, member: &str, sub: &str) -> CatalogRow {
        CatalogRow {
            archive_id: archive.to_string(),
            dataset_name: dataset.to_string(),
            member_name: member.to_string(),
            extension: String::new(),
            media_type: "text/plain".to_string(),
            subcontent: sub.to_string(),
        }
    }

    #[test]
    fn summary_counts_per_archive() {
        let rows = vec![
            row("CBT001", "FILE001.PDS", "A", "noXMIT"),
            row("CBT001", "FILE001.PDS", "INNER", "XMIT"),
            row("CBT001", "INNER.PDS", "B", "n.a."),
            row("CBT001", ERROR, "BROKEN", ERROR),
            row("CBT002", NO_CONTAINER, ERROR, ERROR),
        ];
        assert_eq!(
            summarize(&rows),
            vec![
                ArchiveSummary {
                    archive_id: "CBT001".to_string(),
                    datasets: 2,
                    members: 3,
                    nested: 1,
                    errors: 1,
                },
                ArchiveSummary {
                    archive_id: "CBT002".to_string(),
                    datasets: 0,
                    members: 0,
                    nested: 0,
                    errors: 1,
                },
            ]
        );
    }
}
