//! Catalog scanner: one row per (archive, dataset, member).
//!
//! Decode failures become sentinel rows rather than errors, so a scan over
//! the whole tape always yields a complete picture.

use crate::classify::{classify, Policy};
use crate::decode_log::{ArchiveLog, LogSink};
use crate::error::Error;
use crate::models::{CatalogRow, DecodeResult, NestedOutcome, Organization};
use crate::unpack::{unpack_archive, UnpackOptions};

pub const ERROR: &str = "ERROR";
pub const NO_CONTAINER: &str = "NO CONTAINER";
pub const NOT_APPLICABLE: &str = "n.a.";
pub const SUBCONTENT_XMIT: &str = "XMIT";
pub const SUBCONTENT_NONE: &str = "noXMIT";

/// Scan every `(archive id, zip bytes)` pair.
pub fn scan<'a, I>(archives: I, opts: &UnpackOptions, sink: &mut LogSink) -> Vec<CatalogRow>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut rows = Vec::new();
    for (archive_id, bytes) in archives {
        let mut log = sink.archive(archive_id);
        rows.extend(scan_archive(archive_id, bytes, opts, &mut log));
    }
    rows
}

pub fn scan_archive(
    archive_id: &str,
    zip_bytes: &[u8],
    opts: &UnpackOptions,
    log: &mut ArchiveLog<'_>,
) -> Vec<CatalogRow> {
    let opts = UnpackOptions {
        require_partitioned: false,
        ..opts.clone()
    };
    match unpack_archive(zip_bytes, &opts, log) {
        Ok(result) => {
            let mut rows = Vec::new();
            collect_rows(archive_id, &result, true, &mut rows);
            rows
        }
        Err(e) => {
            log.warn(format!("Scan failed: {}", e));
            let contains = match e {
                Error::MalformedContainer(_) | Error::UnsupportedContainer(_) => NO_CONTAINER,
                _ => ERROR,
            };
            vec![row(archive_id, contains, ERROR, ERROR, ERROR, ERROR)]
        }
    }
}

fn collect_rows(archive_id: &str, result: &DecodeResult, top: bool, rows: &mut Vec<CatalogRow>) {
    let dataset = result.descriptor.dataset_name.as_str();
    if result.descriptor.organization == Organization::Sequential {
        rows.push(sequential_row(archive_id, dataset));
        return;
    }
    for member in &result.members {
        let nested = classify(&member.media_type) == Policy::NestedContainer;
        let subcontent = match (top, nested) {
            (true, true) => SUBCONTENT_XMIT,
            (true, false) => SUBCONTENT_NONE,
            (false, _) => NOT_APPLICABLE,
        };
        rows.push(row(
            archive_id,
            dataset,
            &member.name,
            &member.extension,
            &member.media_type,
            subcontent,
        ));
        if !nested {
            continue;
        }
        match result.nested_for(&member.name).map(|n| &n.outcome) {
            Some(NestedOutcome::Partitioned { result, .. })
            | Some(NestedOutcome::Promoted { result, .. }) => {
                collect_rows(archive_id, result, false, rows)
            }
            Some(NestedOutcome::Undefined { descriptor }) => {
                rows.push(sequential_row(archive_id, &descriptor.dataset_name))
            }
            Some(NestedOutcome::Failed { .. }) | None => {
                rows.push(row(archive_id, ERROR, &member.name, ERROR, ERROR, ERROR))
            }
        }
    }
}

fn sequential_row(archive_id: &str, dataset: &str) -> CatalogRow {
    row(
        archive_id,
        dataset,
        NOT_APPLICABLE,
        "n.a",
        NOT_APPLICABLE,
        "n.a",
    )
}

fn row(
    archive_id: &str,
    dataset: &str,
    member: &str,
    extension: &str,
    media_type: &str,
    subcontent: &str,
) -> CatalogRow {
    CatalogRow {
        archive_id: archive_id.to_string(),
        dataset_name: dataset.to_string(),
        member_name: member.to_string(),
        extension: extension.to_string(),
        media_type: media_type.to_string(),
        subcontent: subcontent.to_string(),
    }
}
