//! Recursive unpacker.
//!
//! Drives the reader across nesting levels. A member that is itself a
//! container is decoded in place; whatever it holds is attached to the
//! parent's [`DecodeResult`] as a [`NestedDecode`]. A nested failure never
//! aborts the parent: it is logged and kept as [`NestedOutcome::Failed`].

use std::io::{Cursor, Read};

use crate::classify::{classify, Policy};
use crate::decode_log::ArchiveLog;
use crate::error::{Error, Result};
use crate::models::{DecodeResult, NestedDecode, NestedOutcome, Organization};
use crate::reader;

pub const DEFAULT_MAX_DEPTH: usize = 4;

/// Upper bound on the buffer reserved from a zip entry's declared size.
const MAX_PREALLOC: u64 = 16 << 20;

#[derive(Debug, Clone)]
pub struct UnpackOptions {
    /// Deepest nesting level decoded; the outermost container is level 0.
    pub max_depth: usize,
    /// Fail with `NotPartitioned` when the outermost dataset is sequential.
    pub require_partitioned: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            require_partitioned: true,
        }
    }
}

/// Unpack a distribution zip that wraps exactly one container.
pub fn unpack_archive(
    zip_bytes: &[u8],
    opts: &UnpackOptions,
    log: &mut ArchiveLog<'_>,
) -> Result<DecodeResult> {
    let mut archive = zip::ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|e| Error::UnsupportedContainer(format!("not a zip archive: {}", e)))?;
    if archive.len() != 1 {
        return Err(Error::UnsupportedContainer(format!(
            "archive holds {} entries, expected exactly one",
            archive.len()
        )));
    }
    let mut entry = archive
        .by_index(0)
        .map_err(|e| Error::UnsupportedContainer(format!("unreadable archive entry: {}", e)))?;
    let entry_name = entry.name().to_string();
    let mut container = Vec::with_capacity(preallocation(entry.size()));
    entry.read_to_end(&mut container)?;

    let result = unpack(&container, opts, log)?;
    log.record(format!(
        "Received {} from {}",
        result.descriptor.dataset_name, entry_name
    ));
    Ok(result)
}

/// Declared sizes come from the zip header and are not trusted.
fn preallocation(declared: u64) -> usize {
    declared.min(MAX_PREALLOC) as usize
}

/// Unpack one container and every container nested inside it.
pub fn unpack(
    container: &[u8],
    opts: &UnpackOptions,
    log: &mut ArchiveLog<'_>,
) -> Result<DecodeResult> {
    decode_at(container, 0, opts, log)
}

fn decode_at(
    bytes: &[u8],
    depth: usize,
    opts: &UnpackOptions,
    log: &mut ArchiveLog<'_>,
) -> Result<DecodeResult> {
    if depth > opts.max_depth {
        return Err(Error::ExcessiveNesting {
            depth,
            limit: opts.max_depth,
        });
    }
    let container = reader::read(bytes)?;
    let descriptor = container.descriptor;
    if depth == 0
        && opts.require_partitioned
        && descriptor.organization == Organization::Sequential
    {
        return Err(Error::NotPartitioned(descriptor.dataset_name));
    }

    let mut nested = Vec::new();
    for member in &container.members {
        if classify(&member.media_type) != Policy::NestedContainer {
            continue;
        }
        let outcome = match decode_at(&member.data, depth + 1, opts, log) {
            Ok(inner) => nested_outcome(inner),
            Err(e) => {
                let err = if e.is_recoverable() {
                    e
                } else {
                    Error::NestedDecodeFailure {
                        member: member.name.clone(),
                        reason: e.to_string(),
                    }
                };
                log.warn(err.to_string());
                NestedOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
        nested.push(NestedDecode {
            member: member.name.clone(),
            outcome,
        });
    }

    Ok(DecodeResult {
        descriptor,
        members: container.members,
        content: container.content,
        nested,
    })
}

fn nested_outcome(inner: DecodeResult) -> NestedOutcome {
    let dataset = derive_dataset_name(&inner.descriptor.dataset_name);
    match inner.descriptor.organization {
        Organization::Partitioned => NestedOutcome::Partitioned {
            dataset,
            result: inner,
        },
        // No line structure to recover; the members and content are dropped.
        Organization::Sequential if inner.descriptor.is_undefined_format() => {
            NestedOutcome::Undefined {
                descriptor: inner.descriptor,
            }
        }
        Organization::Sequential => NestedOutcome::Promoted {
            dataset,
            result: inner,
        },
    }
}

/// The last two qualifiers of a dataset name: `A.B.C.D` becomes `C.D`.
pub fn derive_dataset_name(dataset_name: &str) -> String {
    let qualifiers: Vec<&str> = dataset_name.split('.').collect();
    qualifiers[qualifiers.len().saturating_sub(2)..].join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_entry_size_is_capped() {
        assert_eq!(preallocation(4096), 4096);
        assert_eq!(preallocation(u64::MAX), MAX_PREALLOC as usize);
    }

    #[test]
    fn derived_name_keeps_last_two_qualifiers() {
        assert_eq!(derive_dataset_name("A.B.C.D"), "C.D");
        assert_eq!(derive_dataset_name("SYS1.CBT.FILE123.PDS"), "FILE123.PDS");
        assert_eq!(derive_dataset_name("C.D"), "C.D");
        assert_eq!(derive_dataset_name("SINGLE"), "SINGLE");
    }

    #[test]
    fn non_zip_input_is_unsupported() {
        let mut sink = crate::decode_log::LogSink::new();
        let mut log = sink.archive("CBT999");
        let err = unpack_archive(b"not a zip", &UnpackOptions::default(), &mut log).unwrap_err();
        assert!(matches!(err, Error::UnsupportedContainer(_)));
    }
}
