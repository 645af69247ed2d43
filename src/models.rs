//! Core data models used throughout cbt2git.
//!
//! These types describe what a transmission container holds once decoded:
//! the dataset descriptor, its members with their ISPF statistics, and the
//! results of decoding nested containers. They are created per archive and
//! dropped once the output tree is written.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Editor id stamped on statistics the tool synthesizes itself.
pub const TOOL_EDITOR_ID: &str = "CBT2GIT";

/// Dataset organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Organization {
    Sequential,
    Partitioned,
}

impl Organization {
    /// The DSORG abbreviation used in the dsn ledger.
    pub fn code(self) -> &'static str {
        match self {
            Organization::Sequential => "PS",
            Organization::Partitioned => "PO",
        }
    }
}

impl fmt::Display for Organization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Dataset attributes read from a container's directory records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub dataset_name: String,
    pub organization: Organization,
    pub record_format: String,
    pub record_length: u32,
    pub block_size: u32,
}

impl ContainerDescriptor {
    /// RECFM=U: records have no line structure.
    pub fn is_undefined_format(&self) -> bool {
        self.record_format.starts_with('U')
    }

    pub fn last_qualifier(&self) -> &str {
        self.dataset_name
            .rsplit('.')
            .next()
            .unwrap_or(&self.dataset_name)
    }
}

/// ISPF edit statistics of a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditStats {
    pub version_major: u8,
    pub version_minor: u8,
    pub created_at: NaiveDateTime,
    pub modified_at: Option<NaiveDateTime>,
    /// Line count as last saved (ISPF "current size").
    pub original_line_count: u32,
    /// Line count when the member was created (ISPF "initial size").
    pub new_line_count: u32,
    pub modified_line_count: u32,
    pub editor_id: String,
}

impl EditStats {
    /// Fixed statistics for text members that carry none.
    pub fn placeholder() -> Self {
        let day = NaiveDate::from_ymd_opt(1976, 6, 12);
        Self {
            version_major: 1,
            version_minor: 0,
            created_at: day.and_then(|d| d.and_hms_opt(0, 0, 0)).unwrap_or_default(),
            modified_at: day.and_then(|d| d.and_hms_opt(22, 18, 12)),
            original_line_count: 0,
            new_line_count: 0,
            modified_line_count: 0,
            editor_id: TOOL_EDITOR_ID.to_string(),
        }
    }

    /// Modification stamp, falling back to creation when never modified.
    pub fn last_touched(&self) -> NaiveDateTime {
        self.modified_at.unwrap_or(self.created_at)
    }
}

/// One member of a partitioned dataset.
///
/// `data` holds the decoded representation: UTF-8 lines for EBCDIC text,
/// the raw record bytes for everything else.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub extension: String,
    pub media_type: String,
    pub edit_stats: Option<EditStats>,
    pub data: Vec<u8>,
}

/// Content of a sequential dataset.
#[derive(Debug, Clone)]
pub struct SequentialContent {
    pub media_type: String,
    pub extension: String,
    pub data: Vec<u8>,
}

/// The output of unpacking one container.
#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub descriptor: ContainerDescriptor,
    /// Empty for sequential datasets.
    pub members: Vec<Member>,
    /// Present only for sequential datasets.
    pub content: Option<SequentialContent>,
    /// One entry per member that was itself a container.
    pub nested: Vec<NestedDecode>,
}

impl DecodeResult {
    pub fn nested_for(&self, member: &str) -> Option<&NestedDecode> {
        self.nested.iter().find(|n| n.member == member)
    }

    /// Every descriptor in this result, outermost first.
    pub fn descriptors(&self) -> Vec<&ContainerDescriptor> {
        let mut out = vec![&self.descriptor];
        for nested in &self.nested {
            if let Some(inner) = nested.outcome.result() {
                out.extend(inner.descriptors());
            }
        }
        out
    }

    /// `(dataset, member)` pairs across all nesting levels.
    pub fn member_paths(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<(&str, &str)> = self
            .members
            .iter()
            .map(|m| (self.descriptor.dataset_name.as_str(), m.name.as_str()))
            .collect();
        for nested in &self.nested {
            if let Some(inner) = nested.outcome.result() {
                out.extend(inner.member_paths());
            }
        }
        out
    }
}

/// A nested container found in a member, and what decoding it produced.
#[derive(Debug, Clone)]
pub struct NestedDecode {
    pub member: String,
    pub outcome: NestedOutcome,
}

#[derive(Debug, Clone)]
pub enum NestedOutcome {
    /// Inner partitioned dataset, folded under `dataset`.
    Partitioned { dataset: String, result: DecodeResult },
    /// Inner sequential dataset with line-oriented records.
    Promoted { dataset: String, result: DecodeResult },
    /// Inner sequential RECFM=U dataset; only the raw container survives.
    Undefined { descriptor: ContainerDescriptor },
    Failed { reason: String },
}

impl NestedOutcome {
    pub fn result(&self) -> Option<&DecodeResult> {
        match self {
            NestedOutcome::Partitioned { result, .. } | NestedOutcome::Promoted { result, .. } => {
                Some(result)
            }
            NestedOutcome::Undefined { .. } | NestedOutcome::Failed { .. } => None,
        }
    }
}

/// One row of the catalog scan report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub archive_id: String,
    pub dataset_name: String,
    pub member_name: String,
    pub extension: String,
    pub media_type: String,
    pub subcontent: String,
}
