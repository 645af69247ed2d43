//! Parser for the tape's table of contents, `UPDATESTOC.txt`.
//!
//! Each usable line looks like
//!
//! ```text
//! //*+FILE001:  CBT DOC - Final File 001 for Version 504     *#  DOC FILE
//! ```
//!
//! A `#` right after the `*` marks a file updated since the last tape
//! release; those are served from `updates/`, the rest from `cbt/`.

use serde::{Deserialize, Serialize};

const LINE_PREFIX: &str = "//*+";
const UPDATED_FLAG: char = '#';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub cbtnum: u32,
    /// Remote path relative to the mirror root.
    pub path: String,
    pub comment: String,
    pub updated: bool,
    pub info: String,
}

impl TocEntry {
    /// `CBT001`, the name used for stage files and repositories.
    pub fn archive_id(&self) -> String {
        archive_id(self.cbtnum)
    }

    pub fn file_name(&self) -> String {
        format!("{}.zip", self.archive_id())
    }
}

pub fn archive_id(cbtnum: u32) -> String {
    format!("CBT{:03}", cbtnum)
}

/// Inverse of [`archive_id`]: `CBT001` gives 1.
pub fn parse_archive_id(id: &str) -> Option<u32> {
    let digits = id.strip_prefix("CBT")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[derive(Debug, Clone, Default)]
pub struct Toc {
    pub entries: Vec<TocEntry>,
    /// Lines that were not entries.
    pub skipped: usize,
}

impl Toc {
    pub fn updated(&self) -> impl Iterator<Item = &TocEntry> {
        self.entries.iter().filter(|e| e.updated)
    }

    pub fn unchanged(&self) -> impl Iterator<Item = &TocEntry> {
        self.entries.iter().filter(|e| !e.updated)
    }
}

pub fn parse_toc(text: &str) -> Toc {
    let mut toc = Toc::default();
    for line in text.lines() {
        match parse_line(line) {
            Some(entry) => toc.entries.push(entry),
            None => toc.skipped += 1,
        }
    }
    toc
}

pub fn parse_line(line: &str) -> Option<TocEntry> {
    if line.len() < 5 {
        return None;
    }
    let rest = line.strip_prefix(LINE_PREFIX)?;
    let (file, rest) = rest.split_once(":  ")?;
    let (comment, rest) = rest.split_once('*')?;

    let digits = file
        .trim()
        .strip_prefix("FILE")
        .or_else(|| file.trim().strip_prefix("File"))?;
    let cbtnum: u32 = digits.trim().parse().ok()?;

    let updated = rest.starts_with(UPDATED_FLAG);
    let info = rest
        .get(1..)
        .and_then(|r| r.split_once("  "))
        .map(|(_, info)| info.trim())
        .unwrap_or("")
        .to_string();

    let folder = if updated { "updates" } else { "cbt" };
    Some(TocEntry {
        cbtnum,
        path: format!("{}/{}.zip", folder, archive_id(cbtnum)),
        comment: comment.trim().to_string(),
        updated,
        info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updated_entry_points_at_updates() {
        let e = parse_line("//*+FILE001:  CBT DOC - Final File 001 for Version 504   *#  DOC FILE")
            .unwrap();
        assert_eq!(e.cbtnum, 1);
        assert_eq!(e.path, "updates/CBT001.zip");
        assert_eq!(e.comment, "CBT DOC - Final File 001 for Version 504");
        assert!(e.updated);
        assert_eq!(e.info, "DOC FILE");
        assert_eq!(e.file_name(), "CBT001.zip");
    }

    #[test]
    fn archive_ids_round_trip() {
        assert_eq!(parse_archive_id(&archive_id(7)), Some(7));
        assert_eq!(parse_archive_id("CBT1036"), Some(1036));
        assert_eq!(parse_archive_id("CBT"), None);
        assert_eq!(parse_archive_id("FILE001"), None);
    }

    #[test]
    fn unflagged_entry_points_at_cbt() {
        let e = parse_line("//*+FILE1036:  OS/360 Sort/Merge fixed  *   DOC FILE").unwrap();
        assert_eq!(e.cbtnum, 1036);
        assert_eq!(e.path, "cbt/CBT1036.zip");
        assert!(!e.updated);
        assert_eq!(e.info, "DOC FILE");
    }

    #[test]
    fn noise_lines_are_counted() {
        let toc = parse_toc(
            "//*+FILE002:  JCL member     *#  DOC FILE\n\n//* comment only\nzz\n",
        );
        assert_eq!(toc.entries.len(), 1);
        assert_eq!(toc.skipped, 3);
        assert_eq!(toc.updated().count(), 1);
        assert_eq!(toc.unchanged().count(), 0);
    }
}
