//! Output-tree builder.
//!
//! Projects a [`DecodeResult`] onto disk under `<root>/<archiveId>/`:
//!
//! ```text
//! <archiveId>/
//!   <DATASET>/<MEMBER>        plain text members and placeholders
//!   <C.D>/...                 nested partitioned datasets
//!   docs/<MEMBER><ext>        documents
//!   zips/<MEMBER>.zip         plain zips, extracted next to it
//!   <MEMBER><ext>             nested containers and opaque members
//!   .metadata/dsn             one line per dataset
//!   .metadata/<DATASET>       ISPF statistics, one line per text file
//!   README, .gitattributes, cbt2git.log
//! ```
//!
//! Every member leaves exactly one entry in its dataset directory. Members
//! that cannot live there as text are copied elsewhere and replaced by a
//! boxed placeholder explaining where they went.
//!
//! Names decoded from containers pass through [`path_component`] before
//! they touch the filesystem, and every path is reserved once per build.
//! A side artifact whose path is taken is qualified with its dataset
//! (`docs/<DATASET>/<MEMBER><ext>`, `<DATASET>-<MEMBER><ext>` at the root)
//! and the rename is logged.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use chrono::NaiveDateTime;

use crate::classify::{classify, Policy};
use crate::decode_log::ArchiveLog;
use crate::error::{Error, Result};
use crate::models::{
    ContainerDescriptor, DecodeResult, EditStats, Member, NestedOutcome, Organization,
    TOOL_EDITOR_ID,
};

pub const METADATA_DIR: &str = ".metadata";
pub const DSN_LEDGER: &str = "dsn";
pub const LOG_FILE: &str = "cbt2git.log";
pub const README_FILE: &str = "README";
pub const DOCS_DIR: &str = "docs";
pub const ZIPS_DIR: &str = "zips";
pub const GITATTRIBUTES_FILE: &str = ".gitattributes";

const PLACEHOLDER_WIDTH: usize = 55;
const README_FENCE: &str = "~~~~~~~~~~~~~~~~";
const README_MEMBER_PREFIX: &str = "@FILE";

/// Entries kept when an archive directory is rebuilt.
const PRESERVED: &[&str] = &[".git", LOG_FILE];

/// Root entries no member may take.
const RESERVED: &[&str] = &[
    ".git",
    LOG_FILE,
    README_FILE,
    DOCS_DIR,
    ZIPS_DIR,
    METADATA_DIR,
    GITATTRIBUTES_FILE,
];

const GITATTRIBUTES: &str = "\
*                git-encoding=iso8859-1 zos-working-tree-encoding=ibm-1047
.gitattributes    git-encoding=iso8859-1 zos-working-tree-encoding=iso8859-1
.gitignore        git-encoding=iso8859-1 zos-working-tree-encoding=iso8859-1
*.docm binary
*.docx binary
*.doc  binary
*.xls  binary
*.xlsx binary
*.ppt  binary
*.pptx binary
*.rtf  binary
*.pdf  binary
*.epub binary
*.mobi binary
*.azw3 binary
*.zip  binary
*.xmi  binary
*.jar  binary
*.bin  binary
";

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub archive_id: String,
    /// Date and time stamped on placeholder ledger lines.
    pub stamp: NaiveDateTime,
}

/// One dsn ledger line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub name: String,
    pub organization: Organization,
    pub record_format: String,
    pub record_length: u32,
    pub block_size: u32,
}

impl DatasetEntry {
    fn new(name: &str, descriptor: &ContainerDescriptor) -> Self {
        Self {
            name: name.to_string(),
            organization: descriptor.organization,
            record_format: descriptor.record_format.clone(),
            record_length: descriptor.record_length,
            block_size: descriptor.block_size,
        }
    }

    pub fn ledger_line(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.name, self.organization, self.record_format, self.record_length, self.block_size
        )
    }
}

/// What [`build`] wrote.
#[derive(Debug, Clone, Default)]
pub struct OutputTree {
    pub root: PathBuf,
    /// Directory name of the outermost dataset.
    pub top_dataset: String,
    pub datasets: Vec<DatasetEntry>,
    /// ISPF ledger lines per dataset.
    pub ledgers: BTreeMap<String, Vec<String>>,
    /// Files written, relative to `root`.
    pub files: Vec<PathBuf>,
    /// Member the README was taken from.
    pub readme_member: Option<String>,
}

impl OutputTree {
    pub fn ledger(&self, dataset: &str) -> &[String] {
        self.ledgers.get(dataset).map(|l| l.as_slice()).unwrap_or(&[])
    }
}

/// Format one ISPF ledger line.
pub fn ispf_line(member: &str, stats: &EditStats) -> String {
    let modified = stats.last_touched();
    format!(
        "{:<8} {} {} {:>2} {:>2} {} {:>5} {:>5} {:>5} {}",
        member,
        stats.created_at.format("%y/%m/%d"),
        modified.format("%y/%m/%d"),
        stats.version_major,
        stats.version_minor,
        modified.format("%H:%M:%S"),
        stats.original_line_count,
        stats.new_line_count,
        0,
        stats.editor_id
    )
}

/// A `#`-comment box with each line centred.
pub fn placeholder_text(lines: &[String]) -> String {
    let rule = format!("# +{}+\n", "-".repeat(PLACEHOLDER_WIDTH));
    let mut out = rule.clone();
    for line in lines {
        out.push_str(&format!("# |{:^width$}|\n", line, width = PLACEHOLDER_WIDTH));
    }
    out.push_str(&rule);
    out
}

/// Lay out `result` under `dest_root/<archive_id>`.
pub fn build(
    result: &DecodeResult,
    dest_root: &Path,
    opts: &BuildOptions,
    log: &mut ArchiveLog<'_>,
) -> Result<OutputTree> {
    let root = dest_root.join(&opts.archive_id);
    prepare_root(&root)?;

    let mut builder = Builder {
        root: root.clone(),
        opts,
        log,
        tree: OutputTree {
            root,
            ..OutputTree::default()
        },
        claimed: RESERVED.iter().map(PathBuf::from).collect(),
    };
    builder
        .claimed
        .insert(Path::new(METADATA_DIR).join(DSN_LEDGER));
    let top = builder.claim_dataset(result.descriptor.last_qualifier(), &opts.archive_id);
    builder.tree.top_dataset = top.clone();

    match result.descriptor.organization {
        Organization::Partitioned => builder.lay_out_partitioned(result, &top)?,
        Organization::Sequential => builder.lay_out_sequential(result, &top)?,
    }
    builder.write_readme(result)?;
    builder.write_ledgers()?;
    builder.write_file(Path::new(GITATTRIBUTES_FILE), GITATTRIBUTES.as_bytes())?;
    Ok(builder.tree)
}

/// Create the archive root, or empty it except for the preserved entries.
fn prepare_root(root: &Path) -> io::Result<()> {
    if !root.exists() {
        return fs::create_dir_all(root);
    }
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if PRESERVED.iter().any(|p| entry.file_name() == *p) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Turn a decoded name into a single path component.
///
/// Separators and control bytes become `_`, as does a leading `.`; an
/// empty name becomes `_`.
pub fn path_component(name: &str) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if out.starts_with('.') {
        out.replace_range(..1, "_");
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

struct Builder<'o, 'l, 's> {
    root: PathBuf,
    opts: &'o BuildOptions,
    log: &'l mut ArchiveLog<'s>,
    tree: OutputTree,
    /// Paths in use, relative to the archive root.
    claimed: BTreeSet<PathBuf>,
}

impl Builder<'_, '_, '_> {
    fn lay_out_partitioned(&mut self, result: &DecodeResult, dir: &str) -> Result<()> {
        fs::create_dir_all(self.root.join(dir))?;
        self.tree
            .datasets
            .push(DatasetEntry::new(dir, &result.descriptor));
        self.tree.ledgers.entry(dir.to_string()).or_default();

        for member in &result.members {
            let policy = classify(&member.media_type);
            tracing::debug!(member = %member.name, %policy, "laying out member");
            let file = self.claim_member(dir, &member.name);
            match policy {
                Policy::PlainText => self.plain_text(result, member, dir, &file)?,
                Policy::NestedContainer => self.nested(result, member, dir, &file)?,
                Policy::Document => self.document(member, dir, &file)?,
                Policy::PlainZip => self.plain_zip(member, dir, &file)?,
                Policy::ArchiveMember | Policy::OpaqueBinary => {
                    self.opaque(member, dir, &file)?
                }
            }
        }
        Ok(())
    }

    /// Sequential datasets become one file at the archive root.
    fn lay_out_sequential(&mut self, result: &DecodeResult, name: &str) -> Result<()> {
        let data = result
            .content
            .as_ref()
            .map(|c| c.data.as_slice())
            .unwrap_or(&[]);
        self.write_file(Path::new(name), data)?;
        self.tree
            .datasets
            .push(DatasetEntry::new(name, &result.descriptor));
        self.tree.ledgers.entry(name.to_string()).or_default();
        Ok(())
    }

    fn plain_text(
        &mut self,
        result: &DecodeResult,
        member: &Member,
        dir: &str,
        file: &str,
    ) -> Result<()> {
        self.write_file(&Path::new(dir).join(file), &member.data)?;
        let stats = member
            .edit_stats
            .clone()
            .unwrap_or_else(EditStats::placeholder);
        self.ledger_line(dir, ispf_line(file, &stats));
        self.log.record(format!(
            "Found {}{} ({}) in {} moved to {}/{}",
            member.name, member.extension, member.media_type, result.descriptor.dataset_name, dir, file
        ));
        Ok(())
    }

    fn nested(
        &mut self,
        result: &DecodeResult,
        member: &Member,
        dir: &str,
        file: &str,
    ) -> Result<()> {
        let original = self.claim_side(None, &[format!("{}{}", file, member.extension)], dir);
        self.write_file(&original[0], &member.data)?;
        let moved_to = self.location(&original[0]);
        self.log.record(format!(
            "Found {}{} ({}) in {}",
            member.name, member.extension, member.media_type, result.descriptor.dataset_name
        ));

        let outcome = result.nested_for(&member.name).map(|n| &n.outcome);
        let lines = match outcome {
            Some(NestedOutcome::Partitioned {
                dataset,
                result: inner,
            }) => {
                let name = self.claim_dataset(dataset, &member.name);
                self.lay_out_partitioned(inner, &name)?;
                let extracted = self.location(Path::new(&name));
                self.log
                    .record(format!("Extracted {} to {}", moved_to, extracted));
                vec![
                    "CBT2GIT DETECTED THIS WAS AN XMI FILE".to_string(),
                    "AND HAS DE-XMIED IT TO".to_string(),
                    extracted,
                    "THE ORIGINAL XMI HAS MOVED TO".to_string(),
                    moved_to,
                ]
            }
            Some(NestedOutcome::Promoted {
                dataset,
                result: inner,
            }) => {
                let name = self.claim_dataset(dataset, &member.name);
                self.lay_out_sequential(inner, &name)?;
                let received = self.location(Path::new(&name));
                self.log
                    .record(format!("Extracted {} to {}", moved_to, received));
                vec![
                    "CBT2GIT DETECTED THIS WAS AN XMI FILE".to_string(),
                    "AND HAS RECEIVED IT TO".to_string(),
                    received,
                    "THE ORIGINAL XMI HAS MOVED TO".to_string(),
                    moved_to,
                ]
            }
            Some(NestedOutcome::Undefined { .. }) => {
                self.log.record(format!(
                    "De-XMI showed RECFM=U, stored XMIT file as {}",
                    moved_to
                ));
                vec![
                    "CBT2GIT DETECTED THIS WAS AN XMI FILE".to_string(),
                    "IT CONTAINED RECFM=U DATA".to_string(),
                    "---".to_string(),
                    "THE ORIGINAL XMI HAS MOVED TO".to_string(),
                    moved_to,
                ]
            }
            Some(NestedOutcome::Failed { .. }) | None => vec![
                "CBT2GIT DETECTED THIS WAS AN XMI FILE".to_string(),
                "BUT COULD NOT DE-XMI IT".to_string(),
                "---".to_string(),
                "THE ORIGINAL XMI HAS MOVED TO".to_string(),
                moved_to,
            ],
        };
        self.placeholder(dir, file, &lines)
    }

    fn document(&mut self, member: &Member, dir: &str, file: &str) -> Result<()> {
        let stored = self.claim_side(Some(DOCS_DIR), &[format!("{}{}", file, member.extension)], dir);
        self.write_file(&stored[0], &member.data)?;
        let stored = self.location(&stored[0]);
        self.log
            .record(format!("Stored {} ({}) as {}", member.name, member.media_type, stored));
        let lines = vec![
            "CBT2GIT DETECTED THIS MEMBER CONTAINED".to_string(),
            member.media_type.clone(),
            "DATA STORED AS".to_string(),
            stored,
        ];
        self.placeholder(dir, file, &lines)
    }

    fn plain_zip(&mut self, member: &Member, dir: &str, file: &str) -> Result<()> {
        let paths = self.claim_side(
            Some(ZIPS_DIR),
            &[file.to_string(), format!("{}{}", file, member.extension)],
            dir,
        );
        let (target, stored) = (&paths[0], &paths[1]);
        let staging_parent = self.root.join(target).parent().map(Path::to_path_buf);
        let extraction = match staging_parent {
            Some(parent) => extract_zip(&member.data, &parent, &self.root.join(target)),
            None => Err("no parent for extraction directory".to_string()),
        };
        match extraction {
            Ok(count) => {
                self.write_file(stored, &member.data)?;
                let extracted = self.location(target);
                self.log
                    .record(format!("Extracted {} entries of {} to {}", count, member.name, extracted));
                let lines = vec![
                    "CBT2GIT DETECTED THIS MEMBER WAS A ZIP FILE".to_string(),
                    "AND HAS EXTRACTED IT TO".to_string(),
                    extracted,
                    "THE ORIGINAL ZIP HAS MOVED TO".to_string(),
                    self.location(stored),
                ];
                self.placeholder(dir, file, &lines)
            }
            Err(reason) => {
                let err = Error::ArchiveExtractionFailure {
                    member: member.name.clone(),
                    reason,
                };
                self.log.warn(err.to_string());
                // The raw zip takes the member's own slot, with a tool ledger line.
                self.write_file(&Path::new(dir).join(file), &member.data)?;
                self.ledger_line(dir, ispf_line(file, &self.tool_stats(0)));
                self.log.record(format!(
                    "Copied {} unchanged to {}/{}",
                    member.name, dir, file
                ));
                Ok(())
            }
        }
    }

    fn opaque(&mut self, member: &Member, dir: &str, file: &str) -> Result<()> {
        let stored = self.claim_side(None, &[format!("{}{}", file, member.extension)], dir);
        self.write_file(&stored[0], &member.data)?;
        self.log.record(format!(
            "Skipped {} as it contained {}",
            member.name, member.media_type
        ));
        let lines = vec![
            "CBT2GIT DETECTED THIS MEMBER CONTAINED".to_string(),
            "AN UNSUPPORTED MIME-TYPE".to_string(),
            member.media_type.clone(),
            "DATA STORED AS".to_string(),
            self.location(&stored[0]),
        ];
        self.placeholder(dir, file, &lines)
    }

    /// Write the placeholder `dir/file` and its ledger line.
    fn placeholder(&mut self, dir: &str, file: &str, lines: &[String]) -> Result<()> {
        let text = placeholder_text(lines);
        let line_count = text.lines().count() as u32;
        self.write_file(&Path::new(dir).join(file), text.as_bytes())?;
        self.ledger_line(dir, ispf_line(file, &self.tool_stats(line_count)));
        Ok(())
    }

    /// Statistics for files the builder writes itself.
    fn tool_stats(&self, line_count: u32) -> EditStats {
        EditStats {
            version_major: 1,
            version_minor: 0,
            created_at: self.opts.stamp,
            modified_at: Some(self.opts.stamp),
            original_line_count: line_count,
            new_line_count: line_count,
            modified_line_count: 0,
            editor_id: TOOL_EDITOR_ID.to_string(),
        }
    }

    fn write_readme(&mut self, result: &DecodeResult) -> Result<()> {
        let candidates: Vec<&Member> = result
            .members
            .iter()
            .filter(|m| m.name.starts_with(README_MEMBER_PREFIX))
            .collect();
        let body = match candidates.as_slice() {
            [only] if classify(&only.media_type) == Policy::PlainText => {
                self.tree.readme_member = Some(only.name.clone());
                String::from_utf8_lossy(&only.data).into_owned()
            }
            _ => {
                self.log.record(format!(
                    "Found {} {} members in {}, README holds a notice instead",
                    candidates.len(),
                    README_MEMBER_PREFIX,
                    result.descriptor.dataset_name
                ));
                format!(
                    "NO {} MEMBER FOUND IN {}\n",
                    README_MEMBER_PREFIX, result.descriptor.dataset_name
                )
            }
        };
        let mut readme = format!("{}\n\n", README_FENCE);
        readme.push_str(&body);
        if !readme.ends_with('\n') {
            readme.push('\n');
        }
        readme.push_str(&format!("{}\n", README_FENCE));
        self.write_file(Path::new(README_FILE), readme.as_bytes())
    }

    fn write_ledgers(&mut self) -> Result<()> {
        let dsn: String = self
            .tree
            .datasets
            .iter()
            .map(|d| d.ledger_line() + "\n")
            .collect();
        self.write_file(&Path::new(METADATA_DIR).join(DSN_LEDGER), dsn.as_bytes())?;
        let ledgers: Vec<(String, String)> = self
            .tree
            .ledgers
            .iter()
            .map(|(name, lines)| (name.clone(), lines.iter().map(|l| l.clone() + "\n").collect()))
            .collect();
        for (name, text) in ledgers {
            self.write_file(&Path::new(METADATA_DIR).join(name), text.as_bytes())?;
        }
        Ok(())
    }

    fn ledger_line(&mut self, dir: &str, line: String) {
        self.tree
            .ledgers
            .entry(dir.to_string())
            .or_default()
            .push(line);
    }

    /// Reserve all of `paths`, or none of them.
    fn try_claim(&mut self, paths: &[PathBuf]) -> bool {
        if paths.iter().any(|p| self.claimed.contains(p)) {
            return false;
        }
        self.claimed.extend(paths.iter().cloned());
        true
    }

    /// Reserve a dataset name at the archive root together with its ISPF
    /// ledger, suffixing the member on clash.
    fn claim_dataset(&mut self, dataset: &str, member: &str) -> String {
        let base = path_component(dataset);
        let suffix = path_component(member);
        let mut name = base.clone();
        let mut attempt = 1;
        while !self.try_claim(&[PathBuf::from(&name), Path::new(METADATA_DIR).join(&name)]) {
            attempt += 1;
            name = match attempt {
                2 => format!("{}-{}", base, suffix),
                n => format!("{}-{}-{}", base, suffix, n),
            };
        }
        if name != dataset {
            self.log.warn(format!(
                "Dataset name {} already in use or unsafe, {} laid out as {}",
                dataset, member, name
            ));
        }
        name
    }

    /// Reserve the file name of `member` inside dataset directory `dir`.
    fn claim_member(&mut self, dir: &str, member: &str) -> String {
        let wanted = short_name(member);
        let base = path_component(wanted);
        let mut name = base.clone();
        let mut attempt = 1;
        while !self.try_claim(&[Path::new(dir).join(&name)]) {
            attempt += 1;
            name = format!("{}-{}", base, attempt);
        }
        if name != wanted {
            self.log.warn(format!(
                "Member {} of {} renamed to {}",
                member, dir, name
            ));
        }
        name
    }

    /// Reserve side artifacts of a member of `dir`, under `area` or at the
    /// archive root. On clash the dataset name qualifies the path:
    /// `<area>/<dir>/<file>` or `<dir>-<file>` at the root.
    fn claim_side(&mut self, area: Option<&str>, files: &[String], dir: &str) -> Vec<PathBuf> {
        let mut attempt = 1;
        loop {
            let qualifier = match attempt {
                1 => None,
                2 => Some(dir.to_string()),
                n => Some(format!("{}-{}", dir, n)),
            };
            let paths: Vec<PathBuf> = files
                .iter()
                .map(|file| match (area, &qualifier) {
                    (Some(area), None) => Path::new(area).join(file),
                    (Some(area), Some(q)) => Path::new(area).join(q).join(file),
                    (None, None) => PathBuf::from(file),
                    (None, Some(q)) => PathBuf::from(format!("{}-{}", q, file)),
                })
                .collect();
            if self.try_claim(&paths) {
                if attempt > 1 {
                    self.log.warn(format!(
                        "{} already in use, stored as {}",
                        files.join(", "),
                        paths
                            .iter()
                            .map(|p| p.to_string_lossy())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                }
                return paths;
            }
            attempt += 1;
        }
    }

    fn location(&self, relative: &Path) -> String {
        format!("{}/{}", self.opts.archive_id, relative.to_string_lossy())
    }

    fn write_file(&mut self, relative: &Path, data: &[u8]) -> Result<()> {
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path escapes the archive root: {}", relative.display()),
            )
            .into());
        }
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        self.tree.files.push(relative.to_path_buf());
        Ok(())
    }
}

/// Member names never carry an extension on disk.
fn short_name(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Extract a zip into `target`, staging under `parent` so a failure leaves
/// nothing behind. Returns the number of files extracted.
fn extract_zip(bytes: &[u8], parent: &Path, target: &Path) -> std::result::Result<usize, String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| format!("invalid or corrupt zip: {}", e))?;
    fs::create_dir_all(parent).map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)
        .map_err(|e| format!("failed to create staging directory: {}", e))?;

    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| format!("failed to read entry {}: {}", i, e))?;
        let entry_path = match entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => continue,
        };
        let output_path = staging.path().join(&entry_path);
        if entry.is_dir() {
            fs::create_dir_all(&output_path).map_err(|e| format!("failed to create dir: {}", e))?;
        } else {
            if let Some(p) = output_path.parent() {
                fs::create_dir_all(p).map_err(|e| format!("failed to create parent: {}", e))?;
            }
            let mut outfile =
                fs::File::create(&output_path).map_err(|e| format!("failed to create file: {}", e))?;
            io::copy(&mut entry, &mut outfile).map_err(|e| format!("failed to write file: {}", e))?;
            count += 1;
        }
    }

    if target.exists() {
        fs::remove_dir_all(target).map_err(|e| format!("failed to replace {}: {}", target.display(), e))?;
    }
    fs::rename(staging.path(), target)
        .map_err(|e| format!("failed to move extraction into place: {}", e))?;
    Ok(count)
}
