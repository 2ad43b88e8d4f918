//! Record and baseline storage.
//!
//! Records live in a JSONL file under `<repo>/.beads/`, one issue per line.
//! The store is read-only apart from the baseline document, which is written
//! next to the records as `baseline.json`.
//!
//! ## File selection
//!
//! When several `*.jsonl` files are present the first non-empty match wins:
//!
//! 1. `issues.jsonl`
//! 2. `beads.jsonl`
//! 3. `beads.base.jsonl`
//! 4. any other candidate, in name order
//!
//! Backups (`*.backup*`), `*.orig*`, `*.merge*` and `deletions.jsonl` are never
//! candidates. `beads.left*` / `beads.right*` are merge-conflict sides and are
//! skipped with a warning.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::analysis::diff::Baseline;
use crate::correlation::cache::data_hash;
use crate::models::{Issue, Warning, WarningKind};
use crate::{Error, Result};

/// Directory holding the records file, relative to the repository root.
pub const STORE_DIR: &str = ".beads";

pub const BASELINE_FILE: &str = "baseline.json";

const PREFERRED_FILES: [&str; 3] = ["issues.jsonl", "beads.jsonl", "beads.base.jsonl"];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Records plus the fingerprint they were loaded under.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub records: Vec<Issue>,
    pub data_hash: String,
    pub warnings: Vec<Warning>,
}

impl Snapshot {
    pub fn new(records: Vec<Issue>, warnings: Vec<Warning>) -> Self {
        Self {
            data_hash: data_hash(&records),
            records,
            warnings,
        }
    }
}

/// Source of issue records.
pub trait RecordStore {
    /// Load every record currently in the store.
    fn snapshot(&self) -> Result<Snapshot>;
}

/// Fixed in-memory record set.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<Issue>,
}

impl MemoryStore {
    pub fn new(records: Vec<Issue>) -> Self {
        Self { records }
    }
}

impl RecordStore for MemoryStore {
    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::new(self.records.clone(), Vec::new()))
    }
}

fn is_skipped(name: &str) -> bool {
    name.contains(".backup") || name.contains(".orig") || name.contains(".merge") || name == "deletions.jsonl"
}

fn is_merge_artifact(name: &str) -> bool {
    name.starts_with("beads.left") || name.starts_with("beads.right")
}

fn non_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Pick the records file in `dir`.
///
/// Returns the path plus any merge-artifact warning.
pub fn find_records_file(dir: &Path) -> Result<(PathBuf, Vec<Warning>)> {
    let mut candidates: Vec<String> = Vec::new();
    let mut artifacts: Vec<String> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(".jsonl") || is_skipped(&name) {
            continue;
        }
        if is_merge_artifact(&name) {
            artifacts.push(name);
            continue;
        }
        candidates.push(name);
    }
    candidates.sort();
    artifacts.sort();

    let mut warnings = Vec::new();
    if !artifacts.is_empty() {
        let message = format!("Merge artifact files detected: {}", artifacts.join(", "));
        warn!("{}", message);
        warnings.push(Warning::new(WarningKind::MergeArtifact, message));
    }

    let Some(first) = candidates.first() else {
        return Err(Error::NotFound(format!(
            "No records file found in {}",
            dir.display()
        )));
    };

    let preferred = PREFERRED_FILES
        .iter()
        .filter(|p| candidates.iter().any(|c| c == *p))
        .map(|p| dir.join(p))
        .find(|p| non_empty(p));
    let path = preferred
        .or_else(|| candidates.iter().map(|c| dir.join(c)).find(|p| non_empty(p)))
        .unwrap_or_else(|| dir.join(first));
    Ok((path, warnings))
}

/// Parse JSONL records.
///
/// Blank lines are ignored. Malformed JSON and records failing validation are
/// skipped with a warning naming the line. Only I/O failures are errors.
pub fn parse_issues<R: Read>(reader: R) -> Result<(Vec<Issue>, Vec<Warning>)> {
    let mut reader = BufReader::new(reader);
    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let mut buf: Vec<u8> = Vec::new();
    let mut line_num = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_num += 1;
        let mut line: &[u8] = &buf;
        if line_num == 1 {
            line = line.strip_prefix(UTF8_BOM).unwrap_or(line);
        }
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            continue;
        }

        let issue: Issue = match serde_json::from_slice(line) {
            Ok(issue) => issue,
            Err(e) => {
                warnings.push(Warning::new(
                    WarningKind::MalformedLine,
                    format!("Skipping malformed JSON on line {}: {}", line_num, e),
                ));
                continue;
            }
        };
        if let Err(e) = issue.validate() {
            warnings.push(Warning::for_issue(
                WarningKind::InvalidRecord,
                &issue.id,
                format!("Skipping invalid issue on line {}: {}", line_num, e),
            ));
            continue;
        }
        issues.push(issue);
    }

    if !warnings.is_empty() {
        debug!(skipped = warnings.len(), "Skipped unreadable records");
    }
    Ok((issues, warnings))
}

/// JSONL record store rooted at a repository.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    root: PathBuf,
    path: PathBuf,
    warnings: Vec<Warning>,
}

impl JsonlStore {
    /// Locate the store under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(STORE_DIR);
        if !dir.is_dir() {
            return Err(Error::MissingStoreRoot(dir));
        }
        let (path, warnings) = find_records_file(&dir)?;
        debug!(path = %path.display(), "Opened record store");
        Ok(Self {
            root: root.to_path_buf(),
            path,
            warnings,
        })
    }

    /// Repository root the store was opened at.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Records file in use.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR)
    }
}

impl RecordStore for JsonlStore {
    fn snapshot(&self) -> Result<Snapshot> {
        let file = File::open(&self.path)?;
        let (records, parse_warnings) = parse_issues(file)?;
        let mut warnings = self.warnings.clone();
        warnings.extend(parse_warnings);
        Ok(Snapshot::new(records, warnings))
    }
}

/// Reads and writes the saved baseline.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    path: PathBuf,
}

impl BaselineStore {
    /// Baseline document inside `<root>/.beads/`.
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(STORE_DIR).join(BASELINE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Baseline> {
        if !self.path.exists() {
            return Err(Error::NotFound(format!(
                "No baseline saved at {}",
                self.path.display()
            )));
        }
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write through a temporary file so readers never see a partial document.
    pub fn save(&self, baseline: &Baseline) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, baseline)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), issues = baseline.len(), "Saved baseline");
        Ok(())
    }
}
