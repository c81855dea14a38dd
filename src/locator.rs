//! Resolves manifest rows to session directories.
//!
//! A session lives at `<search_root>/**/{Line}_{MouseID}/*{Date}_{Paradigm}`.
//! A row is usable only when both levels match exactly one directory.

use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::{deserialize_flag, ManifestRow};

/// Progress of a row's resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    NotSearched,
    /// Root found; the paradigm level has not been searched yet
    RootUnique,
    RootAmbiguous,
    RootMissing,
    ParadigmUnique,
    ParadigmAmbiguous,
    ParadigmMissing,
}

/// Tri-state existence of a session directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    Unique,
    None,
    Multiple,
}

/// Candidate directories found for one root name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootScan {
    pub root: String,
    pub candidates: Vec<PathBuf>,
}

/// Outcome of resolving one manifest row.
#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub row: ManifestRow,
    pub root_scan: RootScan,
    pub paradigm_candidates: Vec<PathBuf>,
    pub state: Resolution,
}

impl ResolutionResult {
    pub fn existence(&self) -> Existence {
        match self.state {
            Resolution::ParadigmUnique => Existence::Unique,
            Resolution::RootAmbiguous | Resolution::ParadigmAmbiguous => Existence::Multiple,
            Resolution::NotSearched
            | Resolution::RootUnique
            | Resolution::RootMissing
            | Resolution::ParadigmMissing => Existence::None,
        }
    }

    /// True when exactly one candidate was found at both levels.
    pub fn is_unique(&self) -> bool {
        self.existence() == Existence::Unique
    }

    /// The resolved session directory, for unique results.
    pub fn session_dir(&self) -> Option<&Path> {
        if self.is_unique() {
            self.paradigm_candidates.first().map(PathBuf::as_path)
        } else {
            None
        }
    }
}

fn pattern_text(path: &Path) -> String {
    Pattern::escape(&path.to_string_lossy())
}

/// Collects directories matching `pattern`, skipping unreadable entries.
fn matching_dirs(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in glob::glob(pattern)? {
        match entry {
            Ok(path) if path.is_dir() => found.push(path),
            Ok(_) => {}
            Err(e) => debug!("Skipping unreadable path during scan: {}", e),
        }
    }
    Ok(found)
}

/// Recursively searches `search_root` for directories literally named `root`.
pub fn scan_root(search_root: &Path, root: &str) -> Result<RootScan> {
    let pattern = format!("{}/**/{}", pattern_text(search_root), Pattern::escape(root));
    Ok(RootScan {
        root: root.to_string(),
        candidates: matching_dirs(&pattern)?,
    })
}

/// Resolves one manifest row.
///
/// `previous` is the root scan of the previously resolved row; it is reused
/// when its root equals this row's root, so consecutive rows of the same
/// mouse scan the tree only once.
pub fn resolve(
    row: &ManifestRow,
    search_root: &Path,
    previous: Option<&RootScan>,
) -> Result<ResolutionResult> {
    let root = row.root();
    let root_scan = match previous {
        Some(scan) if scan.root == root => {
            debug!("Reusing root scan for {}", root);
            scan.clone()
        }
        _ => scan_root(search_root, &root)?,
    };

    let mut result = ResolutionResult {
        row: row.clone(),
        root_scan,
        paradigm_candidates: Vec::new(),
        state: Resolution::NotSearched,
    };

    let root_dir = match result.root_scan.candidates.as_slice() {
        [] => {
            warn!("No directory found for root {} (ignoring)", root);
            result.state = Resolution::RootMissing;
            return Ok(result);
        }
        [single] => single.clone(),
        _ => {
            warn!("Multiple directories found for root {} (ignoring)", root);
            result.state = Resolution::RootAmbiguous;
            return Ok(result);
        }
    };
    result.state = Resolution::RootUnique;

    let date_paradigm = row.date_paradigm();
    let pattern = format!("{}/*{}", pattern_text(&root_dir), Pattern::escape(&date_paradigm));
    result.paradigm_candidates = matching_dirs(&pattern)?;
    result.state = match result.paradigm_candidates.len() {
        0 => {
            warn!("No directory found for {}/{} (ignoring)", root, date_paradigm);
            Resolution::ParadigmMissing
        }
        1 => {
            debug!("Found {}/{}", root, date_paradigm);
            Resolution::ParadigmUnique
        }
        _ => {
            warn!("Multiple directories found for {}/{} (ignoring)", root, date_paradigm);
            Resolution::ParadigmAmbiguous
        }
    };

    Ok(result)
}

/// Resolves every row in manifest order and writes the scan report.
pub fn scan_manifest(
    rows: &[ManifestRow],
    search_root: &Path,
    report_path: &Path,
) -> Result<Vec<ResolutionResult>> {
    let mut results: Vec<ResolutionResult> = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        info!(
            "({}/{}) Searching for {}/{}",
            i + 1,
            rows.len(),
            row.root(),
            row.date_paradigm()
        );
        let previous = results.last().map(|r| &r.root_scan);
        results.push(resolve(row, search_root, previous)?);
    }

    let report: Vec<ScanReportRow> = results.iter().map(ScanReportRow::from).collect();
    write_report(report_path, &report)?;

    let unique = results.iter().filter(|r| r.is_unique()).count();
    info!(
        "Scan complete: {} of {} manifest rows resolved uniquely; report at {}",
        unique,
        rows.len(),
        report_path.display()
    );
    Ok(results)
}

/// One row of the scan report: the manifest columns plus the search outcome.
///
/// Candidate lists are JSON-encoded and left empty when they do not apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReportRow {
    #[serde(rename = "Line")]
    pub line: String,
    #[serde(rename = "MouseID")]
    pub mouse_id: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Paradigm")]
    pub paradigm: String,
    #[serde(rename = "Experimenter")]
    pub experimenter: String,
    #[serde(rename = "Behaviour", deserialize_with = "deserialize_flag")]
    pub behaviour: bool,
    #[serde(rename = "HeartRate", deserialize_with = "deserialize_flag")]
    pub heart_rate: bool,
    #[serde(rename = "Thermal", deserialize_with = "deserialize_flag")]
    pub thermal: bool,
    pub root: String,
    #[serde(rename = "rootUnique")]
    pub root_unique: String,
    #[serde(rename = "rootMulti")]
    pub root_multi: String,
    #[serde(rename = "parUnique")]
    pub par_unique: String,
    #[serde(rename = "parMulti")]
    pub par_multi: String,
    #[serde(rename = "uniqueExistence", deserialize_with = "deserialize_flag")]
    pub unique_existence: bool,
}

impl ScanReportRow {
    /// The manifest part of the row.
    pub fn manifest_row(&self) -> ManifestRow {
        ManifestRow {
            line: self.line.clone(),
            mouse_id: self.mouse_id.clone(),
            date: self.date.clone(),
            paradigm: self.paradigm.clone(),
            experimenter: self.experimenter.clone(),
            behaviour: self.behaviour,
            heart_rate: self.heart_rate,
            thermal: self.thermal,
        }
    }
}

fn encode_candidates(paths: &[PathBuf]) -> String {
    let texts: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    // A list of strings always serializes
    serde_json::to_string(&texts).unwrap_or_default()
}

impl From<&ResolutionResult> for ScanReportRow {
    fn from(result: &ResolutionResult) -> Self {
        let row = &result.row;
        let roots = &result.root_scan.candidates;
        let pars = &result.paradigm_candidates;
        let when = |cond: bool, paths: &[PathBuf]| {
            if cond {
                encode_candidates(paths)
            } else {
                String::new()
            }
        };

        ScanReportRow {
            line: row.line.clone(),
            mouse_id: row.mouse_id.clone(),
            date: row.date.clone(),
            paradigm: row.paradigm.clone(),
            experimenter: row.experimenter.clone(),
            behaviour: row.behaviour,
            heart_rate: row.heart_rate,
            thermal: row.thermal,
            root: row.root(),
            root_unique: when(roots.len() == 1, roots),
            root_multi: when(roots.len() > 1, roots),
            par_unique: when(pars.len() == 1, pars),
            par_multi: when(pars.len() > 1, pars),
            unique_existence: result.is_unique(),
        }
    }
}

pub fn write_report(path: &Path, rows: &[ScanReportRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_report(path: &Path) -> Result<Vec<ScanReportRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn row(line: &str, mouse: &str, date: &str, paradigm: &str) -> ManifestRow {
        ManifestRow {
            line: line.to_string(),
            mouse_id: mouse.to_string(),
            date: date.to_string(),
            paradigm: paradigm.to_string(),
            experimenter: "AB".to_string(),
            behaviour: true,
            heart_rate: false,
            thermal: true,
        }
    }

    #[test]
    fn duplicated_root_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("cohortA/M1_01/230522_Fear")).unwrap();
        fs::create_dir_all(dir.path().join("cohortB/M1_01/230522_Fear")).unwrap();

        let result = resolve(&row("M1", "01", "230522", "Fear"), dir.path(), None).unwrap();
        assert_eq!(result.state, Resolution::RootAmbiguous);
        assert_eq!(result.existence(), Existence::Multiple);
        assert_eq!(result.root_scan.candidates.len(), 2);
        assert!(result.session_dir().is_none());
    }

    #[test]
    fn absent_root_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("M1_02")).unwrap();

        let result = resolve(&row("M1", "01", "230522", "Fear"), dir.path(), None).unwrap();
        assert_eq!(result.state, Resolution::RootMissing);
        assert_eq!(result.existence(), Existence::None);
    }

    #[test]
    fn single_root_and_paradigm_is_unique() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("cohortA/M1_01/S3_230522_Fear");
        fs::create_dir_all(&session).unwrap();
        fs::create_dir_all(dir.path().join("cohortA/M1_01/230523_Fear")).unwrap();
        // Files never count as candidates
        fs::write(dir.path().join("cohortA/M1_01/x_230522_Fear"), b"").unwrap();

        let result = resolve(&row("M1", "01", "230522", "Fear"), dir.path(), None).unwrap();
        assert_eq!(result.state, Resolution::ParadigmUnique);
        assert_eq!(result.session_dir(), Some(session.as_path()));
    }

    #[test]
    fn several_paradigm_dirs_are_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("M1_01/a_230522_Fear")).unwrap();
        fs::create_dir_all(dir.path().join("M1_01/b_230522_Fear")).unwrap();

        let result = resolve(&row("M1", "01", "230522", "Fear"), dir.path(), None).unwrap();
        assert_eq!(result.state, Resolution::ParadigmAmbiguous);
    }

    #[test]
    fn previous_scan_is_reused_only_for_the_same_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("M1_01/230522_Fear")).unwrap();
        let stale = RootScan {
            root: "M1_01".to_string(),
            candidates: vec![dir.path().join("M1_01")],
        };
        // Removing the directory proves the cached scan is used for the same root
        fs::remove_dir_all(dir.path().join("M1_01")).unwrap();
        fs::create_dir_all(dir.path().join("M1_01b")).unwrap();

        let same = resolve(&row("M1", "01", "230522", "Fear"), dir.path(), Some(&stale)).unwrap();
        assert_eq!(same.root_scan, stale);
        assert_eq!(same.state, Resolution::ParadigmMissing);

        let other = resolve(&row("M1", "02", "230522", "Fear"), dir.path(), Some(&stale)).unwrap();
        assert_eq!(other.state, Resolution::RootMissing);
    }

    #[test]
    fn scan_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("M1_01/230522_Fear")).unwrap();
        fs::create_dir_all(data.join("M1_01/230523_Recall")).unwrap();

        let rows = vec![
            row("M1", "01", "230522", "Fear"),
            row("M1", "01", "230523", "Recall"),
            row("M2", "07", "230522", "Fear"),
        ];
        let report = dir.path().join("scan_report.csv");
        let results = scan_manifest(&rows, &data, &report).unwrap();
        assert_eq!(results.iter().filter(|r| r.is_unique()).count(), 2);

        let loaded = read_report(&report).unwrap();
        assert_eq!(loaded.len(), rows.len());
        for (loaded, original) in loaded.iter().zip(&rows) {
            assert_eq!(&loaded.manifest_row(), original);
        }
        assert!(loaded[0].unique_existence);
        assert!(!loaded[2].unique_existence);
        assert!(loaded[2].root_unique.is_empty());
        let roots: Vec<String> = serde_json::from_str(&loaded[0].root_unique).unwrap();
        assert_eq!(roots.len(), 1);
    }
}
