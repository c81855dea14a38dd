//! Lab catalogs: the mouse-line catalog and per-mouse metadata files.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::mat::{self, MatFile};

/// Placeholder for metadata that is not available.
pub const NOT_AVAILABLE: &str = "na";

const BASE_STRAIN: &str = "Bl6/C57";

/// Mapping from line code to the line's full name.
///
/// Stored as variable `Lines` in a MAT file: an N×2 cell array whose rows
/// are `{code, full name}`.
#[derive(Debug, Clone, Default)]
pub struct LineCatalog {
    entries: Vec<(String, String)>,
}

impl LineCatalog {
    pub fn load<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        Self::from_mat(&mat::load(file_path)?)
    }

    pub fn from_mat(file: &MatFile) -> Result<Self> {
        let cell = file
            .require("Lines")?
            .as_cell()
            .ok_or_else(|| ConvertError::mat(&file.path, "'Lines' is not a cell array"))?;

        let mut entries = Vec::with_capacity(cell.rows());
        for row in 0..cell.rows() {
            let code = cell.get(row, 0).and_then(|v| v.as_text());
            let full = cell.get(row, 1).and_then(|v| v.as_text());
            match (code, full) {
                (Some(code), Some(full)) => entries.push((code.trim().to_string(), full.trim().to_string())),
                _ => debug!("Skipping incomplete line catalog row {}", row),
            }
        }
        Ok(LineCatalog { entries })
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        LineCatalog {
            entries: entries.into_iter().map(|(c, f)| (c.into(), f.into())).collect(),
        }
    }

    /// Full name of line `code`.
    pub fn full_name(&self, code: &str) -> Result<&str> {
        self.entries
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, full)| full.as_str())
            .ok_or_else(|| ConvertError::UnresolvedLookup(code.to_string()))
    }

    /// Species label of line `code`: the base strain, suffixed with the line's
    /// full name unless the line is the base strain itself.
    pub fn species(&self, code: &str) -> Result<String> {
        let full = self.full_name(code)?;
        if full == "Bl6" {
            Ok(BASE_STRAIN.to_string())
        } else {
            Ok(format!("{}-{}", BASE_STRAIN, full))
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Genotype and sex of one mouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectTraits {
    pub genotype: String,
    pub sex: String,
}

impl Default for SubjectTraits {
    fn default() -> Self {
        SubjectTraits {
            genotype: NOT_AVAILABLE.to_string(),
            sex: NOT_AVAILABLE.to_string(),
        }
    }
}

impl SubjectTraits {
    /// Reads `{line}_{mouse}_Meta.mat`, variable `General`: the genotype is
    /// cell (2, 7) and the sex cell (2, 5), one-based. Anything missing or
    /// unreadable is reported as `na`.
    pub fn load<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref();
        if !file_path.is_file() {
            debug!("No subject metadata file at {}", file_path.display());
            return SubjectTraits::default();
        }
        match mat::load(file_path) {
            Ok(file) => Self::from_mat(&file),
            Err(e) => {
                warn!("Ignoring unreadable subject metadata: {}", e);
                SubjectTraits::default()
            }
        }
    }

    pub fn from_mat(file: &MatFile) -> Self {
        let general = match file.get("General").and_then(|v| v.as_cell()) {
            Some(cell) => cell,
            None => return SubjectTraits::default(),
        };
        let text_at = |row: usize, col: usize| {
            general
                .get(row, col)
                .and_then(|v| v.as_text())
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };
        SubjectTraits {
            genotype: text_at(1, 6),
            sex: text_at(1, 4),
        }
    }
}
