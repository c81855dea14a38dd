//! Batch configuration.
//!
//! A [`BatchConfig`] is built by the command-line layer (or loaded from a
//! JSON file) and handed to the batch orchestrator; nothing reads global
//! state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// Session-level metadata constants written into every document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionDefaults {
    /// Global description of the project
    pub experiment_description: String,
    /// DOI of the related publication
    pub related_publications: String,
    /// Comma-separated keywords
    pub keywords: String,
    pub lab: String,
    pub institution: String,
    /// IANA timezone of the recording site
    pub timezone: String,
}

impl Default for ConversionDefaults {
    fn default() -> Self {
        Self {
            experiment_description: "na".to_string(),
            related_publications: "https://doi.org/10.1038/s41593-022-01252-w".to_string(),
            keywords: "Integrated cardio-behavioral defensive states".to_string(),
            lab: "Defense Circuits Lab".to_string(),
            institution: "Institute of Clinical Neurobiologie - UKW".to_string(),
            timezone: "Europe/Berlin".to_string(),
        }
    }
}

/// Everything a batch run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory tree searched for session folders
    pub root_dir: PathBuf,
    /// Directory under which the timestamped output root is created
    pub output_dir: PathBuf,
    /// Manifest CSV listing the sessions to convert
    pub manifest_path: PathBuf,
    /// MAT file holding the mouse-line catalog
    pub lines_catalog: PathBuf,
    #[serde(default)]
    pub defaults: ConversionDefaults,
    /// Skip sessions whose output document already exists
    #[serde(default)]
    pub skip_existing: bool,
}

impl BatchConfig {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
        lines_catalog: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            output_dir: output_dir.into(),
            manifest_path: manifest_path.into(),
            lines_catalog: lines_catalog.into(),
            defaults: ConversionDefaults::default(),
            skip_existing: false,
        }
    }

    pub fn with_defaults(mut self, defaults: ConversionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    /// Checks that the input paths exist.
    ///
    /// The line catalog is not checked here: a missing catalog is reported
    /// per session as `noLinesCatalog`.
    pub fn validate(&self) -> Result<()> {
        if !self.root_dir.is_dir() {
            return Err(ConvertError::InvalidValue {
                field: "root_dir".to_string(),
                value: self.root_dir.display().to_string(),
            });
        }
        if !self.manifest_path.is_file() {
            return Err(ConvertError::InvalidValue {
                field: "manifest_path".to_string(),
                value: self.manifest_path.display().to_string(),
            });
        }
        Ok(())
    }

    /// Save configuration to a JSON file.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        fs::write(path, json_string)?;
        Ok(())
    }

    /// Load configuration from a JSON file.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: BatchConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }
}
