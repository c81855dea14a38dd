//! Session extraction.
//!
//! Reads one session folder (MAT exports, the `.DVT` frame timing file, the
//! video) together with the lab catalogs and writes the intermediate tables
//! into a fresh staging directory `<session>/session_tables`.
//!
//! Extraction stops at the first unmet precondition and reports it as an
//! [`ExtractionFailure`]; in that case the staging directory is removed.

mod behavior;
mod cardiac;
mod events;
mod imaging;
mod session;
mod thermal;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::LineCatalog;
use crate::config::ConversionDefaults;
use crate::error::{ConvertError, ExtractionFailure, Result};
use crate::tables::{self, InfoSheet, Section, SeriesColumns};
use crate::types::{DataRequest, SessionKey};

pub use session::DEVICE_CATALOG;
pub(crate) use session::START_TIME_FORMAT;

/// Name of the staging directory created inside a session folder.
pub const STAGING_DIR: &str = "session_tables";

/// Recording system every other device reports to.
pub const ENDPOINT_DEVICE: &str = "endpoint_recording_device";
/// Camera that records the behavior video.
pub const VIDEO_DEVICE: &str = "Pike camera";
/// Light source used for optogenetic stimulation.
pub const OPTO_DEVICE: &str = "Ce:YAG Laser diode";

/// Result of extracting one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// Tables were written; the index lists the sections present.
    Success(InfoSheet),
    /// A precondition was not met; nothing is left on disk.
    Failed(ExtractionFailure),
}

/// Why a stage stopped: an expected failure code or an unexpected error.
#[derive(Debug)]
pub(crate) enum Halt {
    Failure(ExtractionFailure),
    Error(ConvertError),
}

impl From<ExtractionFailure> for Halt {
    fn from(failure: ExtractionFailure) -> Self {
        Halt::Failure(failure)
    }
}

impl From<ConvertError> for Halt {
    fn from(error: ConvertError) -> Self {
        Halt::Error(error)
    }
}

impl From<io::Error> for Halt {
    fn from(error: io::Error) -> Self {
        Halt::Error(error.into())
    }
}

impl From<csv::Error> for Halt {
    fn from(error: csv::Error) -> Self {
        Halt::Error(error.into())
    }
}

pub(crate) type Stage<T> = std::result::Result<T, Halt>;

/// Staging directory of `session_dir`.
pub fn staging_dir(session_dir: &Path) -> PathBuf {
    session_dir.join(STAGING_DIR)
}

/// Files of `dir` matching a glob `pattern` relative to it, sorted.
pub(crate) fn find_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = format!("{}/{}", Pattern::escape(&dir.to_string_lossy()), pattern);
    let mut found = Vec::new();
    for entry in glob::glob(&full)? {
        match entry {
            Ok(path) if path.is_file() => found.push(path),
            Ok(_) => {}
            Err(e) => debug!("Skipping unreadable path: {}", e),
        }
    }
    Ok(found)
}

/// The first file matching `pattern`, warning when several match.
pub(crate) fn first_file(dir: &Path, pattern: &str) -> Result<Option<PathBuf>> {
    let mut found = find_files(dir, pattern)?;
    if found.len() > 1 {
        warn!(
            "{} files match {} in {}; using {}",
            found.len(),
            pattern,
            dir.display(),
            found[0].display()
        );
    }
    Ok(if found.is_empty() { None } else { Some(found.swap_remove(0)) })
}

/// The session being extracted.
pub(crate) struct SessionSource<'a> {
    pub dir: &'a Path,
    pub key: SessionKey,
}

/// Collects the tables of one session and records them in the index.
pub(crate) struct Staging {
    dir: PathBuf,
    sheet: InfoSheet,
}

impl Staging {
    fn create(dir: PathBuf) -> Result<Self> {
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(Staging {
            dir,
            sheet: InfoSheet::new(),
        })
    }

    /// Writes a metadata-only section.
    pub fn write_meta<T: Serialize>(&mut self, section: Section, rows: &[T]) -> Result<()> {
        let (_, meta) = section.file_names();
        tables::write_rows(&self.dir.join(meta), rows)?;
        self.sheet.push(section);
        Ok(())
    }

    /// Writes a section with main data and one metadata row per series.
    pub fn write_series<T: Serialize>(
        &mut self,
        section: Section,
        series: &[SeriesColumns],
        rows: &[T],
    ) -> Result<()> {
        let (main, meta) = section.file_names();
        if let Some(main) = main {
            tables::write_wide_table(&self.dir.join(main), series)?;
        }
        tables::write_rows(&self.dir.join(meta), rows)?;
        self.sheet.push(section);
        Ok(())
    }
}

/// Extracts sessions into intermediate tables.
#[derive(Debug, Clone)]
pub struct SessionExtractor {
    lines_catalog: PathBuf,
    defaults: ConversionDefaults,
}

impl SessionExtractor {
    pub fn new(lines_catalog: impl Into<PathBuf>, defaults: ConversionDefaults) -> Self {
        Self {
            lines_catalog: lines_catalog.into(),
            defaults,
        }
    }

    /// Extracts the session in `session_dir`.
    ///
    /// On success the tables stay in [`staging_dir`] for the assembler. On a
    /// failure code or an error the staging directory is removed.
    pub fn extract(
        &self,
        session_dir: &Path,
        experimenter: &str,
        request: DataRequest,
    ) -> Result<ExtractionOutcome> {
        let mut staging = Staging::create(staging_dir(session_dir))?;

        match self.run(session_dir, experimenter, request, &mut staging) {
            Ok(()) => {
                info!(
                    "Extracted {} sections from {}",
                    staging.sheet.entries.len(),
                    session_dir.display()
                );
                Ok(ExtractionOutcome::Success(staging.sheet))
            }
            Err(halt) => {
                if let Err(e) = fs::remove_dir_all(&staging.dir) {
                    warn!("Could not remove {}: {}", staging.dir.display(), e);
                }
                match halt {
                    Halt::Failure(failure) => {
                        warn!("Extraction of {} stopped: {}", session_dir.display(), failure);
                        Ok(ExtractionOutcome::Failed(failure))
                    }
                    Halt::Error(error) => Err(error),
                }
            }
        }
    }

    fn run(
        &self,
        session_dir: &Path,
        experimenter: &str,
        request: DataRequest,
        staging: &mut Staging,
    ) -> Stage<()> {
        let key = session::identify(session_dir)?;
        let lines = LineCatalog::load(&self.lines_catalog).map_err(|e| {
            warn!("Cannot read line catalog {}: {}", self.lines_catalog.display(), e);
            ExtractionFailure::NoLinesCatalog
        })?;
        let source = SessionSource { dir: session_dir, key };

        session::write_session(&source, experimenter, &self.defaults, staging)?;
        session::write_subject(&source, &lines, staging)?;
        session::write_devices(staging)?;

        if request.behaviour {
            behavior::extract(&source, staging)?;
        }
        if request.heart_rate {
            cardiac::extract(&source, staging)?;
        }
        if request.thermal {
            thermal::extract(&source, staging)?;
        }
        events::extract(&source, staging)?;
        imaging::extract(&source, staging)?;

        staging.sheet.write(&staging.dir)?;
        Ok(())
    }
}
