//! Batch conversion of every session listed in a manifest.
//!
//! ```text
//! manifest.csv ──► scan_manifest ──► scan_report_{stamp}.csv
//!                       │
//!                       ▼  (uniquely resolved sessions, in manifest order)
//!            SessionExtractor ──► session_tables/
//!                       │
//!                       ▼
//!            DocumentAssembler ──► DocumentWriter ──► <session_name>/
//!                       │
//!                       ▼
//!            conversion_report_{stamp}.csv  (rewritten after every session)
//! ```
//!
//! Sessions run one after another. A session that fails is recorded in the
//! status report and the batch moves on; only an unreadable manifest or an
//! output root that cannot be created aborts the run.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::assembler::{finalize_media, DocumentAssembler};
use crate::config::BatchConfig;
use crate::error::{ConvertError, Result};
use crate::extractor::{staging_dir, ExtractionOutcome, SessionExtractor};
use crate::locator::{scan_manifest, ResolutionResult};
use crate::types::read_manifest;
use crate::writer::{DocumentWriter, JsonDocumentWriter};

/// Status of a stage that completed.
pub const SUCCESS: &str = "success";
/// Status of a session skipped because its document already exists.
pub const SKIPPED: &str = "skipped";
/// Assembly status when extraction did not succeed.
pub const NOT_ATTEMPTED: &str = "notAttempted";

/// One row of the conversion status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRow {
    pub session: String,
    /// `success`, `skipped`, an extraction failure code or an error kind
    pub extraction: String,
    /// `success`, `skipped`, `notAttempted` or an error kind
    pub assembly: String,
}

impl StatusRow {
    fn new(session: &str, extraction: &str, assembly: &str) -> Self {
        StatusRow {
            session: session.to_string(),
            extraction: extraction.to_string(),
            assembly: assembly.to_string(),
        }
    }

    pub fn is_converted(&self) -> bool {
        self.extraction == SUCCESS && self.assembly == SUCCESS
    }
}

pub fn write_status_report(path: &Path, rows: &[StatusRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_status_report(path: &Path) -> Result<Vec<StatusRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// What a batch run produced.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// The timestamped `Conversions-*` directory
    pub output_root: PathBuf,
    pub scan_report: PathBuf,
    pub status_report: PathBuf,
    pub manifest_rows: usize,
    pub unique_sessions: usize,
    pub statuses: Vec<StatusRow>,
}

impl BatchSummary {
    pub fn converted(&self) -> usize {
        self.statuses.iter().filter(|s| s.is_converted()).count()
    }
}

/// Runs the locator, extractor, assembler and writer over a manifest.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator<W = JsonDocumentWriter> {
    config: BatchConfig,
    extractor: SessionExtractor,
    assembler: DocumentAssembler,
    writer: W,
}

impl BatchOrchestrator<JsonDocumentWriter> {
    pub fn new(config: BatchConfig) -> Self {
        Self::with_writer(config, JsonDocumentWriter)
    }
}

impl<W: DocumentWriter> BatchOrchestrator<W> {
    pub fn with_writer(config: BatchConfig, writer: W) -> Self {
        let extractor = SessionExtractor::new(&config.lines_catalog, config.defaults.clone());
        Self {
            config,
            extractor,
            assembler: DocumentAssembler::default(),
            writer,
        }
    }

    pub fn with_assembler(mut self, assembler: DocumentAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn run(&self) -> Result<BatchSummary> {
        self.config.validate()?;

        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let output_root = self.config.output_dir.join(format!("Conversions-{}", stamp));
        fs::create_dir_all(&output_root)?;
        info!("Writing conversions to {}", output_root.display());

        let rows = read_manifest(&self.config.manifest_path)?;
        let scan_report = output_root.join(format!("scan_report_{}.csv", stamp));
        let results = scan_manifest(&rows, &self.config.root_dir, &scan_report)?;

        let unique: Vec<&ResolutionResult> = results.iter().filter(|r| r.is_unique()).collect();
        info!("{} unique sessions out of {} manifest rows", unique.len(), rows.len());
        if unique.is_empty() {
            warn!(
                "No manifest row resolved to exactly one session; see {}",
                scan_report.display()
            );
        }

        let status_report = output_root.join(format!("conversion_report_{}.csv", stamp));
        let mut statuses = Vec::with_capacity(unique.len());
        for (i, result) in unique.iter().enumerate() {
            info!(
                "({}/{}) Converting {}",
                i + 1,
                unique.len(),
                result.row.session_name()
            );
            statuses.push(self.convert(result, &output_root));
            if let Err(e) = write_status_report(&status_report, &statuses) {
                warn!("Could not write {}: {}", status_report.display(), e);
            }
        }

        let summary = BatchSummary {
            output_root,
            scan_report,
            status_report,
            manifest_rows: rows.len(),
            unique_sessions: unique.len(),
            statuses,
        };
        info!(
            "Batch complete: {} of {} sessions converted",
            summary.converted(),
            summary.unique_sessions
        );
        Ok(summary)
    }

    /// An existing document for `name` under any previous output root.
    fn existing_document(&self, name: &str) -> Result<Option<PathBuf>> {
        let dir = PathBuf::from(Pattern::escape(&self.config.output_dir.to_string_lossy()))
            .join("Conversions-*")
            .join(Pattern::escape(name));
        let pattern = self.writer.document_path(&dir, &Pattern::escape(name));
        Ok(glob::glob(&pattern.to_string_lossy())?
            .filter_map(|entry| entry.ok())
            .find(|path| path.is_file()))
    }

    /// Converts one session. Every failure, cleanup included, becomes part
    /// of the returned status.
    fn convert(&self, result: &ResolutionResult, output_root: &Path) -> StatusRow {
        let name = result.row.session_name();
        let session_dir = match result.session_dir() {
            Some(dir) => dir,
            None => return StatusRow::new(&name, NOT_ATTEMPTED, NOT_ATTEMPTED),
        };

        if self.config.skip_existing {
            match self.existing_document(&name) {
                Ok(Some(existing)) => {
                    info!("Skipping {}: {} exists", name, existing.display());
                    return StatusRow::new(&name, SKIPPED, SKIPPED);
                }
                Ok(None) => {}
                Err(e) => warn!("Could not look for an existing {} document: {}", name, e),
            }
        }

        let outcome = self
            .extractor
            .extract(session_dir, &result.row.experimenter, result.row.request());
        let status = match outcome {
            Ok(ExtractionOutcome::Success(_)) => {
                let document_dir = output_root.join(&name);
                let assembly = match self.assemble(session_dir, &document_dir, &name) {
                    Ok(path) => {
                        info!("Wrote {}", path.display());
                        SUCCESS.to_string()
                    }
                    Err(e) => {
                        warn!("Assembly of {} failed: {}", name, e);
                        let mut assembly = e.status();
                        if document_dir.exists() {
                            if let Err(cleanup) = fs::remove_dir_all(&document_dir) {
                                warn!("Could not remove {}: {}", document_dir.display(), cleanup);
                                assembly = format!(
                                    "{}; {}",
                                    assembly,
                                    ConvertError::from(cleanup).status()
                                );
                            }
                        }
                        assembly
                    }
                };
                StatusRow::new(&name, SUCCESS, &assembly)
            }
            Ok(ExtractionOutcome::Failed(failure)) => {
                StatusRow::new(&name, failure.code(), NOT_ATTEMPTED)
            }
            Err(e) => {
                warn!("Extraction of {} failed: {}", name, e);
                StatusRow::new(&name, &e.status(), NOT_ATTEMPTED)
            }
        };

        let staged = staging_dir(session_dir);
        if staged.exists() {
            if let Err(e) = fs::remove_dir_all(&staged) {
                warn!("Could not remove {}: {}", staged.display(), e);
            }
        }
        debug!("{} -> {:?}", name, status);
        status
    }

    fn assemble(&self, session_dir: &Path, document_dir: &Path, name: &str) -> Result<PathBuf> {
        let mut document = self.assembler.assemble(&staging_dir(session_dir))?;
        fs::create_dir_all(document_dir)?;
        finalize_media(&mut document, document_dir)?;
        self.writer.write(&document, document_dir, name)
    }
}
