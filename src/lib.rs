pub mod assembler;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod document;
pub mod error;
pub mod extractor;
pub mod locator;
pub mod mat;
pub mod signal;
pub mod tables;
pub mod types;
pub mod writer;

use std::path::Path;

// Re-export types
pub use assembler::{DocumentAssembler, SectionRegistry};
pub use batch::{BatchOrchestrator, BatchSummary, StatusRow};
pub use config::{BatchConfig, ConversionDefaults};
pub use document::SessionDocument;
pub use error::{ConvertError, ExtractionFailure, Result};
pub use extractor::{ExtractionOutcome, SessionExtractor};
pub use types::*;
pub use writer::{DocumentWriter, JsonDocumentWriter};

/// Runs a batch conversion described by a JSON configuration file.
///
/// # Examples
///
/// ```no_run
/// use session_converter::convert;
///
/// match convert("batch.json") {
///     Ok(summary) => println!("{} of {} sessions converted", summary.converted(), summary.unique_sessions),
///     Err(e) => println!("Batch aborted: {}", e),
/// }
/// ```
pub fn convert<P: AsRef<Path>>(config_path: P) -> Result<BatchSummary> {
    let config = BatchConfig::load_json(config_path)?;
    BatchOrchestrator::new(config).run()
}
