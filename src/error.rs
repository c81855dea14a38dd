//! Error types for the session converter.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Errors raised while scanning, extracting, assembling or persisting sessions.
///
/// Per-session errors are caught by the batch orchestrator and recorded in the
/// status report; only manifest and output-root errors abort a batch.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// Paired timestamp and value sequences differ in length
    #[error("shape mismatch: {timestamps} timestamps vs {values} values")]
    ShapeMismatch {
        /// Number of timestamps
        timestamps: usize,
        /// Number of values
        values: usize,
    },

    /// A device, electrode, channel or recording group was referenced by name
    /// before it was registered in the document
    #[error("unresolved {kind} reference: '{name}'")]
    UnresolvedReference {
        /// Kind of entity that was looked up
        kind: &'static str,
        /// Name that was looked up
        name: String,
    },

    /// A line code was not present in the line catalog
    #[error("line '{0}' is not listed in the line catalog")]
    UnresolvedLookup(String),

    /// A section name in the data/meta index has no registered builder
    #[error("no builder registered for section '{0}'")]
    UnknownSection(String),

    /// A section needs the session document, but session information was not built first
    #[error("section '{0}' requires session information to be assembled first")]
    SessionNotStarted(String),

    /// A wide-format table lacks the `{name}_time` / `{name}_data` pair for a series
    #[error("table {table} has no column pair for series '{series}'")]
    MissingColumnPair {
        /// Table file name
        table: String,
        /// Series name that was looked up
        series: String,
    },

    /// A required field of a metadata table was empty or missing
    #[error("metadata table {table} is missing field '{field}'")]
    MissingField {
        /// Table file name
        table: String,
        /// Column name
        field: String,
    },

    /// A metadata value could not be interpreted
    #[error("invalid value '{value}' for field '{field}'")]
    InvalidValue {
        /// Column name
        field: String,
        /// Offending cell text
        value: String,
    },

    /// The MAT file could not be decoded
    #[error("MAT decoding error in {path}: {message}")]
    Mat {
        /// File that failed to decode
        path: PathBuf,
        /// Description of the failure
        message: String,
    },

    /// An expected variable or nested field was not present in a MAT file
    #[error("MAT file {path} has no entry '{entry}'")]
    MissingMatEntry {
        /// File that was searched
        path: PathBuf,
        /// Dotted path of the missing entry
        entry: String,
    },

    /// The external media file of an image series could not be relocated
    #[error("cannot relocate external file {0}")]
    ExternalFile(PathBuf),

    /// Glob pattern could not be compiled
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ConvertError {
    pub(crate) fn mat(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ConvertError::Mat {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Short variant name used in status reports, e.g. `UnresolvedReference`.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::ShapeMismatch { .. } => "ShapeMismatch",
            ConvertError::UnresolvedReference { .. } => "UnresolvedReference",
            ConvertError::UnresolvedLookup(_) => "UnresolvedLookup",
            ConvertError::UnknownSection(_) => "UnknownSection",
            ConvertError::SessionNotStarted(_) => "SessionNotStarted",
            ConvertError::MissingColumnPair { .. } => "MissingColumnPair",
            ConvertError::MissingField { .. } => "MissingField",
            ConvertError::InvalidValue { .. } => "InvalidValue",
            ConvertError::Mat { .. } => "MatDecoding",
            ConvertError::MissingMatEntry { .. } => "MissingMatEntry",
            ConvertError::ExternalFile(_) => "ExternalFile",
            ConvertError::Pattern(_) => "Pattern",
            ConvertError::Csv(_) => "Csv",
            ConvertError::Json(_) => "Json",
            ConvertError::Io(_) => "Io",
        }
    }

    /// Failure kind and message as recorded in status reports,
    /// e.g. `MissingMatEntry: MAT file a.mat has no entry 'RGB'`.
    pub fn status(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

/// Named reasons a session extraction stops early.
///
/// These are expected outcomes of incomplete session folders, not errors:
/// the extractor returns them instead of raising, and the batch records the
/// code verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionFailure {
    /// Zero or several `.pl2` index files, or a malformed index file name
    NoProperSession,
    /// The line catalog file could not be read
    NoLinesCatalog,
    /// The session's line is not in the line catalog
    NoMatchingLine,
    /// Behavior requested but no `.DVT` frame timing file
    NoFrameTiming,
    /// Behavior or thermal requested but no `_Tracking.mat` file
    NoTrackingFile,
    /// Cardiac requested but no `_CardiacData.mat` export
    NoCardiacDataExport,
    /// Thermal requested but no `_Temperature.mat` file
    NoTemperatureFile,
}

impl ExtractionFailure {
    /// Status code written to the batch report.
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionFailure::NoProperSession => "noProperSession",
            ExtractionFailure::NoLinesCatalog => "noLinesCatalog",
            ExtractionFailure::NoMatchingLine => "noMatchingLine",
            ExtractionFailure::NoFrameTiming => "noDVT",
            ExtractionFailure::NoTrackingFile => "noTrackingFile",
            ExtractionFailure::NoCardiacDataExport => "noCardiacDataExport",
            ExtractionFailure::NoTemperatureFile => "noTemperatureFile",
        }
    }
}

impl fmt::Display for ExtractionFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.code())
    }
}
