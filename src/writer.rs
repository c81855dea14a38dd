//! Persistence of assembled documents.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::document::SessionDocument;
use crate::error::Result;

/// Persists a [`SessionDocument`] into a session output directory.
pub trait DocumentWriter {
    /// Path of the document `write` would produce inside `dir` for `name`.
    fn document_path(&self, dir: &Path, name: &str) -> PathBuf;

    /// Writes `document` into `dir` and returns the written path.
    fn write(&self, document: &SessionDocument, dir: &Path, name: &str) -> Result<PathBuf>;
}

/// Writes documents as pretty-printed JSON, `<name>.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDocumentWriter;

impl DocumentWriter for JsonDocumentWriter {
    fn document_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{}.json", name))
    }

    fn write(&self, document: &SessionDocument, dir: &Path, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = self.document_path(dir, name);
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, document)?;
        Ok(path)
    }
}

/// Reads back a document written by [`JsonDocumentWriter`].
pub fn read_json_document<P: AsRef<Path>>(path: P) -> Result<SessionDocument> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
