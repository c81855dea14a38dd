//! Intermediate tables exchanged between the extractor and the assembler.
//!
//! A session's staging directory holds:
//!
//! - `main-info-sheet.csv`, the data/meta index naming, per section, an
//!   optional main-data table and a metadata table;
//! - metadata tables, one row per item, read back header-keyed so that
//!   extra columns flow through as attributes;
//! - wide main-data tables with a `{name}_time` / `{name}_data` column pair
//!   per series, shorter columns padded with empty cells.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// File name of the data/meta index inside a staging directory.
pub const INFO_SHEET_FILE: &str = "main-info-sheet.csv";

/// Logical sections of an intermediate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    SessionInformation,
    SubjectInformation,
    DevicesInformation,
    ImagesInformation,
    EcgDevice,
    EcgElectrodes,
    EcgChannels,
    Acquisition,
    ProcessedData,
    BehavioralData,
    StimulationData,
    CardiacData,
}

impl Section {
    pub const ALL: [Section; 12] = [
        Section::SessionInformation,
        Section::SubjectInformation,
        Section::DevicesInformation,
        Section::ImagesInformation,
        Section::EcgDevice,
        Section::EcgElectrodes,
        Section::EcgChannels,
        Section::Acquisition,
        Section::ProcessedData,
        Section::BehavioralData,
        Section::StimulationData,
        Section::CardiacData,
    ];

    /// Key used in the data/meta index.
    pub fn name(self) -> &'static str {
        match self {
            Section::SessionInformation => "session_information",
            Section::SubjectInformation => "subject_information",
            Section::DevicesInformation => "devices_information",
            Section::ImagesInformation => "images_information",
            Section::EcgDevice => "ecg_device",
            Section::EcgElectrodes => "ecg_electrodes",
            Section::EcgChannels => "ecg_channels",
            Section::Acquisition => "acquisition",
            Section::ProcessedData => "processed_data",
            Section::BehavioralData => "behavioral_data",
            Section::StimulationData => "stimulation_data",
            Section::CardiacData => "cardiac_data",
        }
    }

    /// (main-data file, metadata file) written for this section.
    pub fn file_names(self) -> (Option<&'static str>, &'static str) {
        match self {
            Section::SessionInformation => (None, "session-meta.csv"),
            Section::SubjectInformation => (None, "subject-meta.csv"),
            Section::DevicesInformation => (None, "devices-meta.csv"),
            Section::ImagesInformation => (None, "images-meta.csv"),
            Section::EcgDevice => (None, "ecg-device-meta.csv"),
            Section::EcgElectrodes => (None, "ecg-electrodes-meta.csv"),
            Section::EcgChannels => (None, "ecg-channels-meta.csv"),
            Section::Acquisition => (Some("acquisition.csv"), "acquisition-meta.csv"),
            Section::ProcessedData => (Some("processedData.csv"), "processedData-meta.csv"),
            Section::BehavioralData => (Some("behavioralData.csv"), "behavioralData-meta.csv"),
            Section::StimulationData => (Some("stimulusData.csv"), "stimulusData-meta.csv"),
            Section::CardiacData => (Some("cardiacData.csv"), "cardiacData-meta.csv"),
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the data/meta index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFiles {
    #[serde(rename = "data/meta")]
    pub section: String,
    #[serde(rename = "mainData")]
    pub main_data: Option<String>,
    #[serde(rename = "metaData")]
    pub meta_data: String,
}

/// The data/meta index of one staged session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoSheet {
    pub entries: Vec<SectionFiles>,
}

impl InfoSheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a section using its standard file names.
    pub fn push(&mut self, section: Section) {
        let (main, meta) = section.file_names();
        self.entries.push(SectionFiles {
            section: section.name().to_string(),
            main_data: main.map(str::to_string),
            meta_data: meta.to_string(),
        });
    }

    pub fn contains(&self, section: Section) -> bool {
        self.entries.iter().any(|e| e.section == section.name())
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.section.as_str()).collect()
    }

    pub fn write(&self, dir: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(dir.join(INFO_SHEET_FILE))?;
        for entry in &self.entries {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(dir.join(INFO_SHEET_FILE))?;
        let entries = reader.deserialize().collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(InfoSheet { entries })
    }
}

/// Writes serializable rows as a metadata table.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Metadata cells that mean "no value".
fn is_null(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell.eq_ignore_ascii_case("nan")
}

/// A header-keyed metadata table.
#[derive(Debug, Clone)]
pub struct MetaTable {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MetaTable {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<Vec<Vec<String>>, _>>()?;
        Ok(MetaTable {
            name: file_label(path),
            headers,
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> impl Iterator<Item = MetaRow<'_>> {
        self.rows.iter().map(move |cells| MetaRow { table: self, cells })
    }

    /// The first row; single-row sections (session, subject) use this.
    pub fn first_row(&self) -> Result<MetaRow<'_>> {
        self.rows().next().ok_or_else(|| ConvertError::MissingField {
            table: self.name.clone(),
            field: "<row>".to_string(),
        })
    }
}

/// A row of a [`MetaTable`].
#[derive(Debug, Clone, Copy)]
pub struct MetaRow<'a> {
    table: &'a MetaTable,
    cells: &'a [String],
}

impl<'a> MetaRow<'a> {
    /// Non-null value of `field`.
    pub fn get(&self, field: &str) -> Option<&'a str> {
        let index = self.table.headers.iter().position(|h| h == field)?;
        self.cells
            .get(index)
            .map(String::as_str)
            .filter(|cell| !is_null(cell))
    }

    pub fn require(&self, field: &str) -> Result<&'a str> {
        self.get(field).ok_or_else(|| ConvertError::MissingField {
            table: self.table.name.clone(),
            field: field.to_string(),
        })
    }

    /// Parses a required numeric field.
    pub fn require_f64(&self, field: &str) -> Result<f64> {
        let value = self.require(field)?;
        value.trim().parse().map_err(|_| ConvertError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        })
    }

    /// All non-null fields except those in `exclude`, in column order.
    pub fn fields_except(&self, exclude: &[&str]) -> Vec<(&'a str, &'a str)> {
        self.table
            .headers
            .iter()
            .zip(self.cells.iter())
            .filter(|(h, c)| !exclude.contains(&h.as_str()) && !is_null(c))
            .map(|(h, c)| (h.as_str(), c.as_str()))
            .collect()
    }
}

/// Time column of a series: sample times, or one `[start, end]` range per row.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeColumn {
    Values(Vec<f64>),
    Ranges(Vec<Option<(f64, f64)>>),
}

impl TimeColumn {
    fn len(&self) -> usize {
        match self {
            TimeColumn::Values(v) => v.len(),
            TimeColumn::Ranges(r) => r.len(),
        }
    }

    fn cell(&self, row: usize) -> String {
        match self {
            TimeColumn::Values(v) => v.get(row).map(|x| format_number(*x)).unwrap_or_default(),
            TimeColumn::Ranges(r) => match r.get(row) {
                Some(Some((start, end))) if start.is_finite() && end.is_finite() => {
                    format!("[{}, {}]", format_number(*start), format_number(*end))
                }
                _ => String::new(),
            },
        }
    }
}

/// A series' paired columns.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesColumns {
    pub name: String,
    pub time: TimeColumn,
    pub data: Vec<f64>,
}

impl SeriesColumns {
    pub fn new(name: impl Into<String>, time: Vec<f64>, data: Vec<f64>) -> Self {
        SeriesColumns {
            name: name.into(),
            time: TimeColumn::Values(time),
            data,
        }
    }

    /// A range-encoded epoch series; its data column is left empty.
    pub fn ranges(name: impl Into<String>, ranges: Vec<Option<(f64, f64)>>) -> Self {
        let data = vec![f64::NAN; ranges.len()];
        SeriesColumns {
            name: name.into(),
            time: TimeColumn::Ranges(ranges),
            data,
        }
    }
}

fn format_number(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

fn parse_number(field: &str, cell: &str) -> Result<f64> {
    if is_null(cell) {
        return Ok(f64::NAN);
    }
    cell.trim().parse().map_err(|_| ConvertError::InvalidValue {
        field: field.to_string(),
        value: cell.to_string(),
    })
}

fn parse_range(field: &str, cell: &str) -> Result<Option<(f64, f64)>> {
    if is_null(cell) {
        return Ok(None);
    }
    let invalid = || ConvertError::InvalidValue {
        field: field.to_string(),
        value: cell.to_string(),
    };
    let inner = cell
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(invalid)?;
    let mut parts = inner.split(',').map(str::trim);
    let start = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
    let end = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(Some((start, end)))
}

/// Writes series as a wide table, padding shorter columns with empty cells.
pub fn write_wide_table(path: &Path, series: &[SeriesColumns]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    let headers: Vec<String> = series
        .iter()
        .flat_map(|s| [format!("{}_time", s.name), format!("{}_data", s.name)])
        .collect();
    writer.write_record(&headers)?;

    let row_count = series
        .iter()
        .map(|s| s.time.len().max(s.data.len()))
        .max()
        .unwrap_or(0);
    for row in 0..row_count {
        let record: Vec<String> = series
            .iter()
            .flat_map(|s| {
                let data = s.data.get(row).map(|v| format_number(*v)).unwrap_or_default();
                [s.time.cell(row), data]
            })
            .collect();
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// A wide main-data table loaded from disk, with its column pairs validated.
#[derive(Debug, Clone)]
pub struct WideTable {
    name: String,
    columns: HashMap<String, Vec<String>>,
}

impl WideTable {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (i, column) in cells.iter_mut().enumerate() {
                column.push(record.get(i).unwrap_or_default().to_string());
            }
        }

        let table = WideTable {
            name: file_label(path),
            columns: headers.into_iter().zip(cells).collect(),
        };
        table.validate_pairs()?;
        Ok(table)
    }

    fn validate_pairs(&self) -> Result<()> {
        for header in self.columns.keys() {
            let partner = if let Some(stem) = header.strip_suffix("_time") {
                format!("{}_data", stem)
            } else if let Some(stem) = header.strip_suffix("_data") {
                format!("{}_time", stem)
            } else {
                continue;
            };
            if !self.columns.contains_key(&partner) {
                let series = header[..header.len() - 5].to_string();
                return Err(ConvertError::MissingColumnPair {
                    table: self.name.clone(),
                    series,
                });
            }
        }
        Ok(())
    }

    /// Typed columns of series `name`.
    ///
    /// A time column whose first non-empty cell starts with `[` is read as a
    /// range list; otherwise both columns are numeric, with empty cells as NaN.
    pub fn series(&self, name: &str) -> Result<SeriesColumns> {
        let time_key = format!("{}_time", name);
        let data_key = format!("{}_data", name);
        let (time_cells, data_cells) =
            match (self.columns.get(&time_key), self.columns.get(&data_key)) {
                (Some(t), Some(d)) => (t, d),
                _ => {
                    return Err(ConvertError::MissingColumnPair {
                        table: self.name.clone(),
                        series: name.to_string(),
                    })
                }
            };

        let is_ranges = time_cells
            .iter()
            .find(|c| !is_null(c))
            .map(|c| c.trim_start().starts_with('['))
            .unwrap_or(false);

        let time = if is_ranges {
            TimeColumn::Ranges(
                time_cells
                    .iter()
                    .map(|c| parse_range(&time_key, c))
                    .collect::<Result<_>>()?,
            )
        } else {
            TimeColumn::Values(
                time_cells
                    .iter()
                    .map(|c| parse_number(&time_key, c))
                    .collect::<Result<_>>()?,
            )
        };
        let data = data_cells
            .iter()
            .map(|c| parse_number(&data_key, c))
            .collect::<Result<_>>()?;

        Ok(SeriesColumns {
            name: name.to_string(),
            time,
            data,
        })
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Resolves a section's files against the staging directory.
pub fn section_paths(dir: &Path, files: &SectionFiles) -> (Option<PathBuf>, PathBuf) {
    (
        files.main_data.as_ref().map(|m| dir.join(m)),
        dir.join(&files.meta_data),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn wide_table_pads_unequal_columns_and_reads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("behavioralData.csv");
        let series = vec![
            SeriesColumns::new("speed", vec![0.0, 0.1, 0.2], vec![1.0, f64::NAN, 3.0]),
            SeriesColumns::ranges("Rearing", vec![Some((1.5, 2.0)), Some((4.0, 6.25))]),
        ];
        write_wide_table(&path, &series).unwrap();

        let table = WideTable::load(&path).unwrap();
        let speed = table.series("speed").unwrap();
        assert_eq!(speed.time, TimeColumn::Values(vec![0.0, 0.1, 0.2]));
        assert!(speed.data[1].is_nan());

        let rearing = table.series("Rearing").unwrap();
        assert_eq!(
            rearing.time,
            TimeColumn::Ranges(vec![Some((1.5, 2.0)), Some((4.0, 6.25)), None])
        );
        assert!(rearing.data.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn ranges_with_a_missing_bound_load_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("behavioralData.csv");
        let series = vec![SeriesColumns::ranges(
            "Rearing",
            vec![Some((1.0, 2.0)), Some((f64::NAN, 3.0)), Some((4.0, f64::INFINITY))],
        )];
        write_wide_table(&path, &series).unwrap();

        let rearing = WideTable::load(&path).unwrap().series("Rearing").unwrap();
        assert_eq!(rearing.time, TimeColumn::Ranges(vec![Some((1.0, 2.0)), None, None]));
    }

    #[test]
    fn unpaired_column_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processedData.csv");
        fs::write(&path, "a_time,a_data,b_time\n0,1,0\n").unwrap();
        let err = WideTable::load(&path).unwrap_err();
        assert!(matches!(err, ConvertError::MissingColumnPair { ref series, .. } if series == "b"));
    }

    #[test]
    fn unknown_series_is_a_missing_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cardiacData.csv");
        write_wide_table(&path, &[SeriesColumns::new("ecg", vec![0.0], vec![0.1])]).unwrap();
        let table = WideTable::load(&path).unwrap();
        assert!(matches!(
            table.series("heartRate"),
            Err(ConvertError::MissingColumnPair { .. })
        ));
    }

    #[test]
    fn meta_rows_treat_empty_and_nan_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices-meta.csv");
        fs::write(&path, "name,manufacturer,description\nRZ6,nan,\n").unwrap();
        let table = MetaTable::load(&path).unwrap();
        let row = table.first_row().unwrap();
        assert_eq!(row.get("name"), Some("RZ6"));
        assert_eq!(row.get("manufacturer"), None);
        assert_eq!(row.fields_except(&[]), vec![("name", "RZ6")]);
        assert!(matches!(row.require("description"), Err(ConvertError::MissingField { .. })));
    }

    #[test]
    fn info_sheet_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = InfoSheet::new();
        sheet.push(Section::SessionInformation);
        sheet.push(Section::BehavioralData);
        sheet.write(dir.path()).unwrap();

        let loaded = InfoSheet::load(dir.path()).unwrap();
        assert_eq!(loaded, sheet);
        assert_eq!(loaded.entries[0].main_data, None);
        assert_eq!(loaded.entries[1].main_data.as_deref(), Some("behavioralData.csv"));
    }
}
