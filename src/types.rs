use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

/// One requested session from the batch manifest.
///
/// The manifest is a CSV file with the columns `Line, MouseID, Date,
/// Paradigm, Experimenter, Behaviour, HeartRate, Thermal`. The three flag
/// columns select which data families are extracted for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    /// Mouse line code, e.g. `M1`
    #[serde(rename = "Line")]
    pub line: String,
    /// Mouse identifier within the line
    #[serde(rename = "MouseID")]
    pub mouse_id: String,
    /// Recording date as `YYMMDD`
    #[serde(rename = "Date")]
    pub date: String,
    /// Behavioral paradigm name
    #[serde(rename = "Paradigm")]
    pub paradigm: String,
    /// Person who ran the session
    #[serde(rename = "Experimenter", default)]
    pub experimenter: String,
    /// Extract behavioral tracking
    #[serde(rename = "Behaviour", deserialize_with = "deserialize_flag")]
    pub behaviour: bool,
    /// Extract cardiac recordings
    #[serde(rename = "HeartRate", deserialize_with = "deserialize_flag")]
    pub heart_rate: bool,
    /// Extract thermal imaging
    #[serde(rename = "Thermal", deserialize_with = "deserialize_flag")]
    pub thermal: bool,
}

impl ManifestRow {
    /// Name of the mouse's root directory, `{Line}_{MouseID}`.
    pub fn root(&self) -> String {
        format!("{}_{}", self.line, self.mouse_id)
    }

    /// Suffix of the session directory name, `{Date}_{Paradigm}`.
    pub fn date_paradigm(&self) -> String {
        format!("{}_{}", self.date, self.paradigm)
    }

    /// Name of the session's output directory, `{root}_{Date}_{Paradigm}`.
    pub fn session_name(&self) -> String {
        format!("{}_{}", self.root(), self.date_paradigm())
    }

    /// Which data families the manifest requests for this session.
    pub fn request(&self) -> DataRequest {
        DataRequest {
            behaviour: self.behaviour,
            heart_rate: self.heart_rate,
            thermal: self.thermal,
        }
    }
}

/// Reads every row of a manifest CSV file, in file order.
pub fn read_manifest<P: AsRef<Path>>(file_path: P) -> Result<Vec<ManifestRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(file_path.as_ref())?;
    let rows = reader.deserialize().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Interprets a manifest flag cell.
///
/// Accepts `0/1`, `true/false`, `yes/no` and `y/n`, case-insensitively.
pub fn parse_flag(cell: &str) -> Option<bool> {
    match cell.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" | "y" => Some(true),
        "0" | "0.0" | "false" | "no" | "n" | "" => Some(false),
        _ => None,
    }
}

pub(crate) fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let cell = String::deserialize(deserializer)?;
    parse_flag(&cell)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized flag value '{}'", cell)))
}

/// Data families requested for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataRequest {
    pub behaviour: bool,
    pub heart_rate: bool,
    pub thermal: bool,
}

/// Identity of a session, parsed from the stem of its `.pl2` index file
/// (`{line}_{mouse}_{YYMMDD}_{paradigm}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub line: String,
    pub mouse: String,
    /// Date as written in the file name (`YYMMDD`)
    pub date: String,
    pub paradigm: String,
    /// The full stem, used as the session id
    pub stem: String,
}

impl SessionKey {
    /// Parses an index file stem. Tokens after the fourth are ignored;
    /// fewer than four tokens or an invalid date yield `None`.
    pub fn from_stem(stem: &str) -> Option<Self> {
        let mut tokens = stem.split('_');
        let line = tokens.next().filter(|t| !t.is_empty())?;
        let mouse = tokens.next().filter(|t| !t.is_empty())?;
        let date = tokens.next()?;
        let paradigm = tokens.next().filter(|t| !t.is_empty())?;

        let key = SessionKey {
            line: line.to_string(),
            mouse: mouse.to_string(),
            date: date.to_string(),
            paradigm: paradigm.to_string(),
            stem: stem.to_string(),
        };
        key.recording_date()?;
        Some(key)
    }

    /// Calendar date of the recording (`YYMMDD` read as `20YY-MM-DD`).
    pub fn recording_date(&self) -> Option<NaiveDate> {
        if self.date.len() != 6 || !self.date.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year: i32 = self.date[0..2].parse().ok()?;
        let month: u32 = self.date[2..4].parse().ok()?;
        let day: u32 = self.date[4..6].parse().ok()?;
        NaiveDate::from_ymd_opt(2000 + year, month, day)
    }

    /// `{line}_{mouse}`
    pub fn root(&self) -> String {
        format!("{}_{}", self.line, self.mouse)
    }

    /// Document identifier, `{line}_{mouse}:{paradigm}`.
    pub fn identifier(&self) -> String {
        format!("{}_{}:{}", self.line, self.mouse, self.paradigm)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.stem)
    }
}
