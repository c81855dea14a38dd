//! Session, subject and device metadata.

use std::path::Path;

use serde::Serialize;

use super::{find_files, SessionSource, Stage, Staging, ENDPOINT_DEVICE, OPTO_DEVICE, VIDEO_DEVICE};
use crate::catalog::{LineCatalog, SubjectTraits, NOT_AVAILABLE};
use crate::config::ConversionDefaults;
use crate::error::{ConvertError, ExtractionFailure};
use crate::tables::Section;
use crate::types::SessionKey;

/// Devices present in every recording setup: (name, manufacturer, description).
pub const DEVICE_CATALOG: [(&str, &str, &str); 6] = [
    (ENDPOINT_DEVICE, "Plexon(Omniplex)", "Main digital-analog recording system"),
    (VIDEO_DEVICE, "Allied vision", "Top view RGB camera"),
    ("A655sc", "FLIR", "Top view for infra-red camera"),
    ("RZ6", "Tucker-Davis systems", "Real-time processor; sound generation"),
    (OPTO_DEVICE, "Doric", "Light source for opto-genetic stimulations"),
    ("Stimulus isolator", "npi", "DC current generator to deliver foot shocks"),
];

/// Timestamp format of `session_start_time`.
pub(crate) const START_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Serialize)]
struct SessionRow<'a> {
    session_description: &'a str,
    identifier: String,
    session_start_time: String,
    timezone: &'a str,
    session_id: &'a str,
    experimenter: &'a str,
    lab: &'a str,
    institution: &'a str,
    experiment_description: &'a str,
    related_publications: &'a str,
    keywords: &'a str,
}

#[derive(Debug, Serialize)]
struct SubjectRow<'a> {
    subject_id: String,
    description: &'a str,
    species: String,
    genotype: String,
    sex: String,
}

#[derive(Debug, Serialize)]
struct DeviceRow<'a> {
    name: &'a str,
    manufacturer: &'a str,
    description: &'a str,
}

/// Finds the single `.pl2` index file and parses its name.
pub(super) fn identify(session_dir: &Path) -> Stage<SessionKey> {
    let index_files = find_files(session_dir, "*.pl2")?;
    let index_file = match index_files.as_slice() {
        [single] => single,
        _ => {
            tracing::warn!(
                "Expected one .pl2 file in {}, found {}",
                session_dir.display(),
                index_files.len()
            );
            return Err(ExtractionFailure::NoProperSession.into());
        }
    };

    let stem = index_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    SessionKey::from_stem(&stem).ok_or_else(|| {
        tracing::warn!("Malformed index file name {}", index_file.display());
        ExtractionFailure::NoProperSession.into()
    })
}

pub(super) fn write_session(
    source: &SessionSource<'_>,
    experimenter: &str,
    defaults: &ConversionDefaults,
    staging: &mut Staging,
) -> Stage<()> {
    let key = &source.key;
    let start = key
        .recording_date()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or(ExtractionFailure::NoProperSession)?;

    let row = SessionRow {
        session_description: &key.paradigm,
        identifier: key.identifier(),
        session_start_time: start.format(START_TIME_FORMAT).to_string(),
        timezone: &defaults.timezone,
        session_id: &key.stem,
        experimenter,
        lab: &defaults.lab,
        institution: &defaults.institution,
        experiment_description: &defaults.experiment_description,
        related_publications: &defaults.related_publications,
        keywords: &defaults.keywords,
    };
    staging.write_meta(Section::SessionInformation, &[row])?;
    Ok(())
}

/// Species from the line catalog; genotype and sex from the mouse's
/// `_Meta.mat` file in the root directory, when present.
pub(super) fn write_subject(
    source: &SessionSource<'_>,
    lines: &LineCatalog,
    staging: &mut Staging,
) -> Stage<()> {
    let key = &source.key;
    let species = lines.species(&key.line).map_err(|e| match e {
        ConvertError::UnresolvedLookup(line) => {
            tracing::warn!("Line {} of {} is not in the line catalog", line, source.dir.display());
            ExtractionFailure::NoMatchingLine.into()
        }
        other => super::Halt::Error(other),
    })?;

    let traits = match source.dir.parent() {
        Some(root) => SubjectTraits::load(root.join(format!("{}_Meta.mat", key.root()))),
        None => SubjectTraits::default(),
    };

    let row = SubjectRow {
        subject_id: key.root(),
        description: NOT_AVAILABLE,
        species,
        genotype: traits.genotype,
        sex: traits.sex,
    };
    staging.write_meta(Section::SubjectInformation, &[row])?;
    Ok(())
}

pub(super) fn write_devices(staging: &mut Staging) -> Stage<()> {
    let rows: Vec<DeviceRow> = DEVICE_CATALOG
        .iter()
        .map(|&(name, manufacturer, description)| DeviceRow {
            name,
            manufacturer,
            description,
        })
        .collect();
    staging.write_meta(Section::DevicesInformation, &rows)?;
    Ok(())
}
