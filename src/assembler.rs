//! Builds a [`SessionDocument`] from a staging directory.
//!
//! The data/meta index lists the sections that were staged. Each section is
//! dispatched by name to a builder from a [`SectionRegistry`]; builders read
//! the section's metadata rows and, when present, its wide main-data table.
//! Sections are processed in index order, so a section may only reference
//! entities (devices, electrode tables) registered by earlier ones.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::document::{
    AcquisitionItem, Attributes, CardiacInterface, CardiacKind, CardiacSeries, Channel,
    ChannelTable, Container, DataInterface, Device, Electrode, ElectrodeTable, ImageSeries,
    IntervalSeries, OgenSite, OptogeneticSeries, SessionDocument, SessionInfo, StimulusItem,
    Subject, TimeSeries,
};
use crate::error::{ConvertError, Result};
use crate::extractor::START_TIME_FORMAT;
use crate::signal::{align_and_mask, edges_from_mask, edges_from_ranges, split_transitions};
use crate::tables::{section_paths, InfoSheet, MetaRow, MetaTable, Section, TimeColumn, WideTable};

/// Device name of the ECG amplifier.
pub const ECG_RECORDING_DEVICE: &str = "recording_device";
/// Processing module holding behavioral series.
pub const BEHAVIOR_MODULE: &str = "behavior";
/// Processing module holding processed cardiac series.
pub const CARDIAC_MODULE: &str = "cardio_module";
/// Directory beside the document that receives external media.
pub const RECORDINGS_DIR: &str = "recordings";

const ECG_TABLE_DESCRIPTION: &str = "ECG recording electrodes table";

/// A section as handed to its builder.
pub struct SectionInput {
    pub name: String,
    pub meta: MetaTable,
    pub main: Option<WideTable>,
}

impl SectionInput {
    fn main(&self) -> Result<&WideTable> {
        self.main.as_ref().ok_or_else(|| ConvertError::MissingField {
            table: self.meta.name().to_string(),
            field: "mainData".to_string(),
        })
    }

    /// Timestamps and values of series `data_index`, NaN samples excluded.
    fn samples(&self, data_index: &str) -> Result<(Vec<f64>, Vec<f64>)> {
        let columns = self.main()?.series(data_index)?;
        match columns.time {
            TimeColumn::Values(times) => align_and_mask(&times, &columns.data),
            TimeColumn::Ranges(_) => Err(ConvertError::InvalidValue {
                field: format!("{}_time", data_index),
                value: "range list".to_string(),
            }),
        }
    }
}

/// The document under construction.
#[derive(Debug, Default)]
pub struct Assembly {
    document: Option<SessionDocument>,
}

impl Assembly {
    /// The document, which exists once session information was built.
    pub fn document(&mut self, section: &str) -> Result<&mut SessionDocument> {
        self.document
            .as_mut()
            .ok_or_else(|| ConvertError::SessionNotStarted(section.to_string()))
    }
}

/// Builds one section into the document.
pub type SectionBuilder = fn(&mut Assembly, &SectionInput) -> Result<()>;

/// Section name to builder.
#[derive(Clone, Default)]
pub struct SectionRegistry {
    builders: HashMap<String, SectionBuilder>,
}

impl fmt::Debug for SectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("SectionRegistry").field("sections", &names).finish()
    }
}

impl SectionRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with a builder for every staged section.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        let builders: [(Section, SectionBuilder); 12] = [
            (Section::SessionInformation, build_session),
            (Section::SubjectInformation, build_subject),
            (Section::DevicesInformation, build_devices),
            (Section::ImagesInformation, build_images),
            (Section::EcgDevice, build_ecg_device),
            (Section::EcgElectrodes, build_ecg_electrodes),
            (Section::EcgChannels, build_ecg_channels),
            (Section::Acquisition, build_acquisition),
            (Section::ProcessedData, build_processed),
            (Section::BehavioralData, build_behavior),
            (Section::StimulationData, build_stimulation),
            (Section::CardiacData, build_cardiac),
        ];
        for (section, builder) in builders {
            registry.register(section.name(), builder);
        }
        registry
    }

    /// Registers `builder` for `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, builder: SectionBuilder) {
        self.builders.insert(name.into(), builder);
    }

    pub fn get(&self, name: &str) -> Result<SectionBuilder> {
        self.builders
            .get(name)
            .copied()
            .ok_or_else(|| ConvertError::UnknownSection(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }
}

/// Turns staged sessions into documents.
#[derive(Debug, Clone)]
pub struct DocumentAssembler {
    registry: SectionRegistry,
}

impl Default for DocumentAssembler {
    fn default() -> Self {
        Self::new(SectionRegistry::standard())
    }
}

impl DocumentAssembler {
    pub fn new(registry: SectionRegistry) -> Self {
        Self { registry }
    }

    pub fn assemble(&self, staging_dir: &Path) -> Result<SessionDocument> {
        let sheet = InfoSheet::load(staging_dir)?;
        let mut assembly = Assembly::default();

        for files in &sheet.entries {
            let builder = self.registry.get(&files.section)?;
            let (main_path, meta_path) = section_paths(staging_dir, files);
            let input = SectionInput {
                name: files.section.clone(),
                meta: MetaTable::load(&meta_path)?,
                main: main_path.as_deref().map(WideTable::load).transpose()?,
            };
            debug!("Building section {} ({} rows)", input.name, input.meta.len());
            builder(&mut assembly, &input)?;
        }

        let document = assembly
            .document
            .ok_or_else(|| ConvertError::SessionNotStarted(Section::SessionInformation.name().to_string()))?;
        info!(
            "Assembled {} with {} acquisition items and {} processing modules",
            document.session.identifier,
            document.acquisition.len(),
            document.processing.len()
        );
        Ok(document)
    }
}

/// Copies every image series' media file into `recordings/` inside
/// `document_dir` and rewrites its path relative to `document_dir`.
pub fn finalize_media(document: &mut SessionDocument, document_dir: &Path) -> Result<()> {
    let recordings = document_dir.join(RECORDINGS_DIR);
    for images in document.image_series_mut() {
        let source = PathBuf::from(&images.external_file);
        let file_name = match source.file_name() {
            Some(name) if source.is_file() => name.to_owned(),
            _ => return Err(ConvertError::ExternalFile(source.clone())),
        };
        fs::create_dir_all(&recordings)?;
        fs::copy(&source, recordings.join(&file_name))?;
        images.external_file = format!("{}/{}", RECORDINGS_DIR, file_name.to_string_lossy());
        debug!("Relocated {} to {}", source.display(), images.external_file);
    }
    Ok(())
}

fn attributes(row: &MetaRow<'_>, exclude: &[&str]) -> Attributes {
    row.fields_except(exclude)
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

fn optional_f64(row: &MetaRow<'_>, field: &str) -> Result<Option<f64>> {
    row.get(field)
        .map(|v| {
            v.trim().parse().map_err(|_| ConvertError::InvalidValue {
                field: field.to_string(),
                value: v.to_string(),
            })
        })
        .transpose()
}

/// A time series from one metadata row and its main-data columns.
fn series_from_row(input: &SectionInput, row: &MetaRow<'_>, bookkeeping: &[&str]) -> Result<TimeSeries> {
    let data_index = row.require("data_index")?;
    let (timestamps, data) = input.samples(data_index)?;
    let mut series = TimeSeries::new(row.get("name").unwrap_or(data_index), timestamps, data)?;
    series.description = owned(row.get("description"));
    series.unit = owned(row.get("unit"));
    series.comments = owned(row.get("comments"));
    series.reference_frame = owned(row.get("reference_frame"));

    let mut exclude = vec![
        "data_index",
        "name",
        "description",
        "unit",
        "comments",
        "reference_frame",
    ];
    exclude.extend_from_slice(bookkeeping);
    series.attributes = attributes(row, &exclude);
    Ok(series)
}

fn build_session(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let row = input.meta.first_row()?;
    let start = row.require("session_start_time")?;
    let session_start_time = NaiveDateTime::parse_from_str(start, START_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(start, "%Y-%m-%d %H:%M:%S"))
        .map_err(|_| ConvertError::InvalidValue {
            field: "session_start_time".to_string(),
            value: start.to_string(),
        })?;

    let known = [
        "session_description",
        "identifier",
        "session_start_time",
        "timezone",
        "session_id",
        "experimenter",
        "lab",
        "institution",
        "experiment_description",
        "related_publications",
        "keywords",
    ];
    let session = SessionInfo {
        session_description: row.require("session_description")?.to_string(),
        identifier: row.require("identifier")?.to_string(),
        session_start_time,
        timezone: row.require("timezone")?.to_string(),
        session_id: owned(row.get("session_id")),
        experimenter: owned(row.get("experimenter")),
        lab: owned(row.get("lab")),
        institution: owned(row.get("institution")),
        experiment_description: owned(row.get("experiment_description")),
        related_publications: owned(row.get("related_publications")),
        keywords: row
            .get("keywords")
            .map(|k| k.split(", ").map(str::to_string).collect())
            .unwrap_or_default(),
        attributes: attributes(&row, &known),
    };
    assembly.document = Some(SessionDocument::new(session));
    Ok(())
}

fn build_subject(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let row = input.meta.first_row()?;
    let subject = Subject {
        subject_id: owned(row.get("subject_id")),
        description: owned(row.get("description")),
        species: owned(row.get("species")),
        genotype: owned(row.get("genotype")),
        sex: owned(row.get("sex")),
        attributes: attributes(&row, &["subject_id", "description", "species", "genotype", "sex"]),
    };
    assembly.document(&input.name)?.subject = Some(subject);
    Ok(())
}

fn build_devices(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let document = assembly.document(&input.name)?;
    for row in input.meta.rows() {
        let mut device = Device::new(row.require("name")?);
        device.description = owned(row.get("description"));
        device.manufacturer = owned(row.get("manufacturer"));
        device.endpoint = owned(row.get("endpoint"));
        device.attributes = attributes(&row, &["name", "description", "manufacturer", "endpoint"]);
        document.add_device(device)?;
    }
    Ok(())
}

fn build_images(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let document = assembly.document(&input.name)?;
    let known = [
        "name",
        "description",
        "unit",
        "external_file",
        "starting_time",
        "rate",
        "device",
    ];
    for row in input.meta.rows() {
        let images = ImageSeries {
            name: row.require("name")?.to_string(),
            description: owned(row.get("description")),
            unit: owned(row.get("unit")),
            format: "external".to_string(),
            external_file: row.require("external_file")?.to_string(),
            starting_time: optional_f64(&row, "starting_time")?.unwrap_or(0.0),
            rate: row.require_f64("rate")?,
            device: row.require("device")?.to_string(),
            attributes: attributes(&row, &known),
        };
        document.add_acquisition(AcquisitionItem::ImageSeries(images))?;
    }
    Ok(())
}

/// The ECG amplifier; its `endpoint_recording_device` column names the
/// device it reports to.
fn build_ecg_device(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let row = input.meta.first_row()?;
    let mut device = Device::new(ECG_RECORDING_DEVICE);
    device.description = owned(row.get("description"));
    device.manufacturer = owned(row.get("manufacturer"));
    device.endpoint = owned(row.get("endpoint_recording_device"));
    device.attributes = attributes(&row, &["description", "manufacturer", "endpoint_recording_device"]);
    assembly.document(&input.name)?.add_device(device)
}

fn build_ecg_electrodes(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let electrodes = input
        .meta
        .rows()
        .map(|row| {
            Ok(Electrode {
                name: row.require("electrode_name")?.to_string(),
                location: row.require("electrode_location")?.to_string(),
                info: owned(row.get("electrode_info")),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let table = ElectrodeTable {
        name: "electrodes".to_string(),
        description: ECG_TABLE_DESCRIPTION.to_string(),
        electrodes,
    };
    assembly
        .document(&input.name)?
        .add_acquisition(AcquisitionItem::Electrodes(table))
}

fn build_ecg_channels(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let channels = input
        .meta
        .rows()
        .map(|row| {
            Ok(Channel {
                name: row.require("channel_name")?.to_string(),
                channel_type: row.require("channel_type")?.to_string(),
                involved_electrodes: row
                    .require("involved_electrodes")?
                    .split(" and ")
                    .map(|e| e.trim().to_string())
                    .collect(),
                info: owned(row.get("channel_info")),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let table = ChannelTable {
        name: "channels".to_string(),
        description: ECG_TABLE_DESCRIPTION.to_string(),
        channels,
    };
    assembly
        .document(&input.name)?
        .add_acquisition(AcquisitionItem::Channels(table))
}

fn build_acquisition(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let document = assembly.document(&input.name)?;
    for row in input.meta.rows() {
        let series = series_from_row(input, &row, &[])?;
        document.add_acquisition(AcquisitionItem::TimeSeries(series))?;
    }
    Ok(())
}

fn build_processed(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let document = assembly.document(&input.name)?;
    for row in input.meta.rows() {
        let series = series_from_row(input, &row, &["module_name", "module_description"])?;
        let module_name = row.require("module_name")?;
        let description = row.get("module_description").unwrap_or(module_name);
        document
            .processing_module(module_name, description)
            .add(DataInterface::TimeSeries(series));
    }
    Ok(())
}

/// Epoch transitions of series `data_index`, from a range list or a 0/1 mask.
fn epochs_from_row(input: &SectionInput, row: &MetaRow<'_>) -> Result<IntervalSeries> {
    let data_index = row.require("data_index")?;
    let columns = input.main()?.series(data_index)?;
    let transitions = match &columns.time {
        TimeColumn::Ranges(ranges) => edges_from_ranges(ranges),
        TimeColumn::Values(times) => {
            let (times, mask) = align_and_mask(times, &columns.data)?;
            edges_from_mask(&times, &mask)?
        }
    };
    let (timestamps, data) = split_transitions(&transitions);
    Ok(IntervalSeries {
        name: row.get("name").unwrap_or(data_index).to_string(),
        description: owned(row.get("description")),
        comments: owned(row.get("comments")),
        timestamps,
        data,
        attributes: attributes(
            row,
            &["data_index", "name", "description", "comments", "unit", "reference_frame", "interface_subtype"],
        ),
    })
}

/// Behavioral series grouped by interface subtype into the `behavior`
/// module's Position, BehavioralTimeSeries and BehavioralEpochs.
fn build_behavior(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let mut position = Container::new("Position");
    let mut time_series = Container::new("BehavioralTimeSeries");
    let mut epochs = Container::new("BehavioralEpochs");

    for row in input.meta.rows() {
        match row.require("interface_subtype")? {
            "position" => position.series.push(series_from_row(input, &row, &["interface_subtype"])?),
            "time_series" => time_series
                .series
                .push(series_from_row(input, &row, &["interface_subtype"])?),
            "epochs" => epochs.series.push(epochs_from_row(input, &row)?),
            other => {
                return Err(ConvertError::InvalidValue {
                    field: "interface_subtype".to_string(),
                    value: other.to_string(),
                })
            }
        }
    }

    let module = assembly
        .document(&input.name)?
        .processing_module(BEHAVIOR_MODULE, "processed behavioral data");
    if !position.series.is_empty() {
        module.add(DataInterface::Position(position));
    }
    if !time_series.series.is_empty() {
        module.add(DataInterface::BehavioralTimeSeries(time_series));
    }
    if !epochs.series.is_empty() {
        module.add(DataInterface::BehavioralEpochs(epochs));
    }
    Ok(())
}

fn build_stimulation(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let document = assembly.document(&input.name)?;
    for row in input.meta.rows() {
        match row.require("stim_type")? {
            "ogen" => {
                let data_index = row.require("data_index")?;
                let (timestamps, data) = input.samples(data_index)?;
                let name = row.get("name").unwrap_or(data_index).to_string();
                let device = document.device(row.require("device")?)?.name.clone();
                document.add_ogen_site(OgenSite {
                    name: name.clone(),
                    device,
                    description: row.get("description").unwrap_or_default().to_string(),
                    excitation_lambda: optional_f64(&row, "excitation_lambda")?,
                    location: row.get("location").unwrap_or(crate::catalog::NOT_AVAILABLE).to_string(),
                })?;
                document.add_stimulus(StimulusItem::Optogenetic(OptogeneticSeries {
                    site: name.clone(),
                    name,
                    comments: owned(row.get("comments")),
                    timestamps,
                    data,
                }))?;
            }
            _ => {
                let series = series_from_row(
                    input,
                    &row,
                    &["stim_type", "excitation_lambda", "location", "device"],
                )?;
                document.add_stimulus(StimulusItem::TimeSeries(series))?;
            }
        }
    }
    Ok(())
}

fn cardiac_kind(subtype: &str) -> Result<CardiacKind> {
    match subtype {
        "ECG" => Ok(CardiacKind::Ecg),
        "HR" => Ok(CardiacKind::HeartRate),
        "AUX" => Ok(CardiacKind::AuxiliaryAnalysis),
        other => Err(ConvertError::InvalidValue {
            field: "interface_subtype".to_string(),
            value: other.to_string(),
        }),
    }
}

/// Appends `series` to the interface called `name` in `interfaces`, creating it
/// when absent.
fn push_cardiac<'a, I>(
    interfaces: I,
    kind: CardiacKind,
    name: &str,
    description: Option<&str>,
    series: CardiacSeries,
) -> Option<CardiacInterface>
where
    I: Iterator<Item = &'a mut CardiacInterface>,
{
    for interface in interfaces {
        if interface.name == name && interface.kind == kind {
            interface.cardiac_series.push(series);
            return None;
        }
    }
    Some(CardiacInterface {
        kind,
        name: name.to_string(),
        processing_description: owned(description),
        cardiac_series: vec![series],
    })
}

/// Raw ECG (type `R`) goes to acquisition; everything else to `cardio_module`.
fn build_cardiac(assembly: &mut Assembly, input: &SectionInput) -> Result<()> {
    let document = assembly.document(&input.name)?;
    let group = document.ecg_recording_group(ECG_RECORDING_DEVICE)?.name.clone();

    for row in input.meta.rows() {
        let data_index = row.require("data_index")?;
        let (timestamps, data) = input.samples(data_index)?;
        let kind = cardiac_kind(row.require("interface_subtype")?)?;
        let interface_name = row.get("interface_name").unwrap_or(kind.default_name());
        let description = row.get("processing_description");
        let series = CardiacSeries {
            name: row.get("name").unwrap_or(data_index).to_string(),
            unit: owned(row.get("unit")),
            timestamps,
            data,
            recording_group: group.clone(),
            attributes: attributes(
                &row,
                &[
                    "data_index",
                    "name",
                    "unit",
                    "processing_description",
                    "interface_subtype",
                    "interface_name",
                    "type",
                ],
            ),
        };

        let raw = kind == CardiacKind::Ecg && row.get("type") == Some("R");
        if raw {
            let existing = document.acquisition.iter_mut().filter_map(|a| match a {
                AcquisitionItem::Cardiac(c) => Some(c),
                _ => None,
            });
            if let Some(created) = push_cardiac(existing, kind, interface_name, description, series) {
                document.add_acquisition(AcquisitionItem::Cardiac(created))?;
            }
        } else {
            let module = document.processing_module(CARDIAC_MODULE, "module to store processed cardiac data");
            let existing = module.interfaces.iter_mut().filter_map(|i| match i {
                DataInterface::Cardiac(c) => Some(c),
                _ => None,
            });
            if let Some(created) = push_cardiac(existing, kind, interface_name, description, series) {
                module.add(DataInterface::Cardiac(created));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionDefaults;
    use crate::extractor::{fixtures, staging_dir, ExtractionOutcome, SessionExtractor};
    use crate::mat::{self, MatValue};
    use crate::tables::{write_rows, write_wide_table, SeriesColumns};
    use crate::types::DataRequest;
    use serde::Serialize;

    #[derive(Serialize)]
    struct SessionRow {
        session_description: &'static str,
        identifier: &'static str,
        session_start_time: &'static str,
        timezone: &'static str,
        keywords: &'static str,
    }

    #[derive(Serialize)]
    struct SeriesRow {
        data_index: &'static str,
        name: &'static str,
        unit: &'static str,
        description: &'static str,
        module_name: &'static str,
        module_description: &'static str,
    }

    fn stage_session(dir: &Path, sheet: &mut InfoSheet) {
        write_rows(
            &dir.join("session-meta.csv"),
            &[SessionRow {
                session_description: "Fear",
                identifier: "M1_01:Fear",
                session_start_time: "2023-05-22T00:00:00",
                timezone: "Europe/Berlin",
                keywords: "ECG, thermal, behavior",
            }],
        )
        .unwrap();
        sheet.push(Section::SessionInformation);
    }

    fn extract(session: &Path, lines: PathBuf, request: DataRequest) {
        let extractor = SessionExtractor::new(lines, ConversionDefaults::default());
        let outcome = extractor.extract(session, "AB", request).unwrap();
        assert!(matches!(outcome, ExtractionOutcome::Success(_)), "{:?}", outcome);
    }

    #[test]
    fn unknown_section_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = InfoSheet::new();
        stage_session(dir.path(), &mut sheet);
        sheet.push(Section::DevicesInformation);
        sheet.write(dir.path()).unwrap();

        let mut registry = SectionRegistry::empty();
        registry.register("session_information", build_session);
        let err = DocumentAssembler::new(registry).assemble(dir.path()).unwrap_err();
        assert!(matches!(err, ConvertError::UnknownSection(ref s) if s == "devices_information"));
    }

    #[test]
    fn sections_before_session_information_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = InfoSheet::new();
        write_rows(&dir.path().join("devices-meta.csv"), &[("RZ6", "TDT", "processor")]).unwrap();
        sheet.push(Section::DevicesInformation);
        sheet.write(dir.path()).unwrap();

        let err = DocumentAssembler::default().assemble(dir.path()).unwrap_err();
        assert!(matches!(err, ConvertError::SessionNotStarted(_)));
    }

    #[test]
    fn processed_rows_share_one_module_per_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = InfoSheet::new();
        stage_session(dir.path(), &mut sheet);
        write_wide_table(
            &dir.path().join("processedData.csv"),
            &[
                SeriesColumns::new("tail", vec![0.0, 1.0, 2.0], vec![30.0, f64::NAN, 31.0]),
                SeriesColumns::new("paw", vec![0.0, 1.0], vec![28.0, 28.5]),
            ],
        )
        .unwrap();
        let row = |index: &'static str, name: &'static str| SeriesRow {
            data_index: index,
            name,
            unit: "degrees-celsius",
            description: name,
            module_name: "thermal",
            module_description: "temperature extraction",
        };
        write_rows(
            &dir.path().join("processedData-meta.csv"),
            &[row("tail", "tail temperature"), row("paw", "paw temperature")],
        )
        .unwrap();
        sheet.push(Section::ProcessedData);
        sheet.write(dir.path()).unwrap();

        let document = DocumentAssembler::default().assemble(dir.path()).unwrap();
        assert_eq!(document.session.keywords, vec!["ECG", "thermal", "behavior"]);
        assert_eq!(document.processing.len(), 1);
        let thermal = document.module("thermal").unwrap();
        assert_eq!(thermal.interfaces.len(), 2);
        match thermal.get("tail temperature") {
            Some(DataInterface::TimeSeries(tail)) => {
                assert_eq!(tail.timestamps, vec![0.0, 2.0]);
                assert_eq!(tail.data, vec![30.0, 31.0]);
                assert!(tail.attributes.is_empty());
            }
            other => panic!("unexpected interface {:?}", other),
        }
    }

    #[test]
    fn acquisition_series_with_missing_columns_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = InfoSheet::new();
        stage_session(dir.path(), &mut sheet);
        write_wide_table(
            &dir.path().join("acquisition.csv"),
            &[SeriesColumns::new("lick", vec![0.0, 0.5], vec![0.0, 1.0])],
        )
        .unwrap();
        write_rows(
            &dir.path().join("acquisition-meta.csv"),
            &[("data_index", "name"), ("lick", "licks"), ("pump", "pump")],
        )
        .unwrap();
        sheet.push(Section::Acquisition);
        sheet.write(dir.path()).unwrap();

        let err = DocumentAssembler::default().assemble(dir.path()).unwrap_err();
        assert!(matches!(err, ConvertError::MissingColumnPair { ref series, .. } if series == "pump"));
    }

    #[test]
    fn behavior_session_is_grouped_into_interfaces() {
        let dir = tempfile::tempdir().unwrap();
        let lines = fixtures::lines_catalog(dir.path());
        let session = fixtures::session_dir(dir.path());
        fixtures::frame_timing(&session, 6);
        fixtures::tracking(&session, 6);
        let data = MatValue::structure(vec![(
            "Rearing",
            MatValue::matrix(2, 2, vec![0.5, 2.0, 1.0, 2.5]).unwrap(),
        )]);
        mat::write_file(
            session.join("M1_01_230522_Fear_TempBehaviour.mat"),
            &[("StepSpeed", &MatValue::column(vec![0.1; 6])), ("Data", &data)],
        )
        .unwrap();
        extract(
            &session,
            lines,
            DataRequest {
                behaviour: true,
                ..DataRequest::default()
            },
        );

        let document = DocumentAssembler::default().assemble(&staging_dir(&session)).unwrap();
        assert_eq!(document.devices.len(), 6);
        assert_eq!(document.subject.as_ref().and_then(|s| s.species.as_deref()), Some("Bl6/C57-CRH-Cre"));

        let behavior = document.module(BEHAVIOR_MODULE).unwrap();
        let names: Vec<&str> = behavior.interfaces.iter().map(DataInterface::name).collect();
        assert_eq!(names, vec!["Position", "BehavioralTimeSeries", "BehavioralEpochs"]);
        match behavior.get("BehavioralEpochs") {
            Some(DataInterface::BehavioralEpochs(epochs)) => {
                let rearing = &epochs.series[0];
                assert_eq!(rearing.timestamps, vec![0.5, 1.0, 2.0, 2.5]);
                assert_eq!(rearing.data, vec![1, -1, 1, -1]);
            }
            other => panic!("unexpected interface {:?}", other),
        }
        match behavior.get("Position") {
            Some(DataInterface::Position(position)) => {
                assert_eq!(position.series.len(), 2);
                assert_eq!(position.series[0].reference_frame.as_deref(), Some("na"));
            }
            other => panic!("unexpected interface {:?}", other),
        }
    }

    /// Stages one optogenetic and one sound stimulus, optionally with the
    /// laser registered as a device.
    fn stage_stimulation(dir: &Path, with_laser: bool) {
        let mut sheet = InfoSheet::new();
        stage_session(dir, &mut sheet);
        if with_laser {
            write_rows(
                &dir.join("devices-meta.csv"),
                &[("name", "description", "manufacturer"), ("laser", "473 nm laser", "Cobolt")],
            )
            .unwrap();
            sheet.push(Section::DevicesInformation);
        }
        write_wide_table(
            &dir.join("stimulusData.csv"),
            &[
                SeriesColumns::new("opto", vec![5.0, 5.01, 9.0, 9.01], vec![1.0, 0.0, 1.0, 0.0]),
                SeriesColumns::new("tone", vec![1.0, 3.0], vec![1.0, 1.0]),
            ],
        )
        .unwrap();
        write_rows(
            &dir.join("stimulusData-meta.csv"),
            &[
                ("data_index", "name", "stim_type", "device", "excitation_lambda", "location", "unit"),
                ("opto", "blue_light", "ogen", "laser", "473", "mPFC", ""),
                ("tone", "pure_tone", "sound", "", "", "", "au"),
            ],
        )
        .unwrap();
        sheet.push(Section::StimulationData);
        sheet.write(dir).unwrap();
    }

    #[test]
    fn ogen_stimulus_creates_a_site_on_its_device() {
        let dir = tempfile::tempdir().unwrap();
        stage_stimulation(dir.path(), true);

        let document = DocumentAssembler::default().assemble(dir.path()).unwrap();
        assert_eq!(document.ogen_sites.len(), 1);
        let site = &document.ogen_sites[0];
        assert_eq!(site.name, "blue_light");
        assert_eq!(site.device, "laser");
        assert_eq!(site.excitation_lambda, Some(473.0));
        assert_eq!(site.location, "mPFC");

        match &document.stimulus[..] {
            [StimulusItem::Optogenetic(opto), StimulusItem::TimeSeries(tone)] => {
                assert_eq!(opto.site, "blue_light");
                assert_eq!(opto.timestamps, vec![5.0, 5.01, 9.0, 9.01]);
                assert_eq!(opto.data, vec![1.0, 0.0, 1.0, 0.0]);
                assert_eq!(tone.name, "pure_tone");
                assert_eq!(tone.timestamps, vec![1.0, 3.0]);
                assert_eq!(tone.unit.as_deref(), Some("au"));
                assert!(tone.attributes.is_empty());
            }
            other => panic!("unexpected stimuli {:?}", other),
        }
    }

    #[test]
    fn ogen_stimulus_on_unknown_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        stage_stimulation(dir.path(), false);

        let err = DocumentAssembler::default().assemble(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::UnresolvedReference { kind: "device", ref name } if name == "laser"
        ));
    }

    #[test]
    fn mask_epochs_starting_mid_epoch_get_a_leading_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut sheet = InfoSheet::new();
        stage_session(dir.path(), &mut sheet);
        write_wide_table(
            &dir.path().join("behavioralData.csv"),
            &[SeriesColumns::new(
                "freezing",
                vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5],
                vec![1.0, 1.0, 0.0, f64::NAN, 1.0, 0.0],
            )],
        )
        .unwrap();
        write_rows(
            &dir.path().join("behavioralData-meta.csv"),
            &[("data_index", "name", "interface_subtype"), ("freezing", "Freezing", "epochs")],
        )
        .unwrap();
        sheet.push(Section::BehavioralData);
        sheet.write(dir.path()).unwrap();

        let document = DocumentAssembler::default().assemble(dir.path()).unwrap();
        let behavior = document.module(BEHAVIOR_MODULE).unwrap();
        assert_eq!(behavior.interfaces.len(), 1);
        match behavior.get("BehavioralEpochs") {
            Some(DataInterface::BehavioralEpochs(epochs)) => {
                let freezing = &epochs.series[0];
                assert_eq!(freezing.name, "Freezing");
                assert_eq!(freezing.timestamps, vec![0.0, 1.0, 2.0, 2.5]);
                assert_eq!(freezing.data, vec![1, -1, 1, -1]);
            }
            other => panic!("unexpected interface {:?}", other),
        }
    }

    #[test]
    fn cardiac_session_splits_raw_and_processed() {
        let dir = tempfile::tempdir().unwrap();
        let lines = fixtures::lines_catalog(dir.path());
        let session = fixtures::session_dir(dir.path());
        let cardiac = MatValue::structure(vec![
            ("ecg_time", MatValue::column(vec![0.0, 0.001, 0.002])),
            ("ecg_data", MatValue::column(vec![0.1, f64::NAN, 0.3])),
            ("heartRate_time", MatValue::column(vec![0.0, 1.0])),
            ("heartRate_data", MatValue::column(vec![600.0, 610.0])),
        ]);
        mat::write_file(
            session.join("complementary_exports").join("M1_01_230522_Fear_CardiacData.mat"),
            &[("cardiacData", &cardiac)],
        )
        .unwrap();
        extract(
            &session,
            lines,
            DataRequest {
                heart_rate: true,
                ..DataRequest::default()
            },
        );

        let document = DocumentAssembler::default().assemble(&staging_dir(&session)).unwrap();
        let group = document.recording_group.as_ref().unwrap();
        assert_eq!(group.recording_device, ECG_RECORDING_DEVICE);
        assert_eq!(
            document.device(ECG_RECORDING_DEVICE).unwrap().endpoint.as_deref(),
            Some("endpoint_recording_device")
        );

        match document.acquisition("ECG") {
            Some(AcquisitionItem::Cardiac(ecg)) => {
                assert_eq!(ecg.kind, CardiacKind::Ecg);
                assert_eq!(ecg.cardiac_series[0].timestamps, vec![0.0, 0.002]);
                assert_eq!(ecg.cardiac_series[0].recording_group, "recording_group");
            }
            other => panic!("unexpected acquisition item {:?}", other),
        }
        let module = document.module(CARDIAC_MODULE).unwrap();
        match module.get("HeartRate") {
            Some(DataInterface::Cardiac(hr)) => assert_eq!(hr.cardiac_series[0].data, vec![600.0, 610.0]),
            other => panic!("unexpected interface {:?}", other),
        }
    }

    #[test]
    fn media_is_copied_next_to_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let lines = fixtures::lines_catalog(dir.path());
        let session = fixtures::session_dir(dir.path());
        fs::write(session.join("M1_01_230522_Fear.AVI"), b"RIFF").unwrap();
        extract(&session, lines, DataRequest::default());

        let mut document = DocumentAssembler::default().assemble(&staging_dir(&session)).unwrap();
        let out = dir.path().join("out");
        finalize_media(&mut document, &out).unwrap();

        match document.acquisition("behavior_recording") {
            Some(AcquisitionItem::ImageSeries(images)) => {
                assert_eq!(images.external_file, "recordings/M1_01_230522_Fear.AVI");
                assert_eq!(images.device, "Pike camera");
            }
            other => panic!("unexpected acquisition item {:?}", other),
        }
        assert!(out.join("recordings").join("M1_01_230522_Fear.AVI").is_file());

        fs::remove_file(session.join("M1_01_230522_Fear.AVI")).unwrap();
        let mut stale = DocumentAssembler::default().assemble(&staging_dir(&session)).unwrap();
        assert!(matches!(
            finalize_media(&mut stale, &dir.path().join("other")),
            Err(ConvertError::ExternalFile(_))
        ));
    }
}
