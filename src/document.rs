//! The session document: a self-describing hierarchy of typed time series
//! and metadata built by the assembler and persisted by a
//! [`DocumentWriter`](crate::writer::DocumentWriter).
//!
//! Cross references (a series' device, an ECG channel's electrodes, the
//! recording group's tables) are stored by name and resolved when the
//! referencing entity is added, so a document never holds a dangling name.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};

/// Free-form extra attributes of an entity.
pub type Attributes = BTreeMap<String, String>;

/// Session-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_description: String,
    pub identifier: String,
    pub session_start_time: NaiveDateTime,
    /// IANA timezone `session_start_time` is expressed in
    pub timezone: String,
    pub session_id: Option<String>,
    pub experimenter: Option<String>,
    pub lab: Option<String>,
    pub institution: Option<String>,
    pub experiment_description: Option<String>,
    pub related_publications: Option<String>,
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_id: Option<String>,
    pub description: Option<String>,
    pub species: Option<String>,
    pub genotype: Option<String>,
    pub sex: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

/// A piece of hardware. `endpoint` names the device this one reports to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Device {
            name: name.into(),
            description: None,
            manufacturer: None,
            endpoint: None,
            attributes: Attributes::new(),
        }
    }
}

/// Sampled values with explicit timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub comments: Option<String>,
    /// Set for spatial series only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_frame: Option<String>,
    pub timestamps: Vec<f64>,
    pub data: Vec<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl TimeSeries {
    /// A series with the given samples and no metadata.
    pub fn new(name: impl Into<String>, timestamps: Vec<f64>, data: Vec<f64>) -> Result<Self> {
        if timestamps.len() != data.len() {
            return Err(ConvertError::ShapeMismatch {
                timestamps: timestamps.len(),
                values: data.len(),
            });
        }
        Ok(TimeSeries {
            name: name.into(),
            description: None,
            unit: None,
            comments: None,
            reference_frame: None,
            timestamps,
            data,
            attributes: Attributes::new(),
        })
    }
}

/// Epoch transitions: +1 where an epoch starts, -1 where it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalSeries {
    pub name: String,
    pub description: Option<String>,
    pub comments: Option<String>,
    pub timestamps: Vec<f64>,
    pub data: Vec<i8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

/// Video stored outside the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSeries {
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    /// Always `external`
    pub format: String,
    /// Path of the media file; relative to the document once finalized
    pub external_file: String,
    pub starting_time: f64,
    pub rate: f64,
    pub device: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Electrode {
    pub name: String,
    pub location: String,
    pub info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectrodeTable {
    pub name: String,
    pub description: String,
    pub electrodes: Vec<Electrode>,
}

/// A recording channel. `involved_electrodes` are electrode names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub channel_type: String,
    pub involved_electrodes: Vec<String>,
    pub info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTable {
    pub name: String,
    pub description: String,
    pub channels: Vec<Channel>,
}

/// Binds the ECG electrode table, channel table and recording device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcgRecordingGroup {
    pub name: String,
    pub group_description: String,
    pub electrodes: String,
    pub channels: String,
    pub recording_device: String,
}

/// A cardiac signal recorded through the ECG recording group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardiacSeries {
    pub name: String,
    pub unit: Option<String>,
    pub timestamps: Vec<f64>,
    pub data: Vec<f64>,
    pub recording_group: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardiacKind {
    Ecg,
    HeartRate,
    AuxiliaryAnalysis,
}

impl CardiacKind {
    /// Interface name used when none is given.
    pub fn default_name(self) -> &'static str {
        match self {
            CardiacKind::Ecg => "ECG",
            CardiacKind::HeartRate => "HeartRate",
            CardiacKind::AuxiliaryAnalysis => "AuxiliaryAnalysis",
        }
    }
}

/// Container of cardiac series of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardiacInterface {
    pub kind: CardiacKind,
    pub name: String,
    pub processing_description: Option<String>,
    pub cardiac_series: Vec<CardiacSeries>,
}

/// Named container of series of one family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container<T> {
    pub name: String,
    pub series: Vec<T>,
}

impl<T> Container<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Container {
            name: name.into(),
            series: Vec::new(),
        }
    }
}

/// Data held by a processing module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DataInterface {
    TimeSeries(TimeSeries),
    Position(Container<TimeSeries>),
    BehavioralTimeSeries(Container<TimeSeries>),
    BehavioralEpochs(Container<IntervalSeries>),
    Cardiac(CardiacInterface),
}

impl DataInterface {
    pub fn name(&self) -> &str {
        match self {
            DataInterface::TimeSeries(s) => &s.name,
            DataInterface::Position(c) | DataInterface::BehavioralTimeSeries(c) => &c.name,
            DataInterface::BehavioralEpochs(c) => &c.name,
            DataInterface::Cardiac(c) => &c.name,
        }
    }
}

/// A named group of processed data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingModule {
    pub name: String,
    pub description: String,
    pub interfaces: Vec<DataInterface>,
}

impl ProcessingModule {
    pub fn add(&mut self, interface: DataInterface) {
        self.interfaces.push(interface);
    }

    pub fn get(&self, name: &str) -> Option<&DataInterface> {
        self.interfaces.iter().find(|i| i.name() == name)
    }
}

/// Raw data stored directly in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AcquisitionItem {
    TimeSeries(TimeSeries),
    ImageSeries(ImageSeries),
    Electrodes(ElectrodeTable),
    Channels(ChannelTable),
    Cardiac(CardiacInterface),
}

impl AcquisitionItem {
    pub fn name(&self) -> &str {
        match self {
            AcquisitionItem::TimeSeries(s) => &s.name,
            AcquisitionItem::ImageSeries(s) => &s.name,
            AcquisitionItem::Electrodes(t) => &t.name,
            AcquisitionItem::Channels(t) => &t.name,
            AcquisitionItem::Cardiac(c) => &c.name,
        }
    }
}

/// Where an optogenetic stimulus was delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OgenSite {
    pub name: String,
    pub device: String,
    pub description: String,
    /// Wavelength in nm
    pub excitation_lambda: Option<f64>,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptogeneticSeries {
    pub name: String,
    pub site: String,
    pub comments: Option<String>,
    pub timestamps: Vec<f64>,
    pub data: Vec<f64>,
}

/// Stimuli presented during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StimulusItem {
    TimeSeries(TimeSeries),
    Optogenetic(OptogeneticSeries),
}

impl StimulusItem {
    pub fn name(&self) -> &str {
        match self {
            StimulusItem::TimeSeries(s) => &s.name,
            StimulusItem::Optogenetic(s) => &s.name,
        }
    }
}

/// Root aggregate of one converted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    pub session: SessionInfo,
    pub subject: Option<Subject>,
    pub devices: Vec<Device>,
    pub acquisition: Vec<AcquisitionItem>,
    pub stimulus: Vec<StimulusItem>,
    pub ogen_sites: Vec<OgenSite>,
    pub processing: Vec<ProcessingModule>,
    pub recording_group: Option<EcgRecordingGroup>,
}

impl SessionDocument {
    pub fn new(session: SessionInfo) -> Self {
        SessionDocument {
            session,
            subject: None,
            devices: Vec::new(),
            acquisition: Vec::new(),
            stimulus: Vec::new(),
            ogen_sites: Vec::new(),
            processing: Vec::new(),
            recording_group: None,
        }
    }

    /// Registers a device. Its endpoint, if any, must already be registered.
    pub fn add_device(&mut self, device: Device) -> Result<()> {
        if let Some(endpoint) = &device.endpoint {
            self.device(endpoint)?;
        }
        self.devices.push(device);
        Ok(())
    }

    pub fn device(&self, name: &str) -> Result<&Device> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| unresolved("device", name))
    }

    pub fn add_acquisition(&mut self, item: AcquisitionItem) -> Result<()> {
        if let AcquisitionItem::ImageSeries(images) = &item {
            self.device(&images.device)?;
        }
        if let AcquisitionItem::Channels(table) = &item {
            let electrodes = self.electrode_table()?;
            for electrode in table.channels.iter().flat_map(|c| &c.involved_electrodes) {
                if !electrodes.electrodes.iter().any(|e| &e.name == electrode) {
                    return Err(unresolved("electrode", electrode));
                }
            }
        }
        self.acquisition.push(item);
        Ok(())
    }

    pub fn acquisition(&self, name: &str) -> Option<&AcquisitionItem> {
        self.acquisition.iter().find(|a| a.name() == name)
    }

    pub fn electrode_table(&self) -> Result<&ElectrodeTable> {
        self.acquisition
            .iter()
            .find_map(|a| match a {
                AcquisitionItem::Electrodes(t) => Some(t),
                _ => None,
            })
            .ok_or_else(|| unresolved("electrode table", "electrodes"))
    }

    pub fn channel_table(&self) -> Result<&ChannelTable> {
        self.acquisition
            .iter()
            .find_map(|a| match a {
                AcquisitionItem::Channels(t) => Some(t),
                _ => None,
            })
            .ok_or_else(|| unresolved("channel table", "channels"))
    }

    /// The ECG recording group, created on first use from the registered
    /// electrode table, channel table and `recording_device`.
    pub fn ecg_recording_group(&mut self, recording_device: &str) -> Result<&EcgRecordingGroup> {
        if self.recording_group.is_none() {
            let electrodes = self.electrode_table()?.name.clone();
            let channels = self.channel_table()?.name.clone();
            self.device(recording_device)?;
            self.recording_group = Some(EcgRecordingGroup {
                name: "recording_group".to_string(),
                group_description: "a group to store electrodes and channels table".to_string(),
                electrodes,
                channels,
                recording_device: recording_device.to_string(),
            });
        }
        self.recording_group
            .as_ref()
            .ok_or_else(|| unresolved("recording group", "recording_group"))
    }

    /// The module called `name`, created with `description` if it does not
    /// exist yet. An existing module keeps its original description.
    pub fn processing_module(&mut self, name: &str, description: &str) -> &mut ProcessingModule {
        let index = match self.processing.iter().position(|m| m.name == name) {
            Some(index) => index,
            None => {
                self.processing.push(ProcessingModule {
                    name: name.to_string(),
                    description: description.to_string(),
                    interfaces: Vec::new(),
                });
                self.processing.len() - 1
            }
        };
        &mut self.processing[index]
    }

    pub fn module(&self, name: &str) -> Option<&ProcessingModule> {
        self.processing.iter().find(|m| m.name == name)
    }

    /// Registers an optogenetic site. Its device must already be registered.
    pub fn add_ogen_site(&mut self, site: OgenSite) -> Result<()> {
        self.device(&site.device)?;
        self.ogen_sites.push(site);
        Ok(())
    }

    pub fn add_stimulus(&mut self, item: StimulusItem) -> Result<()> {
        if let StimulusItem::Optogenetic(series) = &item {
            if !self.ogen_sites.iter().any(|s| s.name == series.site) {
                return Err(unresolved("ogen site", &series.site));
            }
        }
        self.stimulus.push(item);
        Ok(())
    }

    /// All image series, for media finalization.
    pub fn image_series_mut(&mut self) -> impl Iterator<Item = &mut ImageSeries> {
        self.acquisition.iter_mut().filter_map(|a| match a {
            AcquisitionItem::ImageSeries(s) => Some(s),
            _ => None,
        })
    }
}

fn unresolved(kind: &'static str, name: &str) -> ConvertError {
    ConvertError::UnresolvedReference {
        kind,
        name: name.to_string(),
    }
}
