//! Cardiac recordings: ECG hardware description, raw ECG, heart rate and
//! the optional processed heart-rate readouts.

use serde::Serialize;
use tracing::{debug, warn};

use super::{first_file, SessionSource, Stage, Staging, ENDPOINT_DEVICE};
use crate::error::{ExtractionFailure, Result};
use crate::mat::{self, MatFile};
use crate::tables::{Section, SeriesColumns};

#[derive(Debug, Serialize)]
struct EcgDeviceRow {
    manufacturer: &'static str,
    description: &'static str,
    filtering: &'static str,
    gain: &'static str,
    offset: &'static str,
    synchronization: &'static str,
    endpoint_recording_device: &'static str,
}

#[derive(Debug, Serialize)]
struct ElectrodeRow {
    electrode_name: &'static str,
    electrode_location: &'static str,
    electrode_info: &'static str,
}

#[derive(Debug, Serialize)]
struct ChannelRow {
    channel_name: &'static str,
    channel_type: &'static str,
    involved_electrodes: &'static str,
    channel_info: &'static str,
}

#[derive(Debug, Serialize)]
struct CardiacRow {
    data_index: &'static str,
    name: &'static str,
    unit: &'static str,
    processing_description: &'static str,
    interface_subtype: &'static str,
    interface_name: Option<&'static str>,
    #[serde(rename = "type")]
    kind: Option<&'static str>,
}

const ECG_DEVICE: EcgDeviceRow = EcgDeviceRow {
    manufacturer: "npi",
    description: "Modular amplifier for electro-physiological recordings",
    filtering: "30-1000Hz bandpass",
    gain: "tuned to 1000",
    offset: "set to 0",
    synchronization: "intrinsically taken care of via the Plexon system (endpoint-recording-device)",
    endpoint_recording_device: ENDPOINT_DEVICE,
};

const ELECTRODES: [ElectrodeRow; 3] = [
    ElectrodeRow {
        electrode_name: "el_0",
        electrode_location: "right upper-chest",
        electrode_info: "none",
    },
    ElectrodeRow {
        electrode_name: "el_1",
        electrode_location: "left lower-chest",
        electrode_info: "none",
    },
    ElectrodeRow {
        electrode_name: "ref",
        electrode_location: "top of the head",
        electrode_info: "none",
    },
];

const CHANNELS: [ChannelRow; 2] = [
    ChannelRow {
        channel_name: "ch_0",
        channel_type: "single",
        involved_electrodes: "el_1",
        channel_info: "none",
    },
    ChannelRow {
        channel_name: "ch_1",
        channel_type: "differential",
        involved_electrodes: "el_0 and el_1",
        channel_info: "none",
    },
];

/// A processed readout of the `_ProcHR.mat` file.
struct Readout {
    index: &'static str,
    entry: &'static str,
    times: &'static str,
    row: CardiacRow,
}

const READOUTS: [Readout; 4] = [
    Readout {
        index: "ceiling",
        entry: "Loess",
        times: "Times",
        row: CardiacRow {
            data_index: "ceiling",
            name: "ceiling data",
            unit: "bpm",
            processing_description: "ceiling data",
            interface_subtype: "AUX",
            interface_name: Some("ceiling"),
            kind: None,
        },
    },
    Readout {
        index: "hr2ceil",
        entry: "HRtoCeil",
        times: "Times",
        row: CardiacRow {
            data_index: "hr2ceil",
            name: "heart rate to ceiling",
            unit: "bpm",
            processing_description: "heart rate to ceiling",
            interface_subtype: "HR",
            interface_name: Some("hr2ceil"),
            kind: None,
        },
    },
    Readout {
        index: "lf",
        entry: "HeartRateWv.High.Signal",
        times: "HeartRateWv.Times",
        row: CardiacRow {
            data_index: "lf",
            name: "lf",
            unit: "bpm",
            processing_description: "LF",
            interface_subtype: "HR",
            interface_name: Some("LF"),
            kind: None,
        },
    },
    Readout {
        index: "lf_amplitude",
        entry: "HeartRateWv.High.Amp",
        times: "HeartRateWv.Times",
        row: CardiacRow {
            data_index: "lf_amplitude",
            name: "lf_amplitude",
            unit: "au",
            processing_description: "LF amplitude",
            interface_subtype: "AUX",
            interface_name: Some("LF amplitude"),
            kind: None,
        },
    },
];

fn vector(file: &MatFile, entry: &str) -> Result<Vec<f64>> {
    Ok(file.require_numeric(entry)?.flatten())
}

pub(super) fn extract(source: &SessionSource<'_>, staging: &mut Staging) -> Stage<()> {
    staging.write_meta(Section::EcgDevice, &[ECG_DEVICE])?;
    staging.write_meta(Section::EcgElectrodes, &ELECTRODES)?;
    staging.write_meta(Section::EcgChannels, &CHANNELS)?;

    let export = first_file(source.dir, "complementary_exports/*_CardiacData.mat")?
        .ok_or(ExtractionFailure::NoCardiacDataExport)?;
    let export = mat::load(&export)?;

    let mut series = vec![
        SeriesColumns::new(
            "ecg",
            vector(&export, "cardiacData.ecg_time")?,
            vector(&export, "cardiacData.ecg_data")?,
        ),
        SeriesColumns::new(
            "heartRate",
            vector(&export, "cardiacData.heartRate_time")?,
            vector(&export, "cardiacData.heartRate_data")?,
        ),
    ];
    let mut rows = vec![
        CardiacRow {
            data_index: "ecg",
            name: "ECG",
            unit: "mV",
            processing_description: "Raw ECG recording",
            interface_subtype: "ECG",
            interface_name: None,
            kind: Some("R"),
        },
        CardiacRow {
            data_index: "heartRate",
            name: "Heart Rate",
            unit: "bpm",
            processing_description: "Heart Rate",
            interface_subtype: "HR",
            interface_name: None,
            kind: None,
        },
    ];

    match first_file(source.dir, "*_ProcHR.mat")? {
        Some(path) => {
            let processed = mat::load(&path)?;
            for readout in READOUTS {
                let pair = vector(&processed, readout.times).and_then(|times| {
                    vector(&processed, readout.entry).map(|data| (times, data))
                });
                match pair {
                    Ok((times, data)) => {
                        series.push(SeriesColumns::new(readout.index, times, data));
                        rows.push(readout.row);
                    }
                    Err(e) => warn!("Skipping cardiac readout {}: {}", readout.index, e),
                }
            }
        }
        None => debug!("No processed heart-rate file in {}", source.dir.display()),
    }

    staging.write_series(Section::CardiacData, &series, &rows)?;
    Ok(())
}
