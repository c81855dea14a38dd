//! Stimulus events. Best effort: a missing file, key or empty array only
//! drops the affected series.

use serde::Serialize;
use tracing::{debug, warn};

use super::{first_file, SessionSource, Stage, Staging, OPTO_DEVICE};
use crate::mat::{self, MatFile, MatValue};
use crate::tables::{Section, SeriesColumns};

/// Stimulus type of interval stimuli stored as plain time series.
pub const CONTEXT_STIMULUS: &str = "context";
/// Stimulus type of optogenetic pulses.
pub const OGEN_STIMULUS: &str = "ogen";

const PERIOD_NOTE: &str =
    "in the column data: 1 and -1 indicate the start and end of a period of event respectively.";

/// An interval stimulus: (series key, display name, entry, description prefix).
const CONTEXT_EVENTS: [(&str, &str, &str, &str); 3] = [
    (
        "pureTone",
        "pure tone",
        "Stimulus_Data.Tone.pureTone_times",
        "pure tone stimulation played in specific intervals of the session.",
    ),
    (
        "whiteNoise",
        "white noise",
        "Stimulus_Data.Noise.whiteNoise_times",
        "white noise stimulation played in specific intervals of the session.",
    ),
    (
        "shock",
        "shock",
        "Stimulus_Data.Shock.shock_times",
        "electrical shock stimulation exerted in specific intervals of the session.",
    ),
];

#[derive(Debug, Serialize)]
struct StimulusRow {
    data_index: String,
    name: String,
    unit: Option<&'static str>,
    description: String,
    comments: String,
    excitation_lambda: Option<String>,
    location: Option<String>,
    rate: Option<f64>,
    device: Option<&'static str>,
    stim_type: &'static str,
}

fn nonempty_numeric<'a>(file: &'a MatFile, entry: &str) -> Option<&'a crate::mat::NumericArray> {
    match file.lookup(entry).and_then(MatValue::as_numeric) {
        Some(array) if !array.is_empty() => Some(array),
        Some(_) => {
            debug!("{} is empty", entry);
            None
        }
        None => {
            debug!("{} not present in {}", entry, file.path.display());
            None
        }
    }
}

/// Text or numeric scalar, rendered as text.
fn attribute(file: &MatFile, entry: &str) -> Option<String> {
    let value = file.lookup(entry)?;
    value
        .as_text()
        .map(|t| t.trim().to_string())
        .or_else(|| value.as_numeric().and_then(|n| n.scalar()).map(|v| v.to_string()))
        .filter(|t| !t.is_empty())
}

fn context_series(file: &MatFile) -> Vec<(SeriesColumns, StimulusRow)> {
    let mut out = Vec::new();
    for (index, name, entry, description) in CONTEXT_EVENTS {
        let ranges = match nonempty_numeric(file, entry) {
            Some(array) if array.cols() >= 2 => array,
            Some(_) => {
                warn!("Ignoring {}: expected [start, end] rows", entry);
                continue;
            }
            None => continue,
        };

        let mut times = Vec::with_capacity(ranges.rows() * 2);
        let mut labels = Vec::with_capacity(ranges.rows() * 2);
        for row in ranges.data.rows() {
            times.extend([row[0], row[1]]);
            labels.extend([1.0, -1.0]);
        }

        out.push((
            SeriesColumns::new(index, times, labels),
            StimulusRow {
                data_index: index.to_string(),
                name: name.to_string(),
                unit: Some("na"),
                description: format!("{} {}", description, PERIOD_NOTE),
                comments: "none".to_string(),
                excitation_lambda: None,
                location: None,
                rate: None,
                device: None,
                stim_type: CONTEXT_STIMULUS,
            },
        ));
    }
    out
}

fn opto_series(file: &MatFile) -> Option<(SeriesColumns, StimulusRow)> {
    let pulses = nonempty_numeric(file, "Stimulus_Data.Opto.opto_times")?;
    let times = pulses.column(0)?;
    let labels = vec![1.0; times.len()];

    Some((
        SeriesColumns::new("opto", times, labels),
        StimulusRow {
            data_index: "opto".to_string(),
            name: "opto".to_string(),
            unit: None,
            description: format!(
                "optogenetics stimulation applied in specific intervals of the session. {}",
                PERIOD_NOTE
            ),
            comments: attribute(file, "Stimulus_Data.Opto.comments").unwrap_or_else(|| "none".to_string()),
            excitation_lambda: attribute(file, "Stimulus_Data.Opto.excitation_lambda"),
            location: attribute(file, "Stimulus_Data.Opto.excitation_location"),
            rate: None,
            device: Some(OPTO_DEVICE),
            stim_type: OGEN_STIMULUS,
        },
    ))
}

pub(super) fn extract(source: &SessionSource<'_>, staging: &mut Staging) -> Stage<()> {
    let path = match first_file(source.dir, "complementary_exports/*_Events.mat")? {
        Some(path) => path,
        None => {
            debug!("No events export in {}", source.dir.display());
            return Ok(());
        }
    };
    let file = match mat::load(&path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Ignoring unreadable events export: {}", e);
            return Ok(());
        }
    };

    let (series, rows): (Vec<_>, Vec<_>) = context_series(&file)
        .into_iter()
        .chain(opto_series(&file))
        .unzip();
    if series.is_empty() {
        debug!("Events export {} holds no stimuli", path.display());
        return Ok(());
    }

    staging.write_series(Section::StimulationData, &series, &rows)?;
    Ok(())
}
