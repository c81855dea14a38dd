//! Behavioral tracking: position, motion, speed and labelled epochs.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use super::{first_file, SessionSource, Stage, Staging};
use crate::error::{ExtractionFailure, Result};
use crate::mat::{self, MatFile};
use crate::tables::{Section, SeriesColumns};

/// Behavior labels looked up under `Data` in the processed-behavior file.
/// Several spellings of the same behavior occur across sessions.
pub const BEHAVIOR_LABELS: [&str; 19] = [
    "Rearing",
    "rearing",
    "Immobility",
    "immobility",
    "Remaining",
    "remaining",
    "locomotion",
    "Locomotion",
    "AreaBound",
    "area_bound",
    "Area-bound",
    "StretchAttend",
    "stretch_attend",
    "Stretch-attend posture",
    "Grooming",
    "grooming",
    "TailRattling",
    "tail_rattling",
    "Tail rattling",
];

#[derive(Debug, Serialize)]
struct BehaviorRow {
    data_index: String,
    name: String,
    description: String,
    reference_frame: Option<&'static str>,
    unit: Option<&'static str>,
    comments: &'static str,
    interface_subtype: &'static str,
}

impl BehaviorRow {
    fn new(name: &str, description: String, unit: Option<&'static str>, subtype: &'static str) -> Self {
        BehaviorRow {
            data_index: name.to_string(),
            name: name.to_string(),
            description,
            reference_frame: None,
            unit,
            comments: "none",
            interface_subtype: subtype,
        }
    }
}

/// Frame times: the second column of the header-less `.DVT` file.
fn read_frame_times(path: &Path) -> Result<Vec<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut times = Vec::new();
    for record in reader.records() {
        let record = record?;
        let time = record
            .get(1)
            .and_then(|cell| cell.parse::<f64>().ok())
            .unwrap_or(f64::NAN);
        times.push(time);
    }
    Ok(times)
}

fn column(file: &MatFile, entry: &str, index: usize) -> Result<Vec<f64>> {
    let array = file.require_numeric(entry)?;
    array.column(index).ok_or_else(|| {
        crate::error::ConvertError::mat(
            &file.path,
            format!("'{}' has {} columns, expected at least {}", entry, array.cols(), index + 1),
        )
    })
}

/// `[start, end]` rows of an M×2 range matrix. Rows with a missing bound
/// are kept as `None`.
fn range_rows(file: &MatFile, entry: &str) -> Option<Vec<Option<(f64, f64)>>> {
    let array = file.lookup(entry)?.as_numeric()?;
    if array.is_empty() {
        return Some(Vec::new());
    }
    if array.cols() < 2 {
        warn!("Ignoring {} in {}: expected two columns", entry, file.path.display());
        return None;
    }
    Some(
        array
            .data
            .rows()
            .into_iter()
            .map(|row| (row[0].is_finite() && row[1].is_finite()).then(|| (row[0], row[1])))
            .collect(),
    )
}

pub(super) fn extract(source: &SessionSource<'_>, staging: &mut Staging) -> Stage<()> {
    let dvt = first_file(source.dir, "*.DVT")?.ok_or(ExtractionFailure::NoFrameTiming)?;
    let frame_times = read_frame_times(&dvt)?;
    debug!("{} frames in {}", frame_times.len(), dvt.display());

    let tracking_path = first_file(source.dir, "*_Tracking.mat")?.ok_or(ExtractionFailure::NoTrackingFile)?;
    let tracking = mat::load(&tracking_path)?;

    let mut series = Vec::new();
    let mut rows = Vec::new();

    for (index, axis) in ["x", "y"].iter().enumerate() {
        let name = format!("{}_coordinates", axis);
        series.push(SeriesColumns::new(
            name.as_str(),
            frame_times.clone(),
            column(&tracking, "RGB.Center", index)?,
        ));
        let mut row = BehaviorRow::new(&name, format!("mouse {} position", axis), Some("px"), "position");
        row.reference_frame = Some("na");
        rows.push(row);
    }

    series.push(SeriesColumns::new(
        "motion_measure",
        frame_times.clone(),
        column(&tracking, "RGB.MotionMeasure", 0)?,
    ));
    rows.push(BehaviorRow::new(
        "motion_measure",
        "motion measure".to_string(),
        Some("au"),
        "time_series",
    ));

    match first_file(source.dir, "*_TempBehaviour.mat")? {
        Some(path) => {
            let processed = mat::load(&path)?;

            series.push(SeriesColumns::new(
                "speed",
                frame_times,
                processed.require_numeric("StepSpeed")?.flatten(),
            ));
            rows.push(BehaviorRow::new(
                "speed",
                "step speed of the mouse".to_string(),
                Some("m.s-1"),
                "time_series",
            ));

            for label in BEHAVIOR_LABELS {
                if let Some(ranges) = range_rows(&processed, &format!("Data.{}", label)) {
                    series.push(SeriesColumns::ranges(label, ranges));
                    rows.push(BehaviorRow::new(
                        label,
                        format!("epoch range for the behavior {}", label),
                        None,
                        "epochs",
                    ));
                }
            }
        }
        None => debug!("No processed behavior file in {}", source.dir.display()),
    }

    staging.write_series(Section::BehavioralData, &series, &rows)?;
    Ok(())
}
