//! Thermal imaging: tail temperature sampled at the thermal camera's frame
//! times.

use serde::Serialize;

use super::{first_file, SessionSource, Stage, Staging};
use crate::error::{ConvertError, ExtractionFailure};
use crate::mat;
use crate::signal::unique_sorted;
use crate::tables::{Section, SeriesColumns};

/// Processing module that holds thermal readouts.
pub const THERMAL_MODULE: &str = "thermal";

#[derive(Debug, Serialize)]
struct ProcessedRow {
    data_index: &'static str,
    name: &'static str,
    unit: &'static str,
    description: &'static str,
    comments: &'static str,
    module_name: &'static str,
    module_description: &'static str,
}

pub(super) fn extract(source: &SessionSource<'_>, staging: &mut Staging) -> Stage<()> {
    let temperature_path =
        first_file(source.dir, "*_Temperature.mat")?.ok_or(ExtractionFailure::NoTemperatureFile)?;
    let tracking_path =
        first_file(source.dir, "*_Tracking.mat")?.ok_or(ExtractionFailure::NoTrackingFile)?;

    let temperature = mat::load(&temperature_path)?;
    let tracking = mat::load(&tracking_path)?;

    let times = unique_sorted(&tracking.require_numeric("Thermal.Times")?.flatten());
    let tail_max = temperature.require_numeric("Tail.Max")?;
    let values = tail_max.column(1).ok_or_else(|| {
        ConvertError::mat(&temperature.path, "'Tail.Max' has no second column")
    })?;

    let series = [SeriesColumns::new("tail_temperature", times, values)];
    let rows = [ProcessedRow {
        data_index: "tail_temperature",
        name: "tail temperature",
        unit: "degrees-celsius",
        description: "tail temperature",
        comments: "none",
        module_name: THERMAL_MODULE,
        module_description: "temperature extraction",
    }];
    staging.write_series(Section::ProcessedData, &series, &rows)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::{fixtures, staging_dir, ExtractionOutcome, SessionExtractor};
    use crate::config::ConversionDefaults;
    use crate::error::ExtractionFailure;
    use crate::mat::{self, MatValue};
    use crate::tables::{TimeColumn, WideTable};
    use crate::types::DataRequest;

    fn request() -> DataRequest {
        DataRequest {
            thermal: true,
            ..DataRequest::default()
        }
    }

    #[test]
    fn tail_temperature_uses_deduplicated_thermal_times() {
        let dir = tempfile::tempdir().unwrap();
        let lines = fixtures::lines_catalog(dir.path());
        let session = fixtures::session_dir(dir.path());
        fixtures::tracking(&session, 3);
        let tail = MatValue::structure(vec![(
            "Max",
            MatValue::matrix(3, 2, vec![0.0, 0.0, 0.0, 30.5, 31.0, 31.5]).unwrap(),
        )]);
        mat::write_file(session.join("M1_01_230522_Fear_Temperature.mat"), &[("Tail", &tail)]).unwrap();

        let extractor = SessionExtractor::new(lines, ConversionDefaults::default());
        let outcome = extractor.extract(&session, "AB", request()).unwrap();
        assert!(matches!(outcome, ExtractionOutcome::Success(ref s) if s.section_names().contains(&"processed_data")));

        let table = WideTable::load(&staging_dir(&session).join("processedData.csv")).unwrap();
        let tail = table.series("tail_temperature").unwrap();
        assert_eq!(tail.time, TimeColumn::Values(vec![1.0, 2.0, 3.0]));
        assert_eq!(tail.data, vec![30.5, 31.0, 31.5]);
    }

    #[test]
    fn temperature_without_tracking_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let lines = fixtures::lines_catalog(dir.path());
        let session = fixtures::session_dir(dir.path());
        let tail = MatValue::structure(vec![("Max", MatValue::matrix(1, 2, vec![0.0, 30.0]).unwrap())]);
        mat::write_file(session.join("M1_01_230522_Fear_Temperature.mat"), &[("Tail", &tail)]).unwrap();

        let extractor = SessionExtractor::new(lines, ConversionDefaults::default());
        let outcome = extractor.extract(&session, "AB", request()).unwrap();
        assert_eq!(outcome, ExtractionOutcome::Failed(ExtractionFailure::NoTrackingFile));

        std::fs::remove_file(session.join("M1_01_230522_Fear_Temperature.mat")).unwrap();
        let outcome = extractor.extract(&session, "AB", request()).unwrap();
        assert_eq!(outcome, ExtractionOutcome::Failed(ExtractionFailure::NoTemperatureFile));
    }
}
