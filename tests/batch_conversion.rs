use std::fs;
use std::path::{Path, PathBuf};

use session_converter::assembler::BEHAVIOR_MODULE;
use session_converter::document::{AcquisitionItem, DataInterface};
use session_converter::locator::read_report;
use session_converter::mat::{self, MatValue};
use session_converter::writer::read_json_document;
use session_converter::{BatchConfig, BatchOrchestrator};

const FRAMES: usize = 8;

fn write_lines_catalog(dir: &Path) -> PathBuf {
    let path = dir.join("Lines.mat");
    let lines = MatValue::cell(
        2,
        2,
        vec![
            MatValue::text("B6"),
            MatValue::text("VG"),
            MatValue::text("Bl6"),
            MatValue::text("VGAT-Cre"),
        ],
    );
    mat::write_file(&path, &[("Lines", &lines)]).unwrap();
    path
}

/// A behavior-only session with tracking, processed behavior and a video.
fn write_session(data: &Path) -> PathBuf {
    let session = data.join("cohort1").join("B6_07").join("S2_230601_Retrieval");
    fs::create_dir_all(session.join("complementary_exports")).unwrap();
    fs::write(session.join("B6_07_230601_Retrieval.pl2"), b"").unwrap();
    fs::write(session.join("B6_07_230601_Retrieval.AVI"), b"RIFF....AVI ").unwrap();

    let dvt: String = (0..FRAMES).map(|i| format!("{},{}\n", i, i as f64 * 0.1)).collect();
    fs::write(session.join("B6_07_230601_Retrieval.DVT"), dvt).unwrap();

    let mut center: Vec<f64> = (0..FRAMES).map(|i| 10.0 + i as f64).collect();
    center.extend((0..FRAMES).map(|i| 50.0 - i as f64));
    center[3] = f64::NAN;
    let rgb = MatValue::structure(vec![
        ("Center", MatValue::matrix(FRAMES, 2, center).unwrap()),
        ("MotionMeasure", MatValue::column(vec![0.5; FRAMES])),
    ]);
    mat::write_file(session.join("B6_07_230601_Retrieval_Tracking.mat"), &[("RGB", &rgb)]).unwrap();

    let data_struct = MatValue::structure(vec![
        ("Immobility", MatValue::matrix(1, 2, vec![0.2, 0.5]).unwrap()),
        ("Grooming", MatValue::matrix(0, 0, vec![]).unwrap()),
    ]);
    mat::write_file(
        session.join("B6_07_230601_Retrieval_TempBehaviour.mat"),
        &[
            ("StepSpeed", &MatValue::column(vec![0.01; FRAMES])),
            ("Data", &data_struct),
        ],
    )
    .unwrap();

    // Unrelated mouse with two candidate roots
    fs::create_dir_all(data.join("cohort1").join("B6_09").join("S1_230601_Retrieval")).unwrap();
    fs::create_dir_all(data.join("cohort2").join("B6_09").join("S1_230601_Retrieval")).unwrap();
    session
}

#[test]
fn behavior_only_manifest_converts_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    let session = write_session(&data);
    let lines = write_lines_catalog(dir.path());

    let manifest = dir.path().join("sessions.csv");
    fs::write(
        &manifest,
        "Line,MouseID,Date,Paradigm,Experimenter,Behaviour,HeartRate,Thermal\n\
         B6,07,230601,Retrieval,CD,yes,no,no\n\
         B6,09,230601,Retrieval,CD,yes,no,no\n",
    )
    .unwrap();

    let config = BatchConfig::new(&data, dir.path().join("out"), &manifest, &lines);
    let summary = BatchOrchestrator::new(config).run().unwrap();

    assert_eq!(summary.manifest_rows, 2);
    assert_eq!(summary.unique_sessions, 1);
    assert_eq!(summary.converted(), 1);

    let scan = read_report(&summary.scan_report).unwrap();
    assert_eq!(scan.len(), 2);
    assert!(scan[0].unique_existence);
    assert!(!scan[1].unique_existence);
    assert!(!scan[1].root_multi.is_empty());

    let out = summary.output_root.join("B6_07_230601_Retrieval");
    let document = read_json_document(out.join("B6_07_230601_Retrieval.json")).unwrap();
    assert!(!session.join("session_tables").exists());

    assert_eq!(document.session.identifier, "B6_07:Retrieval");
    assert_eq!(document.session.experimenter.as_deref(), Some("CD"));
    let subject = document.subject.as_ref().unwrap();
    assert_eq!(subject.species.as_deref(), Some("Bl6/C57"));
    assert_eq!(subject.sex.as_deref(), Some("na"));

    let behavior = document.module(BEHAVIOR_MODULE).unwrap();
    match behavior.get("Position") {
        Some(DataInterface::Position(position)) => {
            let x = &position.series[0];
            assert_eq!(x.name, "x_coordinates");
            assert_eq!(x.timestamps.len(), FRAMES - 1);
            assert!(!x.timestamps.contains(&(3.0 * 0.1)));
        }
        other => panic!("unexpected interface {:?}", other),
    }
    match behavior.get("BehavioralTimeSeries") {
        Some(DataInterface::BehavioralTimeSeries(series)) => {
            let names: Vec<&str> = series.series.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, vec!["motion_measure", "speed"]);
        }
        other => panic!("unexpected interface {:?}", other),
    }
    match behavior.get("BehavioralEpochs") {
        Some(DataInterface::BehavioralEpochs(epochs)) => {
            assert_eq!(epochs.series.len(), 2);
            assert_eq!(epochs.series[0].timestamps, vec![0.2, 0.5]);
            assert_eq!(epochs.series[0].data, vec![1, -1]);
            assert!(epochs.series[1].timestamps.is_empty());
        }
        other => panic!("unexpected interface {:?}", other),
    }

    match document.acquisition("behavior_recording") {
        Some(AcquisitionItem::ImageSeries(video)) => {
            assert_eq!(video.external_file, "recordings/B6_07_230601_Retrieval.AVI");
            assert_eq!(video.format, "external");
        }
        other => panic!("unexpected acquisition item {:?}", other),
    }
    assert!(out.join("recordings").join("B6_07_230601_Retrieval.AVI").is_file());
}
