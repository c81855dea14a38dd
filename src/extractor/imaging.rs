//! Behavior video, referenced as an external file.

use std::fs;

use serde::Serialize;
use tracing::{debug, warn};

use super::{find_files, SessionSource, Stage, Staging, VIDEO_DEVICE};
use crate::tables::Section;

/// Frame rate of the behavior camera.
pub const VIDEO_RATE: f64 = 30.0;

#[derive(Debug, Serialize)]
struct ImageRow {
    name: &'static str,
    description: &'static str,
    unit: &'static str,
    external_file: String,
    starting_time: f64,
    rate: f64,
    device: &'static str,
}

pub(super) fn extract(source: &SessionSource<'_>, staging: &mut Staging) -> Stage<()> {
    let pattern = format!("*_{}.AVI", glob::Pattern::escape(&source.key.paradigm));
    let videos = find_files(source.dir, &pattern)?;
    let video = match videos.as_slice() {
        [single] => single,
        [] => {
            debug!("No video in {}", source.dir.display());
            return Ok(());
        }
        _ => {
            warn!("{} videos match {} in {}; skipping", videos.len(), pattern, source.dir.display());
            return Ok(());
        }
    };

    let absolute = fs::canonicalize(video).unwrap_or_else(|_| video.clone());
    let row = ImageRow {
        name: "behavior_recording",
        description: "video of the behaving mouse in this session",
        unit: "na",
        external_file: absolute.to_string_lossy().into_owned(),
        starting_time: 0.0,
        rate: VIDEO_RATE,
        device: VIDEO_DEVICE,
    };
    staging.write_meta(Section::ImagesInformation, &[row])?;
    Ok(())
}
