use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::command::{ToolRunner, Tools};
use crate::domain::SeriesName;
use crate::error::PipelineError;
use crate::layout::SubjectLayout;

/// One resting-state series as it moves through the per-series stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRecord {
    pub name: SeriesName,
    pub raw_path: Utf8PathBuf,
    pub repetition_time: Option<f64>,
    pub regressors_valid: Option<bool>,
    pub vent_mean: Option<Utf8PathBuf>,
    pub wm_mean: Option<Utf8PathBuf>,
    pub denoised: bool,
}

impl SeriesRecord {
    pub fn new(name: SeriesName, raw_path: Utf8PathBuf) -> Self {
        Self {
            name,
            raw_path,
            repetition_time: None,
            regressors_valid: None,
            vent_mean: None,
            wm_mean: None,
            denoised: false,
        }
    }

    pub fn index(&self) -> u32 {
        self.name.index()
    }
}

/// Lists raw resting-state series under `unprocessed/NIFTI`, skipping
/// single-band reference scans, in ascending series order.
pub fn discover(layout: &SubjectLayout) -> Result<Vec<SeriesRecord>, PipelineError> {
    let raw_dir = layout.raw_data_dir();
    let entries = fs::read_dir(&raw_dir).map_err(|_| PipelineError::NoInputData(raw_dir.clone()))?;

    let mut found = BTreeMap::<SeriesName, Utf8PathBuf>::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_raw_series(&file_name) {
            continue;
        }
        let name = SeriesName::from_file_name(&file_name)?;
        let path = raw_dir.join(&file_name);
        if let Some(previous) = found.insert(name, path) {
            return Err(PipelineError::InvalidSeriesName(format!(
                "{file_name} duplicates {name} ({previous})"
            )));
        }
    }

    if found.is_empty() {
        return Err(PipelineError::NoInputData(raw_dir));
    }

    Ok(found
        .into_iter()
        .map(|(name, path)| SeriesRecord::new(name, path))
        .collect())
}

fn is_raw_series(file_name: &str) -> bool {
    let is_nifti = file_name.ends_with(".nii.gz") || file_name.ends_with(".nii");
    is_nifti && file_name.contains("REST") && !file_name.contains("SBRef")
}

/// Reads the repetition time (`pixdim4`, seconds) from the volume header.
pub fn read_repetition_time<R: ToolRunner>(
    runner: &R,
    tools: &Tools<'_>,
    volume: &Utf8Path,
) -> Result<f64, PipelineError> {
    let output = runner.run(&tools.header(volume))?;
    parse_pixdim4(&output.stdout).ok_or_else(|| PipelineError::ToolFailed {
        program: "fslhd".to_string(),
        message: format!("no positive pixdim4 in header of {volume}"),
    })
}

fn parse_pixdim4(header: &str) -> Option<f64> {
    header
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("pixdim4") => fields.next(),
                _ => None,
            }
        })
        .filter_map(|value| value.parse::<f64>().ok())
        .find(|value| value.is_finite() && *value > 0.0)
}
