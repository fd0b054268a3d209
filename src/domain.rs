use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

static SERIES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"REST(\d+)").expect("series pattern is a valid regex"));

/// A resting-state series, identified by the numeric suffix of `REST<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesName {
    index: u32,
}

impl SeriesName {
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Extracts the series from a raw file name such as `SUBJ_REST2.nii.gz`.
    /// The last `REST<n>` occurrence wins so subject codes containing the
    /// token do not shadow the series suffix.
    pub fn from_file_name(name: &str) -> Result<Self, PipelineError> {
        let index = SERIES_RE
            .captures_iter(name)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|index| *index > 0)
            .ok_or_else(|| PipelineError::InvalidSeriesName(name.to_string()))?;
        Ok(Self { index })
    }
}

impl fmt::Display for SeriesName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REST{}", self.index)
    }
}

impl FromStr for SeriesName {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_file_name(value.trim())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tissue {
    WhiteMatter,
    Ventricle,
}

impl Tissue {
    pub fn prefix(&self) -> &'static str {
        match self {
            Tissue::WhiteMatter => "wm",
            Tissue::Ventricle => "vent",
        }
    }
}

impl fmt::Display for Tissue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tissue::WhiteMatter => write!(f, "white matter"),
            Tissue::Ventricle => write!(f, "ventricle"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hemisphere {
    Left,
    Right,
}

impl Hemisphere {
    pub fn letter(&self) -> &'static str {
        match self {
            Hemisphere::Left => "L",
            Hemisphere::Right => "R",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcellationVariant {
    /// Cortical surface plus subcortical volume.
    Combined,
    SubcorticalOnly,
}

impl ParcellationVariant {
    pub const ALL: [ParcellationVariant; 2] = [
        ParcellationVariant::Combined,
        ParcellationVariant::SubcorticalOnly,
    ];

    /// Both variants parcellate against the atlas's combined label; only the
    /// output name tells them apart.
    pub fn label_file_name(&self, atlas: &str) -> String {
        format!("{atlas}.subcortical.32k_fs_LR.dlabel.nii")
    }

    pub fn output_file_name(&self, subject: &str, atlas: &str) -> String {
        match self {
            ParcellationVariant::Combined => {
                format!("{subject}_FNL_preproc_{atlas}_subcortical.ptseries.nii")
            }
            ParcellationVariant::SubcorticalOnly => {
                format!("{subject}_FNL_preproc_{atlas}.ptseries.nii")
            }
        }
    }
}

impl fmt::Display for ParcellationVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParcellationVariant::Combined => write!(f, "combined"),
            ParcellationVariant::SubcorticalOnly => write!(f, "subcortical-only"),
        }
    }
}

/// What to do with a series whose movement regressors fail validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RegressorPolicy {
    /// Abort the whole subject run.
    #[default]
    Abort,
    /// Drop the series from denoising, merging and parcellation.
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStage {
    Created,
    DirectoriesPrepared,
    MasksReady,
    SeriesProcessed,
    Merged,
    Parcellated,
    Finalized,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStage::Created => "created",
            RunStage::DirectoriesPrepared => "directories-prepared",
            RunStage::MasksReady => "masks-ready",
            RunStage::SeriesProcessed => "series-processed",
            RunStage::Merged => "merged",
            RunStage::Parcellated => "parcellated",
            RunStage::Finalized => "finalized",
        };
        f.write_str(label)
    }
}

/// Study identifiers carried by the processed-data path:
/// `<study_root>/<subject_dir>/<visit>/<pipeline>[/<subject>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectMetadata {
    pub project: String,
    pub visit: String,
    pub pipeline: String,
    pub study_root: Utf8PathBuf,
}

impl SubjectMetadata {
    pub fn resolve(output_path: &Utf8Path, subject: &str) -> Result<Self, PipelineError> {
        let unresolvable = |reason: &str| PipelineError::UnresolvableMetadata {
            path: output_path.to_path_buf(),
            reason: reason.to_string(),
        };

        let mut parts: Vec<&str> = output_path
            .components()
            .filter_map(|component| match component {
                Utf8Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        if parts.last() == Some(&subject) {
            parts.pop();
        }
        if parts.len() < 4 {
            return Err(unresolvable("expected <project>/<subject>/<visit>/<pipeline>"));
        }

        let pipeline = parts[parts.len() - 1];
        if !pipeline.contains("HCP") {
            return Err(unresolvable("pipeline directory is not an HCP pipeline"));
        }
        let visit = parts[parts.len() - 2];
        let project = parts[parts.len() - 4];

        let mut study_root = if output_path.is_absolute() {
            Utf8PathBuf::from("/")
        } else {
            Utf8PathBuf::new()
        };
        for part in &parts[..parts.len() - 3] {
            study_root.push(part);
        }

        Ok(Self {
            project: project.to_string(),
            visit: visit.to_string(),
            pipeline: pipeline.to_string(),
            study_root,
        })
    }
}
