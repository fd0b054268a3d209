use camino::{Utf8Path, Utf8PathBuf};

use crate::command::{ToolRunner, Tools};
use crate::domain::SeriesName;
use crate::error::PipelineError;
use crate::layout::{copy_file_atomic, remove_file_if_exists};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// The series was copied to start the merged artifact.
    Seeded,
    /// The series was appended to the existing merged artifact.
    Appended,
}

/// Accumulates denoised dense series into the subject-level artifact, one
/// series at a time in ascending index order.
pub struct MergeEngine<'a, R: ToolRunner> {
    runner: &'a R,
    tools: Tools<'a>,
    merged: Utf8PathBuf,
    last_merged: Option<SeriesName>,
}

impl<'a, R: ToolRunner> MergeEngine<'a, R> {
    pub fn new(runner: &'a R, tools: Tools<'a>, merged: Utf8PathBuf) -> Self {
        Self {
            runner,
            tools,
            merged,
            last_merged: None,
        }
    }

    pub fn merged_path(&self) -> &Utf8Path {
        &self.merged
    }

    pub fn last_merged(&self) -> Option<SeriesName> {
        self.last_merged
    }

    /// Drops any merged artifact left by a previous run.
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        if self.merged.exists() {
            tracing::info!(merged = %self.merged, "removing existing merged dense series");
        }
        remove_file_if_exists(&self.merged)?;
        self.last_merged = None;
        Ok(())
    }

    pub fn add(&mut self, series: SeriesName, denoised: &Utf8Path) -> Result<MergeAction, PipelineError> {
        if let Some(last) = self.last_merged {
            if series <= last {
                return Err(PipelineError::MergeOrder {
                    index: series.index(),
                    last: last.index(),
                });
            }
        }
        if !denoised.exists() {
            return Err(PipelineError::MissingInput(denoised.to_path_buf()));
        }

        let action = match self.last_merged {
            None => {
                tracing::info!(series = %series, merged = %self.merged, "seeding merged dense series");
                remove_file_if_exists(&self.merged)?;
                copy_file_atomic(denoised, &self.merged)?;
                MergeAction::Seeded
            }
            Some(_) => {
                tracing::info!(series = %series, merged = %self.merged, "appending to merged dense series");
                self.runner
                    .run(&self.tools.cifti_merge(&self.merged, denoised))?;
                MergeAction::Appended
            }
        };
        self.last_merged = Some(series);
        Ok(action)
    }
}
