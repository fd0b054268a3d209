use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::command::{ToolRunner, Tools};
use crate::domain::ParcellationVariant;
use crate::error::PipelineError;
use crate::layout::SubjectLayout;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParcellationArtifact {
    pub atlas: String,
    pub variant: ParcellationVariant,
    pub label: Utf8PathBuf,
    pub output: Utf8PathBuf,
}

/// An atlas that had no label file for a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingAtlas {
    pub atlas: String,
    pub variant: ParcellationVariant,
    pub label: Utf8PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParcellationResult {
    pub artifacts: Vec<ParcellationArtifact>,
    pub skipped: Vec<MissingAtlas>,
}

pub struct ParcellationGenerator<'a, R: ToolRunner> {
    runner: &'a R,
    tools: Tools<'a>,
    layout: &'a SubjectLayout,
    label_dir: &'a Utf8Path,
}

impl<'a, R: ToolRunner> ParcellationGenerator<'a, R> {
    pub fn new(
        runner: &'a R,
        tools: Tools<'a>,
        layout: &'a SubjectLayout,
        label_dir: &'a Utf8Path,
    ) -> Self {
        Self {
            runner,
            tools,
            layout,
            label_dir,
        }
    }

    /// Adds the merged dense series to the subject's spec file for QA.
    pub fn register_dense(&self, merged: &Utf8Path) -> Result<(), PipelineError> {
        self.runner
            .run(&self.tools.add_to_spec(&self.layout.spec_file(), merged))?;
        Ok(())
    }

    /// Atlas directory names under the label directory, sorted.
    pub fn atlases(&self) -> Result<Vec<String>, PipelineError> {
        let entries = fs::read_dir(self.label_dir)
            .map_err(|_| PipelineError::MissingInput(self.label_dir.to_path_buf()))?;
        let mut atlases = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                atlases.push(name.to_string());
            }
        }
        atlases.sort();
        Ok(atlases)
    }

    pub fn label_file(&self, atlas: &str, variant: ParcellationVariant) -> Utf8PathBuf {
        self.label_dir
            .join(atlas)
            .join("fsLR")
            .join(variant.label_file_name(atlas))
    }

    pub fn generate(&self, merged: &Utf8Path) -> Result<ParcellationResult, PipelineError> {
        let atlases = self.atlases()?;
        let mut result = ParcellationResult::default();

        for variant in ParcellationVariant::ALL {
            for atlas in &atlases {
                let label = self.label_file(atlas, variant);
                if !label.exists() {
                    tracing::warn!(atlas = %atlas, variant = %variant, label = %label, "atlas label file missing; skipping");
                    result.skipped.push(MissingAtlas {
                        atlas: atlas.clone(),
                        variant,
                        label,
                    });
                    continue;
                }

                let output = self
                    .layout
                    .results_dir()
                    .join(variant.output_file_name(self.layout.subject(), atlas));
                tracing::info!(atlas = %atlas, variant = %variant, "creating parcellated time series");
                self.runner
                    .run(&self.tools.cifti_parcellate(merged, &label, &output))?;
                self.runner
                    .run(&self.tools.add_to_spec(&self.layout.spec_file(), &output))?;
                result.artifacts.push(ParcellationArtifact {
                    atlas: atlas.clone(),
                    variant,
                    label,
                    output,
                });
            }
        }

        Ok(result)
    }
}
