use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::command::{ToolRunner, Tools};
use crate::config::TissueThresholds;
use crate::domain::{Hemisphere, Tissue};
use crate::error::PipelineError;
use crate::layout::remove_file_if_exists;

/// Gaussian kernel size of the erosion step.
pub const EROSION_KERNEL: u32 = 2;

/// The subject's eroded nuisance masks; built once, read by every series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskSet {
    pub white_matter: Utf8PathBuf,
    pub ventricle: Utf8PathBuf,
}

impl MaskSet {
    pub fn mask(&self, tissue: Tissue) -> &Utf8Path {
        match tissue {
            Tissue::WhiteMatter => &self.white_matter,
            Tissue::Ventricle => &self.ventricle,
        }
    }
}

pub struct MaskBuilder<'a, R: ToolRunner> {
    runner: &'a R,
    tools: Tools<'a>,
    work_dir: &'a Utf8Path,
    subject: &'a str,
}

impl<'a, R: ToolRunner> MaskBuilder<'a, R> {
    pub fn new(runner: &'a R, tools: Tools<'a>, work_dir: &'a Utf8Path, subject: &'a str) -> Self {
        Self {
            runner,
            tools,
            work_dir,
            subject,
        }
    }

    pub fn build(
        &self,
        segmentation: &Utf8Path,
        thresholds: &TissueThresholds,
    ) -> Result<MaskSet, PipelineError> {
        if !segmentation.exists() {
            return Err(PipelineError::MissingInput(segmentation.to_path_buf()));
        }
        let white_matter = self.build_tissue(segmentation, thresholds, Tissue::WhiteMatter)?;
        let ventricle = self.build_tissue(segmentation, thresholds, Tissue::Ventricle)?;
        Ok(MaskSet {
            white_matter,
            ventricle,
        })
    }

    /// Threshold each hemisphere, OR the halves into one binary volume, then
    /// erode. Only the eroded mask survives.
    pub fn build_tissue(
        &self,
        segmentation: &Utf8Path,
        thresholds: &TissueThresholds,
        tissue: Tissue,
    ) -> Result<Utf8PathBuf, PipelineError> {
        let left = self.intermediate(tissue, Some(Hemisphere::Left));
        let right = self.intermediate(tissue, Some(Hemisphere::Right));
        let combined = self.intermediate(tissue, None);
        let eroded = self.eroded_path(tissue);

        remove_file_if_exists(&eroded)?;
        tracing::info!(tissue = %tissue, "building eroded mask");
        let steps = [
            self.tools.threshold(
                segmentation,
                thresholds.range(tissue, Hemisphere::Left),
                &left,
            ),
            self.tools.threshold(
                segmentation,
                thresholds.range(tissue, Hemisphere::Right),
                &right,
            ),
            self.tools.union_binarize(&right, &left, &combined),
            self.tools.erode(&combined, EROSION_KERNEL, &eroded),
        ];
        let result = steps
            .iter()
            .try_for_each(|step| self.runner.run(step).map(|_| ()));

        for path in [&left, &right, &combined] {
            remove_file_if_exists(path)?;
        }
        result?;

        if !eroded.exists() {
            return Err(PipelineError::MissingInput(eroded));
        }
        Ok(eroded)
    }

    pub fn eroded_path(&self, tissue: Tissue) -> Utf8PathBuf {
        self.work_dir.join(format!(
            "{}_2mm_{}_mask_eroded.nii.gz",
            tissue.prefix(),
            self.subject
        ))
    }

    fn intermediate(&self, tissue: Tissue, hemisphere: Option<Hemisphere>) -> Utf8PathBuf {
        let name = match hemisphere {
            Some(side) => format!(
                "{}_{}_2mm_{}_mask.nii.gz",
                side.letter(),
                tissue.prefix(),
                self.subject
            ),
            None => format!("{}_2mm_{}_mask.nii.gz", tissue.prefix(), self.subject),
        };
        self.work_dir.join(name)
    }
}
