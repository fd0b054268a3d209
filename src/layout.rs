use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{SeriesName, Tissue};
use crate::error::PipelineError;

pub const ANALYSIS_SUBDIRS: [&str; 5] = ["FCmaps", "motion", "timecourses", "matlab_code", "workbench"];

/// Final artifacts every successful run should leave behind, relative to the
/// subject root.
pub const EXPECTED_OUTPUTS: [&str; 10] = [
    "summary/all_FD.txt",
    "summary/DVARS_and_FD_CONCA.png",
    "summary/FD_dist.png",
    "analyses_v2/timecourses/Gordon_subcortical.csv",
    "analyses_v2/timecourses/Gordon.csv",
    "analyses_v2/timecourses/Power.csv",
    "analyses_v2/timecourses/Yeo.csv",
    "analyses_v2/matlab_code/FD.mat",
    "analyses_v2/matlab_code/motion_numbers.mat",
    "analyses_v2/matlab_code/power_2014_motion.mat",
];

const DENSE_SUFFIX: &str = "_Atlas.dtseries.nii";

/// Path arithmetic for one subject's HCP output tree.
#[derive(Debug, Clone)]
pub struct SubjectLayout {
    root: Utf8PathBuf,
    subject: String,
}

impl SubjectLayout {
    pub fn new(root: impl Into<Utf8PathBuf>, subject: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            subject: subject.into(),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn raw_data_dir(&self) -> Utf8PathBuf {
        self.root.join("unprocessed").join("NIFTI")
    }

    pub fn summary_dir(&self) -> Utf8PathBuf {
        self.root.join("summary")
    }

    pub fn analyses_dir(&self) -> Utf8PathBuf {
        self.root.join("analyses_v2")
    }

    pub fn analysis_subdir(&self, name: &str) -> Utf8PathBuf {
        self.analyses_dir().join(name)
    }

    pub fn analysis_subdirs(&self) -> Vec<Utf8PathBuf> {
        ANALYSIS_SUBDIRS
            .iter()
            .map(|name| self.analysis_subdir(name))
            .collect()
    }

    pub fn matlab_code_dir(&self) -> Utf8PathBuf {
        self.analysis_subdir("matlab_code")
    }

    pub fn motion_dir(&self) -> Utf8PathBuf {
        self.analysis_subdir("motion")
    }

    pub fn workbench_dir(&self) -> Utf8PathBuf {
        self.analysis_subdir("workbench")
    }

    pub fn timecourses_dir(&self) -> Utf8PathBuf {
        self.analysis_subdir("timecourses")
    }

    pub fn results_dir(&self) -> Utf8PathBuf {
        self.root.join("MNINonLinear").join("Results")
    }

    pub fn rois_dir(&self) -> Utf8PathBuf {
        self.root.join("MNINonLinear").join("ROIs")
    }

    pub fn segmentation(&self) -> Utf8PathBuf {
        self.rois_dir().join("wmparc.2.nii.gz")
    }

    pub fn spec_file(&self) -> Utf8PathBuf {
        self.root
            .join("MNINonLinear")
            .join("fsaverage_LR32k")
            .join(format!("{}.32k_fs_LR.wb.spec", self.subject))
    }

    pub fn merged_dense(&self) -> Utf8PathBuf {
        self.results_dir()
            .join(format!("{}_FNL_preproc{DENSE_SUFFIX}", self.subject))
    }

    pub fn series_dir(&self, series: SeriesName) -> Utf8PathBuf {
        self.results_dir().join(series.to_string())
    }

    pub fn series_volume(&self, series: SeriesName) -> Utf8PathBuf {
        self.series_dir(series).join(format!("{series}.nii.gz"))
    }

    pub fn series_dense(&self, series: SeriesName) -> Utf8PathBuf {
        self.series_dir(series).join(format!("{series}{DENSE_SUFFIX}"))
    }

    pub fn regressors(&self, series: SeriesName) -> Utf8PathBuf {
        self.series_dir(series).join("Movement_Regressors.txt")
    }

    /// Per-series working area for the denoising stage.
    pub fn preproc_dir(&self, series: SeriesName) -> Utf8PathBuf {
        self.series_dir(series).join("FNL_preproc")
    }

    pub fn preproc_dense_input(&self, series: SeriesName) -> Utf8PathBuf {
        self.preproc_dir(series).join(format!("{series}{DENSE_SUFFIX}"))
    }

    pub fn denoised_dense_name(&self, series: SeriesName) -> String {
        format!("{series}_FNL_preproc{DENSE_SUFFIX}")
    }

    pub fn denoised_dense(&self, series: SeriesName) -> Utf8PathBuf {
        self.preproc_dir(series).join(self.denoised_dense_name(series))
    }

    pub fn mask_mean(&self, series: SeriesName, tissue: Tissue) -> Utf8PathBuf {
        self.preproc_dir(series)
            .join(format!("{series}_{}_mean.txt", tissue.prefix()))
    }

    pub fn series_engine_config(&self, series: SeriesName) -> Utf8PathBuf {
        self.preproc_dir(series).join("FNL_preproc_mat_config.json")
    }

    pub fn series_engine_cmd(&self, series: SeriesName) -> Utf8PathBuf {
        self.preproc_dir(series).join("octave_cmd.txt")
    }

    pub fn aggregate_engine_config(&self) -> Utf8PathBuf {
        self.matlab_code_dir().join("analyses_v2_mat_config.json")
    }

    pub fn all_fd(&self) -> Utf8PathBuf {
        self.summary_dir().join("all_FD.txt")
    }

    pub fn fd_plot(&self) -> Utf8PathBuf {
        self.summary_dir().join("FD_dist.png")
    }

    pub fn frames_per_scan(&self) -> Utf8PathBuf {
        self.summary_dir().join("frames_per_scan.txt")
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), PipelineError> {
    let parent = dest
        .parent()
        .ok_or_else(|| PipelineError::Filesystem(format!("invalid destination path {dest}")))?;
    fs::create_dir_all(parent).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix(".hcp-copy")
        .tempfile_in(parent)
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    fs::copy(source, temp.path())
        .map_err(|err| PipelineError::Filesystem(format!("copy {source}: {err}")))?;
    if dest.exists() {
        fs::remove_file(dest).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    }
    temp.persist(dest)
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn remove_file_if_exists(path: &Utf8Path) -> Result<(), PipelineError> {
    if path.exists() {
        fs::remove_file(path)
            .map_err(|err| PipelineError::Filesystem(format!("remove {path}: {err}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let layout = SubjectLayout::new("/data/SUBJ", "SUBJ");
        let rest2 = SeriesName::new(2);

        assert!(layout.preproc_dir(rest2).ends_with("MNINonLinear/Results/REST2/FNL_preproc"));
        assert!(layout.denoised_dense(rest2).ends_with("REST2_FNL_preproc_Atlas.dtseries.nii"));
        assert!(layout.mask_mean(rest2, Tissue::Ventricle).ends_with("REST2_vent_mean.txt"));
        assert!(layout.merged_dense().ends_with("Results/SUBJ_FNL_preproc_Atlas.dtseries.nii"));
        assert!(layout.spec_file().ends_with("fsaverage_LR32k/SUBJ.32k_fs_LR.wb.spec"));
    }
}
