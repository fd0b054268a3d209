use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::command::{ToolRunner, Tools};
use crate::config::RunConfig;
use crate::denoise::write_engine_config;
use crate::domain::{SeriesName, SubjectMetadata};
use crate::engine::{EngineOutcome, run_with_policy};
use crate::error::PipelineError;
use crate::layout::{EXPECTED_OUTPUTS, SubjectLayout, copy_file_atomic, remove_file_if_exists, write_bytes_atomic};

pub const AGGREGATE_ENGINE_FUNCTION: &str = "analyses_v2";

/// Input of the subject-level summary stage of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateConfig {
    pub path_wb_c: Utf8PathBuf,
    #[serde(rename = "FNL_preproc_path")]
    pub fnl_preproc_path: Utf8PathBuf,
    pub framewise_disp_path: Utf8PathBuf,
    #[serde(rename = "epi_TR")]
    pub epi_tr: f64,
    #[serde(rename = "summary_Dir")]
    pub summary_dir: Utf8PathBuf,
    pub skip_seconds: u32,
    pub brain_radius_in_mm: f64,
    pub expected_contiguous_frame_count: u32,
    pub result_dir: Utf8PathBuf,
    pub path_motion_numbers: Utf8PathBuf,
    pub path_ciftis: Utf8PathBuf,
    pub path_timecourses: Utf8PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FramesPerScan {
    pub series: SeriesName,
    pub frames: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedLink {
    pub target: Utf8PathBuf,
    pub link: Utf8PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinalizeReport {
    pub aggregate_fallback: bool,
    pub mat_files_copied: usize,
    pub frames_per_scan: Vec<FramesPerScan>,
    pub analysis_folder: Option<Utf8PathBuf>,
    pub links: Vec<PublishedLink>,
    pub missing_outputs: Vec<String>,
}

pub struct Finalizer<'a, R: ToolRunner> {
    runner: &'a R,
    tools: Tools<'a>,
    layout: &'a SubjectLayout,
    config: &'a RunConfig,
}

impl<'a, R: ToolRunner> Finalizer<'a, R> {
    pub fn new(
        runner: &'a R,
        tools: Tools<'a>,
        layout: &'a SubjectLayout,
        config: &'a RunConfig,
    ) -> Self {
        Self {
            runner,
            tools,
            layout,
            config,
        }
    }

    pub fn run(
        &self,
        series: &[SeriesName],
        repetition_time: f64,
        analysis_folder: &Utf8Path,
    ) -> Result<FinalizeReport, PipelineError> {
        self.concat_frame_displacement()?;
        let outcome = self.run_aggregate(repetition_time)?;
        let mat_files_copied = self.copy_mat_files()?;
        let frames_per_scan = self.write_frames_per_scan(series)?;
        let links = self.publish(analysis_folder)?;
        let missing_outputs = self.check_outputs();

        Ok(FinalizeReport {
            aggregate_fallback: outcome.is_fallback(),
            mat_files_copied,
            frames_per_scan,
            analysis_folder: Some(analysis_folder.to_path_buf()),
            links,
            missing_outputs,
        })
    }

    /// Concatenates `summary/FD_REST<n>.txt` into `summary/all_FD.txt` in
    /// ascending series order.
    pub fn concat_frame_displacement(&self) -> Result<Utf8PathBuf, PipelineError> {
        let summary = self.layout.summary_dir();
        let all_fd = self.layout.all_fd();
        let entries = fs::read_dir(&summary)
            .map_err(|err| PipelineError::Filesystem(format!("read {summary}: {err}")))?;

        let mut parts = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.contains("FD_REST") {
                continue;
            }
            let index = SeriesName::from_file_name(&name).ok();
            parts.push((index, name));
        }
        parts.sort();

        let mut content = Vec::new();
        for (_, name) in &parts {
            let path = summary.join(name);
            let bytes = fs::read(&path)
                .map_err(|err| PipelineError::Filesystem(format!("read {path}: {err}")))?;
            content.extend_from_slice(&bytes);
        }
        tracing::info!(files = parts.len(), output = %all_fd, "concatenated frame displacement files");
        remove_file_if_exists(&all_fd)?;
        write_bytes_atomic(&all_fd, &content)?;
        Ok(all_fd)
    }

    pub fn aggregate_config(&self, repetition_time: f64) -> AggregateConfig {
        let env = &self.config.environment;
        let project = &self.config.project_config;
        AggregateConfig {
            path_wb_c: env.wb_command.clone(),
            fnl_preproc_path: self.config.code_dir.clone(),
            framewise_disp_path: env.framewise_disp_path.clone(),
            epi_tr: repetition_time,
            summary_dir: self.layout.summary_dir(),
            skip_seconds: project.skip_seconds,
            brain_radius_in_mm: project.brain_radius_mm,
            expected_contiguous_frame_count: project.expected_contiguous_frame_count,
            result_dir: self.layout.matlab_code_dir(),
            path_motion_numbers: self.layout.results_dir(),
            path_ciftis: self.layout.workbench_dir(),
            path_timecourses: self.layout.timecourses_dir(),
        }
    }

    pub fn run_aggregate(&self, repetition_time: f64) -> Result<EngineOutcome, PipelineError> {
        let config_path = self.layout.aggregate_engine_config();
        write_engine_config(&config_path, &self.aggregate_config(repetition_time))?;

        let invocation =
            self.tools
                .engine(&self.config.code_dir, AGGREGATE_ENGINE_FUNCTION, &config_path);
        tracing::info!(config = %config_path, "running subject-level summary stage");
        run_with_policy(
            self.runner,
            &self.config.aggregate_engine,
            invocation,
            &self.layout.fd_plot(),
        )
        .into_result(AGGREGATE_ENGINE_FUNCTION)
    }

    /// Copies the engine's `.mat` outputs into `analyses_v2/motion`.
    pub fn copy_mat_files(&self) -> Result<usize, PipelineError> {
        let source = self.layout.matlab_code_dir();
        let dest = self.layout.motion_dir();
        let entries = fs::read_dir(&source)
            .map_err(|err| PipelineError::Filesystem(format!("read {source}: {err}")))?;

        let mut copied = 0;
        for entry in entries {
            let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.ends_with(".mat") {
                continue;
            }
            copy_file_atomic(&source.join(&name), &dest.join(&name))?;
            copied += 1;
        }
        Ok(copied)
    }

    /// Records the frame count (regressor line count) of each series.
    pub fn write_frames_per_scan(
        &self,
        series: &[SeriesName],
    ) -> Result<Vec<FramesPerScan>, PipelineError> {
        let mut counts = Vec::with_capacity(series.len());
        let mut content = String::new();
        for name in series {
            let regressors = self.layout.regressors(*name);
            let bytes = fs::read(&regressors)
                .map_err(|_| PipelineError::MissingRegressor(regressors.clone()))?;
            // newline count, as `wc -l` reports it
            let frames = bytes.iter().filter(|byte| **byte == b'\n').count();
            content.push_str(&format!("{frames}\n"));
            counts.push(FramesPerScan {
                series: *name,
                frames,
            });
        }
        let output = self.layout.frames_per_scan();
        remove_file_if_exists(&output)?;
        write_bytes_atomic(&output, content.as_bytes())?;
        Ok(counts)
    }

    /// Links the subject's outputs into the site-wide analysis tree, replacing
    /// whatever a previous run published there.
    pub fn publish(&self, analysis_folder: &Utf8Path) -> Result<Vec<PublishedLink>, PipelineError> {
        if analysis_folder.exists() {
            tracing::info!(folder = %analysis_folder, "removing analysis folder from previous run");
            fs::remove_dir_all(analysis_folder)
                .map_err(|err| PipelineError::Filesystem(format!("remove {analysis_folder}: {err}")))?;
        }
        fs::create_dir_all(analysis_folder)
            .map_err(|err| PipelineError::DirectoryCreation {
                path: analysis_folder.to_path_buf(),
                message: err.to_string(),
            })?;

        let workbench = self.layout.workbench_dir();
        let mut plan = vec![
            (self.layout.merged_dense(), workbench.clone()),
            (self.layout.spec_file(), workbench.clone()),
            (self.layout.summary_dir(), analysis_folder.to_path_buf()),
        ];
        plan.extend(
            self.layout
                .analysis_subdirs()
                .into_iter()
                .map(|dir| (dir, analysis_folder.to_path_buf())),
        );

        let mut links = Vec::with_capacity(plan.len());
        for (target, dir) in plan {
            let Some(file_name) = target.file_name() else {
                continue;
            };
            let link = dir.join(file_name);
            if fs::symlink_metadata(&link).is_ok() {
                fs::remove_file(&link)
                    .map_err(|err| PipelineError::Filesystem(format!("remove {link}: {err}")))?;
            }
            symlink(&target, &link)?;
            links.push(PublishedLink { target, link });
        }
        Ok(links)
    }

    /// Relative paths of expected final outputs that are missing.
    pub fn check_outputs(&self) -> Vec<String> {
        let missing: Vec<String> = EXPECTED_OUTPUTS
            .iter()
            .filter(|relative| !self.layout.root().join(relative).exists())
            .map(|relative| relative.to_string())
            .collect();
        if missing.is_empty() {
            tracing::info!(subject = self.layout.subject(), "all expected outputs present");
        } else {
            tracing::warn!(missing = ?missing, "expected outputs are missing");
        }
        missing
    }
}

/// `<root>/<pipeline>/<subject>+<visit>`, where `root` defaults to
/// `<study_root>/analyses_v2`.
pub fn analysis_folder(
    metadata: &SubjectMetadata,
    subject: &str,
    root_override: Option<&Utf8Path>,
) -> Utf8PathBuf {
    let root = match root_override {
        Some(root) => root.to_path_buf(),
        None => metadata.study_root.join("analyses_v2"),
    };
    root.join(&metadata.pipeline)
        .join(format!("{subject}+{}", metadata.visit))
}

#[cfg(unix)]
fn symlink(target: &Utf8Path, link: &Utf8Path) -> Result<(), PipelineError> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|err| PipelineError::Filesystem(format!("link {link} -> {target}: {err}")))
}

#[cfg(not(unix))]
fn symlink(target: &Utf8Path, link: &Utf8Path) -> Result<(), PipelineError> {
    Err(PipelineError::Filesystem(format!(
        "symbolic links are not supported here ({link} -> {target})"
    )))
}
