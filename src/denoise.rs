use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::command::{ToolRunner, Tools};
use crate::config::RunConfig;
use crate::engine::{EngineOutcome, run_with_policy};
use crate::error::PipelineError;
use crate::layout::{SubjectLayout, copy_file_atomic, remove_file_if_exists, write_bytes_atomic};
use crate::series::SeriesRecord;

pub const SERIES_ENGINE_FUNCTION: &str = "FNL_preproc_Matlab";

/// Per-series input of the band-pass/regression engine. Field names follow
/// the engine's JSON contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub path_wb_c: Utf8PathBuf,
    #[serde(rename = "FNL_preproc_path")]
    pub fnl_preproc_path: Utf8PathBuf,
    #[serde(rename = "HCP_Mat_Path")]
    pub hcp_mat_path: Utf8PathBuf,
    pub framewise_disp_path: Utf8PathBuf,
    pub bp_order: u32,
    #[serde(rename = "lp_Hz")]
    pub lp_hz: f64,
    #[serde(rename = "hp_Hz")]
    pub hp_hz: f64,
    #[serde(rename = "TR")]
    pub tr: f64,
    pub fd_th: f64,
    pub path_cii: Utf8PathBuf,
    pub path_ex_sum: Utf8PathBuf,
    #[serde(rename = "FNL_preproc_CIFTI_name")]
    pub fnl_preproc_cifti_name: String,
    pub file_wm: Utf8PathBuf,
    pub file_vent: Utf8PathBuf,
    pub file_mov_reg: Utf8PathBuf,
    pub motion_filename: String,
    pub skip_seconds: u32,
    pub brain_radius_in_mm: f64,
    pub expected_contiguous_frame_count: u32,
    pub result_dir: Utf8PathBuf,
}

pub struct DenoiseOrchestrator<'a, R: ToolRunner> {
    runner: &'a R,
    tools: Tools<'a>,
    layout: &'a SubjectLayout,
    config: &'a RunConfig,
}

impl<'a, R: ToolRunner> DenoiseOrchestrator<'a, R> {
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

    pub fn build_config(&self, series: &SeriesRecord) -> Result<EngineConfig, PipelineError> {
        let name = series.name;
        let missing = |what: &str| {
            PipelineError::Configuration(format!("{name}: {what} not available before denoising"))
        };
        let tr = series.repetition_time.ok_or_else(|| missing("repetition time"))?;
        let file_wm = series.wm_mean.clone().ok_or_else(|| missing("white matter mean"))?;
        let file_vent = series.vent_mean.clone().ok_or_else(|| missing("ventricle mean"))?;

        let env = &self.config.environment;
        let project = &self.config.project_config;
        Ok(EngineConfig {
            path_wb_c: env.wb_command.clone(),
            fnl_preproc_path: self.config.code_dir.clone(),
            hcp_mat_path: env.hcp_mat_path.clone(),
            framewise_disp_path: env.framewise_disp_path.clone(),
            bp_order: project.filter_order,
            lp_hz: project.low_pass_hz,
            hp_hz: project.high_pass_hz,
            tr,
            fd_th: project.fd_threshold,
            path_cii: self.layout.series_dense(name),
            path_ex_sum: self.layout.summary_dir(),
            fnl_preproc_cifti_name: self.layout.denoised_dense_name(name),
            file_wm,
            file_vent,
            file_mov_reg: self.layout.regressors(name),
            motion_filename: project.motion_filename.clone(),
            skip_seconds: project.skip_seconds,
            brain_radius_in_mm: project.brain_radius_mm,
            expected_contiguous_frame_count: project.expected_contiguous_frame_count,
            result_dir: self.layout.preproc_dir(name),
        })
    }

    /// Artifact whose presence marks a finished per-series engine run.
    pub fn terminal_artifact(&self, series: &SeriesRecord) -> Utf8PathBuf {
        self.layout
            .preproc_dir(series.name)
            .join(&self.config.project_config.motion_filename)
    }

    pub fn run(&self, series: &mut SeriesRecord) -> Result<EngineOutcome, PipelineError> {
        let name = series.name;
        let dense = self.layout.series_dense(name);
        if !dense.exists() {
            return Err(PipelineError::MissingInput(dense));
        }
        copy_file_atomic(&dense, &self.layout.preproc_dense_input(name))?;

        let engine_config = self.build_config(series)?;
        let config_path = self.layout.series_engine_config(name);
        write_engine_config(&config_path, &engine_config)?;

        let invocation = self
            .tools
            .engine(&self.config.code_dir, SERIES_ENGINE_FUNCTION, &config_path);
        write_bytes_atomic(
            &self.layout.series_engine_cmd(name),
            format!("{invocation}\n").as_bytes(),
        )?;

        tracing::info!(series = %name, config = %config_path, "running denoising engine");
        let outcome = run_with_policy(
            self.runner,
            &self.config.series_engine,
            invocation,
            &self.terminal_artifact(series),
        )
        .into_result(SERIES_ENGINE_FUNCTION)?;
        series.denoised = true;
        Ok(outcome)
    }
}

/// Replaces any previous config file with a freshly serialized one.
pub fn write_engine_config<T: Serialize>(path: &Utf8Path, config: &T) -> Result<(), PipelineError> {
    remove_file_if_exists(path)?;
    let content = serde_json::to_vec_pretty(config)
        .map_err(|err| PipelineError::Filesystem(format!("serialize {path}: {err}")))?;
    write_bytes_atomic(path, &content)
}
