use std::time::Duration;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::command::{ToolRunner, Tools};
use crate::config::{Project, RunConfig, Site};
use crate::denoise::DenoiseOrchestrator;
use crate::domain::{RegressorPolicy, RunStage, SeriesName, SubjectMetadata};
use crate::error::PipelineError;
use crate::finalize::{FinalizeReport, Finalizer, analysis_folder};
use crate::layout::SubjectLayout;
use crate::lifecycle::DirectoryLifecycle;
use crate::mask::{MaskBuilder, MaskSet};
use crate::merge::MergeEngine;
use crate::nuisance::NuisanceExtractor;
use crate::parcellate::{MissingAtlas, ParcellationArtifact, ParcellationGenerator};
use crate::regressor::{RegressorValidator, RegressorVerdict};
use crate::series::{SeriesRecord, discover, read_repetition_time};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesReport {
    pub series: String,
    pub repetition_time: Option<f64>,
    pub regressors_valid: Option<bool>,
    pub excluded: bool,
    pub engine_attempts: Option<u32>,
    pub engine_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub subject: String,
    pub output_path: Utf8PathBuf,
    pub project: Project,
    pub site: Option<Site>,
    pub metadata: SubjectMetadata,
    pub stage: RunStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub series: Vec<SeriesReport>,
    pub merged: Utf8PathBuf,
    pub parcellations: Vec<ParcellationArtifact>,
    pub skipped_atlases: Vec<MissingAtlas>,
    pub finalize: FinalizeReport,
}

/// One subject's pass through the post-processing stages.
///
/// Stages run strictly in order and any error aborts the run; `stage()`
/// reports the last stage that completed.
pub struct SubjectRun<'a, R: ToolRunner> {
    runner: &'a R,
    config: &'a RunConfig,
    layout: SubjectLayout,
    metadata: SubjectMetadata,
    analysis_root: Option<Utf8PathBuf>,
    stage: RunStage,
    series: Vec<SeriesRecord>,
    excluded: Vec<SeriesName>,
}

impl<'a, R: ToolRunner> SubjectRun<'a, R> {
    pub fn new(
        runner: &'a R,
        config: &'a RunConfig,
        layout: SubjectLayout,
        metadata: SubjectMetadata,
    ) -> Self {
        Self {
            runner,
            config,
            layout,
            metadata,
            analysis_root: None,
            stage: RunStage::Created,
            series: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// Publishes under `root` instead of `<study_root>/analyses_v2`.
    pub fn with_analysis_root(mut self, root: Option<Utf8PathBuf>) -> Self {
        self.analysis_root = root;
        self
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn series(&self) -> &[SeriesRecord] {
        &self.series
    }

    pub fn layout(&self) -> &SubjectLayout {
        &self.layout
    }

    pub fn execute(&mut self, sink: &dyn ProgressSink) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        tracing::info!(subject = self.layout.subject(), root = %self.layout.root(), "starting subject run");

        self.prepare(sink)?;
        self.validate_regressors(sink)?;
        let masks = self.build_masks(sink)?;
        let engine_runs = self.process_series(&masks, sink)?;

        let tools = Tools::new(&self.config.environment);
        let merged = self.layout.merged_dense();
        sink.event(ProgressEvent {
            message: "phase=Parcellate; registering merged dense series".to_string(),
            elapsed: None,
        });
        let generator = ParcellationGenerator::new(
            self.runner,
            tools,
            &self.layout,
            &self.config.environment.label_files_dir,
        );
        generator.register_dense(&merged)?;
        let parcellation = generator.generate(&merged)?;
        self.stage = RunStage::Parcellated;

        sink.event(ProgressEvent {
            message: "phase=Finalize; summary stage and publishing".to_string(),
            elapsed: None,
        });
        let included = self.included();
        // the summary stage takes the TR of the last processed series
        let repetition_time = self
            .series
            .iter()
            .rev()
            .filter(|record| included.contains(&record.name))
            .find_map(|record| record.repetition_time)
            .ok_or_else(|| {
                PipelineError::Configuration("no repetition time recorded for any series".into())
            })?;
        let folder = analysis_folder(
            &self.metadata,
            self.layout.subject(),
            self.analysis_root.as_deref(),
        );
        let finalize = Finalizer::new(self.runner, tools, &self.layout, self.config).run(
            &included,
            repetition_time,
            &folder,
        )?;
        self.stage = RunStage::Finalized;

        let finished_at = Utc::now();
        let elapsed = finished_at - started_at;
        sink.event(ProgressEvent {
            message: format!("phase=Done; subject {}", self.layout.subject()),
            elapsed: elapsed.to_std().ok(),
        });
        tracing::info!(
            subject = self.layout.subject(),
            elapsed_secs = elapsed.num_seconds(),
            "subject run finished"
        );

        let series = self
            .series
            .iter()
            .map(|record| {
                let engine = engine_runs.iter().find(|run| run.0 == record.name);
                SeriesReport {
                    series: record.name.to_string(),
                    repetition_time: record.repetition_time,
                    regressors_valid: record.regressors_valid,
                    excluded: self.excluded.contains(&record.name),
                    engine_attempts: engine.map(|run| run.1),
                    engine_fallback: engine.is_some_and(|run| run.2),
                }
            })
            .collect();

        Ok(RunReport {
            subject: self.layout.subject().to_string(),
            output_path: self.layout.root().to_path_buf(),
            project: self.config.project,
            site: self.config.site,
            metadata: self.metadata.clone(),
            stage: self.stage,
            started_at,
            finished_at,
            elapsed_seconds: elapsed.num_milliseconds() as f64 / 1000.0,
            series,
            merged,
            parcellations: parcellation.artifacts,
            skipped_atlases: parcellation.skipped,
            finalize,
        })
    }

    /// Discovers the series, then resets the staged output directories. Zero
    /// series fails before anything is touched on disk.
    fn prepare(&mut self, sink: &dyn ProgressSink) -> Result<(), PipelineError> {
        sink.event(ProgressEvent {
            message: "phase=Discover; scanning raw series".to_string(),
            elapsed: None,
        });
        self.series = discover(&self.layout)?;
        tracing::info!(count = self.series.len(), "discovered resting-state series");

        let names: Vec<SeriesName> = self.series.iter().map(|record| record.name).collect();
        DirectoryLifecycle::new(&self.layout).prepare(&names)?;
        self.stage = RunStage::DirectoriesPrepared;
        Ok(())
    }

    /// Every series is checked before the first engine call.
    fn validate_regressors(&mut self, sink: &dyn ProgressSink) -> Result<(), PipelineError> {
        sink.event(ProgressEvent {
            message: "phase=Validate; movement regressors".to_string(),
            elapsed: None,
        });
        let validator = RegressorValidator::new(
            self.runner,
            Tools::new(&self.config.environment),
            &self.layout,
        );
        let mut first_invalid = None;
        for record in &mut self.series {
            let RegressorVerdict::Invalid(verdict) = validator.check(record)? else {
                continue;
            };
            let error = PipelineError::InvalidRegressor {
                path: self.layout.regressors(record.name),
                verdict,
            };
            match self.config.regressor_policy {
                RegressorPolicy::Abort => return Err(error),
                RegressorPolicy::Exclude => {
                    tracing::warn!(series = %record.name, "excluding series with invalid regressors");
                    self.excluded.push(record.name);
                    if first_invalid.is_none() {
                        first_invalid = Some(error);
                    }
                }
            }
        }

        // excluding every series leaves nothing to merge
        match first_invalid {
            Some(error) if self.included().is_empty() => Err(error),
            _ => Ok(()),
        }
    }

    fn build_masks(&mut self, sink: &dyn ProgressSink) -> Result<MaskSet, PipelineError> {
        sink.event(ProgressEvent {
            message: "phase=Masks; white matter and ventricle".to_string(),
            elapsed: None,
        });
        let work_dir = self.layout.rois_dir();
        let masks = MaskBuilder::new(
            self.runner,
            Tools::new(&self.config.environment),
            &work_dir,
            self.layout.subject(),
        )
        .build(
            &self.layout.segmentation(),
            &self.config.project_config.thresholds,
        )?;
        self.stage = RunStage::MasksReady;
        Ok(masks)
    }

    /// Extracts, denoises and merges each included series in ascending order.
    /// Returns `(series, engine attempts, fallback)` per denoised series.
    fn process_series(
        &mut self,
        masks: &MaskSet,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<(SeriesName, u32, bool)>, PipelineError> {
        let tools = Tools::new(&self.config.environment);
        let extractor = NuisanceExtractor::new(self.runner, tools, &self.layout);
        let denoiser = DenoiseOrchestrator::new(self.runner, tools, &self.layout, self.config);
        let mut merge = MergeEngine::new(self.runner, tools, self.layout.merged_dense());
        merge.reset()?;

        let mut engine_runs = Vec::new();
        for record in &mut self.series {
            if self.excluded.contains(&record.name) {
                continue;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Denoise; {}", record.name),
                elapsed: None,
            });
            let volume = self.layout.series_volume(record.name);
            record.repetition_time = Some(read_repetition_time(self.runner, &tools, &volume)?);
            extractor.extract(record, masks)?;
            let outcome = denoiser.run(record)?;
            engine_runs.push((record.name, outcome.attempts(), outcome.is_fallback()));

            sink.event(ProgressEvent {
                message: format!("phase=Merge; {}", record.name),
                elapsed: None,
            });
            merge.add(record.name, &self.layout.denoised_dense(record.name))?;
        }
        self.stage = RunStage::SeriesProcessed;
        if merge.last_merged().is_some() {
            self.stage = RunStage::Merged;
        }
        Ok(engine_runs)
    }

    fn included(&self) -> Vec<SeriesName> {
        self.series
            .iter()
            .map(|record| record.name)
            .filter(|name| !self.excluded.contains(name))
            .collect()
    }
}

/// Resolves the subject's layout and metadata from the command-line pair.
/// The layout root is always absolute so published links resolve from
/// anywhere.
pub fn subject_layout(
    output_path: &Utf8Path,
    subject: &str,
) -> Result<(SubjectLayout, SubjectMetadata), PipelineError> {
    let root = absolute_root(output_path)?;
    let metadata = SubjectMetadata::resolve(&root, subject)?;
    Ok((SubjectLayout::new(root, subject), metadata))
}

/// Anchors a relative path at the working directory, folding `.` and `..`
/// lexically.
pub fn absolute_root(path: &Utf8Path) -> Result<Utf8PathBuf, PipelineError> {
    let absolute = std::path::absolute(path).map_err(|err| {
        PipelineError::Configuration(format!("cannot resolve output path {path}: {err}"))
    })?;
    let absolute = Utf8PathBuf::from_path_buf(absolute).map_err(|raw| {
        PipelineError::Configuration(format!("output path is not UTF-8: {}", raw.display()))
    })?;

    let mut root = Utf8PathBuf::new();
    for component in absolute.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                root.pop();
            }
            other => root.push(other),
        }
    }
    Ok(root)
}
