#![allow(dead_code)]

use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use hcp_postprocess::command::{Invocation, ToolOutput, ToolRunner};
use hcp_postprocess::config::{Project, RunConfig, SCHEMA_VERSION, Site};
use hcp_postprocess::domain::{RegressorPolicy, SubjectMetadata};
use hcp_postprocess::engine::RetryPolicy;
use hcp_postprocess::error::PipelineError;
use hcp_postprocess::layout::SubjectLayout;

pub const SUBJECT: &str = "SUBJ01";

/// Stands in for FSL, Workbench, Octave and the regressor checker. Each
/// fake tool writes the files the real one would, and every call is
/// recorded.
#[derive(Default)]
pub struct FakeTools {
    pub calls: Mutex<Vec<Invocation>>,
    /// Regressor paths containing any of these substrings are judged invalid.
    pub invalid_regressors: Vec<String>,
    /// The denoising engine writes its outputs and then reports an error.
    pub engine_fails_after_output: bool,
    /// The denoising engine fails without writing anything.
    pub engine_fails_without_output: bool,
    /// The erosion step exits cleanly without writing its output.
    pub erosion_writes_nothing: bool,
    /// Per-series `pixdim4` overrides, keyed by a volume path substring.
    pub repetition_times: Vec<(String, f64)>,
}

impl FakeTools {
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|call| call.program_name() == program)
            .collect()
    }

    pub fn merge_calls(&self) -> usize {
        self.calls_to("wb_command")
            .iter()
            .filter(|call| call.args.first().map(String::as_str) == Some("-cifti-merge"))
            .count()
    }

    fn fslmaths(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        if self.erosion_writes_nothing && invocation.args.iter().any(|arg| arg == "-ero") {
            return Ok(ToolOutput::default());
        }
        let output = invocation.args.last().unwrap();
        fs::write(output, "mask").unwrap();
        Ok(ToolOutput::default())
    }

    fn fslmeants(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        let output = arg_after(invocation, "-o");
        fs::write(output, "101.5\n99.2\n100.1\n").unwrap();
        Ok(ToolOutput::default())
    }

    fn checker(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        let regressors = invocation.args.last().unwrap();
        let invalid = self
            .invalid_regressors
            .iter()
            .any(|needle| regressors.contains(needle.as_str()));
        Ok(ToolOutput {
            stdout: if invalid { "invalid: 3 columns\n" } else { "valid\n" }.to_string(),
            stderr: String::new(),
        })
    }

    fn fslhd(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        let volume = invocation.args.last().unwrap();
        let tr = self
            .repetition_times
            .iter()
            .find(|(needle, _)| volume.contains(needle.as_str()))
            .map_or(0.8, |(_, tr)| *tr);
        Ok(ToolOutput {
            stdout: format!("dim4           3\npixdim4        {tr:.6}\n"),
            stderr: String::new(),
        })
    }

    fn wb_command(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        let args = &invocation.args;
        match args[0].as_str() {
            "-cifti-merge" => {
                let mut merged = fs::read(&args[1]).unwrap();
                merged.extend(fs::read(&args[5]).unwrap());
                fs::write(&args[1], merged).unwrap();
            }
            "-cifti-parcellate" => fs::write(&args[4], "parcellated").unwrap(),
            _ => {}
        }
        Ok(ToolOutput::default())
    }

    fn octave(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        let eval = arg_after(invocation, "--eval");
        let (function, rest) = eval.split_once("('").unwrap();
        let config_path = rest.trim_end_matches("')").replace("''", "'");
        let config: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(config_path).unwrap()).unwrap();
        let field = |name: &str| Utf8PathBuf::from(config[name].as_str().unwrap());

        match function {
            "FNL_preproc_Matlab" => {
                if self.engine_fails_without_output {
                    return Err(PipelineError::ToolFailed {
                        program: "octave".into(),
                        message: "segmentation fault".into(),
                    });
                }
                let dense = field("path_cii");
                let series = dense.parent().unwrap().file_name().unwrap().to_string();
                let result_dir = field("result_dir");
                fs::write(
                    result_dir.join(config["FNL_preproc_CIFTI_name"].as_str().unwrap()),
                    fs::read(&dense).unwrap(),
                )
                .unwrap();
                fs::write(
                    result_dir.join(config["motion_filename"].as_str().unwrap()),
                    "0.1 0.2\n",
                )
                .unwrap();
                fs::write(
                    field("path_ex_sum").join(format!("FD_{series}.txt")),
                    format!("fd-{series}\n"),
                )
                .unwrap();
                if self.engine_fails_after_output {
                    return Err(PipelineError::ToolFailed {
                        program: "octave".into(),
                        message: "error: print_usage".into(),
                    });
                }
            }
            "analyses_v2" => {
                let summary = field("summary_Dir");
                fs::write(summary.join("FD_dist.png"), "png").unwrap();
                fs::write(summary.join("DVARS_and_FD_CONCA.png"), "png").unwrap();
                let result_dir = field("result_dir");
                for mat in ["FD.mat", "motion_numbers.mat", "power_2014_motion.mat"] {
                    fs::write(result_dir.join(mat), "mat").unwrap();
                }
                let timecourses = field("path_timecourses");
                for csv in ["Gordon_subcortical.csv", "Gordon.csv", "Power.csv", "Yeo.csv"] {
                    fs::write(timecourses.join(csv), "1,2,3\n").unwrap();
                }
            }
            other => panic!("unexpected engine function {other}"),
        }
        Ok(ToolOutput::default())
    }
}

impl ToolRunner for FakeTools {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, PipelineError> {
        self.calls.lock().unwrap().push(invocation.clone());
        match invocation.program_name() {
            "fslmaths" => self.fslmaths(invocation),
            "fslmeants" => self.fslmeants(invocation),
            "fslhd" => self.fslhd(invocation),
            "python" => self.checker(invocation),
            "wb_command" => self.wb_command(invocation),
            "octave" => self.octave(invocation),
            other => panic!("unexpected program {other}"),
        }
    }
}

fn arg_after<'a>(invocation: &'a Invocation, flag: &str) -> &'a str {
    let position = invocation.args.iter().position(|arg| arg == flag).unwrap();
    &invocation.args[position + 1]
}

/// A subject tree on disk with raw series, HCP results, a segmentation and a
/// label directory holding two labelled atlases and one without a label.
pub struct Fixture {
    _temp: TempDir,
    pub base: Utf8PathBuf,
    pub layout: SubjectLayout,
    pub label_dir: Utf8PathBuf,
    pub published: Utf8PathBuf,
}

impl Fixture {
    pub fn new(series: &[u32]) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let root = base
            .join("processed/ADHD")
            .join(SUBJECT)
            .join("visit1/HCP_release")
            .join(SUBJECT);
        let layout = SubjectLayout::new(root, SUBJECT);

        let raw = layout.raw_data_dir();
        fs::create_dir_all(&raw).unwrap();
        fs::create_dir_all(layout.rois_dir()).unwrap();
        fs::write(layout.segmentation(), "wmparc").unwrap();

        for index in series {
            fs::write(raw.join(format!("{SUBJECT}_REST{index}.nii.gz")), "raw").unwrap();
            fs::write(raw.join(format!("{SUBJECT}_REST{index}_SBRef.nii.gz")), "sbref").unwrap();

            let series_dir = layout.results_dir().join(format!("REST{index}"));
            fs::create_dir_all(&series_dir).unwrap();
            fs::write(series_dir.join(format!("REST{index}.nii.gz")), "volume").unwrap();
            fs::write(
                series_dir.join(format!("REST{index}_Atlas.dtseries.nii")),
                format!("[dense{index}]"),
            )
            .unwrap();
            let regressors: String = (0..*index + 2).map(|_| "0 0 0 0 0 0\n").collect();
            fs::write(series_dir.join("Movement_Regressors.txt"), regressors).unwrap();
        }

        let label_dir = base.join("labels");
        let gordon = label_dir.join("Gordon/fsLR");
        fs::create_dir_all(&gordon).unwrap();
        fs::write(gordon.join("Gordon.subcortical.32k_fs_LR.dlabel.nii"), "label").unwrap();
        let power = label_dir.join("Power/fsLR");
        fs::create_dir_all(&power).unwrap();
        fs::write(power.join("Power.subcortical.32k_fs_LR.dlabel.nii"), "label").unwrap();
        // an atlas directory without its label file
        fs::create_dir_all(label_dir.join("Yeo/fsLR")).unwrap();

        let published = base.join("published");
        Self {
            _temp: temp,
            base,
            layout,
            label_dir,
            published,
        }
    }

    pub fn config(&self) -> RunConfig {
        let mut environment = Site::Rushmore.environment();
        environment.label_files_dir = self.label_dir.clone();
        RunConfig {
            schema_version: SCHEMA_VERSION,
            site: Some(Site::Rushmore),
            project: Project::Adhd,
            environment,
            project_config: Project::Adhd.config(),
            regressor_policy: RegressorPolicy::Abort,
            series_engine: RetryPolicy::series_default().with_backoff(Duration::ZERO),
            aggregate_engine: RetryPolicy::aggregate_default().with_backoff(Duration::ZERO),
            code_dir: Utf8PathBuf::from("/opt/fnl_preproc"),
        }
    }

    pub fn metadata(&self) -> SubjectMetadata {
        SubjectMetadata::resolve(self.layout.root(), SUBJECT).unwrap()
    }

    pub fn root(&self) -> &Utf8Path {
        self.layout.root()
    }
}
