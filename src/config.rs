use std::fmt;
use std::fs;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{Hemisphere, RegressorPolicy, Tissue};
use crate::engine::RetryPolicy;
use crate::error::PipelineError;

pub const SCHEMA_VERSION: u32 = 1;

/// Deployment sites with a known binaries layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Airc,
    Exacloud,
    Rushmore,
}

impl Site {
    /// Guesses the site from substrings of the processed-data path.
    pub fn infer(output_path: &Utf8Path) -> Option<Site> {
        let path = output_path.as_str();
        if path.contains("group_shares") || path.starts_with("/scratch/") {
            Some(Site::Airc)
        } else if path.contains("exacloud") {
            Some(Site::Exacloud)
        } else if path.contains("/mnt/") {
            Some(Site::Rushmore)
        } else {
            None
        }
    }

    pub fn environment(&self) -> EnvironmentConfig {
        match self {
            Site::Airc | Site::Exacloud => EnvironmentConfig {
                label_files_dir: "/group_shares/PSYCH/ROI_sets/Surface_schemes/Human".into(),
                regressor_check: "/group_shares/PSYCH/code/development/utilities/movmnt_regressor_check/movmnt_regressor_check.py".into(),
                python: "python".into(),
                fsl_dir: "/usr/share/fsl/5.0".into(),
                octave: "/group_shares/PSYCH/code/external/utilities/octave3.8/bin/octave".into(),
                wb_command: "/group_shares/PSYCH/code/external/utilities/workbench/bin_linux64/wb_command".into(),
                framewise_disp_path: "/group_shares/PSYCH/code/development/utilities/framewise_displacement".into(),
                hcp_mat_path: "/group_shares/PSYCH/code/development/utilities/HCP_Matlab".into(),
            },
            Site::Rushmore => EnvironmentConfig {
                label_files_dir: "/mnt/max/shared/ROI_sets/Surface_schemes/Human".into(),
                regressor_check: "/mnt/max/shared/utilities/movmnt_regressor_check/movmnt_regressor_check.py".into(),
                python: "python".into(),
                fsl_dir: "/usr/share/fsl/5.0".into(),
                octave: "/usr/bin/octave".into(),
                wb_command: "/usr/bin/wb_command".into(),
                framewise_disp_path: "/mnt/max/shared/utilities/framewise_displacement".into(),
                hcp_mat_path: "/mnt/max/shared/utilities/HCP_Matlab".into(),
            },
        }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Site::Airc => write!(f, "airc"),
            Site::Exacloud => write!(f, "exacloud"),
            Site::Rushmore => write!(f, "rushmore"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub label_files_dir: Utf8PathBuf,
    pub regressor_check: Utf8PathBuf,
    #[serde(default = "default_python")]
    pub python: Utf8PathBuf,
    pub fsl_dir: Utf8PathBuf,
    pub octave: Utf8PathBuf,
    pub wb_command: Utf8PathBuf,
    pub framewise_disp_path: Utf8PathBuf,
    pub hcp_mat_path: Utf8PathBuf,
}

impl EnvironmentConfig {
    pub fn fsl_tool(&self, name: &str) -> Utf8PathBuf {
        self.fsl_dir.join("bin").join(name)
    }
}

fn default_python() -> Utf8PathBuf {
    Utf8PathBuf::from("python")
}

/// Studies with a known parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Project {
    #[serde(rename = "ASD")]
    Asd,
    #[serde(rename = "ADHD")]
    Adhd,
    #[serde(rename = "NHP_Fezcko_config")]
    NhpFezcko,
    #[serde(rename = "NHP_HFD")]
    NhpHfd,
    #[serde(rename = "NHP_Sam")]
    NhpSam,
}

impl Project {
    pub const ALL: [Project; 5] = [
        Project::Asd,
        Project::Adhd,
        Project::NhpFezcko,
        Project::NhpHfd,
        Project::NhpSam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Project::Asd => "ASD",
            Project::Adhd => "ADHD",
            Project::NhpFezcko => "NHP_Fezcko_config",
            Project::NhpHfd => "NHP_HFD",
            Project::NhpSam => "NHP_Sam",
        }
    }

    pub fn is_primate(&self) -> bool {
        matches!(self, Project::NhpFezcko | Project::NhpHfd | Project::NhpSam)
    }

    pub fn config(&self) -> ProjectConfig {
        ProjectConfig {
            filter_order: 2,
            low_pass_hz: 0.009,
            high_pass_hz: 0.080,
            fd_threshold: 0.2,
            expected_contiguous_frame_count: 5,
            skip_seconds: 5,
            brain_radius_mm: if self.is_primate() { 30.0 } else { 50.0 },
            motion_filename: "motion_numbers.txt".to_string(),
            thresholds: TissueThresholds::default(),
        }
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Project {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Project::ALL
            .into_iter()
            .find(|project| project.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| {
                let known = Project::ALL
                    .iter()
                    .map(|project| project.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                PipelineError::Configuration(format!(
                    "no configuration for project {value:?}; choices are {known}"
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRange {
    pub lower: u32,
    pub upper: u32,
}

/// Label bounds in the segmentation volume (FreeSurfer wmparc numbering).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TissueThresholds {
    pub wm_left: ThresholdRange,
    pub wm_right: ThresholdRange,
    pub vent_left: ThresholdRange,
    pub vent_right: ThresholdRange,
}

impl TissueThresholds {
    pub fn range(&self, tissue: Tissue, hemisphere: Hemisphere) -> ThresholdRange {
        match (tissue, hemisphere) {
            (Tissue::WhiteMatter, Hemisphere::Left) => self.wm_left,
            (Tissue::WhiteMatter, Hemisphere::Right) => self.wm_right,
            (Tissue::Ventricle, Hemisphere::Left) => self.vent_left,
            (Tissue::Ventricle, Hemisphere::Right) => self.vent_right,
        }
    }
}

impl Default for TissueThresholds {
    fn default() -> Self {
        Self {
            wm_left: ThresholdRange {
                lower: 3950,
                upper: 4050,
            },
            wm_right: ThresholdRange {
                lower: 2950,
                upper: 3050,
            },
            vent_left: ThresholdRange { lower: 4, upper: 4 },
            vent_right: ThresholdRange {
                lower: 43,
                upper: 43,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub filter_order: u32,
    pub low_pass_hz: f64,
    pub high_pass_hz: f64,
    pub fd_threshold: f64,
    pub expected_contiguous_frame_count: u32,
    pub skip_seconds: u32,
    pub brain_radius_mm: f64,
    pub motion_filename: String,
    pub thresholds: TissueThresholds,
}

/// Everything a subject run needs to know, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub schema_version: u32,
    pub site: Option<Site>,
    pub project: Project,
    pub environment: EnvironmentConfig,
    pub project_config: ProjectConfig,
    pub regressor_policy: RegressorPolicy,
    pub series_engine: RetryPolicy,
    pub aggregate_engine: RetryPolicy,
    /// Directory holding the engine's `.m` sources.
    pub code_dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigRequest {
    pub project_override: Option<String>,
    pub site_config: Option<Utf8PathBuf>,
    pub regressor_policy: RegressorPolicy,
    pub code_dir: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Resolves the run configuration for a subject whose processed data
    /// lives at `output_path`. `inferred_project` is the study name read from
    /// the path; an explicit override in `request` takes precedence.
    pub fn resolve(
        output_path: &Utf8Path,
        inferred_project: Option<&str>,
        request: &ConfigRequest,
    ) -> Result<RunConfig, PipelineError> {
        let (site, environment) = match &request.site_config {
            Some(path) => (None, Self::load_environment(path)?),
            None => {
                let site = Site::infer(output_path).ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "no environment configured for {output_path}; expected airc, exacloud or rushmore paths"
                    ))
                })?;
                (Some(site), site.environment())
            }
        };

        let project_name = request
            .project_override
            .as_deref()
            .or(inferred_project)
            .ok_or_else(|| PipelineError::Configuration("no project could be determined".into()))?;
        let project: Project = project_name.parse()?;

        let code_dir = match &request.code_dir {
            Some(dir) => dir.clone(),
            None => default_code_dir()?,
        };

        Ok(RunConfig {
            schema_version: SCHEMA_VERSION,
            site,
            project,
            environment,
            project_config: project.config(),
            regressor_policy: request.regressor_policy,
            series_engine: RetryPolicy::series_default(),
            aggregate_engine: RetryPolicy::aggregate_default(),
            code_dir,
        })
    }

    pub fn load_environment(path: &Utf8Path) -> Result<EnvironmentConfig, PipelineError> {
        let content = fs::read_to_string(path)
            .map_err(|err| PipelineError::Configuration(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| PipelineError::Configuration(format!("parse {path}: {err}")))
    }
}

fn default_code_dir() -> Result<Utf8PathBuf, PipelineError> {
    let exe = std::env::current_exe()
        .map_err(|err| PipelineError::Configuration(format!("locate executable: {err}")))?;
    let dir = exe
        .parent()
        .ok_or_else(|| PipelineError::Configuration("executable has no parent directory".into()))?;
    Utf8PathBuf::from_path_buf(dir.to_path_buf())
        .map_err(|_| PipelineError::Configuration("executable path is not valid UTF-8".into()))
}
