use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use hcp_postprocess::config::{ConfigLoader, ConfigRequest, Project, SCHEMA_VERSION, Site};
use hcp_postprocess::domain::RegressorPolicy;
use hcp_postprocess::error::PipelineError;

fn request() -> ConfigRequest {
    ConfigRequest {
        code_dir: Some(Utf8PathBuf::from("/opt/fnl_preproc")),
        ..ConfigRequest::default()
    }
}

#[test]
fn resolves_site_and_project_from_path() {
    let path = Utf8Path::new("/mnt/max/shared/data/ADHD/SUBJ01/visit1/HCP_release/SUBJ01");
    let config = ConfigLoader::resolve(path, Some("ADHD"), &request()).unwrap();

    assert_eq!(config.schema_version, SCHEMA_VERSION);
    assert_eq!(config.site, Some(Site::Rushmore));
    assert_eq!(config.project, Project::Adhd);
    assert_eq!(config.environment.wb_command, Utf8PathBuf::from("/usr/bin/wb_command"));
    assert_eq!(config.regressor_policy, RegressorPolicy::Abort);
    assert_eq!(config.series_engine.max_attempts, 2);
    assert_eq!(config.series_engine.timeout.as_secs(), 120);
    assert_eq!(config.aggregate_engine.timeout.as_secs(), 800);
    assert_eq!(config.aggregate_engine.backoff.as_secs(), 600);
}

#[test]
fn project_override_wins_over_path() {
    let path = Utf8Path::new("/group_shares/FAIR/processed/Other/SUBJ/v1/HCP_release/SUBJ");
    let config = ConfigLoader::resolve(
        path,
        Some("Other"),
        &ConfigRequest {
            project_override: Some("nhp_sam".to_string()),
            ..request()
        },
    )
    .unwrap();

    assert_eq!(config.project, Project::NhpSam);
    assert_eq!(config.project_config.brain_radius_mm, 30.0);
    assert_eq!(config.site, Some(Site::Airc));
}

#[test]
fn unknown_site_is_a_configuration_error() {
    let path = Utf8Path::new("/data/ADHD/SUBJ01/visit1/HCP_release/SUBJ01");
    let err = ConfigLoader::resolve(path, Some("ADHD"), &request()).unwrap_err();
    assert_matches!(err, PipelineError::Configuration(_));
}

#[test]
fn unknown_project_is_a_configuration_error() {
    let path = Utf8Path::new("/mnt/data/Mystery/SUBJ01/visit1/HCP_release/SUBJ01");
    let err = ConfigLoader::resolve(path, Some("Mystery"), &request()).unwrap_err();
    assert_matches!(err, PipelineError::Configuration(message) if message.contains("ADHD"));
}

#[test]
fn site_file_bypasses_path_inference() {
    let temp = tempfile::tempdir().unwrap();
    let site_file = Utf8PathBuf::from_path_buf(temp.path().join("site.json")).unwrap();
    fs::write(
        &site_file,
        r#"{
            "label_files_dir": "/labels",
            "regressor_check": "/tools/check.py",
            "fsl_dir": "/opt/fsl",
            "octave": "/opt/octave/bin/octave",
            "wb_command": "/opt/workbench/wb_command",
            "framewise_disp_path": "/tools/fd",
            "hcp_mat_path": "/tools/hcp_mat"
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::resolve(
        Utf8Path::new("/data/ADHD/SUBJ01/visit1/HCP_release/SUBJ01"),
        Some("ADHD"),
        &ConfigRequest {
            site_config: Some(site_file),
            regressor_policy: RegressorPolicy::Exclude,
            ..request()
        },
    )
    .unwrap();

    assert_eq!(config.site, None);
    assert_eq!(config.environment.python, Utf8PathBuf::from("python"));
    assert_eq!(
        config.environment.fsl_tool("fslmeants"),
        Utf8PathBuf::from("/opt/fsl/bin/fslmeants")
    );
    assert_eq!(config.regressor_policy, RegressorPolicy::Exclude);
}

#[test]
fn malformed_site_file_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let site_file = Utf8PathBuf::from_path_buf(temp.path().join("site.json")).unwrap();
    fs::write(&site_file, r#"{"label_files_dir": "/labels"}"#).unwrap();

    let err = ConfigLoader::load_environment(&site_file).unwrap_err();
    assert_matches!(err, PipelineError::Configuration(message) if message.starts_with("parse"));
}

#[test]
fn default_thresholds_follow_wmparc_labels() {
    let thresholds = Project::Asd.config().thresholds;
    assert_eq!((thresholds.wm_left.lower, thresholds.wm_left.upper), (3950, 4050));
    assert_eq!((thresholds.wm_right.lower, thresholds.wm_right.upper), (2950, 3050));
    assert_eq!((thresholds.vent_left.lower, thresholds.vent_left.upper), (4, 4));
    assert_eq!((thresholds.vent_right.lower, thresholds.vent_right.upper), (43, 43));
}
