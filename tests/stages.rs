mod common;

use std::fs;

use assert_matches::assert_matches;

use hcp_postprocess::command::Tools;
use hcp_postprocess::config::TissueThresholds;
use hcp_postprocess::domain::{SeriesName, Tissue};
use hcp_postprocess::error::PipelineError;
use hcp_postprocess::finalize::Finalizer;
use hcp_postprocess::lifecycle::DirectoryLifecycle;
use hcp_postprocess::mask::MaskBuilder;
use hcp_postprocess::merge::{MergeAction, MergeEngine};
use hcp_postprocess::parcellate::ParcellationGenerator;
use hcp_postprocess::regressor::{RegressorValidator, RegressorVerdict};
use hcp_postprocess::series::{SeriesRecord, discover};

use common::{FakeTools, Fixture, SUBJECT};

#[test]
fn masks_are_rebuilt_identically_without_intermediates() {
    let fixture = Fixture::new(&[1]);
    let tools = FakeTools::default();
    let config = fixture.config();
    let work_dir = fixture.layout.rois_dir();
    let builder = MaskBuilder::new(&tools, Tools::new(&config.environment), &work_dir, SUBJECT);

    let first = builder
        .build(&fixture.layout.segmentation(), &TissueThresholds::default())
        .unwrap();
    let second = builder
        .build(&fixture.layout.segmentation(), &TissueThresholds::default())
        .unwrap();

    assert_eq!(first, second);
    assert!(first.white_matter.exists());
    assert!(first.ventricle.exists());
    assert!(first.ventricle.as_str().ends_with(&format!("vent_2mm_{SUBJECT}_mask_eroded.nii.gz")));

    let mut remaining: Vec<String> = fs::read_dir(&work_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    remaining.sort();
    assert_eq!(
        remaining,
        vec![
            format!("vent_2mm_{SUBJECT}_mask_eroded.nii.gz"),
            format!("wm_2mm_{SUBJECT}_mask_eroded.nii.gz"),
            "wmparc.2.nii.gz".to_string(),
        ]
    );
    assert_eq!(tools.calls_to("fslmaths").len(), 8);
}

#[test]
fn vent_thresholds_reach_fslmaths() {
    let fixture = Fixture::new(&[1]);
    let tools = FakeTools::default();
    let config = fixture.config();
    let work_dir = fixture.layout.rois_dir();
    MaskBuilder::new(&tools, Tools::new(&config.environment), &work_dir, SUBJECT)
        .build_tissue(
            &fixture.layout.segmentation(),
            &TissueThresholds::default(),
            Tissue::Ventricle,
        )
        .unwrap();

    let calls = tools.calls_to("fslmaths");
    assert_eq!(calls[0].args[1..5], ["-thr", "4", "-uthr", "4"]);
    assert_eq!(calls[1].args[1..5], ["-thr", "43", "-uthr", "43"]);
    assert!(calls[3].args.contains(&"-ero".to_string()));
}

#[test]
fn missing_segmentation_is_fatal() {
    let fixture = Fixture::new(&[1]);
    fs::remove_file(fixture.layout.segmentation()).unwrap();
    let tools = FakeTools::default();
    let config = fixture.config();
    let work_dir = fixture.layout.rois_dir();

    let err = MaskBuilder::new(&tools, Tools::new(&config.environment), &work_dir, SUBJECT)
        .build(&fixture.layout.segmentation(), &TissueThresholds::default())
        .unwrap_err();
    assert_matches!(err, PipelineError::MissingInput(_));
    assert!(tools.calls().is_empty());
}

#[test]
fn discovery_skips_reference_scans() {
    let fixture = Fixture::new(&[3, 1]);
    fs::write(fixture.layout.raw_data_dir().join(format!("{SUBJECT}_T1w.nii.gz")), "t1").unwrap();

    let series = discover(&fixture.layout).unwrap();
    assert_eq!(
        series.iter().map(SeriesRecord::index).collect::<Vec<_>>(),
        vec![1, 3]
    );
    assert!(series[0].raw_path.as_str().ends_with("SUBJ01_REST1.nii.gz"));
}

#[test]
fn validator_records_verdict() {
    let fixture = Fixture::new(&[1, 2]);
    let tools = FakeTools {
        invalid_regressors: vec!["REST2".to_string()],
        ..FakeTools::default()
    };
    let config = fixture.config();
    let validator =
        RegressorValidator::new(&tools, Tools::new(&config.environment), &fixture.layout);
    let mut series = discover(&fixture.layout).unwrap();

    assert_eq!(validator.check(&mut series[0]).unwrap(), RegressorVerdict::Valid);
    assert_eq!(series[0].regressors_valid, Some(true));
    assert_matches!(validator.check(&mut series[1]).unwrap(), RegressorVerdict::Invalid(_));
    assert_eq!(series[1].regressors_valid, Some(false));
}

#[test]
fn merge_rejects_out_of_order_series() {
    let fixture = Fixture::new(&[1, 2]);
    let tools = FakeTools::default();
    let config = fixture.config();
    let dense = |index: u32| fixture.layout.series_dense(SeriesName::new(index));
    let merged = fixture.base.join("merged.dtseries.nii");
    let mut engine = MergeEngine::new(&tools, Tools::new(&config.environment), merged.clone());

    assert_eq!(engine.add(SeriesName::new(2), &dense(2)).unwrap(), MergeAction::Seeded);
    let err = engine.add(SeriesName::new(1), &dense(1)).unwrap_err();
    assert_matches!(err, PipelineError::MergeOrder { index: 1, last: 2 });
    assert_eq!(fs::read_to_string(&merged).unwrap(), "[dense2]");
    assert_eq!(tools.merge_calls(), 0);
}

#[test]
fn merge_reset_drops_stale_artifact() {
    let fixture = Fixture::new(&[1, 2]);
    let tools = FakeTools::default();
    let config = fixture.config();
    let merged = fixture.base.join("merged.dtseries.nii");
    fs::write(&merged, "stale").unwrap();
    let mut engine = MergeEngine::new(&tools, Tools::new(&config.environment), merged.clone());

    engine.reset().unwrap();
    assert!(!merged.exists());
    engine
        .add(SeriesName::new(1), &fixture.layout.series_dense(SeriesName::new(1)))
        .unwrap();
    assert_eq!(
        engine
            .add(SeriesName::new(2), &fixture.layout.series_dense(SeriesName::new(2)))
            .unwrap(),
        MergeAction::Appended
    );
    assert_eq!(fs::read_to_string(&merged).unwrap(), "[dense1][dense2]");
    assert_eq!(engine.last_merged(), Some(SeriesName::new(2)));
}

#[test]
fn missing_label_directory_is_fatal() {
    let fixture = Fixture::new(&[1]);
    let tools = FakeTools::default();
    let config = fixture.config();
    let label_dir = fixture.base.join("no-labels");
    let generator = ParcellationGenerator::new(
        &tools,
        Tools::new(&config.environment),
        &fixture.layout,
        &label_dir,
    );

    let err = generator.generate(&fixture.layout.merged_dense()).unwrap_err();
    assert_matches!(err, PipelineError::MissingInput(path) if path == label_dir);
}

#[test]
fn directories_are_recreated_empty() {
    let fixture = Fixture::new(&[1, 2]);
    let lifecycle = DirectoryLifecycle::new(&fixture.layout);
    let names = [SeriesName::new(1), SeriesName::new(2)];

    lifecycle.prepare(&names).unwrap();
    fs::write(fixture.layout.all_fd(), "old").unwrap();
    lifecycle.prepare(&names).unwrap();

    assert!(fixture.layout.summary_dir().is_dir());
    assert!(!fixture.layout.all_fd().exists());
    assert!(fixture.layout.preproc_dir(names[1]).is_dir());
    assert!(fixture.layout.series_dense(names[1]).exists());
}

#[test]
fn stale_eroded_mask_is_not_reused() {
    let fixture = Fixture::new(&[1]);
    let config = fixture.config();
    let work_dir = fixture.layout.rois_dir();
    let segmentation = fixture.layout.segmentation();

    let tools = FakeTools::default();
    let builder = MaskBuilder::new(&tools, Tools::new(&config.environment), &work_dir, SUBJECT);
    let stale = builder
        .build_tissue(&segmentation, &TissueThresholds::default(), Tissue::WhiteMatter)
        .unwrap();
    assert!(stale.exists());

    let silent = FakeTools {
        erosion_writes_nothing: true,
        ..FakeTools::default()
    };
    let err = MaskBuilder::new(&silent, Tools::new(&config.environment), &work_dir, SUBJECT)
        .build_tissue(&segmentation, &TissueThresholds::default(), Tissue::WhiteMatter)
        .unwrap_err();
    assert_matches!(err, PipelineError::MissingInput(path) if path == stale);
    assert!(!stale.exists());
}

#[test]
fn frame_counts_match_newline_count() {
    let fixture = Fixture::new(&[1, 2]);
    fs::write(fixture.layout.regressors(SeriesName::new(2)), "0 0 0\n0 0 0").unwrap();
    let tools = FakeTools::default();
    let config = fixture.config();
    fs::create_dir_all(fixture.layout.summary_dir()).unwrap();

    let counts = Finalizer::new(&tools, Tools::new(&config.environment), &fixture.layout, &config)
        .write_frames_per_scan(&[SeriesName::new(1), SeriesName::new(2)])
        .unwrap();

    assert_eq!(counts.iter().map(|count| count.frames).collect::<Vec<_>>(), vec![3, 1]);
    assert_eq!(
        fs::read_to_string(fixture.layout.frames_per_scan()).unwrap(),
        "3\n1\n"
    );
}
