use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use hcp_postprocess::command::SystemRunner;
use hcp_postprocess::config::{ConfigLoader, ConfigRequest};
use hcp_postprocess::domain::RegressorPolicy;
use hcp_postprocess::error::PipelineError;
use hcp_postprocess::manifest::{ManifestEntry, load_manifest};
use hcp_postprocess::output::{JsonOutput, LogProgress, print_summary};
use hcp_postprocess::pipeline::{RunReport, SubjectRun, subject_layout};

#[derive(Parser)]
#[command(name = "hcp-postprocess")]
#[command(about = "Nuisance regression, merging and parcellation of HCP resting-state outputs")]
#[command(version, author)]
struct Cli {
    /// Subject code, e.g. ABCDPILOT_MSC02
    #[arg(short = 's', long = "subject_ID", required_unless_present = "list")]
    subject_id: Option<String>,

    /// Subject folder produced by the HCP pipeline (contains unprocessed/ and MNINonLinear/)
    #[arg(short = 'o', long = "output_path", required_unless_present = "list")]
    output_path: Option<Utf8PathBuf>,

    /// Force a project configuration instead of the one named in the path
    #[arg(short = 'p', long = "project_config")]
    project_config: Option<String>,

    /// Two-column CSV of `subjectID, output_folder` rows to process in turn
    #[arg(short = 'l', long = "list", conflicts_with_all = ["subject_id", "output_path"])]
    list: Option<Utf8PathBuf>,

    /// JSON file with the site binaries, bypassing inference from the output path
    #[arg(long)]
    site_config: Option<Utf8PathBuf>,

    #[arg(long, value_enum, default_value_t = RegressorPolicy::Abort)]
    regressor_policy: RegressorPolicy,

    /// Directory with the engine's .m sources (defaults to the executable's directory)
    #[arg(long)]
    code_dir: Option<Utf8PathBuf>,

    /// Publish analysis links under this root instead of <study>/analyses_v2
    #[arg(long)]
    analysis_root: Option<Utf8PathBuf>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let entries = match &cli.list {
        Some(list) => load_manifest(list)?,
        None => match (&cli.subject_id, &cli.output_path) {
            (Some(subject), Some(output_path)) => vec![ManifestEntry {
                subject: subject.clone(),
                output_path: output_path.clone(),
            }],
            _ => {
                return Err(PipelineError::Configuration(
                    "--subject_ID and --output_path are required without --list".into(),
                )
                .into());
            }
        },
    };

    let runner = SystemRunner::new();
    let mut reports = Vec::with_capacity(entries.len());
    for entry in &entries {
        let report = run_subject(&cli, &runner, entry)?;
        if !cli.json {
            print_summary(&report).into_diagnostic()?;
        }
        reports.push(report);
    }

    if cli.json {
        let printed = match reports.as_slice() {
            [single] if cli.list.is_none() => JsonOutput::print_report(single),
            all => JsonOutput::print_reports(all),
        };
        printed.into_diagnostic()?;
    }
    Ok(())
}

fn run_subject(
    cli: &Cli,
    runner: &SystemRunner,
    entry: &ManifestEntry,
) -> Result<RunReport, PipelineError> {
    let (layout, metadata) = subject_layout(&entry.output_path, &entry.subject)?;
    let request = ConfigRequest {
        project_override: cli.project_config.clone(),
        site_config: cli.site_config.clone(),
        regressor_policy: cli.regressor_policy,
        code_dir: cli.code_dir.clone(),
    };
    let config = ConfigLoader::resolve(layout.root(), Some(&metadata.project), &request)?;
    tracing::info!(
        subject = %entry.subject,
        project = %config.project,
        site = ?config.site,
        visit = %metadata.visit,
        pipeline = %metadata.pipeline,
        "resolved configuration"
    );

    SubjectRun::new(runner, &config, layout, metadata)
        .with_analysis_root(cli.analysis_root.clone())
        .execute(&LogProgress)
}
