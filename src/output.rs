use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{ProgressEvent, ProgressSink, RunReport};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_reports(reports: &[RunReport]) -> io::Result<()> {
        Self::print_json(&reports)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards progress events to the tracing subscriber.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_secs = elapsed.as_secs(), "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

/// Human-readable end-of-run summary on stdout.
pub fn print_summary(report: &RunReport) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "{} ({}): {} series, {} parcellations in {:.1}s",
        report.subject,
        report.project.as_str(),
        report.series.len(),
        report.parcellations.len(),
        report.elapsed_seconds
    )?;
    for skipped in &report.skipped_atlases {
        writeln!(
            stdout,
            "  skipped {} ({}): missing {}",
            skipped.atlas, skipped.variant, skipped.label
        )?;
    }
    for fallback in report.series.iter().filter(|series| series.engine_fallback) {
        writeln!(stdout, "  {}: engine error ignored, output present", fallback.series)?;
    }
    if report.finalize.aggregate_fallback {
        writeln!(stdout, "  summary stage: engine error ignored, output present")?;
    }
    if let Some(folder) = &report.finalize.analysis_folder {
        writeln!(stdout, "  published to {folder}")?;
    }
    if report.finalize.missing_outputs.is_empty() {
        writeln!(stdout, "  all expected outputs present")?;
    } else {
        for missing in &report.finalize.missing_outputs {
            writeln!(stdout, "  missing output: {missing}")?;
        }
    }
    Ok(())
}
