use crate::command::{ToolRunner, Tools};
use crate::error::PipelineError;
use crate::layout::SubjectLayout;
use crate::series::SeriesRecord;

/// Literal printed by the checker for a well-formed regressor file.
pub const VALID_VERDICT: &str = "valid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegressorVerdict {
    Valid,
    Invalid(String),
}

/// Gates each series on the presence and validity of its movement
/// regressors, delegating the validity test to the site's checker script.
pub struct RegressorValidator<'a, R: ToolRunner> {
    runner: &'a R,
    tools: Tools<'a>,
    layout: &'a SubjectLayout,
}

impl<'a, R: ToolRunner> RegressorValidator<'a, R> {
    pub fn new(runner: &'a R, tools: Tools<'a>, layout: &'a SubjectLayout) -> Self {
        Self {
            runner,
            tools,
            layout,
        }
    }

    /// A missing file is always fatal. An invalid verdict is recorded on the
    /// series and returned; the caller decides whether it aborts the run.
    pub fn check(&self, series: &mut SeriesRecord) -> Result<RegressorVerdict, PipelineError> {
        let regressors = self.layout.regressors(series.name);
        if !regressors.exists() {
            series.regressors_valid = Some(false);
            return Err(PipelineError::MissingRegressor(regressors));
        }

        let output = self
            .runner
            .run(&self.tools.regressor_check(&series.raw_path, &regressors))?;
        let verdict = output.stdout.trim();
        if verdict == VALID_VERDICT {
            series.regressors_valid = Some(true);
            tracing::info!(series = %series.name, "movement regressor file is valid");
            Ok(RegressorVerdict::Valid)
        } else {
            series.regressors_valid = Some(false);
            tracing::warn!(series = %series.name, verdict, "movement regressor file is invalid");
            Ok(RegressorVerdict::Invalid(verdict.to_string()))
        }
    }
}
