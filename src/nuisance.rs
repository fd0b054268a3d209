use crate::command::{ToolRunner, Tools};
use crate::domain::Tissue;
use crate::error::PipelineError;
use crate::layout::SubjectLayout;
use crate::mask::MaskSet;
use crate::series::SeriesRecord;

/// Writes the per-frame mean signal inside each nuisance mask for a series.
pub struct NuisanceExtractor<'a, R: ToolRunner> {
    runner: &'a R,
    tools: Tools<'a>,
    layout: &'a SubjectLayout,
}

impl<'a, R: ToolRunner> NuisanceExtractor<'a, R> {
    pub fn new(runner: &'a R, tools: Tools<'a>, layout: &'a SubjectLayout) -> Self {
        Self {
            runner,
            tools,
            layout,
        }
    }

    pub fn extract(&self, series: &mut SeriesRecord, masks: &MaskSet) -> Result<(), PipelineError> {
        let volume = self.layout.series_volume(series.name);
        for tissue in [Tissue::Ventricle, Tissue::WhiteMatter] {
            let output = self.layout.mask_mean(series.name, tissue);
            self.runner
                .run(&self.tools.mask_mean(&volume, masks.mask(tissue), &output))
                .map_err(|err| PipelineError::Extraction {
                    series: series.name.to_string(),
                    message: err.to_string(),
                })?;
            if !output.exists() {
                return Err(PipelineError::Extraction {
                    series: series.name.to_string(),
                    message: format!("{output} was not written"),
                });
            }
            match tissue {
                Tissue::Ventricle => series.vent_mean = Some(output),
                Tissue::WhiteMatter => series.wm_mean = Some(output),
            }
        }
        Ok(())
    }
}
