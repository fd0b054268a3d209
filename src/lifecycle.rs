use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::SeriesName;
use crate::error::PipelineError;
use crate::layout::SubjectLayout;

const GROUP_WRITABLE: u32 = 0o775;

/// Owns the staged output directories of a run. Every `prepare` starts from
/// a clean slate: directories left behind by an earlier run are removed
/// wholesale before being recreated.
pub struct DirectoryLifecycle<'a> {
    layout: &'a SubjectLayout,
}

impl<'a> DirectoryLifecycle<'a> {
    pub fn new(layout: &'a SubjectLayout) -> Self {
        Self { layout }
    }

    pub fn staged_dirs(&self, series: &[SeriesName]) -> Vec<Utf8PathBuf> {
        let mut dirs = self.layout.analysis_subdirs();
        dirs.push(self.layout.summary_dir());
        dirs.extend(series.iter().map(|name| self.layout.preproc_dir(*name)));
        dirs
    }

    pub fn purge(&self, series: &[SeriesName]) -> Result<(), PipelineError> {
        for dir in self.staged_dirs(series) {
            if dir.exists() {
                tracing::debug!(dir = %dir, "removing stale output directory");
                fs::remove_dir_all(&dir).map_err(|err| PipelineError::DirectoryCreation {
                    path: dir.clone(),
                    message: format!("cannot remove previous output: {err}"),
                })?;
            }
        }
        Ok(())
    }

    pub fn prepare(&self, series: &[SeriesName]) -> Result<Vec<Utf8PathBuf>, PipelineError> {
        self.purge(series)?;
        let dirs = self.staged_dirs(series);
        for dir in &dirs {
            create_group_writable(dir)?;
        }
        Ok(dirs)
    }
}

fn create_group_writable(dir: &Utf8Path) -> Result<(), PipelineError> {
    let creation_error = |err: std::io::Error| PipelineError::DirectoryCreation {
        path: dir.to_path_buf(),
        message: err.to_string(),
    };

    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        builder.mode(GROUP_WRITABLE);
        builder.create(dir).map_err(creation_error)?;
        // the process umask may have masked the group bits
        fs::set_permissions(dir, fs::Permissions::from_mode(GROUP_WRITABLE))
            .map_err(creation_error)?;
    }
    #[cfg(not(unix))]
    {
        let _ = GROUP_WRITABLE;
        builder.create(dir).map_err(creation_error)?;
    }
    Ok(())
}
