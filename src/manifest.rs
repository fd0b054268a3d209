use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::PipelineError;

/// One row of a batch list: `subjectID, output_folder`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub subject: String,
    pub output_path: Utf8PathBuf,
}

pub fn load_manifest(path: &Utf8Path) -> Result<Vec<ManifestEntry>, PipelineError> {
    let content = fs::read_to_string(path).map_err(|err| PipelineError::Manifest {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    parse_manifest(path, &content)
}

/// Blank lines and `#` comments are ignored, as is a leading header row.
pub fn parse_manifest(path: &Utf8Path, content: &str) -> Result<Vec<ManifestEntry>, PipelineError> {
    let invalid = |line: usize, message: String| PipelineError::Manifest {
        path: path.to_path_buf(),
        message: format!("line {line}: {message}"),
    };

    let mut entries = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line_number = number + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 2 {
            return Err(invalid(
                line_number,
                format!("expected 2 comma-separated columns, found {}", fields.len()),
            ));
        }
        let (subject, output) = (fields[0], fields[1]);
        if entries.is_empty() && is_header(subject) {
            continue;
        }
        if subject.is_empty() || output.is_empty() {
            return Err(invalid(line_number, "empty subject or output folder".to_string()));
        }
        entries.push(ManifestEntry {
            subject: subject.to_string(),
            output_path: Utf8PathBuf::from(output),
        });
    }

    if entries.is_empty() {
        return Err(PipelineError::Manifest {
            path: path.to_path_buf(),
            message: "no subjects listed".to_string(),
        });
    }
    Ok(entries)
}

fn is_header(first_field: &str) -> bool {
    let normalized = first_field.to_ascii_lowercase().replace('_', "");
    normalized == "subjectid" || normalized == "subject"
}
