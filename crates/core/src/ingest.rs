use crate::error::IndexingError;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_EXTENSIONS: [&str; 4] = ["pdf", "txt", "md", "markdown"];

/// Regular files below `folder` whose extension matches one of `extensions`
/// (case-insensitive), sorted by path.
pub fn discover_files(folder: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                extensions
                    .iter()
                    .any(|wanted| ext.eq_ignore_ascii_case(wanted))
            });

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// A single file is taken as-is; a directory is searched recursively.
pub fn upload_candidates(path: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, IndexingError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(IndexingError::not_found("path", path.display().to_string()));
    }

    let files = discover_files(path, extensions);
    if files.is_empty() {
        return Err(IndexingError::Validation(format!(
            "no {} files found in {}",
            extensions.join("/"),
            path.display()
        )));
    }
    Ok(files)
}
