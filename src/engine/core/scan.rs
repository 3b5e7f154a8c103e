use super::types::SourceFile;
use crate::config::OutputConfig;
use anyhow::{Result, bail};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video file extensions picked up when scanning directories
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "ts", "m2ts", "webm", "flv"];

/// Check if a path has a video file extension
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Scan a directory recursively for video files, skipping our own output directories
pub fn scan(root: &Path, output_subdir: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            output_subdir.is_empty() || e.depth() == 0 || e.file_name() != output_subdir
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_video_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Expand user-supplied paths into an ordered, de-duplicated queue.
/// Explicit files are taken as given; directories are scanned.
pub fn collect_sources(paths: &[PathBuf], output_subdir: &str) -> Result<Vec<SourceFile>> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for path in paths {
        let found = if path.is_dir() {
            scan(path, output_subdir)
        } else if path.is_file() {
            vec![path.clone()]
        } else {
            bail!("Input path does not exist: {}", path.display());
        };

        for file in found {
            if seen.insert(file.clone()) {
                sources.push(SourceFile::new(file));
            }
        }
    }

    Ok(sources)
}

/// Output location for an input file.
///
/// Without an explicit directory the output goes into `<input dir>/<subdir>`.
pub fn derive_output_path(input_path: &Path, output_dir: Option<&Path>, output: &OutputConfig) -> PathBuf {
    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&output.subdir),
    };

    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let original_filename = input_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("output");

    let base = output
        .filename_pattern
        .replace("{basename}", stem)
        .replace("{filename}", original_filename);
    let base = if base.trim().is_empty() {
        stem.to_string()
    } else {
        base
    };

    dir.join(format!("{}.{}", base, output.container))
}

/// Whether both paths resolve to the same existing file (symlinks and `..` included)
pub fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
