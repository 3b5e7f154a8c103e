//! Per-file error taxonomy. None of these abort the queue.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("could not parse ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("probe result has no {0}")]
    MissingField(&'static str),
}

impl ProbeError {
    pub(crate) fn tool(tool: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.display().to_string(),
            message: message.into(),
        }
    }
}

/// Subtitle or font extraction failure. Encoding continues without the asset.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("listing subtitle streams failed: {0}")]
    StreamList(String),

    #[error("subtitle stream #{index} is not among subtitle streams {available:?}")]
    StreamNotFound { index: u32, available: Vec<u32> },

    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    #[error("extraction cancelled")]
    Cancelled,

    #[error("extracted file is missing or empty: {}", .0.display())]
    EmptyOutput(PathBuf),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Why an encode failed, classified from ffmpeg's stderr
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("NVIDIA driver is too old for this NVENC API (requires {})", .min_version.as_deref().unwrap_or("a newer driver"))]
    DriverApi { min_version: Option<String> },

    #[error("no space left on device")]
    DiskFull,

    #[error("subtitle font not found; check system fonts or the configured fonts directory")]
    FontNotFound,

    #[error("subtitle rendering failed (libass/fontconfig)")]
    SubtitleRenderer,

    #[error("file or directory not found: {}", .path.as_deref().unwrap_or("(unknown)"))]
    NotFound { path: Option<String> },

    #[error("permission denied: {}", .path.as_deref().unwrap_or("(unknown)"))]
    PermissionDenied { path: Option<String> },

    #[error("last ffmpeg messages: {0}")]
    Other(String),

    #[error("failed to start ffmpeg: {0}")]
    Spawn(String),

    #[error("ffmpeg reported success but the output file was not created")]
    MissingOutput,

    #[error("unknown ffmpeg error (empty stderr)")]
    Unknown,
}

const NVENC_API_MARKERS: &[&str] = &[
    "Driver does not support the required nvenc API version",
    "minimum required Nvidia driver for nvenc",
];

/// Classify ffmpeg diagnostics, most specific cause first.
pub fn classify_ffmpeg_stderr(stderr: &str) -> EncodeError {
    if stderr.trim().is_empty() {
        return EncodeError::Unknown;
    }

    if NVENC_API_MARKERS.iter().any(|m| stderr.contains(m)) {
        return EncodeError::DriverApi {
            min_version: min_driver_version(stderr),
        };
    }

    if stderr.contains("No space left on device") {
        return EncodeError::DiskFull;
    }

    let lower = stderr.to_lowercase();
    if stderr.contains("[libass]") || lower.contains("fontconfig") {
        if stderr.contains("Font not found") || lower.contains("fontselect: failed to find font")
        {
            return EncodeError::FontNotFound;
        }
        return EncodeError::SubtitleRenderer;
    }

    if stderr.contains("No such file or directory") {
        return EncodeError::NotFound {
            path: path_before(stderr, ": No such file or directory"),
        };
    }

    if stderr.contains("Permission denied") {
        return EncodeError::PermissionDenied {
            path: path_before(stderr, ": Permission denied"),
        };
    }

    let tail: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !is_progress_line(l))
        .collect();
    let start = tail.len().saturating_sub(5);
    if tail.is_empty() {
        return EncodeError::Unknown;
    }
    EncodeError::Other(tail[start..].join(" | "))
}

fn is_progress_line(line: &str) -> bool {
    line.starts_with("frame=") || (line.contains("time=") && line.contains("speed="))
}

/// "... driver for nvenc is 550.54 or newer" -> "550.54"
fn min_driver_version(stderr: &str) -> Option<String> {
    const MARKER: &str = "driver for nvenc is ";
    let start = stderr.find(MARKER)? + MARKER.len();
    let rest = &stderr[start..];
    let version: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let version = version.trim_end_matches('.');
    let followed_by_newer = rest[version.len()..].trim_start().starts_with("or newer");
    (!version.is_empty() && followed_by_newer).then(|| version.to_string())
}

/// Path preceding `suffix` on the first line containing it.
/// Text up to the first ": " on that line is treated as a log prefix.
fn path_before(stderr: &str, suffix: &str) -> Option<String> {
    let line = stderr.lines().find(|l| l.contains(suffix))?;
    let head = &line[..line.find(suffix)?];
    let path = head.split_once(": ").map(|(_, p)| p).unwrap_or(head).trim();
    (!path.is_empty()).then(|| path.to_string())
}
