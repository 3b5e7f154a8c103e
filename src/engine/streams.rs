//! Subtitle and font attachment extraction

use super::core::{FontAttachment, SubtitleTrack};
use super::error::ExtractionError;
use super::probe::MediaProber;
use super::process::{CancelToken, run_with_timeout};
use crate::config::Config;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Position of a global stream index among the subtitle streams (`-map 0:s:N`)
pub fn subtitle_ordinal(indices: &[u32], target: u32) -> Option<usize> {
    indices.iter().position(|&i| i == target)
}

/// Make text safe to use as part of a file name
pub fn sanitize_filename_part(text: &str, max_len: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '[' | ']' | '\n' | '\r' | '\t'))
        .collect();
    let mut sanitized = cleaned.trim_matches(|c| c == '.' || c == ' ').to_string();

    if sanitized.chars().count() > max_len {
        sanitized = sanitized
            .chars()
            .take(max_len)
            .collect::<String>()
            .trim_end_matches(['_', ' ', '.', '-'])
            .to_string();
    }

    if sanitized.is_empty() {
        "untitled".to_string()
    } else {
        sanitized
    }
}

/// Drop lines containing any of the signatures. Returns the new text and the number removed.
pub fn strip_credit_lines(content: &str, signatures: &[String]) -> (String, usize) {
    let mut removed = 0;
    let mut kept = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        if signatures
            .iter()
            .any(|sig| !sig.is_empty() && line.contains(sig.as_str()))
        {
            removed += 1;
        } else {
            kept.push_str(line);
        }
    }
    (kept, removed)
}

/// File names for dumped fonts, one per attachment. Names that sanitize to
/// the same string get the stream index as a prefix.
pub fn font_file_names(fonts: &[FontAttachment]) -> Vec<String> {
    let mut used = HashSet::new();
    fonts
        .iter()
        .map(|font| {
            let file_name = Path::new(&font.filename)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let name = sanitize_filename_part(&file_name, 120);
            if used.insert(name.clone()) {
                return name;
            }
            let prefixed = format!("{}_{}", font.stream_index, name);
            used.insert(prefixed.clone());
            prefixed
        })
        .collect()
}

/// Result of dumping font attachments
#[derive(Debug, Default)]
pub struct FontReport {
    pub extracted: Vec<PathBuf>,
    pub failures: Vec<String>,
}

pub struct StreamExtractor {
    ffmpeg: PathBuf,
    prober: MediaProber,
    font_timeout: Duration,
    subtitle_timeout: Duration,
    credit_signatures: Vec<String>,
}

impl StreamExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            ffmpeg: config.tools.ffmpeg.clone(),
            prober: MediaProber::new(config),
            font_timeout: Duration::from_secs(config.subtitles.extraction_timeout_secs),
            subtitle_timeout: Duration::from_secs(config.subtitles.subtitle_timeout_secs),
            credit_signatures: config.subtitles.credit_signatures.clone(),
        }
    }

    pub fn build_subtitle_cmd(&self, input: &Path, ordinal: usize, output: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y").arg("-hide_banner");
        cmd.arg("-loglevel").arg("error");
        cmd.arg("-i").arg(input);
        cmd.arg("-map").arg(format!("0:s:{}", ordinal));
        cmd.arg("-c:s").arg("ass");
        cmd.arg(output);
        cmd
    }

    pub fn build_font_cmd(&self, input: &Path, stream_index: u32, output: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y").arg("-hide_banner");
        cmd.arg("-loglevel").arg("error");
        cmd.arg(format!("-dump_attachment:{}", stream_index));
        cmd.arg(output);
        cmd.arg("-i").arg(input);
        cmd
    }

    /// Extract one subtitle track to `<temp_dir>/<title>.ass`, optionally stripping credit lines.
    pub fn extract_subtitle(
        &self,
        input: &Path,
        track: &SubtitleTrack,
        temp_dir: &Path,
        strip_credits: bool,
        cancel: &CancelToken,
    ) -> Result<PathBuf, ExtractionError> {
        let indices = self
            .prober
            .subtitle_stream_indices(input)
            .map_err(|e| ExtractionError::StreamList(e.to_string()))?;
        let ordinal = subtitle_ordinal(&indices, track.stream_index).ok_or_else(|| {
            ExtractionError::StreamNotFound {
                index: track.stream_index,
                available: indices.clone(),
            }
        })?;

        let name = format!("subs_{}.ass", sanitize_filename_part(&track.title, 30));
        let output_path = temp_dir.join(name);
        tracing::debug!(
            stream = track.stream_index,
            ordinal,
            output = %output_path.display(),
            "extracting subtitle track"
        );

        let mut cmd = self.build_subtitle_cmd(input, ordinal, &output_path);
        let result = run_with_timeout(&mut cmd, self.subtitle_timeout, cancel).map_err(|source| {
            ExtractionError::Spawn {
                tool: self.ffmpeg.display().to_string(),
                source,
            }
        })?;
        let Some(result) = result else {
            let _ = fs::remove_file(&output_path);
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            return Err(ExtractionError::Timeout(self.subtitle_timeout.as_secs()));
        };

        if !result.status.success() {
            tracing::debug!(stderr = %result.stderr.trim(), "subtitle extraction exited with {}", result.status);
        }
        if !is_non_empty_file(&output_path) {
            let _ = fs::remove_file(&output_path);
            return Err(ExtractionError::EmptyOutput(output_path));
        }

        if strip_credits {
            let content = fs::read_to_string(&output_path)?;
            let (stripped, removed) = strip_credit_lines(&content, &self.credit_signatures);
            if removed > 0 {
                fs::write(&output_path, stripped)?;
                tracing::info!(removed, "stripped credit lines from subtitles");
            }
        }

        Ok(output_path)
    }

    /// Dump each font attachment into `fonts_dir`. Exit codes are ignored; a non-empty file is success.
    pub fn extract_fonts(
        &self,
        input: &Path,
        fonts: &[FontAttachment],
        fonts_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<FontReport, ExtractionError> {
        fs::create_dir_all(fonts_dir)?;
        let mut report = FontReport::default();

        for (font, name) in fonts.iter().zip(font_file_names(fonts)) {
            if cancel.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            let output_path = fonts_dir.join(name);

            let mut cmd = self.build_font_cmd(input, font.stream_index, &output_path);
            let outcome = run_with_timeout(&mut cmd, self.font_timeout, cancel);

            if is_non_empty_file(&output_path) {
                report.extracted.push(output_path);
                continue;
            }

            let _ = fs::remove_file(&output_path);
            let reason = match outcome {
                Ok(Some(out)) => {
                    let stderr = out.stderr.trim();
                    format!(
                        "exit {}: {}",
                        out.status,
                        if stderr.is_empty() { "empty stderr" } else { stderr }
                    )
                }
                Ok(None) if cancel.is_cancelled() => return Err(ExtractionError::Cancelled),
                Ok(None) => format!("timed out after {}s", self.font_timeout.as_secs()),
                Err(e) => format!("failed to run ffmpeg: {}", e),
            };
            report
                .failures
                .push(format!("{} (stream #{}): {}", font.filename, font.stream_index, reason));
        }

        Ok(report)
    }
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
