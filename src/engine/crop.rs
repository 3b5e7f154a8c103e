//! Black-border detection with ffmpeg's cropdetect filter

use super::core::{CropBox, even_down};
use super::process::{CancelToken, run_with_timeout};
use crate::config::CropConfig;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Thresholds applied to a cropdetect proposal
#[derive(Debug, Clone, Copy)]
pub struct CropLimits {
    pub min_area_ratio: f64,
    pub min_frame_area: u64,
}

impl From<&CropConfig> for CropLimits {
    fn from(config: &CropConfig) -> Self {
        Self {
            min_area_ratio: config.min_area_ratio,
            min_frame_area: config.min_frame_area,
        }
    }
}

/// Outcome of validating a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropVerdict {
    Apply(CropBox),
    FullFrame,
    OutOfBounds,
    TooAggressive,
}

/// Last `crop=W:H:X:Y` in cropdetect output. Signed so bogus proposals can be rejected.
pub fn parse_last_crop(stderr: &str) -> Option<(i64, i64, i64, i64)> {
    stderr
        .match_indices("crop=")
        .filter_map(|(pos, key)| {
            let rest = &stderr[pos + key.len()..];
            let token: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == ':' || *c == '-')
                .collect();
            let mut parts = token.split(':').map(|p| p.parse::<i64>().ok());
            let w = parts.next()??;
            let h = parts.next()??;
            let x = parts.next()??;
            let y = parts.next()??;
            Some((w, h, x, y))
        })
        .last()
}

/// Validate a proposal against the source frame
pub fn validate_crop(
    proposal: (i64, i64, i64, i64),
    source_width: u32,
    source_height: u32,
    limits: CropLimits,
) -> CropVerdict {
    let (w, h, x, y) = proposal;
    let (sw, sh) = (source_width as i64, source_height as i64);

    if w <= 0 || h <= 0 || x < 0 || y < 0 || w > sw || h > sh || x + w > sw || y + h > sh {
        return CropVerdict::OutOfBounds;
    }

    let crop = CropBox {
        width: even_down(w as u32),
        height: even_down(h as u32),
        x: even_down(x as u32),
        y: even_down(y as u32),
    };
    if crop.width == 0 || crop.height == 0 {
        return CropVerdict::OutOfBounds;
    }
    if crop.width == source_width && crop.height == source_height {
        return CropVerdict::FullFrame;
    }

    let source_area = source_width as u64 * source_height as u64;
    if source_area > limits.min_frame_area
        && (crop.area() as f64) < source_area as f64 * limits.min_area_ratio
    {
        return CropVerdict::TooAggressive;
    }

    CropVerdict::Apply(crop)
}

/// Runs a short cropdetect pass over the start of a file
pub struct CropAnalyzer {
    ffmpeg: PathBuf,
    analysis_seconds: u32,
    limit: u32,
    limits: CropLimits,
}

impl CropAnalyzer {
    pub fn new(ffmpeg: &Path, config: &CropConfig) -> Self {
        Self {
            ffmpeg: ffmpeg.to_path_buf(),
            analysis_seconds: config.analysis_seconds,
            limit: config.limit,
            limits: CropLimits::from(config),
        }
    }

    pub fn build_cmd(&self, input: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-hide_banner");
        cmd.arg("-loglevel").arg("info");
        cmd.arg("-i").arg(input);
        cmd.arg("-t").arg(self.analysis_seconds.to_string());
        cmd.arg("-vf")
            .arg(format!("cropdetect=limit={}:round=2:reset=0", self.limit));
        cmd.arg("-f").arg("null");
        cmd.arg("-");
        cmd
    }

    /// Detect a crop box. Any failure or cancellation means no crop.
    pub fn detect(
        &self,
        input: &Path,
        source_width: u32,
        source_height: u32,
        cancel: &CancelToken,
    ) -> Option<CropBox> {
        let timeout = Duration::from_secs(self.analysis_seconds as u64 + 5);
        let output = match run_with_timeout(&mut self.build_cmd(input), timeout, cancel) {
            Ok(Some(output)) => output,
            Ok(None) if cancel.is_cancelled() => {
                tracing::info!(input = %input.display(), "cropdetect cancelled");
                return None;
            }
            Ok(None) => {
                tracing::warn!(input = %input.display(), "cropdetect timed out");
                return None;
            }
            Err(e) => {
                tracing::warn!(input = %input.display(), "cropdetect failed to start: {}", e);
                return None;
            }
        };

        let Some(proposal) = parse_last_crop(&output.stderr) else {
            tracing::info!(input = %input.display(), "cropdetect proposed nothing");
            return None;
        };

        match validate_crop(proposal, source_width, source_height, self.limits) {
            CropVerdict::Apply(crop) => {
                tracing::info!(input = %input.display(), crop = %crop.filter_arg(), "crop accepted");
                Some(crop)
            }
            verdict => {
                tracing::info!(input = %input.display(), ?proposal, ?verdict, "crop rejected");
                None
            }
        }
    }
}
