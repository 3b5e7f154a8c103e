// Input probing using ffprobe

use super::core::{FontAttachment, ProbeResult, SubtitleTrack, even_down};
use super::error::ProbeError;
use crate::config::Config;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHOW_ENTRIES: &str = "format=duration:stream=index,codec_name,codec_type,pix_fmt,width,height:stream_tags=title,language,filename,mimetype";

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: Option<serde_json::Value>,
    codec_name: Option<String>,
    codec_type: Option<String>,
    pix_fmt: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

/// Probe output before the resolution fallback is applied
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProbe {
    pub duration_s: Option<f64>,
    pub video_codec: Option<String>,
    pub pix_fmt: Option<String>,
    /// Even-aligned dimensions of the first video stream
    pub dimensions: Option<(u32, u32)>,
    pub subtitle_tracks: Vec<SubtitleTrack>,
    pub default_subtitle: Option<SubtitleTrack>,
    pub font_attachments: Vec<FontAttachment>,
}

impl ParsedProbe {
    /// Check required fields; `fallback_dimensions` fills in a missing resolution.
    pub fn into_result(
        self,
        fallback_dimensions: Option<(u32, u32)>,
    ) -> Result<ProbeResult, ProbeError> {
        let duration_s = self.duration_s.ok_or(ProbeError::MissingField("duration"))?;
        let video_codec = self.video_codec.ok_or(ProbeError::MissingField("codec"))?;
        let (width, height) = self
            .dimensions
            .or(fallback_dimensions)
            .ok_or(ProbeError::MissingField("resolution"))?;

        Ok(ProbeResult {
            duration_s,
            video_codec,
            pix_fmt: self.pix_fmt.unwrap_or_else(|| "unknown".to_string()),
            width,
            height,
            subtitle_tracks: self.subtitle_tracks,
            default_subtitle: self.default_subtitle,
            font_attachments: self.font_attachments,
        })
    }
}

fn stream_index(value: &serde_json::Value) -> Option<u32> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn even_dimensions(width: Option<u32>, height: Option<u32>) -> Option<(u32, u32)> {
    match (width, height) {
        (Some(w), Some(h)) if w >= 2 && h >= 2 => Some((even_down(w), even_down(h))),
        _ => None,
    }
}

/// Parse ffprobe JSON (for testing without ffprobe)
pub fn parse_probe_json(
    json: &str,
    title_keyword: &str,
    font_mimetypes: &[String],
) -> Result<ParsedProbe, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_str(json)?;

    let duration_s = probe
        .format
        .duration
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty() && *d != "N/A")
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0);

    let keyword = title_keyword.to_lowercase();
    let mut parsed = ParsedProbe {
        duration_s,
        video_codec: None,
        pix_fmt: None,
        dimensions: None,
        subtitle_tracks: Vec::new(),
        default_subtitle: None,
        font_attachments: Vec::new(),
    };

    for stream in probe.streams {
        let Some(index) = stream.index.as_ref().and_then(stream_index) else {
            continue;
        };

        match stream.codec_type.as_deref() {
            Some("video") if parsed.video_codec.is_none() => {
                parsed.video_codec = Some(
                    stream
                        .codec_name
                        .map(|c| c.to_lowercase())
                        .unwrap_or_else(|| "unknown".to_string()),
                );
                parsed.pix_fmt = stream.pix_fmt;
                parsed.dimensions = even_dimensions(stream.width, stream.height);
            }
            Some("subtitle") => {
                let title = stream.tags.get("title").cloned().unwrap_or_default();
                let language = stream
                    .tags
                    .get("language")
                    .filter(|l| !l.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "und".to_string());
                let track = SubtitleTrack {
                    stream_index: index,
                    title,
                    language,
                };

                if parsed.default_subtitle.is_none()
                    && !keyword.is_empty()
                    && track.title.to_lowercase().contains(&keyword)
                {
                    parsed.default_subtitle = Some(track.clone());
                }
                parsed.subtitle_tracks.push(track);
            }
            Some("attachment") => {
                let mimetype = stream
                    .tags
                    .get("mimetype")
                    .map(|m| m.to_lowercase())
                    .unwrap_or_default();
                let is_font = font_mimetypes
                    .iter()
                    .any(|m| m.eq_ignore_ascii_case(&mimetype));
                let filename = stream.tags.get("filename").filter(|f| !f.is_empty());

                if let (true, Some(filename)) = (is_font, filename) {
                    parsed.font_attachments.push(FontAttachment {
                        stream_index: index,
                        filename: filename.clone(),
                    });
                }
            }
            _ => {}
        }
    }

    Ok(parsed)
}

/// Parse `WIDTHxHEIGHT` from the csv fallback probe, forcing even values
pub fn parse_resolution_csv(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    even_dimensions(w.trim().parse().ok(), h.trim().parse().ok())
}

/// ffprobe front end
pub struct MediaProber {
    ffprobe: PathBuf,
    title_keyword: String,
    font_mimetypes: Vec<String>,
}

impl MediaProber {
    pub fn new(config: &Config) -> Self {
        Self {
            ffprobe: config.tools.ffprobe.clone(),
            title_keyword: config.subtitles.title_keyword.clone(),
            font_mimetypes: config.subtitles.font_mimetypes.clone(),
        }
    }

    fn run(&self, args: &[&str], input: &Path) -> Result<String, ProbeError> {
        let output = Command::new(&self.ffprobe)
            .args(args)
            .arg(input)
            .output()
            .map_err(|e| ProbeError::tool(&self.ffprobe, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no stderr output");
            return Err(ProbeError::tool(
                &self.ffprobe,
                format!("exit status {}: {}", output.status, last.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Full probe: duration, first video stream, subtitle tracks and font attachments
    pub fn probe(&self, input: &Path) -> Result<ProbeResult, ProbeError> {
        let json = self.run(
            &["-v", "error", "-show_entries", SHOW_ENTRIES, "-of", "json"],
            input,
        )?;
        let parsed = parse_probe_json(&json, &self.title_keyword, &self.font_mimetypes)?;

        let fallback = if parsed.dimensions.is_none() && parsed.video_codec.is_some() {
            tracing::debug!(input = %input.display(), "no dimensions in JSON probe, trying csv fallback");
            self.probe_resolution(input).ok().flatten()
        } else {
            None
        };

        parsed.into_result(fallback)
    }

    /// `ffprobe -select_streams v:0 -show_entries stream=width,height -of csv=s=x:p=0`
    pub fn probe_resolution(&self, input: &Path) -> Result<Option<(u32, u32)>, ProbeError> {
        let out = self.run(
            &[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=s=x:p=0",
            ],
            input,
        )?;
        Ok(parse_resolution_csv(&out))
    }

    /// Duration only, used for queue-wide ETA before files are processed
    pub fn probe_duration(&self, input: &Path) -> Result<f64, ProbeError> {
        let json = self.run(
            &["-v", "error", "-show_entries", "format=duration", "-of", "json"],
            input,
        )?;
        parse_probe_json(&json, "", &[])?
            .duration_s
            .ok_or(ProbeError::MissingField("duration"))
    }

    /// Global indices of all subtitle streams, in stream order
    pub fn subtitle_stream_indices(&self, input: &Path) -> Result<Vec<u32>, ProbeError> {
        let out = self.run(
            &[
                "-v",
                "error",
                "-select_streams",
                "s",
                "-show_entries",
                "stream=index",
                "-of",
                "csv=p=0",
            ],
            input,
        )?;
        Ok(parse_index_list(&out))
    }
}

/// One index per line; malformed lines are skipped
pub fn parse_index_list(output: &str) -> Vec<u32> {
    output
        .lines()
        .map(|l| l.trim().trim_end_matches(','))
        .filter(|l| !l.is_empty())
        .filter_map(|l| match l.parse() {
            Ok(i) => Some(i),
            Err(_) => {
                tracing::warn!("ignoring malformed subtitle stream index '{}'", l);
                None
            }
        })
        .collect()
}
