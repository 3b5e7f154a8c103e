use super::types::{CropBox, ProbeResult, even_down, is_10bit_pix_fmt};
use crate::config::{AudioConfig, Config};
use crate::engine::hardware::HwCapabilities;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Run options chosen by the user for a whole queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeOptions {
    /// Target video bitrate in Mbit/s (bitrate mode)
    pub bitrate_mbps: u32,
    pub lossless: bool,
    pub force_10bit: bool,
    pub detect_crop: bool,
    /// Forced output resolution (width, height)
    pub resolution: Option<(u32, u32)>,
    pub burn_subtitles: bool,
    pub strip_credits: bool,
    pub use_hw_decoder: bool,
    pub overwrite: bool,
    /// Output directory; defaults to a sub-directory next to each source
    pub output_dir: Option<PathBuf>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            bitrate_mbps: 4,
            lossless: false,
            force_10bit: false,
            detect_crop: true,
            resolution: None,
            burn_subtitles: true,
            strip_credits: false,
            use_hw_decoder: true,
            overwrite: false,
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Eight,
    Ten,
}

impl BitDepth {
    /// Pixel format handed to the encoder
    pub fn pixel_format(self) -> &'static str {
        match self {
            Self::Eight => "nv12",
            Self::Ten => "p010le",
        }
    }

    /// HEVC profile
    pub fn profile(self) -> &'static str {
        match self {
            Self::Eight => "main",
            Self::Ten => "main10",
        }
    }

    pub fn is_ten(self) -> bool {
        self == Self::Ten
    }
}

/// Forced 10-bit wins; lossless keeps the source depth; everything else is 8-bit.
pub fn resolve_bit_depth(force_10bit: bool, lossless: bool, source_pix_fmt: &str) -> BitDepth {
    if force_10bit || (lossless && is_10bit_pix_fmt(source_pix_fmt)) {
        BitDepth::Ten
    } else {
        BitDepth::Eight
    }
}

/// Hardware decoder for `codec`, unless the combination cannot be decoded on the GPU.
///
/// NVDEC cannot feed 10-bit H.264 into a 10-bit pipeline, so H.264 falls back to
/// software decode whenever the source or the output is 10-bit.
pub fn select_decoder(
    hw: &HwCapabilities,
    codec: &str,
    source_10bit: bool,
    output: BitDepth,
) -> Option<String> {
    let decoder = hw.decoder_for(codec)?;
    if codec == "h264" && (source_10bit || output.is_ten()) {
        return None;
    }
    Some(decoder.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateControl {
    Bitrate {
        mode: String,
        target_mbps: u32,
        min_mbps: u32,
        max_mbps: u32,
        buffer_mbps: u32,
    },
    ConstQp {
        qp: u32,
    },
}

impl RateControl {
    /// min = target, max = 2x target, buffer = 4x target
    pub fn bitrate(mode: &str, target_mbps: u32) -> Self {
        Self::Bitrate {
            mode: mode.to_string(),
            target_mbps,
            min_mbps: target_mbps,
            max_mbps: target_mbps.saturating_mul(2),
            buffer_mbps: target_mbps.saturating_mul(4),
        }
    }

    pub fn is_const_qp(&self) -> bool {
        matches!(self, Self::ConstQp { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPlan {
    pub codec: String,
    pub bitrate: Option<String>,
    pub channels: Option<String>,
    pub title: Option<String>,
    pub language: Option<String>,
}

impl AudioPlan {
    pub fn from_config(audio: &AudioConfig) -> Self {
        let copy = audio.codec == "copy";
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.trim().to_string());

        Self {
            codec: audio.codec.clone(),
            bitrate: if copy || is_lossless_audio_codec(&audio.codec) {
                None
            } else {
                non_empty(&audio.bitrate)
            },
            channels: if copy {
                None
            } else {
                non_empty(&audio.channels)
            },
            title: non_empty(&audio.title),
            language: non_empty(&audio.language),
        }
    }
}

/// Audio codecs that take no bitrate
pub fn is_lossless_audio_codec(codec: &str) -> bool {
    matches!(codec, "flac" | "alac" | "truehd") || codec.starts_with("pcm_")
}

/// One entry of the `-vf` chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoFilter {
    Subtitles {
        path: PathBuf,
        fonts_dir: Option<PathBuf>,
    },
    Crop(CropBox),
    Scale {
        width: u32,
        height: u32,
    },
    Format(BitDepth),
}

impl VideoFilter {
    /// Position in the fixed chain order
    pub fn order(&self) -> u8 {
        match self {
            Self::Subtitles { .. } => 0,
            Self::Crop(_) => 1,
            Self::Scale { .. } => 2,
            Self::Format(_) => 3,
        }
    }

    pub fn to_arg(&self) -> String {
        match self {
            Self::Subtitles { path, fonts_dir } => {
                let mut arg = format!("subtitles=filename={}", escape_filter_path(path));
                if let Some(dir) = fonts_dir {
                    arg.push_str(&format!(":fontsdir={}", escape_filter_path(dir)));
                }
                arg
            }
            Self::Crop(crop) => crop.filter_arg(),
            Self::Scale { width, height } => {
                format!("scale=w={}:h={}:flags=lanczos", width, height)
            }
            Self::Format(depth) => format!("format={}", depth.pixel_format()),
        }
    }
}

/// Escape a path for use as a filtergraph option value
pub fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut escaped = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        if matches!(c, ':' | '\'' | '[' | ']' | ',' | ';' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Output resolution after cropping.
///
/// With a crop the forced height is kept and the width follows the cropped
/// aspect ratio, rounded to nearest and then down to even. Without a crop the
/// forced size is used.
pub fn scale_target(forced: Option<(u32, u32)>, crop: Option<&CropBox>) -> Option<(u32, u32)> {
    let (width, height) = forced?;
    match crop {
        Some(c) if c.height > 0 => {
            let (cw, ch) = (c.width as u64, c.height as u64);
            let scaled = ((cw * height as u64 * 2 + ch) / (2 * ch)) as u32;
            Some((even_down(scaled).max(2), height))
        }
        _ => Some((width, height)),
    }
}

/// Subtitles, crop, scale, format; always in that order.
pub fn build_filter_chain(
    subtitle: Option<(PathBuf, Option<PathBuf>)>,
    crop: Option<CropBox>,
    scale: Option<(u32, u32)>,
    depth: BitDepth,
) -> Vec<VideoFilter> {
    let mut filters = Vec::with_capacity(4);
    if let Some((path, fonts_dir)) = subtitle {
        filters.push(VideoFilter::Subtitles { path, fonts_dir });
    }
    if let Some(crop) = crop {
        filters.push(VideoFilter::Crop(crop));
    }
    if let Some((width, height)) = scale {
        filters.push(VideoFilter::Scale { width, height });
    }
    filters.push(VideoFilter::Format(depth));
    filters
}

/// Extracted fonts first, the configured fonts directory second; empty directories are skipped.
pub fn choose_fonts_dir(extracted: Option<&Path>, configured: Option<&Path>) -> Option<PathBuf> {
    [extracted, configured]
        .into_iter()
        .flatten()
        .find(|dir| dir_has_entries(dir))
        .map(Path::to_path_buf)
}

fn dir_has_entries(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Video encoder parameters resolved from config and run options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEncoderSettings {
    pub encoder: String,
    pub preset: String,
    pub tuning: String,
    pub lookahead: u32,
    pub spatial_aq: bool,
    pub aq_strength: u32,
}

/// Everything needed to synthesize one ffmpeg invocation. Built fresh per file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingPlan {
    pub input: PathBuf,
    pub output: PathBuf,
    pub decoder: Option<String>,
    pub filters: Vec<VideoFilter>,
    pub bit_depth: BitDepth,
    pub rate_control: RateControl,
    pub video: VideoEncoderSettings,
    pub audio: AudioPlan,
    pub scale: Option<(u32, u32)>,
    pub additional_args: String,
}

/// Per-file facts the planner combines with config and run options
#[derive(Debug, Clone)]
pub struct PlanInputs<'a> {
    pub input: &'a Path,
    pub output: PathBuf,
    pub probe: &'a ProbeResult,
    pub crop: Option<CropBox>,
    pub subtitle: Option<PathBuf>,
    pub extracted_fonts_dir: Option<PathBuf>,
}

pub struct EncodingPlanner<'a> {
    config: &'a Config,
    hw: &'a HwCapabilities,
    options: &'a EncodeOptions,
}

impl<'a> EncodingPlanner<'a> {
    pub fn new(config: &'a Config, hw: &'a HwCapabilities, options: &'a EncodeOptions) -> Self {
        Self {
            config,
            hw,
            options,
        }
    }

    pub fn plan(&self, inputs: PlanInputs<'_>) -> EncodingPlan {
        let enc = &self.config.encoder;
        let probe = inputs.probe;

        let bit_depth = resolve_bit_depth(
            self.options.force_10bit,
            self.options.lossless,
            &probe.pix_fmt,
        );

        let decoder = if self.options.use_hw_decoder {
            select_decoder(self.hw, &probe.video_codec, probe.is_10bit(), bit_depth)
        } else {
            None
        };

        let subtitle = inputs
            .subtitle
            .filter(|_| self.hw.subtitles_filter)
            .map(|path| {
                let fonts_dir = choose_fonts_dir(
                    inputs.extracted_fonts_dir.as_deref(),
                    self.config.subtitles.fonts_dir.as_deref(),
                );
                (path, fonts_dir)
            });

        let scale = scale_target(self.options.resolution, inputs.crop.as_ref());
        let filters = build_filter_chain(subtitle, inputs.crop, scale, bit_depth);

        let (rate_control, preset) = if self.options.lossless {
            (
                RateControl::ConstQp {
                    qp: enc.lossless_qp,
                },
                "lossless".to_string(),
            )
        } else {
            (
                RateControl::bitrate(&enc.rc_mode, self.options.bitrate_mbps),
                enc.preset.clone(),
            )
        };

        EncodingPlan {
            input: inputs.input.to_path_buf(),
            output: inputs.output,
            decoder,
            filters,
            bit_depth,
            rate_control,
            video: VideoEncoderSettings {
                encoder: enc.encoder.clone(),
                preset,
                tuning: enc.tuning.clone(),
                lookahead: enc.lookahead,
                spatial_aq: enc.spatial_aq,
                aq_strength: enc.aq_strength,
            },
            audio: AudioPlan::from_config(&self.config.audio),
            scale,
            additional_args: enc.additional_args.clone(),
        }
    }
}
