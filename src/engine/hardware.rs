//! NVIDIA GPU and ffmpeg capability detection

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use serde::Serialize;

/// Hardware decoder candidates per source codec, preferred name first.
/// `_nvdec` wins over `_cuvid` when ffmpeg exposes both.
const NVIDIA_DECODER_CANDIDATES: &[(&str, &[&str])] = &[
    ("h264", &["h264_nvdec", "h264_cuvid"]),
    ("hevc", &["hevc_nvdec", "hevc_cuvid"]),
    ("vp9", &["vp9_nvdec", "vp9_cuvid"]),
    ("av1", &["av1_nvdec", "av1_cuvid"]),
    ("mpeg1video", &["mpeg1_cuvid"]),
    ("mpeg2video", &["mpeg2_nvdec", "mpeg2_cuvid"]),
    ("mpeg4", &["mpeg4_cuvid"]),
    ("vc1", &["vc1_nvdec", "vc1_cuvid"]),
    ("vp8", &["vp8_nvdec", "vp8_cuvid"]),
];

/// What the local GPU and ffmpeg build can do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HwCapabilities {
    pub gpu_name: Option<String>,
    /// Requested encoder, present only when ffmpeg lists it
    pub encoder: Option<String>,
    /// Source codec name -> hardware decoder name
    pub decoder_map: BTreeMap<String, String>,
    pub subtitles_filter: bool,
}

impl HwCapabilities {
    /// Query nvidia-smi and the given ffmpeg binary
    pub fn detect(ffmpeg: &Path, encoder: &str) -> Self {
        let gpu_name = detect_nvidia_gpu().map(str::to_string);
        let encoders = ffmpeg_listing(ffmpeg, "-encoders");
        let decoders = ffmpeg_listing(ffmpeg, "-decoders");
        let filters = ffmpeg_listing(ffmpeg, "-filters");

        let caps = Self::from_listings(gpu_name, &encoders, &decoders, &filters, encoder);
        tracing::debug!(?caps, "hardware capabilities detected");
        caps
    }

    /// Build capabilities from captured `ffmpeg -encoders/-decoders/-filters` output
    pub fn from_listings(
        gpu_name: Option<String>,
        encoders: &str,
        decoders: &str,
        filters: &str,
        encoder: &str,
    ) -> Self {
        let mut decoder_map = BTreeMap::new();
        for (codec, candidates) in NVIDIA_DECODER_CANDIDATES {
            if let Some(found) = candidates.iter().find(|name| listing_has(decoders, name)) {
                decoder_map.insert(codec.to_string(), found.to_string());
            }
        }

        Self {
            gpu_name,
            encoder: listing_has(encoders, encoder).then(|| encoder.to_string()),
            decoder_map,
            subtitles_filter: listing_has(filters, "subtitles"),
        }
    }

    pub fn decoder_for(&self, codec: &str) -> Option<&str> {
        self.decoder_map.get(codec).map(String::as_str)
    }

    /// Both a GPU and the encoder are present
    pub fn can_encode(&self) -> bool {
        self.gpu_name.is_some() && self.encoder.is_some()
    }

    /// Human-readable problems preventing hardware encoding
    pub fn problems(&self, encoder: &str) -> Vec<String> {
        let mut problems = Vec::new();
        if self.gpu_name.is_none() {
            problems.push("No NVIDIA GPU detected (nvidia-smi failed or missing)".to_string());
        }
        if self.encoder.is_none() {
            problems.push(format!("ffmpeg does not list the '{}' encoder", encoder));
        }
        if !self.subtitles_filter {
            problems.push(
                "ffmpeg has no 'subtitles' filter (libass); subtitle burn-in is disabled"
                    .to_string(),
            );
        }
        problems
    }
}

/// Check a `-encoders`/`-decoders`/`-filters` listing for an exact entry name
pub fn listing_has(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(name))
}

fn ffmpeg_listing(ffmpeg: &Path, flag: &str) -> String {
    Command::new(ffmpeg)
        .args(["-hide_banner", flag])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).to_string())
        .unwrap_or_default()
}

/// Cached nvidia-smi GPU name
static NVIDIA_GPU_CACHE: OnceLock<Option<String>> = OnceLock::new();

/// Detect NVIDIA GPU using nvidia-smi
pub fn detect_nvidia_gpu() -> Option<&'static str> {
    NVIDIA_GPU_CACHE
        .get_or_init(|| {
            let output = Command::new("nvidia-smi")
                .args(["--query-gpu=name", "--format=csv,noheader"])
                .output()
                .ok()?;

            if !output.status.success() {
                return None;
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let name = stdout.lines().next()?.trim();
            if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            }
        })
        .as_deref()
}

/// First line of `<tool> -version`
pub fn tool_version(tool: &Path) -> Option<String> {
    let output = Command::new(tool).arg("-version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|l| l.trim().to_string())
}
