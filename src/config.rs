// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub subtitles: SubtitleConfig,

    #[serde(default)]
    pub crop: CropConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// ffmpeg executable (bare name is resolved through PATH)
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,

    /// ffprobe executable (bare name is resolved through PATH)
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Video encoder name passed to -c:v
    #[serde(default = "default_encoder")]
    pub encoder: String,

    /// NVENC preset (p1-p7); replaced by "lossless" in lossless mode
    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_tuning")]
    pub tuning: String,

    /// Rate control used in bitrate mode (vbr, cbr)
    #[serde(default = "default_rc_mode")]
    pub rc_mode: String,

    /// Lookahead frames (0 disables)
    #[serde(default = "default_lookahead")]
    pub lookahead: u32,

    #[serde(default = "default_true")]
    pub spatial_aq: bool,

    /// AQ strength 1-15, only emitted when spatial AQ is on
    #[serde(default = "default_aq_strength")]
    pub aq_strength: u32,

    /// QP used for the constant-quality (lossless) mode
    #[serde(default)]
    pub lossless_qp: u32,

    /// Target bitrate in Mbit/s when none is given on the command line
    #[serde(default = "default_bitrate_mbps")]
    pub default_bitrate_mbps: u32,

    /// Additional ffmpeg arguments, shell-style quoting allowed
    #[serde(default)]
    pub additional_args: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_audio_codec")]
    pub codec: String,

    #[serde(default = "default_audio_bitrate")]
    pub bitrate: String,

    #[serde(default = "default_audio_channels")]
    pub channels: String,

    /// Title tag for the output audio track (empty = no tag)
    #[serde(default)]
    pub title: String,

    /// ISO 639-2 language tag for the output audio track (empty = no tag)
    #[serde(default = "default_audio_language")]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleConfig {
    /// A subtitle track whose title contains this keyword is burned in without asking
    #[serde(default = "default_title_keyword")]
    pub title_keyword: String,

    /// Attachment MIME types treated as fonts
    #[serde(default = "default_font_mimetypes")]
    pub font_mimetypes: Vec<String>,

    /// Styling-tag signatures that mark credit lines in ASS subtitles
    #[serde(default = "default_credit_signatures")]
    pub credit_signatures: Vec<String>,

    /// Fallback fonts directory used when the source has no font attachments
    #[serde(default)]
    pub fonts_dir: Option<PathBuf>,

    /// Timeout for each font attachment dump in seconds
    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_secs: u64,

    /// Timeout for extracting a subtitle track (demuxes the whole file)
    #[serde(default = "default_subtitle_timeout")]
    pub subtitle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropConfig {
    /// Seconds of video analysed by cropdetect
    #[serde(default = "default_crop_seconds")]
    pub analysis_seconds: u32,

    /// cropdetect black threshold (0-255)
    #[serde(default = "default_crop_limit")]
    pub limit: u32,

    /// Crops keeping less than this fraction of the frame area are rejected
    #[serde(default = "default_min_area_ratio")]
    pub min_area_ratio: f64,

    /// The area guard only applies to frames larger than this many pixels
    #[serde(default = "default_min_frame_area")]
    pub min_frame_area: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Sub-directory (next to each source) used when no output dir is given
    #[serde(default = "default_output_subdir")]
    pub subdir: String,

    #[serde(default = "default_container")]
    pub container: String,

    /// Filename pattern without extension. Supports: {basename}, {filename}
    #[serde(default = "default_filename_pattern")]
    pub filename_pattern: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append ffmpeg commands and failure diagnostics to this file
    #[serde(default)]
    pub debug_log: Option<PathBuf>,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_encoder() -> String {
    "hevc_nvenc".to_string()
}

fn default_preset() -> String {
    "p7".to_string()
}

fn default_tuning() -> String {
    "hq".to_string()
}

fn default_rc_mode() -> String {
    "vbr".to_string()
}

fn default_lookahead() -> u32 {
    32
}

fn default_true() -> bool {
    true
}

fn default_aq_strength() -> u32 {
    15
}

fn default_bitrate_mbps() -> u32 {
    4
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "256k".to_string()
}

fn default_audio_channels() -> String {
    "2".to_string()
}

fn default_audio_language() -> String {
    "rus".to_string()
}

fn default_title_keyword() -> String {
    "Надписи".to_string()
}

fn default_font_mimetypes() -> Vec<String> {
    [
        "application/x-truetype-font",
        "application/vnd.ms-opentype",
        "application/font-sfnt",
        "font/ttf",
        "font/otf",
        "application/font-woff",
        "application/font-woff2",
        "font/woff",
        "font/woff2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_credit_signatures() -> Vec<String> {
    // Override blocks seen on fansub credit/karaoke lines
    [r"{\fad(500,500)\an8", r"{\an7\pos(", r"{\fs10\an1", r"{\k"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_extraction_timeout() -> u64 {
    15
}

fn default_subtitle_timeout() -> u64 {
    600
}

fn default_crop_seconds() -> u32 {
    30
}

fn default_crop_limit() -> u32 {
    24
}

fn default_min_area_ratio() -> f64 {
    0.70
}

fn default_min_frame_area() -> u64 {
    240 * 240
}

fn default_output_subdir() -> String {
    "ENCODED_HEVC".to_string()
}

fn default_container() -> String {
    "mp4".to_string()
}

fn default_filename_pattern() -> String {
    "{basename}".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            encoder: default_encoder(),
            preset: default_preset(),
            tuning: default_tuning(),
            rc_mode: default_rc_mode(),
            lookahead: default_lookahead(),
            spatial_aq: true,
            aq_strength: default_aq_strength(),
            lossless_qp: 0,
            default_bitrate_mbps: default_bitrate_mbps(),
            additional_args: String::new(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: default_audio_codec(),
            bitrate: default_audio_bitrate(),
            channels: default_audio_channels(),
            title: String::new(),
            language: default_audio_language(),
        }
    }
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            title_keyword: default_title_keyword(),
            font_mimetypes: default_font_mimetypes(),
            credit_signatures: default_credit_signatures(),
            fonts_dir: None,
            extraction_timeout_secs: default_extraction_timeout(),
            subtitle_timeout_secs: default_subtitle_timeout(),
        }
    }
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            analysis_seconds: default_crop_seconds(),
            limit: default_crop_limit(),
            min_area_ratio: default_min_area_ratio(),
            min_frame_area: default_min_frame_area(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            subdir: default_output_subdir(),
            container: default_container(),
            filename_pattern: default_filename_pattern(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("hevc-batch")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("hevc-batch")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();

            // A read-only config dir is not fatal; built-in defaults still apply
            if let Err(e) = config.save() {
                tracing::warn!(
                    "Could not create default config file: {:#}. Run 'hevc-batch init-config' to create one.",
                    e
                );
            }

            Ok(config)
        }
    }

    /// Load config from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save config to an explicit path, creating parent directories
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }
}
