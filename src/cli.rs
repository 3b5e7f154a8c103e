use clap::{Args, Parser, Subcommand};
use hevc_batch::engine::EncodeOptions;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hevc-batch")]
#[command(about = "Batch HEVC encoder driving ffmpeg and NVENC", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode files and directories one after another
    Encode {
        /// Video files or directories (scanned recursively)
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        options: EncodeArgs,

        /// Never ask which subtitle track to burn in
        #[arg(long)]
        no_prompt: bool,
    },

    /// Check ffmpeg, ffprobe, the NVIDIA GPU and NVENC support
    Check,

    /// Probe a video file and print what the encoder would see
    Probe {
        /// Path to the video file
        file: PathBuf,
    },

    /// Show ffmpeg commands without executing them
    DryRun {
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        options: EncodeArgs,
    },

    /// Show config status and location, or create default config if missing
    InitConfig,
}

#[derive(Args, Debug, Clone)]
pub struct EncodeArgs {
    /// Target video bitrate in Mbit/s [default: encoder.default_bitrate_mbps from the config]
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=200))]
    pub bitrate: Option<u32>,

    /// Lossless (constant QP) encoding; output stays at the source bit depth unless --force-10bit
    #[arg(long)]
    pub lossless: bool,

    /// Always produce 10-bit (main10) output
    #[arg(long = "force-10bit")]
    pub force_10bit: bool,

    /// Skip black-bar detection
    #[arg(long)]
    pub no_crop: bool,

    /// Force output resolution, e.g. 1280x720
    #[arg(long, value_name = "WxH", value_parser = parse_resolution)]
    pub resolution: Option<(u32, u32)>,

    /// Do not burn in subtitles
    #[arg(long)]
    pub no_subtitles: bool,

    /// Remove typical credit/karaoke lines from burned subtitles
    #[arg(long)]
    pub strip_credits: bool,

    /// Decode in software even when an NVDEC/CUVID decoder exists
    #[arg(long)]
    pub no_hw_decode: bool,

    /// Re-encode files whose output already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Write all outputs here instead of a sub-directory next to each source
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

impl EncodeArgs {
    /// `default_bitrate_mbps` applies when `--bitrate` is not given
    pub fn to_options(&self, default_bitrate_mbps: u32) -> EncodeOptions {
        EncodeOptions {
            bitrate_mbps: self.bitrate.unwrap_or(default_bitrate_mbps).max(1),
            lossless: self.lossless,
            force_10bit: self.force_10bit,
            detect_crop: !self.no_crop,
            resolution: self.resolution,
            burn_subtitles: !self.no_subtitles,
            strip_credits: self.strip_credits,
            use_hw_decoder: !self.no_hw_decode,
            overwrite: self.overwrite,
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Parse `WIDTHxHEIGHT`; both sides must be positive and even
fn parse_resolution(value: &str) -> Result<(u32, u32), String> {
    let (w, h) = value
        .to_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", value))?;

    let width: u32 = w.parse().map_err(|_| format!("invalid width '{}'", w))?;
    let height: u32 = h.parse().map_err(|_| format!("invalid height '{}'", h))?;

    if width == 0 || height == 0 {
        return Err("resolution must be positive".to_string());
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(format!("resolution must be even, got {}x{}", width, height));
    }
    Ok((width, height))
}

pub fn parse() -> Cli {
    Cli::parse()
}
