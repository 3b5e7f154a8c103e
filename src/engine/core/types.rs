use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Probing,
    Planning,
    Extracting,
    Encoding,
    Succeeded,
    Failed,
    Cancelled,
    SkippedExisting, // Output already present and overwrite disabled
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Probing => 1,
            Self::Planning => 2,
            Self::Extracting => 3,
            Self::Encoding => 4,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::SkippedExisting => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 5
    }

    /// Transitions only move forward; terminal states are final.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Whether the outcome is reported as a success to the queue
    pub fn counts_as_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::SkippedExisting)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Probing => "probing",
            Self::Planning => "planning",
            Self::Extracting => "extracting",
            Self::Encoding => "encoding",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::SkippedExisting => "skipped (output exists)",
        }
    }
}

/// A queued input file. Immutable for the job's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceFile {
    pub id: Uuid,
    pub path: PathBuf,
}

impl SourceFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
        }
    }

    /// File name for display, falling back to the full path
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubtitleTrack {
    /// Global stream index as reported by ffprobe
    pub stream_index: u32,
    pub title: String,
    /// "und" when the container carries no language tag
    pub language: String,
}

impl SubtitleTrack {
    pub fn label(&self) -> String {
        let title = if self.title.is_empty() {
            "untitled"
        } else {
            self.title.as_str()
        };
        format!("#{} [{}] {}", self.stream_index, self.language, title)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FontAttachment {
    pub stream_index: u32,
    pub filename: String,
}

/// Media facts gathered by a probe. Dimensions are always even.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub duration_s: f64,
    pub video_codec: String,
    pub pix_fmt: String,
    pub width: u32,
    pub height: u32,
    pub subtitle_tracks: Vec<SubtitleTrack>,
    pub default_subtitle: Option<SubtitleTrack>,
    pub font_attachments: Vec<FontAttachment>,
}

impl ProbeResult {
    pub fn is_10bit(&self) -> bool {
        is_10bit_pix_fmt(&self.pix_fmt)
    }

    /// Subtitle tracks other than the keyword default
    pub fn other_subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        self.subtitle_tracks
            .iter()
            .filter(|t| self.default_subtitle.as_ref() != Some(*t))
            .cloned()
            .collect()
    }
}

/// Crop geometry in source pixels. A full-frame crop is represented as `None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CropBox {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl CropBox {
    pub fn filter_arg(&self) -> String {
        format!("crop={}:{}:{}:{}", self.width, self.height, self.x, self.y)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Pixel formats like yuv420p10le or p010le carry 10-bit samples
pub fn is_10bit_pix_fmt(pix_fmt: &str) -> bool {
    pix_fmt.contains("10")
}

/// Round down to the nearest even value
pub fn even_down(value: u32) -> u32 {
    value & !1
}
