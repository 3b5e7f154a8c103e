mod ffmpeg_cmd;
mod job;
mod log;
mod plan;
mod progress;
mod scan;
mod state;
mod types;

pub use ffmpeg_cmd::{build_encode_cmd, format_ffmpeg_cmd};
pub use job::{
    DIAGNOSTIC_CAPACITY, DiagnosticBuffer, EncodeRun, ExitOutcome, ProgressUpdate, TranscodeJob,
    interpret_exit, remove_with_retry,
};
pub use log::{DebugLog, write_debug_log};
pub use plan::{
    AudioPlan, BitDepth, EncodeOptions, EncodingPlan, EncodingPlanner, PlanInputs, RateControl,
    VideoEncoderSettings, VideoFilter, build_filter_chain, choose_fonts_dir, escape_filter_path,
    is_lossless_audio_codec, resolve_bit_depth, scale_target, select_decoder,
};
pub use progress::{ProgressLine, ProgressParser, format_hms};
pub use scan::{collect_sources, derive_output_path, is_same_file, is_video_file, scan};
pub use state::{QueueState, QueueSummary};
pub use types::{
    CropBox, FontAttachment, JobStatus, ProbeResult, SourceFile, SubtitleTrack, even_down,
    is_10bit_pix_fmt,
};
