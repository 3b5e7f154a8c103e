// Sequential queue runner: one file, one ffmpeg process at a time

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use super::crop::CropAnalyzer;
use super::error::ExtractionError;
use super::hardware::HwCapabilities;
use super::probe::MediaProber;
use super::process::CancelToken;
use super::streams::{StreamExtractor, sanitize_filename_part};
use super::{
    DebugLog, EncodeOptions, EncodingPlanner, ExitOutcome, JobStatus, PlanInputs, ProbeResult,
    ProgressUpdate, QueueState, QueueSummary, SourceFile, SubtitleTrack, TranscodeJob,
    build_encode_cmd, derive_output_path, format_hms, format_ffmpeg_cmd, is_same_file,
};
use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Events emitted by the orchestrator. Events of one file never interleave with the next.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Log {
        message: String,
        level: LogLevel,
    },

    /// Per-file progress
    Progress { percent: u8, status: String },

    /// `current` is 1-based
    OverallProgress {
        current: usize,
        total: usize,
        eta: Option<String>,
    },

    FileResult {
        filename: String,
        success: bool,
        message: String,
    },

    Finished {
        was_manually_stopped: bool,
        summary: QueueSummary,
    },
}

/// Picks a subtitle track when no keyword track exists. Called on the orchestrator thread and may block.
pub trait SubtitleChooser {
    fn choose(&self, candidates: &[SubtitleTrack], filename: &str) -> Option<SubtitleTrack>;
}

/// Never burns subtitles unless a keyword track was found
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPromptChooser;

impl SubtitleChooser for NoPromptChooser {
    fn choose(&self, _candidates: &[SubtitleTrack], _filename: &str) -> Option<SubtitleTrack> {
        None
    }
}

/// A pending subtitle decision; answer through `reply`
#[derive(Debug)]
pub struct SubtitleRequest {
    pub filename: String,
    pub candidates: Vec<SubtitleTrack>,
    pub reply: Sender<Option<SubtitleTrack>>,
}

impl SubtitleRequest {
    pub fn respond(self, choice: Option<SubtitleTrack>) {
        let _ = self.reply.send(choice);
    }
}

/// Forwards the decision to another thread (usually a UI) and waits for the answer
pub struct ChannelChooser {
    tx: Sender<SubtitleRequest>,
}

impl ChannelChooser {
    pub fn new() -> (Self, Receiver<SubtitleRequest>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl SubtitleChooser for ChannelChooser {
    fn choose(&self, candidates: &[SubtitleTrack], filename: &str) -> Option<SubtitleTrack> {
        let (reply, answer) = mpsc::channel();
        let request = SubtitleRequest {
            filename: filename.to_string(),
            candidates: candidates.to_vec(),
            reply,
        };
        if self.tx.send(request).is_err() {
            return None;
        }
        // A dropped request counts as "no subtitles"
        answer.recv().ok().flatten()
    }
}

#[derive(Debug, Default)]
struct QueueControl {
    stopped: AtomicBool,
    current: Mutex<CancelToken>,
}

impl QueueControl {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Install a fresh token for the next job. A stop that raced with us cancels it at once.
    fn begin_job(&self) -> CancelToken {
        let token = CancelToken::new();
        *self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();
        if self.is_stopped() {
            token.cancel();
        }
        token
    }

    fn cancel_current(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// Control surface for a running queue
pub struct QueueHandle {
    control: Arc<QueueControl>,
    thread: Option<JoinHandle<QueueSummary>>,
}

impl QueueHandle {
    /// Cancel the running file; the queue moves on to the next one
    pub fn skip_current(&self) {
        tracing::info!("skipping current file");
        self.control.cancel_current();
    }

    /// Cancel the running file and end the queue
    pub fn stop(&self) {
        tracing::info!("stopping queue");
        self.control.stopped.store(true, Ordering::SeqCst);
        self.control.cancel_current();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the orchestrator thread and return its summary
    pub fn join(mut self) -> Option<QueueSummary> {
        self.thread.take()?.join().ok()
    }
}

struct EventSink {
    tx: Sender<QueueEvent>,
}

impl EventSink {
    fn send(&self, event: QueueEvent) {
        // Receiver may be gone; the queue keeps going regardless
        let _ = self.tx.send(event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
        self.send(QueueEvent::Log { message, level });
    }
}

pub struct QueueOrchestrator {
    config: Config,
    hw: HwCapabilities,
    options: EncodeOptions,
    prober: MediaProber,
    crop: CropAnalyzer,
    extractor: StreamExtractor,
    chooser: Box<dyn SubtitleChooser + Send>,
    debug_log: DebugLog,
}

impl QueueOrchestrator {
    pub fn new(config: Config, hw: HwCapabilities, options: EncodeOptions) -> Self {
        Self {
            prober: MediaProber::new(&config),
            crop: CropAnalyzer::new(&config.tools.ffmpeg, &config.crop),
            extractor: StreamExtractor::new(&config),
            debug_log: DebugLog::new(config.logging.debug_log.clone()),
            chooser: Box::new(NoPromptChooser),
            config,
            hw,
            options,
        }
    }

    pub fn with_chooser(mut self, chooser: impl SubtitleChooser + Send + 'static) -> Self {
        self.chooser = Box::new(chooser);
        self
    }

    /// Run the queue on its own thread
    pub fn start(self, files: Vec<SourceFile>) -> (QueueHandle, Receiver<QueueEvent>) {
        let (tx, rx) = mpsc::channel();
        let control = Arc::new(QueueControl::default());
        let thread_control = control.clone();

        let thread = thread::spawn(move || {
            let sink = EventSink { tx };
            self.run(files, &thread_control, &sink)
        });

        (
            QueueHandle {
                control,
                thread: Some(thread),
            },
            rx,
        )
    }

    fn run(&self, files: Vec<SourceFile>, control: &QueueControl, sink: &EventSink) -> QueueSummary {
        let durations = files
            .iter()
            .map(|f| self.prober.probe_duration(&f.path).ok())
            .collect();
        let mut state = QueueState::new(files, durations);
        let total = state.len();
        sink.log(LogLevel::Info, format!("Queue started: {} file(s)", total));

        while let Some(source) = state.current_file().cloned() {
            let name = source.display_name();
            if control.is_stopped() {
                sink.log(
                    LogLevel::Warning,
                    format!("Queue stopped before processing {}", name),
                );
                break;
            }

            let current = state.current_index() + 1;
            sink.send(QueueEvent::OverallProgress {
                current,
                total,
                eta: None,
            });
            sink.send(QueueEvent::Progress {
                percent: 0,
                status: name.clone(),
            });
            sink.log(
                LogLevel::Info,
                format!("--- [{}/{}] Processing {} ---", current, total, name),
            );

            let mut job = TranscodeJob::new(source, control.begin_job());
            let message = self.process_file(&mut job, &mut state, sink);
            let status = job.status();

            sink.send(QueueEvent::FileResult {
                filename: name,
                success: status.counts_as_success(),
                message,
            });
            state.record(status);
        }

        let summary = state.summary();
        sink.log(
            LogLevel::Info,
            format!(
                "Queue finished in {}: {} succeeded, {} skipped, {} failed, {} cancelled",
                format_hms(summary.elapsed.as_secs_f64()),
                summary.succeeded,
                summary.skipped,
                summary.failed,
                summary.cancelled
            ),
        );
        sink.send(QueueEvent::Finished {
            was_manually_stopped: control.is_stopped(),
            summary: summary.clone(),
        });
        summary
    }

    /// Drive one job to a terminal state and return the message for its result
    fn process_file(&self, job: &mut TranscodeJob, state: &mut QueueState, sink: &EventSink) -> String {
        let name = job.source().display_name();
        let input = job.source().path.clone();

        job.advance(JobStatus::Probing);
        let probe = match self.prober.probe(&input) {
            Ok(probe) => probe,
            Err(e) => {
                sink.log(LogLevel::Error, format!("  Probe failed for {}: {}", name, e));
                job.finish(JobStatus::Failed);
                return format!("probe failed: {}", e);
            }
        };
        state.update_current_duration(probe.duration_s);
        sink.log(
            LogLevel::Info,
            format!(
                "  Info: duration={:.2}s, codec={}, resolution={}x{}, pix_fmt={}",
                probe.duration_s, probe.video_codec, probe.width, probe.height, probe.pix_fmt
            ),
        );
        if job.is_cancelled() {
            return cancelled(job, sink);
        }

        job.advance(JobStatus::Planning);
        let output = derive_output_path(&input, self.options.output_dir.as_deref(), &self.config.output);
        if is_same_file(&input, &output) {
            sink.log(
                LogLevel::Error,
                format!("  Output {} is the source file itself", output.display()),
            );
            job.finish(JobStatus::Failed);
            return "output path is the source file".to_string();
        }
        if output.exists() && !self.options.overwrite {
            sink.log(
                LogLevel::Warning,
                format!("  [SKIP] {} already exists", output.display()),
            );
            job.finish(JobStatus::SkippedExisting);
            return "output already exists (skipped)".to_string();
        }
        if let Some(parent) = output.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                sink.log(
                    LogLevel::Error,
                    format!("  Cannot create output directory {}: {}", parent.display(), e),
                );
                job.finish(JobStatus::Failed);
                return format!("cannot create output directory: {}", e);
            }
        }

        let crop = if self.options.detect_crop {
            self.crop
                .detect(&input, probe.width, probe.height, job.cancel_token())
        } else {
            None
        };
        match &crop {
            Some(c) => sink.log(LogLevel::Info, format!("  Crop: {}", c.filter_arg())),
            None => sink.log(LogLevel::Info, "  Crop: none"),
        }
        if job.is_cancelled() {
            return cancelled(job, sink);
        }

        job.advance(JobStatus::Extracting);
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        // Removed on drop, whatever the outcome
        let temp_dir = match tempfile::Builder::new()
            .prefix(&format!("enc_{}_", sanitize_filename_part(&stem, 40)))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                sink.log(
                    LogLevel::Error,
                    format!("  Cannot create temporary directory: {}", e),
                );
                job.finish(JobStatus::Failed);
                return format!("cannot create temporary directory: {}", e);
            }
        };
        sink.log(
            LogLevel::Debug,
            format!("  Temporary directory: {}", temp_dir.path().display()),
        );

        let track = self.select_subtitle(&probe, &name, sink);
        if job.is_cancelled() {
            return cancelled(job, sink);
        }
        let (subtitle, fonts_dir) = match track {
            Some(track) => {
                self.extract_assets(&input, &track, &probe, temp_dir.path(), job.cancel_token(), sink)
            }
            None => (None, None),
        };
        if job.is_cancelled() {
            return cancelled(job, sink);
        }

        let plan = EncodingPlanner::new(&self.config, &self.hw, &self.options).plan(PlanInputs {
            input: &input,
            output: output.clone(),
            probe: &probe,
            crop,
            subtitle,
            extracted_fonts_dir: fonts_dir,
        });
        let cmd = build_encode_cmd(&self.config.tools.ffmpeg, &plan);
        let cmd_text = format_ffmpeg_cmd(&cmd);
        sink.log(LogLevel::Debug, format!("  Command: {}", cmd_text));
        self.debug_log
            .write(&format!("[{}] ffmpeg command: {}", name, cmd_text));

        job.set_output(output.clone());
        let current = state.current_index() + 1;
        let total = state.len();
        let run = job.encode(cmd, Some(probe.duration_s), |update: ProgressUpdate| {
            let status = match update.line.time_s {
                Some(_) => update.line.status_text(&name, update.percent),
                None => format!("{} ({}%) | Done", name, update.percent),
            };
            sink.send(QueueEvent::Progress {
                percent: update.percent,
                status,
            });
            if let (Some(time_s), Some(speed)) = (update.line.time_s, update.line.speed) {
                sink.send(QueueEvent::OverallProgress {
                    current,
                    total,
                    eta: state.eta_s(time_s, speed).map(format_hms),
                });
            }
        });

        match &run.outcome {
            ExitOutcome::Succeeded => sink.log(
                LogLevel::Info,
                format!("  Encoded successfully: {}", output.display()),
            ),
            ExitOutcome::Cancelled => sink.log(LogLevel::Warning, "  Encoding cancelled"),
            ExitOutcome::Failed { .. } => {
                sink.log(LogLevel::Error, format!("  {}", run.outcome.message()));
                self.debug_log.write(&format!(
                    "[{}] ffmpeg failed:\n{}",
                    name,
                    run.diagnostics.text()
                ));
            }
        }

        run.outcome.message()
    }

    /// Keyword track first, then the chooser when burn-in is possible and other tracks exist
    fn select_subtitle(&self, probe: &ProbeResult, name: &str, sink: &EventSink) -> Option<SubtitleTrack> {
        if !self.options.burn_subtitles || probe.subtitle_tracks.is_empty() {
            return None;
        }
        if !self.hw.subtitles_filter {
            sink.log(
                LogLevel::Warning,
                "  ffmpeg has no subtitles filter; burn-in skipped",
            );
            return None;
        }
        if let Some(track) = &probe.default_subtitle {
            sink.log(LogLevel::Info, format!("  Subtitles: {}", track.label()));
            return Some(track.clone());
        }

        let candidates = probe.other_subtitle_tracks();
        if candidates.is_empty() {
            return None;
        }
        let choice = self.chooser.choose(&candidates, name);
        match &choice {
            Some(track) => sink.log(LogLevel::Info, format!("  Subtitles (chosen): {}", track.label())),
            None => sink.log(LogLevel::Info, "  Subtitles: none selected"),
        }
        choice
    }

    /// Extract the subtitle and, if it worked, its fonts. Failures only drop the asset.
    fn extract_assets(
        &self,
        input: &Path,
        track: &SubtitleTrack,
        probe: &ProbeResult,
        temp_dir: &Path,
        cancel: &CancelToken,
        sink: &EventSink,
    ) -> (Option<PathBuf>, Option<PathBuf>) {
        let subtitle = match self.extractor.extract_subtitle(
            input,
            track,
            temp_dir,
            self.options.strip_credits,
            cancel,
        ) {
            Ok(path) => path,
            Err(ExtractionError::Cancelled) => return (None, None),
            Err(e) => {
                sink.log(
                    LogLevel::Warning,
                    format!("  Subtitle extraction failed, burn-in skipped: {}", e),
                );
                return (None, None);
            }
        };

        if probe.font_attachments.is_empty() {
            return (Some(subtitle), None);
        }

        let fonts_dir = temp_dir.join("fonts");
        match self
            .extractor
            .extract_fonts(input, &probe.font_attachments, &fonts_dir, cancel)
        {
            Ok(report) => {
                for failure in &report.failures {
                    sink.log(LogLevel::Warning, format!("  Font not extracted: {}", failure));
                }
                sink.log(
                    LogLevel::Info,
                    format!(
                        "  Fonts: {}/{} extracted",
                        report.extracted.len(),
                        probe.font_attachments.len()
                    ),
                );
                let dir = (!report.extracted.is_empty()).then_some(fonts_dir);
                (Some(subtitle), dir)
            }
            Err(ExtractionError::Cancelled) => (Some(subtitle), None),
            Err(e) => {
                sink.log(LogLevel::Warning, format!("  Font extraction failed: {}", e));
                (Some(subtitle), None)
            }
        }
    }
}

fn cancelled(job: &mut TranscodeJob, sink: &EventSink) -> String {
    sink.log(LogLevel::Warning, "  Cancelled by user");
    job.finish(JobStatus::Cancelled);
    "cancelled".to_string()
}
