use super::progress::{ProgressLine, ProgressParser};
use super::types::{JobStatus, SourceFile};
use crate::engine::error::{EncodeError, classify_ffmpeg_stderr};
use crate::engine::process::{CancelToken, isolate};
use std::collections::VecDeque;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

/// Lines of ffmpeg output kept for error classification
pub const DIAGNOSTIC_CAPACITY: usize = 2000;

const DELETE_ATTEMPTS: u32 = 5;
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Ring buffer of the most recent diagnostic lines
#[derive(Debug, Clone)]
pub struct DiagnosticBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    dropped: usize,
}

impl DiagnosticBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line.to_string());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of older lines evicted
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// How an encode ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Succeeded,
    Failed {
        code: Option<i32>,
        error: EncodeError,
    },
    Cancelled,
}

impl ExitOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Succeeded => JobStatus::Succeeded,
            Self::Failed { .. } => JobStatus::Failed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }

    /// Message reported for the file
    pub fn message(&self) -> String {
        match self {
            Self::Succeeded => "encoded successfully".to_string(),
            Self::Cancelled => "cancelled".to_string(),
            Self::Failed {
                code: Some(code),
                error,
            } => format!("ffmpeg failed (exit code {}): {}", code, error),
            Self::Failed { code: None, error } => format!("ffmpeg failed: {}", error),
        }
    }
}

/// Map an exit code to an outcome. Cancellation wins over any code (e.g. 137 after SIGKILL).
pub fn interpret_exit(code: Option<i32>, cancelled: bool, diagnostics: &str) -> ExitOutcome {
    if cancelled {
        return ExitOutcome::Cancelled;
    }
    match code {
        Some(0) => ExitOutcome::Succeeded,
        code => ExitOutcome::Failed {
            code,
            error: classify_ffmpeg_stderr(diagnostics),
        },
    }
}

/// Delete a file, retrying while the OS still holds it open. Missing files count as removed.
pub fn remove_with_retry(path: &Path, attempts: u32, delay: Duration) -> bool {
    for attempt in 1..=attempts.max(1) {
        match fs::remove_file(path) {
            Ok(()) => return true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
            Err(e) => {
                tracing::debug!(path = %path.display(), attempt, "delete failed: {}", e);
                if attempt < attempts {
                    thread::sleep(delay);
                }
            }
        }
    }
    false
}

/// Progress reported while encoding
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Never decreases during a job
    pub percent: u8,
    pub line: ProgressLine,
}

/// Split a byte stream on `\r` and `\n` (ffmpeg rewrites its stats line with `\r`).
fn for_each_line<R: Read>(mut reader: R, mut on_line: impl FnMut(&str)) {
    let mut buf = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        for &b in &buf[..n] {
            if b == b'\n' || b == b'\r' {
                if !pending.is_empty() {
                    on_line(&String::from_utf8_lossy(&pending));
                    pending.clear();
                }
            } else {
                pending.push(b);
            }
        }
    }
    if !pending.is_empty() {
        on_line(&String::from_utf8_lossy(&pending));
    }
}

/// Result of supervising one ffmpeg run
#[derive(Debug)]
pub struct EncodeRun {
    pub outcome: ExitOutcome,
    pub diagnostics: DiagnosticBuffer,
}

/// One file moving through the pipeline. Transitions only move forward.
#[derive(Debug)]
pub struct TranscodeJob {
    source: SourceFile,
    status: JobStatus,
    output: Option<PathBuf>,
    cancel: CancelToken,
}

impl TranscodeJob {
    pub fn new(source: SourceFile, cancel: CancelToken) -> Self {
        Self {
            source,
            status: JobStatus::Pending,
            output: None,
            cancel,
        }
    }

    pub fn source(&self) -> &SourceFile {
        &self.source
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }

    pub fn set_output(&mut self, output: PathBuf) {
        self.output = Some(output);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for helper processes run on behalf of this job
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Move to `next`; backward or post-terminal moves are ignored and return false
    pub fn advance(&mut self, next: JobStatus) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::warn!(
                file = %self.source.display_name(),
                "ignoring job transition {:?} -> {:?}",
                self.status,
                next
            );
            return false;
        }
        tracing::debug!(file = %self.source.display_name(), "{:?} -> {:?}", self.status, next);
        self.status = next;
        true
    }

    /// Spawn and supervise the encode command.
    ///
    /// Every line with a timestamp produces a `ProgressUpdate`; success forces a final 100%.
    /// Partial output is removed on failure or cancellation.
    pub fn encode<F>(
        &mut self,
        mut cmd: Command,
        duration_s: Option<f64>,
        mut on_progress: F,
    ) -> EncodeRun
    where
        F: FnMut(ProgressUpdate),
    {
        self.advance(JobStatus::Encoding);
        let mut diagnostics = DiagnosticBuffer::new(DIAGNOSTIC_CAPACITY);

        if self.cancel.is_cancelled() {
            return self.finish_encode(ExitOutcome::Cancelled, diagnostics);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        isolate(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let outcome = ExitOutcome::Failed {
                    code: None,
                    error: EncodeError::Spawn(e.to_string()),
                };
                return self.finish_encode(outcome, diagnostics);
            }
        };
        self.cancel.attach(child.id());

        let parser = ProgressParser::new(duration_s);
        let mut last_percent = 0u8;
        if let Some(stderr) = child.stderr.take() {
            for_each_line(stderr, |line| {
                diagnostics.push(line);
                let parsed = parser.parse(line);
                if parsed.time_s.is_some() {
                    last_percent = last_percent.max(parsed.percent.unwrap_or(0).min(100));
                    on_progress(ProgressUpdate {
                        percent: last_percent,
                        line: parsed,
                    });
                }
            });
        }

        let code = match child.wait() {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!("failed to wait for ffmpeg: {}", e);
                None
            }
        };
        self.cancel.detach();

        let mut outcome = interpret_exit(code, self.cancel.is_cancelled(), &diagnostics.text());
        if outcome == ExitOutcome::Succeeded {
            let produced = self.output.as_deref().is_none_or(Path::exists);
            if produced {
                on_progress(ProgressUpdate {
                    percent: 100,
                    line: ProgressLine::default(),
                });
            } else {
                outcome = ExitOutcome::Failed {
                    code,
                    error: EncodeError::MissingOutput,
                };
            }
        }

        self.finish_encode(outcome, diagnostics)
    }

    fn finish_encode(&mut self, outcome: ExitOutcome, diagnostics: DiagnosticBuffer) -> EncodeRun {
        if outcome != ExitOutcome::Succeeded {
            self.remove_partial_output();
        }
        self.advance(outcome.status());
        EncodeRun {
            outcome,
            diagnostics,
        }
    }

    /// Enter a terminal state outside of encoding (probe failure, skip, early cancel)
    pub fn finish(&mut self, status: JobStatus) {
        if matches!(status, JobStatus::Failed | JobStatus::Cancelled) {
            self.remove_partial_output();
        }
        self.advance(status);
    }

    fn remove_partial_output(&self) {
        let Some(output) = &self.output else {
            return;
        };
        if !output.exists() {
            return;
        }
        if remove_with_retry(output, DELETE_ATTEMPTS, DELETE_RETRY_DELAY) {
            tracing::info!(path = %output.display(), "removed partial output");
        } else {
            tracing::warn!(path = %output.display(), "could not remove partial output");
        }
    }
}
