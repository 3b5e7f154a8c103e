use super::types::{JobStatus, SourceFile};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Final tallies for a queue run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Progress bookkeeping for a sequential queue. Owned by the orchestrator thread.
#[derive(Debug)]
pub struct QueueState {
    files: Vec<SourceFile>,
    current: usize,
    /// Best-effort durations probed up front, aligned with `files`
    durations: Vec<Option<f64>>,
    finished_duration_s: f64,
    summary: QueueSummary,
    started_at: Instant,
}

impl QueueState {
    pub fn new(files: Vec<SourceFile>, durations: Vec<Option<f64>>) -> Self {
        let mut durations = durations;
        durations.resize(files.len(), None);
        let total = files.len();

        Self {
            files,
            current: 0,
            durations,
            finished_duration_s: 0.0,
            summary: QueueSummary {
                total,
                ..Default::default()
            },
            started_at: Instant::now(),
        }
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Index of the file being processed
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_file(&self) -> Option<&SourceFile> {
        self.files.get(self.current)
    }

    pub fn is_done(&self) -> bool {
        self.current >= self.files.len()
    }

    /// Sum of all known durations
    pub fn total_duration_s(&self) -> f64 {
        self.durations.iter().flatten().sum()
    }

    /// Replace the pre-probed duration of the current file with the full probe's value
    pub fn update_current_duration(&mut self, duration_s: f64) {
        if let Some(slot) = self.durations.get_mut(self.current) {
            *slot = Some(duration_s);
        }
    }

    /// Queue-wide remaining seconds: (total - finished - current_time) / speed
    pub fn eta_s(&self, current_time_s: f64, speed: f64) -> Option<f64> {
        let total = self.total_duration_s();
        if speed <= 0.0 || !speed.is_finite() || total <= 0.0 {
            return None;
        }
        let remaining = (total - self.finished_duration_s - current_time_s).max(0.0);
        Some(remaining / speed)
    }

    /// Record the outcome of the current file and move to the next
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Succeeded => self.summary.succeeded += 1,
            JobStatus::SkippedExisting => self.summary.skipped += 1,
            JobStatus::Cancelled => self.summary.cancelled += 1,
            _ => self.summary.failed += 1,
        }
        if let Some(Some(d)) = self.durations.get(self.current) {
            self.finished_duration_s += d;
        }
        self.current += 1;
    }

    pub fn summary(&self) -> QueueSummary {
        QueueSummary {
            elapsed: self.started_at.elapsed(),
            ..self.summary.clone()
        }
    }
}
