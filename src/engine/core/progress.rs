/// Values pulled from one line of ffmpeg's stderr statistics output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressLine {
    /// Encoded position in seconds (`time=`)
    pub time_s: Option<f64>,
    /// Integer percent of the total duration, clamped to 0..=100
    pub percent: Option<u8>,
    pub speed: Option<f64>,
    pub fps: Option<String>,
    pub bitrate: Option<String>,
    /// Remaining seconds at the current speed
    pub eta_s: Option<f64>,
}

impl ProgressLine {
    /// Processed position formatted as HH:MM:SS
    pub fn elapsed(&self) -> Option<String> {
        self.time_s.map(format_hms)
    }

    pub fn eta(&self) -> Option<String> {
        self.eta_s.map(format_hms)
    }

    pub fn speed_display(&self) -> String {
        match self.speed {
            Some(s) if s.fract() == 0.0 => format!("{}x", s as u64),
            Some(s) => format!("{}x", s),
            None => "N/A".to_string(),
        }
    }

    /// Status line shown next to the per-file progress bar
    pub fn status_text(&self, filename: &str, percent: u8) -> String {
        let mut status = format!(
            "{} ({}%) | Speed: {}, FPS: {}, Bitrate: {}",
            filename,
            percent,
            self.speed_display(),
            self.fps.as_deref().unwrap_or("N/A"),
            self.bitrate.as_deref().unwrap_or("N/A"),
        );
        if let Some(eta) = self.eta() {
            status.push_str(&format!(", ETA: {}", eta));
        }
        status
    }
}

/// Stateless parser for ffmpeg's `frame= ... time= ... speed=` lines
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressParser {
    total_duration: Option<f64>,
}

impl ProgressParser {
    pub fn new(total_duration: Option<f64>) -> Self {
        Self {
            total_duration: total_duration.filter(|d| *d > 0.0),
        }
    }

    pub fn parse(&self, line: &str) -> ProgressLine {
        let time_s = field(line, "time=").and_then(parse_timestamp);
        let speed = field(line, "speed=")
            .and_then(|v| v.trim_end_matches('x').parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s >= 0.0);
        let fps = field(line, "fps=").map(str::to_string);
        let bitrate = field(line, "bitrate=").map(str::to_string);

        let percent = match (time_s, self.total_duration) {
            (Some(t), Some(total)) => Some(((t / total) * 100.0).clamp(0.0, 100.0) as u8),
            _ => None,
        };

        let eta_s = match (time_s, self.total_duration, speed) {
            (Some(t), Some(total), Some(s)) if s > 0.0 => Some(((total - t) / s).max(0.0)),
            _ => None,
        };

        ProgressLine {
            time_s,
            percent,
            speed,
            fps,
            bitrate,
            eta_s,
        }
    }
}

/// Find `key` at a token boundary and return its value (leading spaces skipped).
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find(key) {
        let start = search_from + pos;
        let boundary = line[..start]
            .chars()
            .next_back()
            .is_none_or(|c| c.is_whitespace() || c == '(' || c == '[');

        if boundary {
            let rest = line[start + key.len()..].trim_start();
            let value = rest.split_whitespace().next()?;
            return Some(value);
        }
        search_from = start + key.len();
    }
    None
}

/// Parse `HH:MM:SS.ff` into seconds. `N/A` and malformed values yield `None`.
fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.trim_end_matches(|c: char| !c.is_ascii_digit());
    let mut parts = value.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Format seconds as HH:MM:SS (fraction truncated)
pub fn format_hms(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
