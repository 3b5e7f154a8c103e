use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Append a timestamped entry to the debug log, creating it if needed
pub fn write_debug_log(log_path: &Path, message: &str) -> Result<()> {
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open debug log: {}", log_path.display()))?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "[{}] {}", timestamp, message)?;
    Ok(())
}

/// Optional debug log sink; a missing path makes every write a no-op
#[derive(Debug, Clone, Default)]
pub struct DebugLog {
    path: Option<std::path::PathBuf>,
}

impl DebugLog {
    pub fn new(path: Option<std::path::PathBuf>) -> Self {
        Self { path }
    }

    pub fn write(&self, message: &str) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_debug_log(path, message) {
            tracing::warn!("{:#}", e);
        }
    }
}
