//! Optional JSON-lines log of every request, for debugging and plotting.

use crate::client::RequestOutcome;
use crate::error::SwarmResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::warn;

/// A single logged request.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestLog {
    /// Milliseconds since the log was opened.
    pub timestamp_ms: u64,
    pub method: String,
    pub name: String,
    pub url: String,
    pub status: u16,
    pub latency_ms: f64,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared writer for request log lines.
#[derive(Clone)]
pub struct RequestLogSink {
    writer: Arc<Mutex<BufWriter<File>>>,
    start: Instant,
    path: PathBuf,
}

impl RequestLogSink {
    /// Open (truncating) a log file, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> SwarmResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(&path)?;
        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
            start: Instant::now(),
            path,
        })
    }

    /// Open a timestamped log for a scenario inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>, scenario_name: &str) -> SwarmResult<Self> {
        let file_name = format!(
            "{}_{}.jsonl",
            scenario_name.replace(' ', "_").to_lowercase(),
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        Self::create(dir.as_ref().join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, outcome: &RequestOutcome) {
        let entry = RequestLog {
            timestamp_ms: outcome
                .timestamp
                .saturating_duration_since(self.start)
                .as_millis() as u64,
            method: outcome.method.clone(),
            name: outcome.name.clone(),
            url: outcome.url.clone(),
            status: outcome.status,
            latency_ms: outcome.latency_us as f64 / 1000.0,
            bytes: outcome.bytes,
            error: outcome.error.clone(),
        };

        match serde_json::to_string(&entry) {
            Ok(json) => {
                let mut writer = self.writer.lock().await;
                if let Err(e) = writeln!(writer, "{}", json) {
                    warn!(error = %e, path = %self.path.display(), "Failed to write request log");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize request log entry"),
        }
    }

    pub async fn flush(&self) -> SwarmResult<()> {
        self.writer.lock().await.flush()?;
        Ok(())
    }
}
