use std::fmt;
use std::sync::Mutex;

use crate::image_processor::quality_to_percent;

/// Per-photo upload status, as shown next to the photo input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Processing { attempt: u32, quality_percent: u8 },
    Retrying { attempt: u32, quality_percent: u8 },
    Succeeded,
    Failed,
}

impl UploadStatus {
    /// Status for the start of `attempt` at `quality`.
    pub fn attempt(attempt: u32, quality: f64) -> Self {
        let quality_percent = quality_to_percent(quality);
        if attempt > 1 {
            Self::Retrying {
                attempt,
                quality_percent,
            }
        } else {
            Self::Processing {
                attempt,
                quality_percent,
            }
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing {
                quality_percent, ..
            } => write!(f, "Processing ({}%)...", quality_percent),
            Self::Retrying {
                quality_percent, ..
            } => write!(f, "Retrying ({}%)...", quality_percent),
            Self::Succeeded => write!(f, "✅ Uploaded"),
            Self::Failed => write!(f, "❌ Failed"),
        }
    }
}

/// Where an upload sequence reports its progress.
pub trait StatusSink: Send + Sync {
    fn update(&self, status: &UploadStatus);
}

/// Status sink that only logs, for uploads with no status label.
pub struct LogStatusSink {
    label: String,
}

impl LogStatusSink {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl StatusSink for LogStatusSink {
    fn update(&self, status: &UploadStatus) {
        match status {
            UploadStatus::Failed => log::warn!("{}: {}", self.label, status),
            UploadStatus::Succeeded => log::info!("{}: {}", self.label, status),
            _ => log::debug!("{}: {}", self.label, status),
        }
    }
}

/// Keeps every status it receives, in order.
#[derive(Default)]
pub struct RecordingStatusSink {
    history: Mutex<Vec<UploadStatus>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<UploadStatus> {
        match self.history.lock() {
            Ok(history) => history.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn last(&self) -> Option<UploadStatus> {
        self.history().last().cloned()
    }
}

impl StatusSink for RecordingStatusSink {
    fn update(&self, status: &UploadStatus) {
        match self.history.lock() {
            Ok(mut history) => history.push(status.clone()),
            Err(e) => log::warn!("Failed to record upload status (non-critical): {}", e),
        }
    }
}
