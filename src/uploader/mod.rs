// Uploader module - compression, bounded upload queue and retry
//
// Photos are compressed, pushed through a shared queue to the permit API and
// retried at lower quality when an attempt fails.

pub mod api_client;
pub mod progress_tracker;
pub mod retry;
pub mod upload_queue;

pub use api_client::{ApiClient, PermitBackend, UploadResponse};
pub use progress_tracker::{LogStatusSink, RecordingStatusSink, StatusSink, UploadStatus};
pub use retry::{ResilientUploader, RetryState};
pub use upload_queue::UploadQueue;
