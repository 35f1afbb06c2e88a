use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::config::RetrySettings;
use crate::errors::{AppError, AppResult};
use crate::image_processor::{quality_to_percent, ImageCompressor, PhotoFile};

use super::api_client::{PermitBackend, UploadResponse};
use super::progress_tracker::{StatusSink, UploadStatus};
use super::upload_queue::UploadQueue;

/// Attempt counter and current quality of one photo's upload sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub quality: f64,
}

impl RetryState {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            attempt: 1,
            quality: settings.default_quality,
        }
    }

    pub fn advance(&mut self, settings: &RetrySettings) {
        self.attempt += 1;
        self.quality = next_quality(self.quality, settings);
    }
}

/// Lower the quality by one step without going under the minimum or ever
/// going up.
pub fn next_quality(quality: f64, settings: &RetrySettings) -> f64 {
    f64::min(
        quality,
        f64::max(settings.min_quality, quality - settings.quality_step),
    )
}

/// Wait before the attempt after `attempt`: `base * 1.5^(attempt-1)`.
pub fn backoff_delay(attempt: u32, settings: &RetrySettings) -> Duration {
    let factor = settings
        .exponential_base
        .powi(attempt.saturating_sub(1) as i32);
    Duration::from_secs_f64(settings.base_delay.as_secs_f64() * factor)
}

/// Turns photos into stored URLs, lowering quality and backing off when an
/// attempt fails. HTTP uploads go through the shared queue; compression does not.
#[derive(Clone)]
pub struct ResilientUploader {
    backend: Arc<dyn PermitBackend>,
    compressor: ImageCompressor,
    queue: UploadQueue,
    settings: RetrySettings,
}

impl ResilientUploader {
    pub fn new(
        backend: Arc<dyn PermitBackend>,
        compressor: ImageCompressor,
        queue: UploadQueue,
        settings: RetrySettings,
    ) -> Self {
        Self {
            backend,
            compressor,
            queue,
            settings,
        }
    }

    pub async fn upload_with_retry(
        &self,
        photo: &PhotoFile,
        status: &dyn StatusSink,
    ) -> AppResult<String> {
        let mut state = RetryState::new(&self.settings);

        loop {
            status.update(&UploadStatus::attempt(state.attempt, state.quality));

            match self.attempt_upload(photo, state.quality).await {
                Ok(url) => {
                    status.update(&UploadStatus::Succeeded);
                    log::info!(
                        "Uploaded {} on attempt {} at quality {}%",
                        photo.name(),
                        state.attempt,
                        quality_to_percent(state.quality)
                    );
                    return Ok(url);
                }
                Err(e) => {
                    if e.is_compression_failure() {
                        log::warn!(
                            "Upload attempt {} for {} failed while compressing: {}",
                            state.attempt,
                            photo.name(),
                            e
                        );
                    } else {
                        log::warn!(
                            "Upload attempt {} for {} failed: {}",
                            state.attempt,
                            photo.name(),
                            e
                        );
                    }

                    if !e.is_retryable() {
                        status.update(&UploadStatus::Failed);
                        return Err(e);
                    }

                    if state.attempt >= self.settings.retry_count {
                        status.update(&UploadStatus::Failed);
                        return Err(AppError::UploadExhausted {
                            attempts: state.attempt,
                        });
                    }

                    let delay = backoff_delay(state.attempt, &self.settings);
                    state.advance(&self.settings);
                    log::debug!(
                        "Retrying {} in {:?} at quality {}%",
                        photo.name(),
                        delay,
                        quality_to_percent(state.quality)
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn attempt_upload(&self, photo: &PhotoFile, quality: f64) -> AppResult<String> {
        let compressed = self.compressor.compress(photo, quality).await?;

        let backend = self.backend.clone();
        let response = self
            .queue
            .submit(move || async move { backend.upload_photo(&compressed).await })
            .await?;

        match response {
            UploadResponse {
                success: true,
                url: Some(url),
                ..
            } => Ok(url),
            UploadResponse { success: true, .. } => {
                Err(AppError::server_rejected(Some("no URL in upload response")))
            }
            UploadResponse { error, .. } => Err(AppError::server_rejected(error.as_deref())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressorSettings;
    use crate::image_processor::tests::create_test_png;
    use crate::uploader::progress_tracker::RecordingStatusSink;
    use crate::uploader::test_support::ScriptedBackend;

    fn fast_settings() -> RetrySettings {
        RetrySettings {
            base_delay: Duration::from_millis(1),
            ..RetrySettings::default()
        }
    }

    fn uploader(backend: Arc<ScriptedBackend>, settings: RetrySettings) -> ResilientUploader {
        ResilientUploader::new(
            backend,
            ImageCompressor::new(CompressorSettings::default()),
            UploadQueue::new(5).unwrap(),
            settings,
        )
    }

    fn photo(name: &str) -> PhotoFile {
        PhotoFile::from_bytes(name, create_test_png(64, 48))
    }

    fn assert_qualities(actual: Vec<f64>, expected: &[f64]) {
        assert_eq!(actual.len(), expected.len(), "qualities: {:?}", actual);
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-9, "qualities: {:?}", actual);
        }
    }

    #[test]
    fn test_backoff_delays() {
        let settings = RetrySettings::default();
        assert_eq!(backoff_delay(1, &settings), Duration::from_millis(500));
        assert_eq!(backoff_delay(2, &settings), Duration::from_millis(750));
        assert_eq!(backoff_delay(3, &settings), Duration::from_millis(1125));
    }

    #[test]
    fn test_quality_never_increases_or_drops_below_minimum() {
        let cases = [
            (0.75, 0.5, 0.1),
            (0.9, 0.3, 0.25),
            (0.6, 0.6, 0.1),
            (1.0, 0.05, 0.0),
        ];
        for (default, min, step) in cases {
            let settings = RetrySettings {
                default_quality: default,
                min_quality: min,
                quality_step: step,
                ..RetrySettings::default()
            };
            let mut state = RetryState::new(&settings);
            for _ in 0..20 {
                let before = state.quality;
                state.advance(&settings);
                assert!(state.quality <= before);
                assert!(state.quality >= min);
            }
        }
    }

    #[tokio::test]
    async fn test_always_failing_upload_stops_after_retry_count() {
        let backend = Arc::new(ScriptedBackend::always_rejecting("storage unavailable"));
        let uploader = uploader(backend.clone(), fast_settings());
        let sink = RecordingStatusSink::new();

        let result = uploader.upload_with_retry(&photo("p.png"), &sink).await;

        assert!(matches!(result, Err(AppError::UploadExhausted { attempts: 3 })));
        assert_eq!(backend.upload_count(), 3);
        assert_qualities(backend.upload_qualities(), &[0.75, 0.65, 0.55]);
        assert_eq!(
            sink.history(),
            vec![
                UploadStatus::Processing {
                    attempt: 1,
                    quality_percent: 75
                },
                UploadStatus::Retrying {
                    attempt: 2,
                    quality_percent: 65
                },
                UploadStatus::Retrying {
                    attempt: 3,
                    quality_percent: 55
                },
                UploadStatus::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn test_quality_is_clamped_to_minimum() {
        let backend = Arc::new(ScriptedBackend::always_rejecting("nope"));
        let settings = RetrySettings {
            min_quality: 0.7,
            ..fast_settings()
        };
        let uploader = uploader(backend.clone(), settings);

        let result = uploader
            .upload_with_retry(&photo("p.png"), &RecordingStatusSink::new())
            .await;

        assert!(result.is_err());
        assert_qualities(backend.upload_qualities(), &[0.75, 0.7, 0.7]);
    }

    #[tokio::test]
    async fn test_succeeds_on_second_attempt() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_upload(Err(AppError::HttpStatus {
            status: 502,
            message: "Bad Gateway".to_string(),
        }));
        backend.push_upload(Ok(UploadResponse::stored("https://files.example/p2.jpg")));
        let uploader = uploader(backend.clone(), fast_settings());
        let sink = RecordingStatusSink::new();

        let url = uploader
            .upload_with_retry(&photo("p2.png"), &sink)
            .await
            .unwrap();

        assert_eq!(url, "https://files.example/p2.jpg");
        assert_eq!(backend.upload_count(), 2);
        assert_qualities(backend.upload_qualities(), &[0.75, 0.65]);
        assert_eq!(sink.last(), Some(UploadStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_internal_failure_is_retried_then_exhausted() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..3 {
            backend.push_upload(Err(AppError::Internal("task panicked".to_string())));
        }
        let uploader = uploader(backend.clone(), fast_settings());
        let sink = RecordingStatusSink::new();

        let result = uploader.upload_with_retry(&photo("p.png"), &sink).await;

        assert!(matches!(result, Err(AppError::UploadExhausted { attempts: 3 })));
        assert_eq!(backend.upload_count(), 3);
        assert_eq!(sink.last(), Some(UploadStatus::Failed));
    }

    #[tokio::test]
    async fn test_validation_failure_ends_sequence_at_once() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_upload(Err(AppError::validation("filename", "empty")));
        let uploader = uploader(backend.clone(), fast_settings());
        let sink = RecordingStatusSink::new();

        let result = uploader.upload_with_retry(&photo("p.png"), &sink).await;

        assert!(matches!(result, Err(AppError::Validation { .. })));
        assert_eq!(backend.upload_count(), 1);
        assert_eq!(sink.last(), Some(UploadStatus::Failed));
    }

    #[tokio::test]
    async fn test_success_without_url_is_retried() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_upload(Ok(UploadResponse {
            success: true,
            url: None,
            error: None,
        }));
        let uploader = uploader(backend.clone(), fast_settings());

        let url = uploader
            .upload_with_retry(&photo("p.png"), &RecordingStatusSink::new())
            .await
            .unwrap();

        assert_eq!(backend.upload_count(), 2);
        assert!(url.ends_with("p.png"));
    }

    #[tokio::test]
    async fn test_compression_failure_consumes_attempts() {
        let backend = Arc::new(ScriptedBackend::new());
        let uploader = uploader(backend.clone(), fast_settings());
        let broken = PhotoFile::from_bytes("broken.jpg", b"not an image".to_vec());

        let result = uploader
            .upload_with_retry(&broken, &RecordingStatusSink::new())
            .await;

        assert!(matches!(result, Err(AppError::UploadExhausted { attempts: 3 })));
        assert_eq!(backend.upload_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_uploads_share_queue_capacity() {
        let backend = Arc::new(ScriptedBackend::new().with_upload_delay(Duration::from_millis(30)));
        let uploader = ResilientUploader::new(
            backend.clone(),
            ImageCompressor::new(CompressorSettings::default()),
            UploadQueue::new(2).unwrap(),
            fast_settings(),
        );

        let photos: Vec<PhotoFile> = (0..6).map(|i| photo(&format!("p{}.png", i))).collect();
        let sinks: Vec<RecordingStatusSink> = (0..6).map(|_| RecordingStatusSink::new()).collect();
        let uploads = photos
            .iter()
            .zip(&sinks)
            .map(|(p, s)| uploader.upload_with_retry(p, s));

        let results = futures::future::join_all(uploads).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(backend.upload_count(), 6);
        assert!(backend.peak_in_flight() <= 2);
    }
}
