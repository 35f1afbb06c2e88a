use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompressorSettings;
use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

pub const JPEG_MIME: &str = "image/jpeg";

/// A photo picked for upload, either on disk or already in memory.
#[derive(Debug, Clone)]
pub struct PhotoFile {
    name: String,
    source: PhotoSource,
}

#[derive(Debug, Clone)]
enum PhotoSource {
    Path(PathBuf),
    Memory(Arc<[u8]>),
}

impl PhotoFile {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        Self {
            name,
            source: PhotoSource::Path(path),
        }
    }

    pub fn from_bytes(name: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.to_string(),
            source: PhotoSource::Memory(bytes.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            PhotoSource::Path(p) => Some(p),
            PhotoSource::Memory(_) => None,
        }
    }

    async fn read(&self) -> AppResult<Arc<[u8]>> {
        match &self.source {
            PhotoSource::Path(path) => tokio::fs::read(path)
                .await
                .map(Arc::from)
                .map_err(|e| AppError::read(&self.name, e)),
            PhotoSource::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

/// Output of one compression attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub data_url: String,
    pub mime: String,
    pub quality: f64,
    pub filename: String,
    pub width: u32,
    pub height: u32,
}

impl CompressionResult {
    /// Size of the base64 payload inside the data URL.
    pub fn encoded_len(&self) -> usize {
        self.data_url
            .split_once(',')
            .map(|(_, payload)| payload.len())
            .unwrap_or(0)
    }
}

/// Fit `width` into `max_width`, keeping the aspect ratio. Never upscales.
pub fn calculate_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32, f64) {
    if width == 0 {
        return (width, height, 1.0);
    }

    let scale = f64::min(1.0, max_width as f64 / width as f64);
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);

    (new_width, new_height, scale)
}

/// Maps a 0..1 quality onto the encoder's 1..=100 scale.
pub fn quality_to_percent(quality: f64) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Run `operation` against a deadline. Whichever finishes first wins and the
/// other is dropped, so the caller sees exactly one outcome. A blocking
/// decode that already started still runs to the end on the blocking pool;
/// its output is discarded.
pub async fn within_deadline<T, F>(filename: &str, timeout: Duration, operation: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(AppError::CompressionTimeout {
            filename: filename.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct ImageCompressor {
    settings: CompressorSettings,
}

impl ImageCompressor {
    pub fn new(settings: CompressorSettings) -> Self {
        Self { settings }
    }

    /// Read, downsample and re-encode `photo` as JPEG at `quality`.
    pub async fn compress(&self, photo: &PhotoFile, quality: f64) -> AppResult<CompressionResult> {
        InputValidator::validate_quality(quality)?;

        let photo = photo.clone();
        let max_width = self.settings.max_width;
        let filename = photo.name().to_string();

        let result = within_deadline(&filename, self.settings.timeout, async move {
            let bytes = photo.read().await?;
            let name = InputValidator::sanitize_filename(photo.name());

            tokio::task::spawn_blocking(move || encode_scaled(&bytes, &name, quality, max_width))
                .await
                .map_err(|e| AppError::Internal(format!("Compression task failed: {}", e)))?
        })
        .await?;

        log::debug!(
            "Compressed {} to {}x{} at quality {} ({} bytes encoded)",
            result.filename,
            result.width,
            result.height,
            quality_to_percent(result.quality),
            result.encoded_len()
        );

        Ok(result)
    }
}

fn encode_scaled(
    bytes: &[u8],
    filename: &str,
    quality: f64,
    max_width: u32,
) -> AppResult<CompressionResult> {
    let img = image::load_from_memory(bytes).map_err(|e| AppError::decode(filename, e))?;

    let (width, height, scale) = calculate_dimensions(img.width(), img.height(), max_width);
    let resized = if scale < 1.0 {
        // Bilinear keeps this fast; Lanczos is not worth the cost for upload previews.
        img.resize_exact(width, height, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = resized.to_rgb8();

    let mut output = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality_to_percent(quality));
        encoder.encode_image(&rgb)?;
    }

    let payload = base64::engine::general_purpose::STANDARD.encode(&output);

    Ok(CompressionResult {
        data_url: format!("data:{};base64,{}", JPEG_MIME, payload),
        mime: JPEG_MIME.to_string(),
        quality,
        filename: filename.to_string(),
        width: rgb.width(),
        height: rgb.height(),
    })
}
