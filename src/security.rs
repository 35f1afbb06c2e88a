use regex::Regex;
use std::path::Path;

use crate::errors::{AppError, AppResult};

/// Photos above this size are refused before any decoding happens.
const MAX_PHOTO_SIZE: u64 = 50 * 1024 * 1024;

const PHOTO_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "bmp"];

fn compile(pattern: &str) -> AppResult<Regex> {
    Regex::new(pattern).map_err(|e| AppError::Internal(format!("Invalid pattern: {}", e)))
}

pub struct InputValidator;

impl InputValidator {
    pub fn validate_endpoint_url(url: &str) -> AppResult<()> {
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(AppError::validation("api_endpoint", "Endpoint URL cannot be empty"));
        }

        let endpoint_pattern = compile(r"^https?://[A-Za-z0-9.\-]+(:\d{1,5})?(/[\w\-./]*)?$")?;
        if !endpoint_pattern.is_match(trimmed) {
            return Err(AppError::validation("api_endpoint", "Not a valid http(s) URL"));
        }

        if trimmed.len() > 500 {
            return Err(AppError::validation("api_endpoint", "Endpoint URL too long"));
        }

        Ok(())
    }

    pub fn validate_photo_path(path: &str) -> AppResult<()> {
        if path.trim().is_empty() {
            return Err(AppError::validation("photo", "File path cannot be empty"));
        }

        let path_obj = Path::new(path);

        match path_obj.extension() {
            Some(extension) => {
                let ext = extension.to_string_lossy().to_lowercase();
                if !PHOTO_EXTENSIONS.contains(&ext.as_str()) {
                    return Err(AppError::validation(
                        "photo",
                        &format!("Unsupported file type: {}", path),
                    ));
                }
            }
            None => {
                return Err(AppError::validation("photo", "File must have an extension"));
            }
        }

        if !path_obj.is_file() {
            return Err(AppError::read(path, "no such file"));
        }

        if FileSystemGuard::get_file_size(path)? > MAX_PHOTO_SIZE {
            return Err(AppError::validation("photo", "File too large (max 50MB)"));
        }

        Ok(())
    }

    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized: String = filename
            .trim()
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();

        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            format!("{}...", truncated)
        } else {
            sanitized
        }
    }

    /// Search dates are calendar days in `YYYY-MM-DD` form.
    pub fn validate_query_date(date: &str) -> AppResult<()> {
        let trimmed = date.trim();
        if trimmed.is_empty() {
            return Err(AppError::validation("date", "Please choose a query date"));
        }

        let date_pattern = compile(r"^\d{4}-\d{2}-\d{2}$")?;
        if !date_pattern.is_match(trimmed)
            || chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").is_err()
        {
            return Err(AppError::validation("date", "Must be a date in YYYY-MM-DD form"));
        }

        Ok(())
    }

    pub fn validate_quality(quality: f64) -> AppResult<()> {
        if !(quality > 0.0 && quality <= 1.0) {
            return Err(AppError::validation("quality", "Quality must be in (0, 1]"));
        }
        Ok(())
    }
}

// File system utilities
pub struct FileSystemGuard;

impl FileSystemGuard {
    pub fn get_file_size(path: &str) -> AppResult<u64> {
        let metadata = std::fs::metadata(path)?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_validation() {
        assert!(InputValidator::validate_endpoint_url("https://api.example.workers.dev").is_ok());
        assert!(InputValidator::validate_endpoint_url("http://127.0.0.1:8787").is_ok());
        assert!(InputValidator::validate_endpoint_url("ftp://example.com").is_err());
        assert!(InputValidator::validate_endpoint_url("   ").is_err());
    }

    #[test]
    fn test_photo_path_rejects_wrong_extension() {
        let result = InputValidator::validate_photo_path("notes.txt");
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_photo_path_missing_file_is_read_error() {
        let result = InputValidator::validate_photo_path("definitely_missing_photo.jpg");
        assert!(matches!(result, Err(AppError::Read { .. })));
    }

    #[test]
    fn test_sanitize_filename() {
        let safe = InputValidator::sanitize_filename("site<1>/weld?.jpg");
        assert_eq!(safe, "site_1__weld_.jpg");

        let long = "a".repeat(300);
        assert_eq!(InputValidator::sanitize_filename(&long).chars().count(), 255);
    }

    #[test]
    fn test_query_date() {
        assert!(InputValidator::validate_query_date("2025-11-03").is_ok());
        assert!(InputValidator::validate_query_date("").is_err());
        assert!(InputValidator::validate_query_date("2025/11/03").is_err());
        assert!(InputValidator::validate_query_date("2025-13-40").is_err());
    }

    #[test]
    fn test_quality_bounds() {
        assert!(InputValidator::validate_quality(0.75).is_ok());
        assert!(InputValidator::validate_quality(1.0).is_ok());
        assert!(InputValidator::validate_quality(0.0).is_err());
        assert!(InputValidator::validate_quality(1.2).is_err());
    }
}
