use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hotwork_permit_client::{
    commands::{self, AppContext},
    config::Config,
    errors::{AppError, AppResult},
    forms::{FormPhase, FormSubmitter, FormSurface, MemoryForm},
    image_processor::{CompressionResult, PhotoFile},
    records::{DropdownData, SearchQuery, SearchRecord},
    uploader::{PermitBackend, UploadResponse},
};

/// Integration tests for the permit client
/// These tests run the real compressor and queue against an in-process backend

/// Backend that fails the first `failures` uploads of each filename.
#[derive(Default)]
struct FlakyBackend {
    failures_per_file: usize,
    attempts: Mutex<HashMap<String, usize>>,
    sizes: Mutex<Vec<(String, u32, u32)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    submissions: Mutex<Vec<(FormPhase, serde_json::Value)>>,
}

impl FlakyBackend {
    fn failing_first(failures_per_file: usize) -> Self {
        Self {
            failures_per_file,
            ..Self::default()
        }
    }
}

#[async_trait]
impl PermitBackend for FlakyBackend {
    async fn upload_photo(&self, photo: &CompressionResult) -> AppResult<UploadResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.sizes
            .lock()
            .unwrap()
            .push((photo.filename.clone(), photo.width, photo.height));

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(photo.filename.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if attempt <= self.failures_per_file {
            return Err(AppError::HttpStatus {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }

        Ok(UploadResponse::stored(&format!(
            "https://files.example/{}",
            photo.filename
        )))
    }

    async fn submit_form(
        &self,
        phase: FormPhase,
        payload: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        self.submissions
            .lock()
            .unwrap()
            .push((phase, payload.clone()));
        Ok(serde_json::json!({ "success": true }))
    }

    async fn dropdown_data(&self) -> AppResult<DropdownData> {
        Ok(serde_json::from_value(serde_json::json!({
            "companies": { "Acme": ["Tower A"] },
            "areas": ["North"],
            "items": ["Welding"]
        }))?)
    }

    async fn search_records(&self, query: &SearchQuery) -> AppResult<Vec<SearchRecord>> {
        Ok(vec![SearchRecord {
            record_type: "動火前".to_string(),
            company: query.company.clone().unwrap_or_else(|| "Acme".to_string()),
            project: "Tower A".to_string(),
            time: format!("{} 09:00", query.date),
            location: "B2".to_string(),
        }])
    }
}

fn test_config() -> Config {
    Config {
        retry_delay_base_ms: 1,
        max_concurrent_uploads: 2,
        ..Config::default()
    }
}

fn write_test_photo(name: &str, width: u32, height: u32) -> std::path::PathBuf {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 90]));
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();

    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, png).unwrap();
    path
}

#[tokio::test]
async fn test_form_submission_with_photos_from_disk() {
    let first = write_test_photo("hotwork_it_first.png", 2000, 1000);
    let second = write_test_photo("hotwork_it_second.png", 800, 600);

    let backend = Arc::new(FlakyBackend::failing_first(1));
    let ctx = AppContext::with_backend(test_config(), backend.clone()).unwrap();

    let fields = vec![("company".to_string(), "Acme".to_string())];
    let result = commands::submit_form(
        &ctx,
        FormPhase::After,
        &fields,
        [first.to_str(), second.to_str()],
    )
    .await;

    let _ = std::fs::remove_file(&first);
    let _ = std::fs::remove_file(&second);

    assert!(result.is_ok(), "submission failed: {:?}", result.err());

    let submissions = backend.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].1["photoUrls"],
        serde_json::json!([
            "https://files.example/hotwork_it_first.png",
            "https://files.example/hotwork_it_second.png"
        ])
    );
    assert_eq!(submissions[0].1["company"], "Acme");

    // Wide photo is scaled to the max width, small one is left alone
    let sizes = backend.sizes.lock().unwrap().clone();
    assert!(sizes
        .iter()
        .any(|(name, w, h)| name == "hotwork_it_first.png" && (*w, *h) == (1024, 512)));
    assert!(sizes
        .iter()
        .any(|(name, w, h)| name == "hotwork_it_second.png" && (*w, *h) == (800, 600)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_forms_share_upload_capacity() {
    let backend = Arc::new(FlakyBackend::failing_first(0));
    let ctx = AppContext::with_backend(test_config(), backend.clone()).unwrap();

    let forms: Vec<(FormPhase, MemoryForm)> = FormPhase::ALL
        .iter()
        .map(|phase| {
            let form = MemoryForm::new();
            for (i, slot) in phase.photo_slots().iter().enumerate() {
                let img = RgbImage::from_pixel(40, 30, Rgb([200, 10, 10]));
                let mut png = Vec::new();
                DynamicImage::ImageRgb8(img)
                    .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                    .unwrap();
                form.attach_photo(
                    slot.input_id,
                    PhotoFile::from_bytes(&format!("{}-{}.png", phase, i), png),
                );
            }
            (*phase, form)
        })
        .collect();

    let submitter = FormSubmitter::new(ctx.uploader.clone(), ctx.backend.clone());
    let submissions = forms
        .iter()
        .map(|(phase, form)| submitter.submit(*phase, form));
    let results = futures::future::join_all(submissions).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(backend.submissions.lock().unwrap().len(), 3);
    assert!(backend.peak.load(Ordering::SeqCst) <= 2);
    for (phase, form) in &forms {
        for slot in phase.photo_slots() {
            assert!(form.photo(slot.input_id).is_none());
        }
    }
}

#[tokio::test]
async fn test_exhausted_photo_blocks_submission() {
    let backend = Arc::new(FlakyBackend::failing_first(10));
    let ctx = AppContext::with_backend(test_config(), backend.clone()).unwrap();

    let form = MemoryForm::new().with_photo(
        "duringPhoto1",
        PhotoFile::from_bytes("never.png", {
            let mut png = Vec::new();
            DynamicImage::ImageRgb8(RgbImage::new(8, 8))
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .unwrap();
            png
        }),
    );

    let submitter = FormSubmitter::new(ctx.uploader.clone(), ctx.backend.clone());
    let result = submitter.submit(FormPhase::During, &form).await;

    assert!(matches!(result, Err(AppError::UploadExhausted { attempts: 3 })));
    assert!(backend.submissions.lock().unwrap().is_empty());
    assert_eq!(
        *backend.attempts.lock().unwrap().get("never.png").unwrap(),
        3
    );
}

#[tokio::test]
async fn test_query_commands_render_backend_data() {
    let backend = Arc::new(FlakyBackend::default());
    let ctx = AppContext::with_backend(test_config(), backend).unwrap();

    let dropdowns = commands::show_dropdowns(&ctx, None).await.unwrap();
    assert!(dropdowns.contains("Companies: Acme"));
    assert!(dropdowns.contains("Items: Welding"));

    let projects = commands::show_dropdowns(&ctx, Some("Acme")).await.unwrap();
    assert_eq!(projects, "Projects of Acme: Tower A");

    let table = commands::search(&ctx, Some("2025-11-03"), Some("Acme"))
        .await
        .unwrap();
    assert!(table.contains("[pre] 動火前"));
    assert!(table.contains("2025-11-03 09:00"));
}
