use std::sync::Arc;

use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::forms::{FormPhase, FormSubmitter, MemoryForm};
use crate::image_processor::{ImageCompressor, PhotoFile};
use crate::records::{render_table, SearchQuery};
use crate::security::InputValidator;
use crate::uploader::{ApiClient, LogStatusSink, PermitBackend, ResilientUploader, UploadQueue};

/// Everything a command needs, wired from one configuration.
pub struct AppContext {
    pub config: Config,
    pub backend: Arc<dyn PermitBackend>,
    pub uploader: ResilientUploader,
}

impl AppContext {
    /// Must be called from within a tokio runtime.
    pub fn new(config: Config) -> AppResult<Self> {
        let client = ApiClient::new(&config.api_endpoint, config.request_timeout())?;
        Self::with_backend(config, Arc::new(client))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn PermitBackend>) -> AppResult<Self> {
        let queue = UploadQueue::new(config.max_concurrent_uploads)?;
        let uploader = ResilientUploader::new(
            backend.clone(),
            ImageCompressor::new(config.compressor_settings()),
            queue,
            config.retry_settings(),
        );

        Ok(Self {
            config,
            backend,
            uploader,
        })
    }
}

/// Parse a `key=value` form field argument.
pub fn parse_field(arg: &str) -> AppResult<(String, String)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(AppError::validation("field", "Expected key=value")),
    }
}

fn load_photo(path: &str) -> AppResult<PhotoFile> {
    InputValidator::validate_photo_path(path)?;
    Ok(PhotoFile::from_path(path))
}

/// Fill an in-memory form for `phase` from payload keys and photo paths.
pub fn build_form(
    phase: FormPhase,
    fields: &[(String, String)],
    photos: [Option<&str>; 2],
) -> AppResult<MemoryForm> {
    let form = MemoryForm::new();

    for (key, value) in fields {
        let field_id = phase
            .payload_fields()
            .iter()
            .find(|(payload_key, _)| payload_key == key)
            .map(|(_, field_id)| *field_id)
            .ok_or_else(|| {
                AppError::validation(
                    "field",
                    &format!("'{}' is not a field of the {} form", key, phase),
                )
            })?;
        form.set_field(field_id, value);
    }

    for (slot, path) in phase.photo_slots().iter().zip(photos) {
        if let Some(path) = path {
            form.attach_photo(slot.input_id, load_photo(path)?);
        }
    }

    Ok(form)
}

/// Upload standalone photos concurrently; each gets its own retry sequence.
pub async fn upload_photos(
    ctx: &AppContext,
    paths: &[String],
) -> AppResult<Vec<(String, AppResult<String>)>> {
    let photos = paths
        .iter()
        .map(|p| load_photo(p))
        .collect::<AppResult<Vec<_>>>()?;

    let sinks: Vec<LogStatusSink> = photos.iter().map(|p| LogStatusSink::new(p.name())).collect();
    let uploads = photos
        .iter()
        .zip(&sinks)
        .map(|(photo, sink)| ctx.uploader.upload_with_retry(photo, sink));

    let results = futures::future::join_all(uploads).await;

    Ok(paths.iter().cloned().zip(results).collect())
}

pub async fn submit_form(
    ctx: &AppContext,
    phase: FormPhase,
    fields: &[(String, String)],
    photos: [Option<&str>; 2],
) -> AppResult<serde_json::Value> {
    let form = build_form(phase, fields, photos)?;
    let submitter = FormSubmitter::new(ctx.uploader.clone(), ctx.backend.clone());
    submitter.submit(phase, &form).await
}

/// Dropdown choices as text: all lists, or one company's projects.
pub async fn show_dropdowns(ctx: &AppContext, company: Option<&str>) -> AppResult<String> {
    let data = ctx.backend.dropdown_data().await?;

    let lines = match company {
        Some(company) => vec![format!(
            "Projects of {}: {}",
            company,
            data.projects_for(company).join(", ")
        )],
        None => vec![
            format!("Companies: {}", data.company_names().join(", ")),
            format!("Areas: {}", data.areas.join(", ")),
            format!("Items: {}", data.items.join(", ")),
        ],
    };

    Ok(lines.join("\n"))
}

/// Search records of a day, defaulting to today.
pub async fn search(
    ctx: &AppContext,
    date: Option<&str>,
    company: Option<&str>,
) -> AppResult<String> {
    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let query = SearchQuery::new(date.unwrap_or(&today), company)?;

    let records = ctx.backend.search_records(&query).await?;
    log::info!("Found {} records for {}", records.len(), query.date);

    Ok(render_table(&records))
}
