use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::errors::AppResult;
use crate::image_processor::PhotoFile;
use crate::uploader::{PermitBackend, ResilientUploader, StatusSink, UploadStatus};

/// Inspection phase of a hot-work permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormPhase {
    Pre,
    During,
    After,
}

/// A photo input and the label that shows its upload status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoSlot {
    pub input_id: &'static str,
    pub status_id: &'static str,
}

const fn slot(input_id: &'static str, status_id: &'static str) -> PhotoSlot {
    PhotoSlot {
        input_id,
        status_id,
    }
}

impl FormPhase {
    pub const ALL: [FormPhase; 3] = [FormPhase::Pre, FormPhase::During, FormPhase::After];

    pub fn api_path(&self) -> &'static str {
        match self {
            Self::Pre => "/api/submit-pre",
            Self::During => "/api/submit-during",
            Self::After => "/api/submit-after",
        }
    }

    pub fn photo_slots(&self) -> [PhotoSlot; 2] {
        match self {
            Self::Pre => [
                slot("prePhoto1", "prePhoto1Status"),
                slot("prePhoto2", "prePhoto2Status"),
            ],
            Self::During => [
                slot("duringPhoto1", "duringPhoto1Status"),
                slot("duringPhoto2", "duringPhoto2Status"),
            ],
            Self::After => [
                slot("afterPhoto1", "afterPhoto1Status"),
                slot("afterPhoto2", "afterPhoto2Status"),
            ],
        }
    }

    /// Label for messages about the whole form.
    pub fn message_status_id(&self) -> &'static str {
        match self {
            Self::Pre => "preFormMsg",
            Self::During => "duringFormMsg",
            Self::After => "afterFormMsg",
        }
    }

    pub fn status_ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.photo_slots().iter().map(|s| s.status_id).collect();
        ids.push(self.message_status_id());
        ids
    }

    /// Payload key → form field id.
    pub fn payload_fields(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Pre => &[
                ("company", "preCompany"),
                ("inputCompany", "preInputCompany"),
                ("project", "preProject"),
                ("inputProject", "preInputProject"),
                ("department", "preDepartment"),
                ("startTime", "preStartTime"),
                ("endTime", "preEndTime"),
                ("area", "preArea"),
                ("location", "preLocation"),
                ("restricted", "preRestricted"),
                ("items", "preItems"),
            ],
            Self::During => &[
                ("company", "duringCompany"),
                ("project", "duringProject"),
                ("q1", "q1"),
            ],
            Self::After => &[
                ("company", "afterCompany"),
                ("project", "afterProject"),
                ("qTime", "qTime"),
                ("qYesNo", "qYesNo"),
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::During => "during",
            Self::After => "after",
        }
    }
}

impl fmt::Display for FormPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pre" => Ok(Self::Pre),
            "during" => Ok(Self::During),
            "after" => Ok(Self::After),
            other => Err(format!(
                "unknown form phase '{}', expected pre, during or after",
                other
            )),
        }
    }
}

/// Where form values come from and where status text goes.
pub trait FormSurface: Send + Sync {
    /// Value of a field; missing fields read as empty.
    fn field_value(&self, id: &str) -> String;

    /// The photo chosen in an input, if any.
    fn photo(&self, input_id: &str) -> Option<PhotoFile>;

    fn set_status(&self, id: &str, text: &str);

    /// Clear all inputs after a successful submission.
    fn reset(&self);
}

/// Writes upload statuses into one label of a form surface.
pub struct SurfaceStatus<'a> {
    surface: &'a dyn FormSurface,
    status_id: &'a str,
}

impl<'a> SurfaceStatus<'a> {
    pub fn new(surface: &'a dyn FormSurface, status_id: &'a str) -> Self {
        Self { surface, status_id }
    }
}

impl StatusSink for SurfaceStatus<'_> {
    fn update(&self, status: &UploadStatus) {
        self.surface.set_status(self.status_id, &status.to_string());
    }
}

/// In-memory form surface.
#[derive(Default)]
pub struct MemoryForm {
    fields: Mutex<HashMap<String, String>>,
    photos: Mutex<HashMap<String, PhotoFile>>,
    statuses: Mutex<HashMap<String, String>>,
}

impl MemoryForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(self, id: &str, value: &str) -> Self {
        self.set_field(id, value);
        self
    }

    pub fn with_photo(self, input_id: &str, photo: PhotoFile) -> Self {
        self.attach_photo(input_id, photo);
        self
    }

    pub fn set_field(&self, id: &str, value: &str) {
        if let Ok(mut fields) = self.fields.lock() {
            fields.insert(id.to_string(), value.to_string());
        }
    }

    pub fn attach_photo(&self, input_id: &str, photo: PhotoFile) {
        if let Ok(mut photos) = self.photos.lock() {
            photos.insert(input_id.to_string(), photo);
        }
    }

    pub fn status(&self, id: &str) -> Option<String> {
        self.statuses.lock().ok()?.get(id).cloned()
    }
}

impl FormSurface for MemoryForm {
    fn field_value(&self, id: &str) -> String {
        self.fields
            .lock()
            .ok()
            .and_then(|fields| fields.get(id).cloned())
            .unwrap_or_default()
    }

    fn photo(&self, input_id: &str) -> Option<PhotoFile> {
        self.photos.lock().ok()?.get(input_id).cloned()
    }

    fn set_status(&self, id: &str, text: &str) {
        match self.statuses.lock() {
            Ok(mut statuses) => {
                statuses.insert(id.to_string(), text.to_string());
            }
            Err(e) => log::warn!("Failed to update status {} (non-critical): {}", id, e),
        }
    }

    fn reset(&self) {
        if let Ok(mut fields) = self.fields.lock() {
            fields.clear();
        }
        if let Ok(mut photos) = self.photos.lock() {
            photos.clear();
        }
    }
}

/// Uploads a form's photos and submits the form once all of them are stored.
pub struct FormSubmitter {
    uploader: ResilientUploader,
    backend: Arc<dyn PermitBackend>,
}

impl FormSubmitter {
    pub fn new(uploader: ResilientUploader, backend: Arc<dyn PermitBackend>) -> Self {
        Self { uploader, backend }
    }

    pub async fn submit(
        &self,
        phase: FormPhase,
        surface: &dyn FormSurface,
    ) -> AppResult<serde_json::Value> {
        let start_time = Instant::now();

        match self.upload_and_submit(phase, surface).await {
            Ok(response) => {
                surface.reset();
                for id in phase.status_ids() {
                    surface.set_status(id, "");
                }
                log::info!(
                    "Form {} submitted in {:.1}s",
                    phase,
                    start_time.elapsed().as_secs_f64()
                );
                Ok(response)
            }
            Err(e) => {
                log::error!("Form {} submission failed: {}", phase, e);
                surface.set_status(
                    phase.message_status_id(),
                    &format!("❌ Submission failed: {}", e),
                );
                Err(e)
            }
        }
    }

    /// Upload each slot's photo in order; empty slots give `None`.
    pub async fn upload_photos(
        &self,
        phase: FormPhase,
        surface: &dyn FormSurface,
    ) -> AppResult<Vec<Option<String>>> {
        let mut urls = Vec::new();

        for slot in phase.photo_slots() {
            let photo = match surface.photo(slot.input_id) {
                Some(photo) => photo,
                None => {
                    urls.push(None);
                    continue;
                }
            };

            let status = SurfaceStatus::new(surface, slot.status_id);
            match self.uploader.upload_with_retry(&photo, &status).await {
                Ok(url) => urls.push(Some(url)),
                Err(e) => {
                    log::error!("Photo {} failed: {}", slot.input_id, e);
                    return Err(e);
                }
            }
        }

        Ok(urls)
    }

    async fn upload_and_submit(
        &self,
        phase: FormPhase,
        surface: &dyn FormSurface,
    ) -> AppResult<serde_json::Value> {
        let photo_urls = self.upload_photos(phase, surface).await?;
        let payload = build_payload(phase, surface, photo_urls);
        self.backend.submit_form(phase, &payload).await
    }
}

pub fn build_payload(
    phase: FormPhase,
    surface: &dyn FormSurface,
    photo_urls: Vec<Option<String>>,
) -> serde_json::Value {
    let mut payload = serde_json::Map::new();
    for (key, field_id) in phase.payload_fields() {
        payload.insert(
            key.to_string(),
            serde_json::Value::String(surface.field_value(field_id)),
        );
    }
    payload.insert("photoUrls".to_string(), serde_json::json!(photo_urls));
    serde_json::Value::Object(payload)
}
