use std::collections::HashSet;

use chrono::{Duration, Utc};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::db::{self, find_schedule, get_referenced_image_urls, insert_schedule, update_schedule_image};
use crate::error::{AppError, ErrorResponse};
use crate::models::Schedule;
use crate::storage::{
    Bucket, MAX_OBJECT_BYTES, is_allowed_mime_type, is_valid_object_name, object_name_from_url,
};

/// Name under which a pair's upload is stored: `<grade>-<section>-<unix millis>.<ext>`.
pub fn object_name_for(grade_id: &str, section_id: &str, extension: &str) -> String {
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();
    format!(
        "{}-{}-{}.{}",
        grade_id,
        section_id,
        Utc::now().timestamp_millis(),
        extension
    )
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file in request")]
    MissingFile,

    #[error("Missing file name, grade or section")]
    MissingMetadata,

    #[error("Invalid object name: {0}")]
    InvalidObjectName(String),

    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("File of {0} bytes exceeds the size limit")]
    TooLarge(u64),

    #[error("Upload already in progress for {0}")]
    Busy(String),

    #[error("Staging failed: {0}")]
    Stage(AppError),

    #[error("Updating schedule failed: {0}")]
    Update(AppError),

    #[error("Creating schedule failed: {0}")]
    Insert(AppError),

    #[error("Server error: {0}")]
    Server(AppError),
}

impl UploadError {
    pub fn status_code(&self) -> Status {
        match self {
            UploadError::MissingFile
            | UploadError::MissingMetadata
            | UploadError::InvalidObjectName(_)
            | UploadError::UnsupportedType(_)
            | UploadError::Stage(_)
            | UploadError::Update(_)
            | UploadError::Insert(_) => Status::BadRequest,
            UploadError::TooLarge(_) => Status::PayloadTooLarge,
            UploadError::Busy(_) => Status::Conflict,
            UploadError::Server(_) => Status::InternalServerError,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        match self {
            UploadError::MissingFile => ErrorResponse::new("لم يتم العثور على ملف"),
            UploadError::MissingMetadata => ErrorResponse::new("معلومات مفقودة"),
            UploadError::InvalidObjectName(name) => {
                ErrorResponse::with_details("اسم الملف غير صالح", name.clone())
            }
            UploadError::UnsupportedType(mime) => {
                ErrorResponse::with_details("نوع الملف غير مدعوم", mime.clone())
            }
            UploadError::TooLarge(_) => ErrorResponse::with_details(
                "حجم الملف كبير جداً",
                format!("Maximum size is {} bytes", MAX_OBJECT_BYTES),
            ),
            UploadError::Busy(target) => {
                ErrorResponse::with_details("يتم رفع جدول لهذه الشعبة حالياً", target.clone())
            }
            UploadError::Stage(err) => ErrorResponse::with_details("فشل في رفع الملف", err.to_string()),
            UploadError::Update(err) => {
                ErrorResponse::with_details("فشل في تحديث الجدول", err.to_string())
            }
            UploadError::Insert(err) => {
                ErrorResponse::with_details("فشل في إنشاء الجدول", err.to_string())
            }
            UploadError::Server(err) => ErrorResponse::with_details("خطأ في الخادم", err.to_string()),
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for UploadError {
    fn respond_to(self, req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        match &self {
            UploadError::Stage(err)
            | UploadError::Update(err)
            | UploadError::Insert(err)
            | UploadError::Server(err) => err.log_and_record("Upload relay"),
            other => warn!(error = %other, "Rejected upload"),
        }

        Custom(self.status_code(), Json(self.to_response())).respond_to(req)
    }
}

/// What the relay received, before validation. Every part is optional so the
/// relay can answer the precise reason a request is unusable.
#[derive(Debug, Default, Clone)]
pub struct UploadRequest {
    pub object_name: Option<String>,
    pub grade_id: Option<String>,
    pub section_id: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct ValidUpload {
    pub object_name: String,
    pub grade_id: String,
    pub section_id: String,
    pub bytes: Vec<u8>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl UploadRequest {
    pub fn validate(self) -> Result<ValidUpload, UploadError> {
        let bytes = self.bytes.ok_or(UploadError::MissingFile)?;

        let (Some(object_name), Some(grade_id), Some(section_id)) = (
            present(self.object_name),
            present(self.grade_id),
            present(self.section_id),
        ) else {
            return Err(UploadError::MissingMetadata);
        };

        if !is_valid_object_name(&object_name) {
            return Err(UploadError::InvalidObjectName(object_name));
        }

        let content_type = self.content_type.unwrap_or_default();
        if !is_allowed_mime_type(&content_type) {
            return Err(UploadError::UnsupportedType(content_type));
        }

        if bytes.len() as u64 > MAX_OBJECT_BYTES {
            return Err(UploadError::TooLarge(bytes.len() as u64));
        }

        Ok(ValidUpload {
            object_name,
            grade_id,
            section_id,
            bytes,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub path: String,
    pub public_url: String,
    pub schedule: Schedule,
    pub created: bool,
}

/// Stores the object, then points the pair's schedule row at it. A failed
/// commit removes the staged object so no unreferenced file is left behind.
#[instrument(skip(pool, bucket, upload), fields(object = %upload.object_name, grade_id = %upload.grade_id, section_id = %upload.section_id))]
pub async fn relay_upload(
    pool: &Pool<Sqlite>,
    bucket: &Bucket,
    upload: ValidUpload,
) -> Result<UploadOutcome, UploadError> {
    info!(size = upload.bytes.len(), "Relaying schedule upload");

    let path = bucket
        .upload(&upload.object_name, &upload.bytes, true)
        .await
        .map_err(UploadError::Stage)?;
    let public_url = bucket.public_url(&path);

    match commit(pool, &upload.grade_id, &upload.section_id, &public_url).await {
        Ok((schedule, created)) => Ok(UploadOutcome {
            path,
            public_url,
            schedule,
            created,
        }),
        Err(err) => {
            match bucket.remove(&[path.as_str()]).await {
                Ok(_) => info!(object = %path, "Removed staged object after failed commit"),
                Err(cleanup) => cleanup.log_and_record("Removing staged object"),
            }
            Err(err)
        }
    }
}

async fn commit(
    pool: &Pool<Sqlite>,
    grade_id: &str,
    section_id: &str,
    public_url: &str,
) -> Result<(Schedule, bool), UploadError> {
    let existing = find_schedule(pool, grade_id, section_id)
        .await
        .map_err(UploadError::Update)?;

    match existing {
        Some(existing) => update_schedule_image(pool, existing, public_url)
            .await
            .map(|schedule| (schedule, false))
            .map_err(UploadError::Update),
        None => insert_schedule(pool, grade_id, section_id, public_url)
            .await
            .map(|schedule| (schedule, true))
            .map_err(UploadError::Insert),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDeletion {
    pub schedule: Schedule,
    pub storage_removed: bool,
}

/// Deletes the row, then makes a best-effort attempt at its object. The row
/// is gone even when the object removal fails.
#[instrument(skip(pool, bucket))]
pub async fn delete_schedule(
    pool: &Pool<Sqlite>,
    bucket: &Bucket,
    id: &str,
) -> Result<ScheduleDeletion, AppError> {
    let schedule = db::delete_schedule(pool, id).await?;

    let storage_removed = match schedule.image_url.as_deref().and_then(object_name_from_url) {
        Some(name) => match bucket.remove(&[name]).await {
            Ok(removed) => removed > 0,
            Err(err) => {
                err.log_and_record("Removing deleted schedule's object");
                false
            }
        },
        None => false,
    };

    Ok(ScheduleDeletion {
        schedule,
        storage_removed,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub removed: Vec<String>,
}

/// Removes bucket objects no schedule row references. Objects younger than
/// `grace` are left alone since their commit may still be running.
#[instrument(skip(pool, bucket))]
pub async fn reconcile_orphans(
    pool: &Pool<Sqlite>,
    bucket: &Bucket,
    grace: Duration,
) -> Result<ReconcileReport, AppError> {
    let referenced: HashSet<String> = get_referenced_image_urls(pool)
        .await?
        .iter()
        .filter_map(|url| object_name_from_url(url))
        .map(str::to_string)
        .collect();

    let cutoff = Utc::now() - grace;
    let objects = bucket.list().await?;

    let orphans: Vec<&str> = objects
        .iter()
        .filter(|object| !referenced.contains(&object.name) && object.modified < cutoff)
        .map(|object| object.name.as_str())
        .collect();

    if !orphans.is_empty() {
        bucket.remove(&orphans).await?;
    }

    info!(scanned = objects.len(), removed = orphans.len(), "Reconciled bucket");

    Ok(ReconcileReport {
        scanned: objects.len(),
        removed: orphans.into_iter().map(str::to_string).collect(),
    })
}
