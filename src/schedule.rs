use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::db::find_schedule;
use crate::error::AppError;
use crate::models::Schedule;
use crate::storage::{Bucket, object_name_from_url};

const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleLookup {
    Found(Schedule),
    NotAvailable,
}

impl ScheduleLookup {
    pub fn is_available(&self) -> bool {
        matches!(self, ScheduleLookup::Found(_))
    }

    pub fn into_schedule(self) -> Option<Schedule> {
        match self {
            ScheduleLookup::Found(schedule) => Some(schedule),
            ScheduleLookup::NotAvailable => None,
        }
    }
}

/// Timetable for a pair. A missing row and a failed lookup both read as
/// "not available" to the visitor; the latter is logged.
#[instrument(skip(pool))]
pub async fn resolve_schedule(pool: &Pool<Sqlite>, grade_id: &str, section_id: &str) -> ScheduleLookup {
    match find_schedule(pool, grade_id, section_id).await {
        Ok(Some(schedule)) => ScheduleLookup::Found(schedule),
        Ok(None) => {
            info!("No schedule for pair");
            ScheduleLookup::NotAvailable
        }
        Err(err) => {
            err.log_and_record("Resolving schedule");
            ScheduleLookup::NotAvailable
        }
    }
}

pub fn extension_of(object_name: &str) -> &str {
    match object_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext,
        _ => DEFAULT_EXTENSION,
    }
}

pub fn download_file_name(grade_name: &str, section_name: &str, object_name: &str) -> String {
    format!(
        "جدول-{}-شعبة-{}.{}",
        grade_name,
        section_name,
        extension_of(object_name)
    )
}

/// `Content-Disposition` value carrying a UTF-8 file name (RFC 6266) with an
/// ASCII fallback for old clients.
pub fn content_disposition(file_name: &str) -> String {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        percent_encode(file_name)
    )
}

fn percent_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'-' | b'_' | b'~') {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[derive(Debug)]
pub struct ScheduleDownload {
    pub file_name: String,
    pub object_name: String,
    pub bytes: Vec<u8>,
}

/// Loads the stored object behind a pair's schedule, named for the visitor.
#[instrument(skip(pool, bucket))]
pub async fn fetch_download(
    pool: &Pool<Sqlite>,
    bucket: &Bucket,
    grade_id: &str,
    section_id: &str,
    grade_name: &str,
    section_name: &str,
) -> Result<ScheduleDownload, AppError> {
    let schedule = resolve_schedule(pool, grade_id, section_id)
        .await
        .into_schedule()
        .ok_or_else(|| AppError::NotFound("No schedule for this grade and section".to_string()))?;

    let object_name = schedule
        .image_url
        .as_deref()
        .and_then(object_name_from_url)
        .ok_or_else(|| AppError::NotFound("Schedule has no stored image".to_string()))?
        .to_string();

    let bytes = bucket.read(&object_name).await?;

    Ok(ScheduleDownload {
        file_name: download_file_name(grade_name, section_name, &object_name),
        object_name,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_file_name_uses_object_extension() {
        assert_eq!(
            download_file_name("الأول", "أ", "1-1-1700000000000.png"),
            "جدول-الأول-شعبة-أ.png"
        );
        assert_eq!(
            download_file_name("الثاني", "ب", "2-2-1700000000000"),
            "جدول-الثاني-شعبة-ب.jpg"
        );
    }

    #[test]
    fn test_content_disposition_encodes_utf8_name() {
        let header = content_disposition("جدول-أ.pdf");
        assert!(header.starts_with("attachment; filename=\""));
        assert!(header.contains("filename*=UTF-8''%D8%AC"));
        assert!(header.ends_with(".pdf"));
    }
}
