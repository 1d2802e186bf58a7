use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::error::AppError;

pub const BUCKET: &str = "schedules";
pub const MAX_OBJECT_BYTES: u64 = 10 * 1024 * 1024;
pub const ALLOWED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/jpg", "application/pdf"];

static OBJECT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,254}$").expect("valid object name regex"));

pub fn is_valid_object_name(name: &str) -> bool {
    OBJECT_NAME.is_match(name) && !name.contains("..")
}

pub fn is_allowed_mime_type(mime: &str) -> bool {
    ALLOWED_MIME_TYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(mime))
}

/// Object name is the trailing path segment of its public URL.
pub fn object_name_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// The public-read timetable bucket, kept as flat files under `root`.
#[derive(Debug, Clone)]
pub struct Bucket {
    root: PathBuf,
    public_base: String,
}

impl Bucket {
    pub fn new(root: impl Into<PathBuf>, platform_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base: platform_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn ensure(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn object_path(&self, name: &str) -> Result<PathBuf, AppError> {
        if !is_valid_object_name(name) {
            return Err(AppError::Validation(format!("Invalid object name: {}", name)));
        }
        Ok(self.root.join(name))
    }

    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.public_base, BUCKET, name
        )
    }

    /// Writes the object. With `upsert` an existing object of the same name is
    /// replaced, otherwise the upload is refused. Returns the object path
    /// relative to the bucket.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(&self, name: &str, bytes: &[u8], upsert: bool) -> Result<String, AppError> {
        let path = self.object_path(name)?;
        self.ensure().await?;

        if !upsert && fs::try_exists(&path).await? {
            return Err(AppError::Conflict(format!("Object {} already exists", name)));
        }

        // Readers never observe a half-written object
        let staging = self.root.join(format!(".{}.part", name));
        fs::write(&staging, bytes).await?;
        if let Err(err) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }

        info!(object = %name, "Stored object");
        Ok(name.to_string())
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, AppError> {
        let path = self.object_path(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("Object {} not found", name)))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool, AppError> {
        let path = self.object_path(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Removes the named objects, skipping ones already gone. Returns how many
    /// were actually deleted.
    #[instrument(skip(self))]
    pub async fn remove(&self, names: &[&str]) -> Result<usize, AppError> {
        let mut removed = 0;
        for name in names {
            let path = self.object_path(name)?;
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    warn!(object = %name, "Object already absent");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<StoredObject>, AppError> {
        let mut objects = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(objects),
            Err(err) => return Err(err.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_valid_object_name(&name) {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            objects.push(StoredObject {
                name,
                modified: metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            });
        }

        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }
}
