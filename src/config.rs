use std::path::PathBuf;

use rocket::figment::Figment;
use serde::{Deserialize, Serialize};

use crate::auth::AdminPolicy;
use crate::error::AppError;

pub const DEFAULT_ADMIN_EMAIL: &str = "admin@mohamedalfateh.edu";

/// Credentials and address of the data platform. `service_key` is the elevated
/// credential: it unlocks the upload relay and admin routes and is never
/// handed to visitors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformConfig {
    pub url: String,
    pub anon_key: String,
    pub service_key: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            anon_key: String::new(),
            service_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminPolicyKind {
    #[default]
    Email,
    Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default)]
    pub seed_catalog: bool,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub admin_policy: AdminPolicyKind,
    #[serde(default)]
    pub platform: PlatformConfig,
}

fn default_database_url() -> String {
    "sqlite://timetables.db?mode=rwc".to_string()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage/schedules")
}

fn default_admin_email() -> String {
    DEFAULT_ADMIN_EMAIL.to_string()
}

impl AppConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, rocket::figment::Error> {
        figment.extract()
    }

    pub fn admin_policy(&self) -> AdminPolicy {
        match self.admin_policy {
            AdminPolicyKind::Email => AdminPolicy::Email(self.admin_email.clone()),
            AdminPolicyKind::Role => AdminPolicy::Role,
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.platform.anon_key.trim().is_empty() {
            return Err(AppError::Internal(
                "platform.anon_key must be configured".to_string(),
            ));
        }

        if self.platform.service_key.trim().is_empty() {
            return Err(AppError::Internal(
                "platform.service_key must be configured".to_string(),
            ));
        }

        if self.platform.anon_key == self.platform.service_key {
            return Err(AppError::Internal(
                "platform.anon_key and platform.service_key must differ".to_string(),
            ));
        }

        Ok(())
    }
}
