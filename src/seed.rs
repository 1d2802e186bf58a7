use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::catalog::GRADE_ORDER;
use crate::config::AppConfig;
use crate::db::{upsert_admin_user, upsert_grade, upsert_section};
use crate::error::AppError;
use crate::models::Shift;

pub const SEED_SECTIONS: [&str; 3] = ["أ", "ب", "ج"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub grades: usize,
    pub sections: usize,
}

/// Upserts the six canonical grades of both shifts with their three sections.
/// Running it again changes nothing.
#[instrument(skip(pool))]
pub async fn seed_catalog(pool: &Pool<Sqlite>) -> Result<SeedSummary, AppError> {
    let mut summary = SeedSummary::default();

    for shift in Shift::ALL {
        for name in GRADE_ORDER {
            let grade = upsert_grade(pool, name, shift).await?;
            summary.grades += 1;

            for section in SEED_SECTIONS {
                upsert_section(pool, &grade.id, section).await?;
                summary.sections += 1;
            }
        }
    }

    info!(grades = summary.grades, sections = summary.sections, "Seeded catalog");
    Ok(summary)
}

/// Creates or resets the administrator account when a password is configured.
#[instrument(skip_all)]
pub async fn ensure_admin_user(pool: &Pool<Sqlite>, config: &AppConfig) -> Result<Option<String>, AppError> {
    let Some(password) = config.admin_password.as_deref().filter(|p| !p.is_empty()) else {
        info!("No administrator password configured, skipping admin provisioning");
        return Ok(None);
    };

    let id = upsert_admin_user(pool, &config.admin_email, password).await?;
    info!(email = %config.admin_email, "Administrator provisioned");
    Ok(Some(id))
}
