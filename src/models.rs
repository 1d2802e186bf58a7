use std::fmt;

use chrono::{DateTime, Utc};
use rocket::request::FromParam;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One of the two cohorts sharing the building: `A` mornings, `B` afternoons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Shift {
    #[default]
    A,
    B,
}

impl Shift {
    pub const ALL: [Shift; 2] = [Shift::A, Shift::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::A => "A",
            Shift::B => "B",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Shift::A => 0,
            Shift::B => 1,
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "A" | "a" => Ok(Shift::A),
            "B" | "b" => Ok(Shift::B),
            _ => Err(AppError::Validation(format!("Unknown shift: {}", s))),
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl<'a> FromParam<'a> for Shift {
    type Error = AppError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        Shift::parse(param)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grade {
    pub id: String,
    pub name: String,
    pub shift: Shift,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbGrade {
    pub id: Option<String>,
    pub name: Option<String>,
    pub shift: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<DbGrade> for Grade {
    fn from(grade: DbGrade) -> Self {
        Self {
            id: grade.id.unwrap_or_default(),
            name: grade.name.unwrap_or_default(),
            shift: grade
                .shift
                .as_deref()
                .map(Shift::parse)
                .and_then(Result::ok)
                .unwrap_or_default(),
            created_at: grade.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub name: String,
    pub grade_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbSection {
    pub id: Option<String>,
    pub name: Option<String>,
    pub grade_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl From<DbSection> for Section {
    fn from(section: DbSection) -> Self {
        Self {
            id: section.id.unwrap_or_default(),
            name: section.name.unwrap_or_default(),
            grade_id: section.grade_id.unwrap_or_default(),
            created_at: section.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// The timetable attached to one (grade, section) pair. `image_url` is empty
/// until an image has been uploaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub grade_id: String,
    pub section_id: String,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone, Default)]
pub struct DbSchedule {
    pub id: Option<String>,
    pub grade_id: Option<String>,
    pub section_id: Option<String>,
    pub image_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<DbSchedule> for Schedule {
    fn from(db: DbSchedule) -> Self {
        let created_at = db.created_at.unwrap_or_else(Utc::now);
        Self {
            id: db.id.unwrap_or_default(),
            grade_id: db.grade_id.unwrap_or_default(),
            section_id: db.section_id.unwrap_or_default(),
            image_url: db.image_url.filter(|url| !url.is_empty()),
            created_at,
            updated_at: db.updated_at.unwrap_or(created_at),
        }
    }
}
