use crate::{
    auth::{DbUser, DbUserSession, User, UserSession},
    error::AppError,
    stats::Stats,
};
use chrono::{DateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{DbGrade, DbSchedule, DbSection, Grade, Schedule, Section, Shift};

const GRADE_COLUMNS: &str = "SELECT id, name, shift, created_at FROM grades";
const SECTION_COLUMNS: &str = "SELECT id, name, grade_id, created_at FROM sections";
const SCHEDULE_COLUMNS: &str =
    "SELECT id, grade_id, section_id, image_url, created_at, updated_at FROM schedules";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// Users and sessions

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: &str) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>("SELECT id, email, role, created_at FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_email(pool: &Pool<Sqlite>, email: &str) -> Result<Option<User>, AppError> {
    info!("Finding user by email");
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, email, role, created_at FROM users WHERE email = ? COLLATE NOCASE",
    )
    .bind(email.trim())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(email))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT id, password FROM users WHERE email = ? COLLATE NOCASE")
            .bind(email.trim())
            .fetch_optional(pool)
            .await?;

    let Some((id, hash)) = row else {
        return Ok(None);
    };

    match bcrypt::verify(password, &hash) {
        Ok(true) => Ok(Some(get_user(pool, &id).await?)),
        _ => Ok(None),
    }
}

#[cfg(test)]
#[instrument(skip_all, fields(email, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
    role: crate::auth::Role,
) -> Result<String, AppError> {
    info!("Creating new user");

    if find_user_by_email(pool, email).await?.is_some() {
        return Err(AppError::Conflict(format!("User '{}' already exists", email)));
    }

    let id = new_id();
    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    sqlx::query("INSERT INTO users (id, email, role, password, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(&id)
        .bind(email.trim())
        .bind(role.as_str())
        .bind(hashed_password)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(id)
}

/// Creates the administrator or resets its password and role.
#[instrument(skip_all, fields(email))]
pub async fn upsert_admin_user(
    pool: &Pool<Sqlite>,
    email: &str,
    password: &str,
) -> Result<String, AppError> {
    info!("Upserting administrator");
    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    sqlx::query(
        "INSERT INTO users (id, email, role, password, created_at) VALUES (?, ?, 'admin', ?, ?)
         ON CONFLICT (email) DO UPDATE SET role = 'admin', password = excluded.password",
    )
    .bind(new_id())
    .bind(email.trim())
    .bind(hashed_password)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let user = find_user_by_email(pool, email)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Administrator {} vanished after upsert", email)))?;

    Ok(user.id)
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: &str,
    token: &str,
    expires_at: DateTime<Utc>,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query(
        "INSERT INTO user_sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(token)
    .bind(Utc::now())
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(pool: &Pool<Sqlite>, token: &str) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// Grades and sections

#[instrument(skip(pool))]
pub async fn get_grades_by_shift(pool: &Pool<Sqlite>, shift: Shift) -> Result<Vec<Grade>, AppError> {
    info!("Getting grades for shift");
    let rows = sqlx::query_as::<_, DbGrade>(&format!("{GRADE_COLUMNS} WHERE shift = ?"))
        .bind(shift.as_str())
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Grade::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_all_grades(pool: &Pool<Sqlite>) -> Result<Vec<Grade>, AppError> {
    info!("Getting all grades");
    let rows = sqlx::query_as::<_, DbGrade>(&format!("{GRADE_COLUMNS} ORDER BY shift, name"))
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Grade::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_grade(pool: &Pool<Sqlite>, id: &str) -> Result<Grade, AppError> {
    info!("Getting grade");
    let row = sqlx::query_as::<_, DbGrade>(&format!("{GRADE_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Grade::from)
        .ok_or_else(|| AppError::NotFound(format!("Grade with id {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn create_grade(pool: &Pool<Sqlite>, name: &str, shift: Shift) -> Result<Grade, AppError> {
    info!("Creating grade");
    let grade = Grade {
        id: new_id(),
        name: name.trim().to_string(),
        shift,
        created_at: Utc::now(),
    };

    let res = sqlx::query("INSERT INTO grades (id, name, shift, created_at) VALUES (?, ?, ?, ?)")
        .bind(&grade.id)
        .bind(&grade.name)
        .bind(grade.shift.as_str())
        .bind(grade.created_at)
        .execute(pool)
        .await;

    match res {
        Ok(_) => Ok(grade),
        Err(err) if AppError::is_unique_violation(&err) => Err(AppError::Conflict(format!(
            "Grade '{}' already exists in shift {}",
            grade.name, shift
        ))),
        Err(err) => Err(err.into()),
    }
}

/// Insert keyed by (name, shift); an existing row is returned untouched.
#[instrument(skip(pool))]
pub async fn upsert_grade(pool: &Pool<Sqlite>, name: &str, shift: Shift) -> Result<Grade, AppError> {
    sqlx::query(
        "INSERT INTO grades (id, name, shift, created_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (name, shift) DO NOTHING",
    )
    .bind(new_id())
    .bind(name)
    .bind(shift.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, DbGrade>(&format!("{GRADE_COLUMNS} WHERE name = ? AND shift = ?"))
        .bind(name)
        .bind(shift.as_str())
        .fetch_one(pool)
        .await?;

    Ok(Grade::from(row))
}

/// Sections and schedules of the grade go with it through the foreign keys.
#[instrument(skip(pool))]
pub async fn delete_grade(pool: &Pool<Sqlite>, id: &str) -> Result<(), AppError> {
    info!("Deleting grade");
    let res = sqlx::query("DELETE FROM grades WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Grade with id {} not found", id)));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_sections_for_grades(
    pool: &Pool<Sqlite>,
    grade_ids: &[String],
) -> Result<Vec<Section>, AppError> {
    info!(count = grade_ids.len(), "Getting sections for grades");
    if grade_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("{SECTION_COLUMNS} WHERE grade_id IN ("));
    let mut separated = builder.separated(", ");
    for id in grade_ids {
        separated.push_bind(id.clone());
    }
    separated.push_unseparated(") ORDER BY name");

    let rows = builder.build_query_as::<DbSection>().fetch_all(pool).await?;

    Ok(rows.into_iter().map(Section::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_all_sections(pool: &Pool<Sqlite>) -> Result<Vec<Section>, AppError> {
    info!("Getting all sections");
    let rows = sqlx::query_as::<_, DbSection>(&format!("{SECTION_COLUMNS} ORDER BY name"))
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Section::from).collect())
}

#[instrument(skip(pool))]
pub async fn create_section(
    pool: &Pool<Sqlite>,
    grade_id: &str,
    name: &str,
) -> Result<Section, AppError> {
    info!("Creating section");
    get_grade(pool, grade_id).await?;

    let section = Section {
        id: new_id(),
        name: name.trim().to_string(),
        grade_id: grade_id.to_string(),
        created_at: Utc::now(),
    };

    let res = sqlx::query("INSERT INTO sections (id, name, grade_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(&section.id)
        .bind(&section.name)
        .bind(&section.grade_id)
        .bind(section.created_at)
        .execute(pool)
        .await;

    match res {
        Ok(_) => Ok(section),
        Err(err) if AppError::is_unique_violation(&err) => Err(AppError::Conflict(format!(
            "Section '{}' already exists in this grade",
            section.name
        ))),
        Err(err) => Err(err.into()),
    }
}

/// Insert keyed by (name, grade_id); an existing row is returned untouched.
#[instrument(skip(pool))]
pub async fn upsert_section(
    pool: &Pool<Sqlite>,
    grade_id: &str,
    name: &str,
) -> Result<Section, AppError> {
    sqlx::query(
        "INSERT INTO sections (id, name, grade_id, created_at) VALUES (?, ?, ?, ?)
         ON CONFLICT (name, grade_id) DO NOTHING",
    )
    .bind(new_id())
    .bind(name)
    .bind(grade_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, DbSection>(&format!(
        "{SECTION_COLUMNS} WHERE name = ? AND grade_id = ?"
    ))
    .bind(name)
    .bind(grade_id)
    .fetch_one(pool)
    .await?;

    Ok(Section::from(row))
}

#[instrument(skip(pool))]
pub async fn delete_section(pool: &Pool<Sqlite>, id: &str) -> Result<(), AppError> {
    info!("Deleting section");
    let res = sqlx::query("DELETE FROM sections WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Section with id {} not found", id)));
    }

    Ok(())
}

// Schedules

/// Zero-or-one lookup for a pair. Should duplicates ever exist the most
/// recently updated row wins.
#[instrument(skip(pool))]
pub async fn find_schedule(
    pool: &Pool<Sqlite>,
    grade_id: &str,
    section_id: &str,
) -> Result<Option<Schedule>, AppError> {
    info!("Finding schedule for grade and section");
    let row = sqlx::query_as::<_, DbSchedule>(&format!(
        "{SCHEDULE_COLUMNS} WHERE grade_id = ? AND section_id = ?
         ORDER BY updated_at DESC LIMIT 1"
    ))
    .bind(grade_id)
    .bind(section_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Schedule::from))
}

#[instrument(skip(pool))]
pub async fn get_schedule(pool: &Pool<Sqlite>, id: &str) -> Result<Schedule, AppError> {
    info!("Getting schedule");
    let row = sqlx::query_as::<_, DbSchedule>(&format!("{SCHEDULE_COLUMNS} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(Schedule::from)
        .ok_or_else(|| AppError::NotFound(format!("Schedule with id {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn get_all_schedules(pool: &Pool<Sqlite>) -> Result<Vec<Schedule>, AppError> {
    info!("Getting all schedules");
    let rows = sqlx::query_as::<_, DbSchedule>(&format!("{SCHEDULE_COLUMNS} ORDER BY updated_at DESC"))
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(Schedule::from).collect())
}

#[instrument(skip(pool))]
pub async fn update_schedule_image(
    pool: &Pool<Sqlite>,
    existing: Schedule,
    image_url: &str,
) -> Result<Schedule, AppError> {
    info!(schedule_id = %existing.id, "Updating schedule image");
    let now = Utc::now();

    let res = sqlx::query("UPDATE schedules SET image_url = ?, updated_at = ? WHERE id = ?")
        .bind(image_url)
        .bind(now)
        .bind(&existing.id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Schedule with id {} not found",
            existing.id
        )));
    }

    Ok(Schedule {
        image_url: Some(image_url.to_string()),
        updated_at: now,
        ..existing
    })
}

/// First schedule for a pair; both timestamps start equal.
#[instrument(skip(pool))]
pub async fn insert_schedule(
    pool: &Pool<Sqlite>,
    grade_id: &str,
    section_id: &str,
    image_url: &str,
) -> Result<Schedule, AppError> {
    info!("Inserting new schedule");
    let now = Utc::now();
    let schedule = Schedule {
        id: new_id(),
        grade_id: grade_id.to_string(),
        section_id: section_id.to_string(),
        image_url: Some(image_url.to_string()),
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO schedules (id, grade_id, section_id, image_url, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&schedule.id)
    .bind(&schedule.grade_id)
    .bind(&schedule.section_id)
    .bind(image_url)
    .bind(schedule.created_at)
    .bind(schedule.updated_at)
    .execute(pool)
    .await?;

    Ok(schedule)
}

/// Removes the row and hands it back so the caller can clean up its object.
#[instrument(skip(pool))]
pub async fn delete_schedule(pool: &Pool<Sqlite>, id: &str) -> Result<Schedule, AppError> {
    info!("Deleting schedule");
    let schedule = get_schedule(pool, id).await?;

    sqlx::query("DELETE FROM schedules WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(schedule)
}

#[instrument(skip(pool))]
pub async fn get_referenced_image_urls(pool: &Pool<Sqlite>) -> Result<Vec<String>, AppError> {
    let urls = sqlx::query_scalar::<_, String>(
        "SELECT image_url FROM schedules WHERE image_url IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    Ok(urls)
}

#[instrument(skip(pool))]
pub async fn get_stats(pool: &Pool<Sqlite>) -> Result<Stats, AppError> {
    info!("Computing catalog statistics");
    let total_grades = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM grades")
        .fetch_one(pool)
        .await?;
    let total_sections = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sections")
        .fetch_one(pool)
        .await?;
    let total_schedules = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM schedules")
        .fetch_one(pool)
        .await?;
    let last_update = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT updated_at FROM schedules ORDER BY updated_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(Stats {
        total_grades,
        total_sections,
        total_schedules,
        last_update,
    })
}
