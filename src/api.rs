use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rocket::State;
use rocket::form::error::ErrorKind;
use rocket::form::{Errors, Form};
use rocket::fs::{NamedFile, TempFile};
use rocket::http::{ContentType, Cookie, CookieJar, Header, SameSite, Status};
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use rocket::tokio::io::AsyncReadExt;
use rocket::{FromForm, Request, Responder};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};
use validator::Validate;

use crate::auth::{AdminAccess, PublicApiKey, SESSION_COOKIE, User, UserSession, is_admin};
use crate::catalog::{Catalog, group_sections, load_catalog};
use crate::config::AppConfig;
use crate::db::{
    authenticate_user, create_grade, create_section, create_user_session, delete_grade,
    delete_section, get_all_grades, get_all_schedules, get_all_sections, get_schedule,
    invalidate_session,
};
use crate::error::{AppError, ErrorResponse};
use crate::inflight::{
    InFlight, InFlightPermit, grade_target, new_grade_target, new_section_target,
    schedule_target, section_target,
};
use crate::models::{Grade, Schedule, Section, Shift};
use crate::schedule::{content_disposition, fetch_download, resolve_schedule};
use crate::selection::{Selection, View};
use crate::stats::{Stats, StatsBoard};
use crate::storage::{Bucket, MAX_OBJECT_BYTES};
use crate::upload::{
    self, ReconcileReport, ScheduleDeletion, UploadError, UploadRequest, reconcile_orphans,
    relay_upload,
};
use crate::validation::{AppErrorExt, JsonValidateExt, ValidationResponse, ValidationResult};

pub const SELECTION_COOKIE: &str = "selection";
const SESSION_HOURS: i64 = 8;
const DEFAULT_RECONCILE_GRACE_MINUTES: i64 = 60;

pub const NOT_AUTHORIZED_MESSAGE: &str = "غير مصرح لك بالوصول إلى لوحة التحكم";
const CONFIRM_DELETE_GRADE: &str =
    "هل أنت متأكد من حذف هذا الصف؟ سيتم حذف جميع الشعب والجداول المرتبطة به.";
const CONFIRM_DELETE_SECTION: &str = "هل أنت متأكد من حذف هذه الشعبة؟ سيتم حذف الجدول المرتبط بها.";
const CONFIRM_DELETE_SCHEDULE: &str = "هل أنت متأكد من حذف هذا الجدول؟";

static NON_BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\S").expect("valid non-blank regex"));

fn require_confirmation(confirm: Option<bool>, prompt: &str) -> Result<(), AppError> {
    if confirm == Some(true) {
        Ok(())
    } else {
        Err(AppError::ConfirmationRequired(prompt.to_string()))
    }
}

fn begin<'a>(inflight: &'a InFlight, key: String) -> Result<InFlightPermit<'a>, AppError> {
    inflight
        .try_begin(key.clone())
        .ok_or_else(|| AppError::Conflict(format!("Another change to {} is in progress", key)))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

// Visitor flow

#[derive(Serialize, Deserialize, Debug)]
pub struct SelectionResponse {
    pub state: Selection,
    pub view: View,
}

impl From<Selection> for SelectionResponse {
    fn from(state: Selection) -> Self {
        let view = state.view();
        Self { state, view }
    }
}

fn read_selection(cookies: &CookieJar<'_>) -> Selection {
    cookies
        .get_private(SELECTION_COOKIE)
        .and_then(|cookie| serde_json::from_str(cookie.value()).ok())
        .unwrap_or_default()
}

fn store_selection(cookies: &CookieJar<'_>, selection: Selection) -> Json<SelectionResponse> {
    match serde_json::to_string(&selection) {
        Ok(value) => cookies.add_private(
            Cookie::build((SELECTION_COOKIE, value))
                .same_site(SameSite::Lax)
                .http_only(true),
        ),
        Err(err) => tracing::error!(error = %err, "Failed to serialize selection"),
    }

    Json(SelectionResponse::from(selection))
}

#[get("/selection")]
pub fn api_get_selection(cookies: &CookieJar<'_>) -> Json<SelectionResponse> {
    Json(SelectionResponse::from(read_selection(cookies)))
}

#[derive(Deserialize)]
pub struct ShiftRequest {
    pub shift: Shift,
}

#[post("/selection/shift", data = "<request>")]
pub fn api_select_shift(request: Json<ShiftRequest>, cookies: &CookieJar<'_>) -> Json<SelectionResponse> {
    let mut selection = read_selection(cookies);
    selection.select_shift(request.shift);
    store_selection(cookies, selection)
}

#[derive(Deserialize, Validate)]
pub struct GradeSectionRequest {
    #[validate(length(min = 1, message = "Grade is required"))]
    pub grade_id: String,
    #[validate(length(min = 1, message = "Section is required"))]
    pub section_id: String,
    pub grade_name: String,
    pub section_name: String,
}

#[post("/selection/grade-section", data = "<request>")]
pub fn api_select_grade_section(
    request: Json<GradeSectionRequest>,
    cookies: &CookieJar<'_>,
) -> ValidationResult<Json<SelectionResponse>> {
    let request = request.validate_custom()?;

    let mut selection = read_selection(cookies);
    selection.select_grade_section(
        &request.grade_id,
        &request.section_id,
        &request.grade_name,
        &request.section_name,
    );
    Ok(store_selection(cookies, selection))
}

#[post("/selection/back")]
pub fn api_selection_back(cookies: &CookieJar<'_>) -> Json<SelectionResponse> {
    let mut selection = read_selection(cookies);
    selection.back_from_schedule();
    store_selection(cookies, selection)
}

#[post("/selection/reset")]
pub fn api_selection_reset(cookies: &CookieJar<'_>) -> Json<SelectionResponse> {
    let mut selection = read_selection(cookies);
    selection.reset();
    store_selection(cookies, selection)
}

#[get("/catalog/<shift>")]
pub async fn api_catalog(
    shift: Result<Shift, AppError>,
    _key: PublicApiKey,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Catalog>, AppError> {
    Ok(Json(load_catalog(db, shift?).await))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ScheduleResponse {
    pub available: bool,
    pub schedule: Option<Schedule>,
}

#[get("/schedules/<grade_id>/<section_id>")]
pub async fn api_schedule(
    grade_id: &str,
    section_id: &str,
    _key: PublicApiKey,
    db: &State<Pool<Sqlite>>,
) -> Json<ScheduleResponse> {
    let schedule = resolve_schedule(db, grade_id, section_id).await.into_schedule();

    Json(ScheduleResponse {
        available: schedule.is_some(),
        schedule,
    })
}

#[derive(Responder)]
pub struct ScheduleAttachment {
    inner: Vec<u8>,
    content_type: ContentType,
    disposition: Header<'static>,
}

#[get("/schedules/<grade_id>/<section_id>/download?<grade_name>&<section_name>")]
pub async fn api_download_schedule(
    grade_id: &str,
    section_id: &str,
    grade_name: Option<&str>,
    section_name: Option<&str>,
    _key: PublicApiKey,
    db: &State<Pool<Sqlite>>,
    bucket: &State<Bucket>,
) -> Result<ScheduleAttachment, AppError> {
    let download = fetch_download(
        db,
        bucket,
        grade_id,
        section_id,
        grade_name.unwrap_or(grade_id),
        section_name.unwrap_or(section_id),
    )
    .await?;

    let content_type = download
        .object_name
        .rsplit_once('.')
        .and_then(|(_, ext)| ContentType::from_extension(ext))
        .unwrap_or(ContentType::Binary);

    info!(file_name = %download.file_name, "Serving schedule download");

    Ok(ScheduleAttachment {
        inner: download.bytes,
        content_type,
        disposition: Header::new("Content-Disposition", content_disposition(&download.file_name)),
    })
}

/// Public read of the schedules bucket.
#[get("/storage/v1/object/public/schedules/<name>")]
pub async fn public_object(name: &str, bucket: &State<Bucket>) -> Option<NamedFile> {
    let path = bucket.object_path(name).ok()?;
    NamedFile::open(path).await.ok()
}

// Authentication

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            role: user.role.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub is_admin: bool,
    pub error: Option<String>,
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .same_site(SameSite::Lax)
        .http_only(true)
        .max_age(rocket::time::Duration::hours(SESSION_HOURS))
        .build()
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> ValidationResult<Json<LoginResponse>> {
    let validated = login.validate_custom()?;

    let Some(user) = authenticate_user(db, &validated.email, &validated.password)
        .await
        .validate_custom()?
    else {
        return Ok(Json(LoginResponse {
            success: false,
            user: None,
            is_admin: false,
            error: Some("Invalid email or password".to_string()),
        }));
    };

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + Duration::hours(SESSION_HOURS);
    create_user_session(db, &user.id, &token, expires_at)
        .await
        .validate_custom()?;

    if !is_admin(&user, &config.admin_policy()) {
        warn!(email = %user.email, "Signed-in user is not the administrator, signing out");
        invalidate_session(db, &token).await.validate_custom()?;
        cookies.remove_private(Cookie::build(SESSION_COOKIE));
        return Err(Custom(
            Status::Forbidden,
            Json(ValidationResponse::with_error(
                "authorization",
                NOT_AUTHORIZED_MESSAGE,
            )),
        ));
    }

    cookies.add_private(session_cookie(token));
    info!(email = %user.email, "Administrator signed in");

    Ok(Json(LoginResponse {
        success: true,
        user: Some(UserData::from(user)),
        is_admin: true,
        error: None,
    }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MeResponse {
    pub user: UserData,
    pub is_admin: bool,
}

#[get("/me")]
pub fn api_me(user: User, config: &State<AppConfig>) -> Json<MeResponse> {
    let admin = is_admin(&user, &config.admin_policy());
    Json(MeResponse {
        user: UserData::from(user),
        is_admin: admin,
    })
}

#[get("/me", rank = 2)]
pub fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Invalidating session on logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));
    Status::NoContent
}

// Admin catalog editor

#[derive(Serialize, Deserialize, Debug)]
pub struct GradesOverview {
    pub grades: Vec<Grade>,
    pub sections: BTreeMap<String, Vec<Section>>,
}

#[get("/admin/grades")]
pub async fn api_admin_grades(
    _admin: AdminAccess,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<GradesOverview>, AppError> {
    let grades = get_all_grades(db).await?;
    let sections = group_sections(get_all_sections(db).await?);

    Ok(Json(GradesOverview { grades, sections }))
}

#[derive(Deserialize, Validate)]
pub struct NewGradeRequest {
    #[validate(regex(path = *NON_BLANK, message = "Grade name is required"))]
    pub name: String,
    pub shift: Shift,
}

#[post("/admin/grades", data = "<request>")]
pub async fn api_create_grade(
    admin: AdminAccess,
    request: Json<NewGradeRequest>,
    db: &State<Pool<Sqlite>>,
    stats: &State<StatsBoard>,
    inflight: &State<InFlight>,
) -> ValidationResult<Custom<Json<Grade>>> {
    let request = request.validate_custom()?;
    let name = request.name.trim();

    let _permit = begin(inflight, new_grade_target(request.shift.as_str(), name)).validate_custom()?;
    let grade = create_grade(db, name, request.shift).await.validate_custom()?;

    info!(actor = admin.actor(), grade_id = %grade.id, "Grade created");
    stats.notify(db).await;
    Ok(Custom(Status::Created, Json(grade)))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeleteResponse {
    pub success: bool,
    pub id: String,
}

#[delete("/admin/grades/<id>?<confirm>")]
pub async fn api_delete_grade(
    admin: AdminAccess,
    id: &str,
    confirm: Option<bool>,
    db: &State<Pool<Sqlite>>,
    stats: &State<StatsBoard>,
    inflight: &State<InFlight>,
) -> Result<Json<DeleteResponse>, AppError> {
    require_confirmation(confirm, CONFIRM_DELETE_GRADE)?;
    let _permit = begin(inflight, grade_target(id))?;

    delete_grade(db, id).await?;

    info!(actor = admin.actor(), grade_id = %id, "Grade deleted with its sections and schedules");
    stats.notify(db).await;
    Ok(Json(DeleteResponse {
        success: true,
        id: id.to_string(),
    }))
}

#[derive(Deserialize, Validate)]
pub struct NewSectionRequest {
    #[validate(regex(path = *NON_BLANK, message = "Section name is required"))]
    pub name: String,
}

#[post("/admin/grades/<grade_id>/sections", data = "<request>")]
pub async fn api_create_section(
    admin: AdminAccess,
    grade_id: &str,
    request: Json<NewSectionRequest>,
    db: &State<Pool<Sqlite>>,
    stats: &State<StatsBoard>,
    inflight: &State<InFlight>,
) -> ValidationResult<Custom<Json<Section>>> {
    let request = request.validate_custom()?;
    let name = request.name.trim();

    let _permit = begin(inflight, new_section_target(grade_id, name)).validate_custom()?;
    let section = create_section(db, grade_id, name).await.validate_custom()?;

    info!(actor = admin.actor(), section_id = %section.id, "Section created");
    stats.notify(db).await;
    Ok(Custom(Status::Created, Json(section)))
}

#[delete("/admin/sections/<id>?<confirm>")]
pub async fn api_delete_section(
    admin: AdminAccess,
    id: &str,
    confirm: Option<bool>,
    db: &State<Pool<Sqlite>>,
    stats: &State<StatsBoard>,
    inflight: &State<InFlight>,
) -> Result<Json<DeleteResponse>, AppError> {
    require_confirmation(confirm, CONFIRM_DELETE_SECTION)?;
    let _permit = begin(inflight, section_target(id))?;

    delete_section(db, id).await?;

    info!(actor = admin.actor(), section_id = %id, "Section deleted");
    stats.notify(db).await;
    Ok(Json(DeleteResponse {
        success: true,
        id: id.to_string(),
    }))
}

// Admin schedules

#[derive(Serialize, Deserialize, Debug)]
pub struct ScheduleEntry {
    pub schedule: Schedule,
    pub grade_name: Option<String>,
    pub section_name: Option<String>,
    pub shift: Option<Shift>,
}

#[get("/admin/schedules")]
pub async fn api_admin_schedules(
    _admin: AdminAccess,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<ScheduleEntry>>, AppError> {
    let grades: HashMap<String, Grade> = get_all_grades(db)
        .await?
        .into_iter()
        .map(|grade| (grade.id.clone(), grade))
        .collect();
    let sections: HashMap<String, Section> = get_all_sections(db)
        .await?
        .into_iter()
        .map(|section| (section.id.clone(), section))
        .collect();

    let entries = get_all_schedules(db)
        .await?
        .into_iter()
        .map(|schedule| {
            let grade = grades.get(&schedule.grade_id);
            ScheduleEntry {
                grade_name: grade.map(|g| g.name.clone()),
                shift: grade.map(|g| g.shift),
                section_name: sections.get(&schedule.section_id).map(|s| s.name.clone()),
                schedule,
            }
        })
        .collect();

    Ok(Json(entries))
}

#[delete("/admin/schedules/<id>?<confirm>")]
pub async fn api_delete_schedule(
    admin: AdminAccess,
    id: &str,
    confirm: Option<bool>,
    db: &State<Pool<Sqlite>>,
    bucket: &State<Bucket>,
    stats: &State<StatsBoard>,
    inflight: &State<InFlight>,
) -> Result<Json<ScheduleDeletion>, AppError> {
    require_confirmation(confirm, CONFIRM_DELETE_SCHEDULE)?;
    let target = get_schedule(db, id).await?;
    let _permit = begin(inflight, schedule_target(&target.grade_id, &target.section_id))?;

    let deletion = upload::delete_schedule(db, bucket, id).await?;

    info!(
        actor = admin.actor(),
        schedule_id = %id,
        storage_removed = deletion.storage_removed,
        "Schedule deleted"
    );
    stats.notify(db).await;
    Ok(Json(deletion))
}

#[get("/admin/stats")]
pub async fn api_admin_stats(
    _admin: AdminAccess,
    db: &State<Pool<Sqlite>>,
    stats: &State<StatsBoard>,
) -> Result<Json<Stats>, AppError> {
    Ok(Json(stats.current_or_refresh(db).await?))
}

#[post("/admin/storage/reconcile?<grace_minutes>")]
pub async fn api_reconcile_storage(
    admin: AdminAccess,
    grace_minutes: Option<i64>,
    db: &State<Pool<Sqlite>>,
    bucket: &State<Bucket>,
) -> Result<Json<ReconcileReport>, AppError> {
    let grace = Duration::minutes(
        grace_minutes
            .unwrap_or(DEFAULT_RECONCILE_GRACE_MINUTES)
            .max(0),
    );
    let report = reconcile_orphans(db, bucket, grace).await?;

    info!(actor = admin.actor(), removed = report.removed.len(), "Storage reconciled");
    Ok(Json(report))
}

// Upload relay

/// Relay metadata carried in request headers.
pub struct UploadHeaders {
    pub file_name: Option<String>,
    pub grade_id: Option<String>,
    pub section_id: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UploadHeaders {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let header = |name: &str| request.headers().get_one(name).map(str::to_string);

        Outcome::Success(UploadHeaders {
            file_name: header("X-File-Name"),
            grade_id: header("X-Grade"),
            section_id: header("X-Section"),
        })
    }
}

/// The file field keeps its own errors so an oversized part is not mistaken
/// for a missing one.
#[derive(FromForm)]
pub struct UploadForm<'r> {
    pub file: rocket::form::Result<'r, TempFile<'r>>,
}

fn exceeds_limit(errors: &Errors<'_>) -> bool {
    errors
        .iter()
        .any(|e| matches!(e.kind, ErrorKind::InvalidLength { .. }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UploadResponse {
    pub success: bool,
    pub path: String,
    #[serde(rename = "publicUrl")]
    pub public_url: String,
}

async fn read_temp_file(file: &TempFile<'_>) -> Result<Vec<u8>, AppError> {
    let reader = file.open().await?;
    rocket::tokio::pin!(reader);

    let mut bytes = Vec::with_capacity(file.len() as usize);
    reader.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

#[post("/upload-schedule", data = "<form>")]
pub async fn api_upload_schedule(
    admin: AdminAccess,
    headers: UploadHeaders,
    form: Result<Form<UploadForm<'_>>, Errors<'_>>,
    db: &State<Pool<Sqlite>>,
    bucket: &State<Bucket>,
    stats: &State<StatsBoard>,
    inflight: &State<InFlight>,
) -> Result<Json<UploadResponse>, UploadError> {
    let file = match form {
        Ok(form) => form
            .into_inner()
            .file
            .map_err(|errors| (exceeds_limit(&errors), errors.to_string())),
        Err(errors) => Err((exceeds_limit(&errors), errors.to_string())),
    };

    let file = match file {
        Ok(file) => Some(file),
        Err((true, _)) => return Err(UploadError::TooLarge(MAX_OBJECT_BYTES)),
        Err((false, errors)) => {
            warn!(errors = %errors, "Upload form carries no readable file");
            None
        }
    };

    let (content_type, bytes) = match &file {
        Some(file) => (
            file.content_type()
                .map(|ct| format!("{}/{}", ct.top(), ct.sub()).to_ascii_lowercase()),
            Some(read_temp_file(file).await.map_err(UploadError::Server)?),
        ),
        None => (None, None),
    };

    let upload = UploadRequest {
        object_name: headers.file_name,
        grade_id: headers.grade_id,
        section_id: headers.section_id,
        content_type,
        bytes,
    }
    .validate()?;

    let key = schedule_target(&upload.grade_id, &upload.section_id);
    let Some(_permit) = inflight.try_begin(key.clone()) else {
        return Err(UploadError::Busy(key));
    };

    let outcome = relay_upload(db, bucket, upload).await?;

    info!(
        actor = admin.actor(),
        path = %outcome.path,
        schedule_id = %outcome.schedule.id,
        created = outcome.created,
        "Schedule uploaded"
    );
    stats.notify(db).await;

    Ok(Json(UploadResponse {
        success: true,
        path: outcome.path,
        public_url: outcome.public_url,
    }))
}

fn method_not_allowed() -> Custom<Json<ErrorResponse>> {
    Custom(
        Status::MethodNotAllowed,
        Json(ErrorResponse::new("Method not allowed")),
    )
}

#[get("/upload-schedule")]
pub fn api_upload_schedule_get() -> Custom<Json<ErrorResponse>> {
    method_not_allowed()
}

#[put("/upload-schedule")]
pub fn api_upload_schedule_put() -> Custom<Json<ErrorResponse>> {
    method_not_allowed()
}

#[patch("/upload-schedule")]
pub fn api_upload_schedule_patch() -> Custom<Json<ErrorResponse>> {
    method_not_allowed()
}

#[delete("/upload-schedule")]
pub fn api_upload_schedule_delete() -> Custom<Json<ErrorResponse>> {
    method_not_allowed()
}
