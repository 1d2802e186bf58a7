#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod catalog;
mod config;
mod db;
mod env;
mod error;
mod inflight;
mod models;
mod schedule;
mod seed;
mod selection;
mod stats;
mod storage;
mod telemetry;
#[cfg(test)]
mod test;
mod upload;
mod validation;

use std::sync::Mutex;
use std::time::Duration;

use api::{
    api_admin_grades, api_admin_schedules, api_admin_stats, api_catalog, api_create_grade,
    api_create_section, api_delete_grade, api_delete_schedule, api_delete_section,
    api_download_schedule, api_get_selection, api_login, api_logout, api_me, api_me_unauthorized,
    api_reconcile_storage, api_schedule, api_select_grade_section, api_select_shift,
    api_selection_back, api_selection_reset, api_upload_schedule, api_upload_schedule_delete,
    api_upload_schedule_get, api_upload_schedule_patch, api_upload_schedule_put, health,
    public_object,
};
use auth::{forbidden_api, not_found_api, unauthorized_api};
use config::AppConfig;
use db::clean_expired_sessions;
use error::AppError;
use inflight::InFlight;
use once_cell::sync::Lazy;
use rocket::data::{Limits, ToByteUnit};
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, tokio};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use stats::StatsBoard;
use storage::{Bucket, MAX_OBJECT_BYTES};
use telemetry::{OtelGuard, TelemetryFairing, init_tracing, shutdown_telemetry};
use thiserror::Error;
use tracing::{error, info};

pub static TELEMETRY_GUARD: Lazy<Mutex<Option<OtelGuard>>> = Lazy::new(|| Mutex::new(None));

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("{0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

#[launch]
async fn rocket() -> _ {
    if let Err(err) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", err);
    }

    let guard = init_tracing();
    *TELEMETRY_GUARD.lock().unwrap_or_else(|e| e.into_inner()) = guard;

    match prepare().await {
        Ok((pool, config)) => init_rocket(pool, config).await,
        Err(err) => {
            error!(error = %err, "Startup failed");
            shutdown_telemetry();
            panic!("Startup failed: {}", err);
        }
    }
}

/// Config, database, migrations and provisioning, in that order.
async fn prepare() -> Result<(SqlitePool, AppConfig), Error> {
    let config = AppConfig::from_figment(&rocket::Config::figment())?;
    config.validate()?;

    let options: SqliteConnectOptions = config.database_url.parse()?;
    let pool = SqlitePool::connect_with(options.foreign_keys(true)).await?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed successfully");

    if config.seed_catalog {
        seed::seed_catalog(&pool).await?;
    }
    seed::ensure_admin_user(&pool, &config).await?;

    spawn_session_sweeper(pool.clone());

    Ok((pool, config))
}

fn spawn_session_sweeper(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) if count > 0 => info!("Cleaned up {} expired sessions", count),
                Ok(_) => {}
                Err(e) => error!("Failed to clean expired sessions: {}", e),
            }

            tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
        }
    });
}

pub async fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting timetable directory");

    let bucket = Bucket::new(config.storage_dir.clone(), &config.platform.url);
    if let Err(err) = bucket.ensure().await {
        err.log_and_record("Creating schedules bucket");
    }

    let limits = Limits::default()
        .limit("file", MAX_OBJECT_BYTES.bytes())
        .limit("data-form", (MAX_OBJECT_BYTES + 1024 * 1024).bytes());
    let figment = rocket::Config::figment().merge(("limits", limits));

    rocket::custom(figment)
        .manage(pool)
        .manage(config)
        .manage(bucket)
        .manage(StatsBoard::default())
        .manage(InFlight::default())
        .mount(
            "/api",
            routes![
                health,
                api_get_selection,
                api_select_shift,
                api_select_grade_section,
                api_selection_back,
                api_selection_reset,
                api_catalog,
                api_schedule,
                api_download_schedule,
                api_login,
                api_me,
                api_me_unauthorized,
                api_logout,
                api_admin_grades,
                api_create_grade,
                api_delete_grade,
                api_create_section,
                api_delete_section,
                api_admin_schedules,
                api_delete_schedule,
                api_admin_stats,
                api_reconcile_storage,
                api_upload_schedule,
                api_upload_schedule_get,
                api_upload_schedule_put,
                api_upload_schedule_patch,
                api_upload_schedule_delete,
            ],
        )
        .mount("/", routes![public_object])
        .register(
            "/",
            catchers![unauthorized_api, forbidden_api, not_found_api],
        )
        .attach(TelemetryFairing)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async move { shutdown_telemetry() })
        }))
}
