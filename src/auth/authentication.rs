use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use sqlx::SqlitePool;
use tracing::Instrument;

use crate::config::AppConfig;
use crate::db::{get_session_by_token, get_user};
use crate::error::ErrorResponse;

use super::{User, is_admin};

pub const SESSION_COOKIE: &str = "session_token";

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        authenticate_session(request)
            .instrument(tracing::info_span!("user_auth_guard"))
            .await
    }
}

async fn authenticate_session(request: &Request<'_>) -> Outcome<User, ()> {
    let token = request
        .cookies()
        .get_private(SESSION_COOKIE)
        .map(|c| c.value().to_string());

    let Some(token) = token else {
        return Outcome::Forward(Status::Unauthorized);
    };

    let db = match request.rocket().state::<SqlitePool>() {
        Some(pool) => pool,
        _ => {
            tracing::error!("Database pool not found in managed state");
            return Outcome::Error((Status::InternalServerError, ()));
        }
    };

    match get_session_by_token(db, &token).await {
        Ok(session) => {
            if !session.is_valid() {
                tracing::warn!("Session token expired");
                return Outcome::Forward(Status::Unauthorized);
            }

            match get_user(db, &session.user_id).await {
                Ok(user) => {
                    tracing::info!(email = %user.email, role = %user.role.as_str(), "User authenticated via session token");
                    Outcome::Success(user)
                }
                Err(err) => {
                    tracing::error!(user_id = %session.user_id, error = ?err, "Failed to fetch user for valid session");
                    Outcome::Error((Status::InternalServerError, ()))
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = ?err, "Invalid session token");
            Outcome::Forward(Status::Unauthorized)
        }
    }
}

/// Key presented in the `apikey` header, or as `Authorization: Bearer <key>`.
fn presented_key<'r>(request: &'r Request<'_>) -> Option<&'r str> {
    request.headers().get_one("apikey").or_else(|| {
        request
            .headers()
            .get_one("Authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
    })
}

/// Compares without short-circuiting on the first differing byte.
fn keys_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if expected.is_empty() || a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn app_config<'r>(request: &'r Request<'_>) -> Option<&'r AppConfig> {
    let config = request.rocket().state::<AppConfig>();
    if config.is_none() {
        tracing::error!("Application config not found in managed state");
    }
    config
}

/// Read access to the public catalog: the anon key (or the service key).
pub struct PublicApiKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PublicApiKey {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = app_config(request) else {
            return Outcome::Error((Status::InternalServerError, ()));
        };

        match presented_key(request) {
            Some(key)
                if keys_match(key, &config.platform.anon_key)
                    | keys_match(key, &config.platform.service_key) =>
            {
                Outcome::Success(PublicApiKey)
            }
            _ => {
                tracing::warn!(uri = %request.uri(), "Missing or invalid api key");
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}

/// Elevated access: an administrator session, or the service key for
/// server-side tooling.
#[derive(Debug)]
pub enum AdminAccess {
    Session(User),
    ServiceKey,
}

impl AdminAccess {
    pub fn actor(&self) -> &str {
        match self {
            AdminAccess::Session(user) => &user.email,
            AdminAccess::ServiceKey => "service",
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminAccess {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = app_config(request) else {
            return Outcome::Error((Status::InternalServerError, ()));
        };

        if let Some(key) = presented_key(request) {
            if keys_match(key, &config.platform.service_key) {
                return Outcome::Success(AdminAccess::ServiceKey);
            }
        }

        match request.guard::<User>().await {
            Outcome::Success(user) => {
                if is_admin(&user, &config.admin_policy()) {
                    Outcome::Success(AdminAccess::Session(user))
                } else {
                    tracing::warn!(email = %user.email, "Non-administrator attempted an admin action");
                    Outcome::Error((Status::Forbidden, ()))
                }
            }
            Outcome::Forward(_) => Outcome::Error((Status::Unauthorized, ())),
            Outcome::Error(e) => Outcome::Error(e),
        }
    }
}

#[catch(401)]
pub fn unauthorized_api(_req: &Request) -> Custom<Json<ErrorResponse>> {
    Custom(
        Status::Unauthorized,
        Json(ErrorResponse::with_details(
            "Unauthorized",
            "Authentication required",
        )),
    )
}

#[catch(403)]
pub fn forbidden_api(_req: &Request) -> Custom<Json<ErrorResponse>> {
    tracing::warn!("Forbidden access attempt");
    Custom(
        Status::Forbidden,
        Json(ErrorResponse::new("غير مصرح لك بالوصول إلى لوحة التحكم")),
    )
}

#[catch(404)]
pub fn not_found_api(req: &Request) -> Custom<Json<ErrorResponse>> {
    Custom(
        Status::NotFound,
        Json(ErrorResponse::with_details("Not found", req.uri().to_string())),
    )
}
