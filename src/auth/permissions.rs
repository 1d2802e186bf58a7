use rocket::serde::Serialize;
use serde::Deserialize;
use std::fmt;

use crate::error::AppError;

use super::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, AppError> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(AppError::Validation(format!("Unknown role: {}", s))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How an authenticated user is recognised as the administrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminPolicy {
    /// The session email must equal this address (case-insensitive).
    Email(String),
    /// The stored role column decides.
    Role,
}

/// The single authorization decision used at login and on every restored
/// session.
pub fn is_admin(user: &User, policy: &AdminPolicy) -> bool {
    match policy {
        AdminPolicy::Email(address) => user.email.trim().eq_ignore_ascii_case(address.trim()),
        AdminPolicy::Role => user.role == Role::Admin,
    }
}
