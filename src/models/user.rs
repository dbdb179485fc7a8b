//! User model
//!
//! Registered members of the platform. Roles decide what a user may
//! administer; status decides whether they may sign in at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    /// Email address (unique, stored lowercased)
    pub email: String,
    pub display_name: String,
    /// Password hash (argon2 PHC string)
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[sqlx(try_from = "String")]
    pub role: UserRole,
    #[sqlx(try_from = "String")]
    pub status: UserStatus,
    /// Short professional headline shown on posts and mentor cards
    pub headline: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_banned(&self) -> bool {
        self.status == UserStatus::Banned
    }

    /// Admins may moderate anything; everyone else only what they own.
    pub fn can_moderate(&self, owner_id: i64) -> bool {
        self.is_admin() || self.id == owner_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    Member,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Member => write!(f, "member"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "member" => Ok(UserRole::Member),
            _ => Err(anyhow::anyhow!("Invalid user role: {}", s)),
        }
    }
}

impl TryFrom<String> for UserRole {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Account state
///
/// Banned users cannot sign in and lose their sessions when banned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Banned,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Banned => write!(f, "banned"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            _ => Err(anyhow::anyhow!("Invalid user status: {}", s)),
        }
    }
}

impl TryFrom<String> for UserStatus {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Input for registering a new account (plaintext password)
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

/// Row values for inserting a user once the password is hashed
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: UserRole,
}

/// Profile fields a user may change about themselves
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileInput {
    pub display_name: Option<String>,
    /// `Some("")` clears the headline
    pub headline: Option<String>,
}
