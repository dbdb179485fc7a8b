//! Shared API response types
//!
//! Response structures used by more than one group of endpoints.

use serde::{Deserialize, Serialize};

use crate::models::User;

/// Public view of an account
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub role: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            display_name: user.display_name,
            role: user.role.to_string(),
            status: user.status.to_string(),
            headline: user.headline,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Response for successful authentication
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
}

/// A single counter, e.g. unread notifications or likes
#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: i64,
}

/// Plain acknowledgement for actions without a resource to return
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
