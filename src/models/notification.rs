//! Notification models
//!
//! Notifications are grouped per `(user_id, group_key)`: a burst of similar
//! events (ten likes on one post) collapses into one row whose `count`
//! grows. `deliver_after` carries the quiet-hours deferral for push.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    #[sqlx(try_from = "String")]
    pub kind: NotificationKind,
    pub group_key: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    /// Number of events folded into this notification
    pub count: i64,
    pub read_at: Option<DateTime<Utc>>,
    /// Earliest instant push delivery may happen
    pub deliver_after: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    BookingCancelled,
    PostComment,
    PostLike,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::PostComment => "post_comment",
            NotificationKind::PostLike => "post_like",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booking_confirmed" => Ok(NotificationKind::BookingConfirmed),
            "booking_cancelled" => Ok(NotificationKind::BookingCancelled),
            "post_comment" => Ok(NotificationKind::PostComment),
            "post_like" => Ok(NotificationKind::PostLike),
            _ => Err(anyhow::anyhow!("Invalid notification kind: {}", s)),
        }
    }
}

impl TryFrom<String> for NotificationKind {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An event to be recorded for a user
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub group_key: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

/// Per-user push preferences
///
/// Quiet hours are minutes of the local day; `utc_offset_minutes` converts
/// UTC to local time. Both bounds unset (or equal) means no quiet hours.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationPreferences {
    pub user_id: i64,
    pub push_enabled: bool,
    pub quiet_start_minute: Option<i64>,
    pub quiet_end_minute: Option<i64>,
    pub utc_offset_minutes: i64,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreferences {
    pub fn defaults_for(user_id: i64) -> Self {
        Self {
            user_id,
            push_enabled: true,
            quiet_start_minute: None,
            quiet_end_minute: None,
            utc_offset_minutes: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePreferencesInput {
    pub push_enabled: bool,
    pub quiet_start_minute: Option<i64>,
    pub quiet_end_minute: Option<i64>,
    #[serde(default)]
    pub utc_offset_minutes: i64,
}
