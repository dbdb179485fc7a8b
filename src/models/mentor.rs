//! Mentoring models
//!
//! Mentor profiles, slot locks and booked sessions. A slot lock is a short
//! lived reservation of `[start_at, end_at)` that keeps other mentees off a
//! slot while the holder confirms (and pays for) the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Public mentor card, joined with the user's display name
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MentorProfile {
    pub user_id: i64,
    pub display_name: String,
    pub headline: String,
    pub bio: String,
    pub hourly_rate_cents: i64,
    pub accepting_bookings: bool,
    /// Optimistic concurrency counter, bumped on every lock and booking
    #[serde(skip_serializing, default)]
    pub booking_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertMentorProfileInput {
    pub headline: String,
    pub bio: String,
    pub hourly_rate_cents: i64,
    #[serde(default = "default_accepting")]
    pub accepting_bookings: bool,
}

fn default_accepting() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SlotLock {
    /// Opaque token (UUID v4)
    pub id: String,
    pub mentor_id: i64,
    pub mentee_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SlotLock {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_at - self.start_at).num_minutes()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcquireLockInput {
    pub mentor_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmBookingInput {
    /// Reference from the external payment flow, stored verbatim
    pub payment_reference: Option<String>,
    pub note: Option<String>,
}

/// A booked mentoring session
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MentorSession {
    pub id: i64,
    pub mentor_id: i64,
    pub mentee_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub status: BookingStatus,
    pub price_cents: i64,
    pub payment_reference: Option<String>,
    pub note: Option<String>,
    pub cancelled_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MentorSession {
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.mentor_id == user_id || self.mentee_id == user_id
    }

    /// The participant on the other side of `user_id`
    pub fn counterpart(&self, user_id: i64) -> i64 {
        if self.mentor_id == user_id {
            self.mentee_id
        } else {
            self.mentor_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Confirmed,
    Cancelled,
    Completed,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingStatus::Confirmed => write!(f, "confirmed"),
            BookingStatus::Cancelled => write!(f, "cancelled"),
            BookingStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for BookingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            _ => Err(anyhow::anyhow!("Invalid booking status: {}", s)),
        }
    }
}

impl TryFrom<String> for BookingStatus {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Which side of a booking to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Mentor,
    #[default]
    Mentee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyKind {
    Session,
    Lock,
}

/// A time range during which a mentor cannot be booked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub kind: BusyKind,
}

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)`
pub fn overlaps(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Price of a session, rounded down to the cent
pub fn session_price_cents(hourly_rate_cents: i64, minutes: i64) -> i64 {
    hourly_rate_cents.saturating_mul(minutes) / 60
}
