//! Mentoring service
//!
//! Booking is two steps. `acquire_lock` reserves a slot for
//! `booking.lock_ttl_minutes`; `confirm_booking` turns the lock into a
//! priced session. Both run in one database transaction that ends with an
//! optimistic bump of the mentor's `booking_version`, so two concurrent
//! bookings of one mentor cannot both commit.

use crate::cache::MemoryCache;
use crate::config::BookingConfig;
use crate::db::repositories::{ConfirmOutcome, LockOutcome, MentoringRepository};
use crate::models::{
    AcquireLockInput, BookingStatus, BusyInterval, ConfirmBookingInput, MentorProfile,
    MentorSession, NewNotification, NotificationKind, ParticipantRole, SlotLock,
    UpsertMentorProfileInput, User,
};
use crate::services::notification::NotificationService;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Every cached view of the mentor directory lives under this prefix
pub const DIRECTORY_CACHE_PREFIX: &str = "mentors:";
const DIRECTORY_CACHE_KEY: &str = "mentors:accepting";
const MAX_HEADLINE_LEN: usize = 200;
const MAX_BIO_LEN: usize = 5000;
const MAX_NOTE_LEN: usize = 1000;
const MAX_BUSY_RANGE_DAYS: i64 = 62;

#[derive(Debug, thiserror::Error)]
pub enum MentoringServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct MentoringService {
    repo: Arc<dyn MentoringRepository>,
    notifications: Arc<NotificationService>,
    cache: Arc<MemoryCache>,
    config: BookingConfig,
}

impl MentoringService {
    pub fn new(
        repo: Arc<dyn MentoringRepository>,
        notifications: Arc<NotificationService>,
        cache: Arc<MemoryCache>,
        config: BookingConfig,
    ) -> Self {
        Self {
            repo,
            notifications,
            cache,
            config,
        }
    }

    /// Create or update the caller's mentor profile
    pub async fn upsert_profile(
        &self,
        user: &User,
        input: UpsertMentorProfileInput,
    ) -> Result<MentorProfile, MentoringServiceError> {
        let input = UpsertMentorProfileInput {
            headline: input.headline.trim().to_string(),
            bio: input.bio.trim().to_string(),
            ..input
        };
        if input.headline.is_empty() || input.headline.chars().count() > MAX_HEADLINE_LEN {
            return Err(MentoringServiceError::ValidationError(format!(
                "Headline must be 1-{} characters",
                MAX_HEADLINE_LEN
            )));
        }
        if input.bio.chars().count() > MAX_BIO_LEN {
            return Err(MentoringServiceError::ValidationError(format!(
                "Bio must be at most {} characters",
                MAX_BIO_LEN
            )));
        }
        if input.hourly_rate_cents < 0 {
            return Err(MentoringServiceError::ValidationError(
                "Hourly rate cannot be negative".to_string(),
            ));
        }

        self.repo.upsert_profile(user.id, &input, Utc::now()).await?;
        self.cache.delete(DIRECTORY_CACHE_KEY).await;
        tracing::info!(mentor_id = user.id, accepting = input.accepting_bookings, "Mentor profile saved");

        self.get_profile(user.id).await
    }

    /// Mentors accepting bookings, served from the cache when warm
    pub async fn list_mentors(&self) -> Result<Vec<MentorProfile>, MentoringServiceError> {
        match self.cache.get::<Vec<MentorProfile>>(DIRECTORY_CACHE_KEY).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => tracing::warn!("Ignoring unreadable mentor directory cache: {}", e),
        }

        let mentors = self.repo.list_accepting().await?;
        if let Err(e) = self.cache.set(DIRECTORY_CACHE_KEY, &mentors).await {
            tracing::warn!("Failed to cache mentor directory: {}", e);
        }
        Ok(mentors)
    }

    pub async fn get_profile(&self, mentor_id: i64) -> Result<MentorProfile, MentoringServiceError> {
        self.repo
            .get_profile(mentor_id)
            .await?
            .ok_or(MentoringServiceError::NotFound("Mentor"))
    }

    pub async fn busy_intervals(
        &self,
        mentor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, MentoringServiceError> {
        if to <= from {
            return Err(MentoringServiceError::ValidationError(
                "'to' must be after 'from'".to_string(),
            ));
        }
        if to - from > Duration::days(MAX_BUSY_RANGE_DAYS) {
            return Err(MentoringServiceError::ValidationError(format!(
                "Range cannot exceed {} days",
                MAX_BUSY_RANGE_DAYS
            )));
        }
        self.get_profile(mentor_id).await?;
        Ok(self
            .repo
            .busy_intervals(mentor_id, from, to, Utc::now())
            .await?)
    }

    /// Reserve `[start_at, end_at)` with the mentor for the caller
    pub async fn acquire_lock(
        &self,
        mentee: &User,
        input: AcquireLockInput,
    ) -> Result<SlotLock, MentoringServiceError> {
        let now = Utc::now();
        self.validate_slot(mentee, &input, now)?;

        let outcome = self
            .repo
            .acquire_lock(
                mentee.id,
                input.mentor_id,
                input.start_at,
                input.end_at,
                Duration::minutes(self.config.lock_ttl_minutes),
                now,
            )
            .await?;

        match outcome {
            LockOutcome::Acquired(lock) => {
                tracing::info!(
                    lock_id = %lock.id,
                    mentor_id = lock.mentor_id,
                    mentee_id = lock.mentee_id,
                    "Slot locked"
                );
                Ok(lock)
            }
            LockOutcome::MentorNotFound => Err(MentoringServiceError::NotFound("Mentor")),
            LockOutcome::NotAccepting => Err(MentoringServiceError::ValidationError(
                "Mentor is not accepting bookings".to_string(),
            )),
            LockOutcome::SlotUnavailable => {
                tracing::info!(mentor_id = input.mentor_id, "Slot unavailable");
                Err(MentoringServiceError::Conflict("Slot unavailable"))
            }
            LockOutcome::VersionConflict => {
                tracing::warn!(mentor_id = input.mentor_id, "Concurrent booking detected");
                Err(MentoringServiceError::Conflict("Concurrent booking, please retry"))
            }
        }
    }

    /// Turn the caller's lock into a confirmed session and notify the mentor
    pub async fn confirm_booking(
        &self,
        mentee: &User,
        lock_id: &str,
        input: ConfirmBookingInput,
    ) -> Result<MentorSession, MentoringServiceError> {
        let note = input
            .note
            .as_deref()
            .map(str::trim)
            .filter(|note| !note.is_empty());
        if note.is_some_and(|note| note.chars().count() > MAX_NOTE_LEN) {
            return Err(MentoringServiceError::ValidationError(format!(
                "Note must be at most {} characters",
                MAX_NOTE_LEN
            )));
        }
        let payment_reference = input
            .payment_reference
            .as_deref()
            .filter(|reference| !reference.is_empty());

        let outcome = self
            .repo
            .confirm_lock(mentee.id, lock_id, payment_reference, note, Utc::now())
            .await?;

        let session = match outcome {
            ConfirmOutcome::Confirmed(session) => session,
            ConfirmOutcome::NotFound => return Err(MentoringServiceError::NotFound("Slot lock")),
            ConfirmOutcome::NotOwner => {
                return Err(MentoringServiceError::Forbidden(
                    "This slot lock belongs to someone else",
                ))
            }
            ConfirmOutcome::Expired => return Err(MentoringServiceError::Conflict("Slot lock expired")),
            ConfirmOutcome::VersionConflict => {
                tracing::warn!(lock_id = %lock_id, "Concurrent booking detected on confirm");
                return Err(MentoringServiceError::Conflict("Concurrent booking, please retry"));
            }
        };

        tracing::info!(
            session_id = session.id,
            mentor_id = session.mentor_id,
            price_cents = session.price_cents,
            "Booking confirmed"
        );
        self.notifications
            .notify_quietly(NewNotification {
                user_id: session.mentor_id,
                kind: NotificationKind::BookingConfirmed,
                group_key: format!("booking:{}", session.id),
                title: format!("{} booked a session with you", mentee.display_name),
                body: format!(
                    "{} to {} (UTC)",
                    session.start_at.format("%Y-%m-%d %H:%M"),
                    session.end_at.format("%H:%M")
                ),
                link: Some(format!("/bookings/{}", session.id)),
            })
            .await;

        Ok(session)
    }

    /// Give up a lock; releasing a lock that is already gone is fine
    pub async fn release_lock(&self, mentee: &User, lock_id: &str) -> Result<(), MentoringServiceError> {
        if self.repo.release_lock(mentee.id, lock_id).await? {
            tracing::debug!(lock_id = %lock_id, "Slot lock released");
        }
        Ok(())
    }

    pub async fn release_expired_locks(&self) -> Result<u64, MentoringServiceError> {
        let removed = self.repo.delete_expired_locks(Utc::now()).await?;
        if removed > 0 {
            tracing::info!(removed, "Released expired slot locks");
        }
        Ok(removed)
    }

    /// Cancel a confirmed session that has not started; either side may
    pub async fn cancel_session(
        &self,
        user: &User,
        session_id: i64,
    ) -> Result<MentorSession, MentoringServiceError> {
        let session = self.get_session(session_id).await?;
        if !session.is_participant(user.id) {
            return Err(MentoringServiceError::Forbidden(
                "Only participants can cancel a session",
            ));
        }
        if session.status != BookingStatus::Confirmed {
            return Err(MentoringServiceError::Conflict(
                "Only confirmed sessions can be cancelled",
            ));
        }
        let now = Utc::now();
        if session.start_at <= now {
            return Err(MentoringServiceError::Conflict("Session has already started"));
        }

        if !self
            .repo
            .transition_session(session.id, BookingStatus::Confirmed, BookingStatus::Cancelled, Some(user.id), now)
            .await?
        {
            return Err(MentoringServiceError::Conflict("Session was changed concurrently"));
        }

        tracing::info!(session_id, by = user.id, "Session cancelled");
        self.notifications
            .notify_quietly(NewNotification {
                user_id: session.counterpart(user.id),
                kind: NotificationKind::BookingCancelled,
                group_key: format!("booking:{}", session.id),
                title: format!("{} cancelled your session", user.display_name),
                body: format!(
                    "The session on {} (UTC) will not take place",
                    session.start_at.format("%Y-%m-%d %H:%M")
                ),
                link: Some(format!("/bookings/{}", session.id)),
            })
            .await;

        self.get_session(session_id).await
    }

    /// Mentor marks a finished session as completed
    pub async fn complete_session(
        &self,
        mentor: &User,
        session_id: i64,
    ) -> Result<MentorSession, MentoringServiceError> {
        let session = self.get_session(session_id).await?;
        if session.mentor_id != mentor.id {
            return Err(MentoringServiceError::Forbidden(
                "Only the mentor can complete a session",
            ));
        }
        if session.status != BookingStatus::Confirmed {
            return Err(MentoringServiceError::Conflict(
                "Only confirmed sessions can be completed",
            ));
        }
        let now = Utc::now();
        if now < session.end_at {
            return Err(MentoringServiceError::ValidationError(
                "Session has not ended yet".to_string(),
            ));
        }
        if !self
            .repo
            .transition_session(session.id, BookingStatus::Confirmed, BookingStatus::Completed, None, now)
            .await?
        {
            return Err(MentoringServiceError::Conflict("Session was changed concurrently"));
        }
        self.get_session(session_id).await
    }

    pub async fn list_sessions(
        &self,
        user: &User,
        role: ParticipantRole,
    ) -> Result<Vec<MentorSession>, MentoringServiceError> {
        Ok(self.repo.list_sessions(user.id, role).await?)
    }

    async fn get_session(&self, id: i64) -> Result<MentorSession, MentoringServiceError> {
        self.repo
            .get_session(id)
            .await?
            .ok_or(MentoringServiceError::NotFound("Session"))
    }

    fn validate_slot(
        &self,
        mentee: &User,
        input: &AcquireLockInput,
        now: DateTime<Utc>,
    ) -> Result<(), MentoringServiceError> {
        let invalid = |msg: String| -> Result<(), MentoringServiceError> {
            Err(MentoringServiceError::ValidationError(msg))
        };

        if input.mentor_id == mentee.id {
            return invalid("You cannot book a session with yourself".to_string());
        }
        if input.end_at <= input.start_at {
            return invalid("Session must end after it starts".to_string());
        }
        let minutes = (input.end_at - input.start_at).num_minutes();
        if minutes < self.config.min_duration_minutes || minutes > self.config.max_duration_minutes {
            return invalid(format!(
                "Session length must be between {} and {} minutes",
                self.config.min_duration_minutes, self.config.max_duration_minutes
            ));
        }
        if input.start_at < now + Duration::minutes(self.config.min_notice_minutes) {
            return invalid(format!(
                "Sessions must be booked at least {} minutes in advance",
                self.config.min_notice_minutes
            ));
        }
        Ok(())
    }
}
