//! Mentoring repository
//!
//! Profiles, slot locks and booked sessions. Locking and confirming run in a
//! single transaction each and finish with an optimistic
//! `booking_version` bump on the mentor profile: two writers that read the
//! same version cannot both commit. A writer that loses on lock contention
//! reports a version conflict rather than an error.

use crate::config::DatabaseDriver;
use crate::db::{with_pool, DynDatabasePool};
use crate::models::{
    session_price_cents, BookingStatus, BusyInterval, BusyKind, MentorProfile, MentorSession,
    ParticipantRole, SlotLock, UpsertMentorProfileInput,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

const PROFILE_SELECT: &str = "SELECT p.user_id, u.display_name, p.headline, p.bio, \
     p.hourly_rate_cents, p.accepting_bookings, p.booking_version, p.created_at, p.updated_at \
     FROM mentor_profiles p JOIN users u ON u.id = p.user_id";

const SESSION_COLUMNS: &str = "id, mentor_id, mentee_id, start_at, end_at, status, price_cents, \
     payment_reference, note, cancelled_by, created_at, updated_at";

const LOCK_COLUMNS: &str = "id, mentor_id, mentee_id, start_at, end_at, expires_at, created_at";

type Span = (DateTime<Utc>, DateTime<Utc>);

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// No-op write on the mentor row
const CLAIM_MENTOR: &str =
    "UPDATE mentor_profiles SET booking_version = booking_version WHERE user_id = $1";
const CLAIM_LOCK_MENTOR: &str = "UPDATE mentor_profiles SET booking_version = booking_version \
     WHERE user_id = (SELECT mentor_id FROM slot_locks WHERE id = $1)";

/// Result of trying to lock a slot
#[derive(Debug)]
pub enum LockOutcome {
    Acquired(SlotLock),
    MentorNotFound,
    NotAccepting,
    /// A confirmed session or a live lock overlaps the range
    SlotUnavailable,
    /// Another booking for the same mentor committed first
    VersionConflict,
}

/// Result of turning a lock into a booked session
#[derive(Debug)]
pub enum ConfirmOutcome {
    Confirmed(MentorSession),
    NotFound,
    NotOwner,
    /// The lock had expired; it has been removed
    Expired,
    VersionConflict,
}

#[async_trait]
pub trait MentoringRepository: Send + Sync {
    async fn upsert_profile(
        &self,
        user_id: i64,
        input: &UpsertMentorProfileInput,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_profile(&self, user_id: i64) -> Result<Option<MentorProfile>>;

    /// Mentors currently accepting bookings, by display name
    async fn list_accepting(&self) -> Result<Vec<MentorProfile>>;

    /// Confirmed sessions and live locks overlapping `[from, to)`, by start
    async fn busy_intervals(
        &self,
        mentor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>>;

    async fn acquire_lock(
        &self,
        mentee_id: i64,
        mentor_id: i64,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome>;

    async fn get_lock(&self, id: &str) -> Result<Option<SlotLock>>;

    async fn confirm_lock(
        &self,
        mentee_id: i64,
        lock_id: &str,
        payment_reference: Option<&str>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome>;

    /// Delete a lock held by `mentee_id`; false if there was none
    async fn release_lock(&self, mentee_id: i64, lock_id: &str) -> Result<bool>;

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn get_session(&self, id: i64) -> Result<Option<MentorSession>>;

    /// Move a session from `from` to `to`. Returns false when the session
    /// was no longer in `from`.
    async fn transition_session(
        &self,
        id: i64,
        from: BookingStatus,
        to: BookingStatus,
        cancelled_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn list_sessions(&self, user_id: i64, role: ParticipantRole)
        -> Result<Vec<MentorSession>>;
}

pub struct SqlxMentoringRepository {
    pool: DynDatabasePool,
}

impl SqlxMentoringRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn MentoringRepository> {
        Arc::new(Self::new(pool))
    }

    /// SQLite upgrades a reading transaction to a writer only if no other
    /// writer got in first, so booking transactions there open with a write.
    fn claims_writer_first(&self) -> bool {
        self.pool.driver() == DatabaseDriver::Sqlite
    }

    /// Busy/locked on SQLite, serialization failure or deadlock on PostgreSQL
    fn is_write_contention(&self, err: &anyhow::Error) -> bool {
        let Some(sqlx::Error::Database(db)) = err.downcast_ref::<sqlx::Error>() else {
            return false;
        };
        let Some(code) = db.code() else {
            return false;
        };
        match self.pool.driver() {
            DatabaseDriver::Sqlite => code
                .parse::<i32>()
                .is_ok_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
            DatabaseDriver::Postgres => matches!(&*code, "40001" | "40P01"),
        }
    }

    async fn lock_slot(
        &self,
        mentee_id: i64,
        mentor_id: i64,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome> {
        let claim_first = self.claims_writer_first();
        let outcome = with_pool!(self.pool, |conn| {
            let mut tx = conn.begin().await.context("Failed to begin transaction")?;

            if claim_first {
                sqlx::query(CLAIM_MENTOR)
                    .bind(mentor_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to claim mentor profile")?;
            }

            let profile: Option<(i64, bool)> = sqlx::query_as(
                "SELECT booking_version, accepting_bookings FROM mentor_profiles WHERE user_id = $1",
            )
            .bind(mentor_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to read booking version")?;
            let version = match profile {
                None => return Ok(LockOutcome::MentorNotFound),
                Some((_, false)) => return Ok(LockOutcome::NotAccepting),
                Some((version, true)) => version,
            };

            sqlx::query("DELETE FROM slot_locks WHERE mentor_id = $1 AND expires_at <= $2")
                .bind(mentor_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to purge expired locks")?;

            let booked: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM mentor_sessions \
                 WHERE mentor_id = $1 AND status = $2 AND start_at < $3 AND end_at > $4",
            )
            .bind(mentor_id)
            .bind(BookingStatus::Confirmed.to_string())
            .bind(end_at)
            .bind(start_at)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to check booked sessions")?;
            let locked: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM slot_locks \
                 WHERE mentor_id = $1 AND expires_at > $2 AND start_at < $3 AND end_at > $4",
            )
            .bind(mentor_id)
            .bind(now)
            .bind(end_at)
            .bind(start_at)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to check slot locks")?;
            if booked + locked > 0 {
                return Ok(LockOutcome::SlotUnavailable);
            }

            let lock = SlotLock {
                id: uuid::Uuid::new_v4().to_string(),
                mentor_id,
                mentee_id,
                start_at,
                end_at,
                expires_at: now + ttl,
                created_at: now,
            };
            sqlx::query(
                "INSERT INTO slot_locks (id, mentor_id, mentee_id, start_at, end_at, expires_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(&lock.id)
            .bind(lock.mentor_id)
            .bind(lock.mentee_id)
            .bind(lock.start_at)
            .bind(lock.end_at)
            .bind(lock.expires_at)
            .bind(lock.created_at)
            .execute(&mut *tx)
            .await
            .context("Failed to insert slot lock")?;

            let bumped = sqlx::query(
                "UPDATE mentor_profiles SET booking_version = $1 WHERE user_id = $2 AND booking_version = $3",
            )
            .bind(version + 1)
            .bind(mentor_id)
            .bind(version)
            .execute(&mut *tx)
            .await
            .context("Failed to bump booking version")?
            .rows_affected();
            if bumped == 0 {
                return Ok(LockOutcome::VersionConflict);
            }

            tx.commit().await.context("Failed to commit slot lock")?;
            LockOutcome::Acquired(lock)
        });
        Ok(outcome)
    }

    async fn confirm_slot(
        &self,
        mentee_id: i64,
        lock_id: &str,
        payment_reference: Option<&str>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome> {
        let lock_sql = format!("SELECT {} FROM slot_locks WHERE id = $1", LOCK_COLUMNS);
        let claim_first = self.claims_writer_first();
        let outcome = with_pool!(self.pool, |conn| {
            let mut tx = conn.begin().await.context("Failed to begin transaction")?;

            if claim_first {
                sqlx::query(CLAIM_LOCK_MENTOR)
                    .bind(lock_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to claim mentor profile")?;
            }

            let lock: Option<SlotLock> = sqlx::query_as(&lock_sql)
                .bind(lock_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to load slot lock")?;
            let lock = match lock {
                None => return Ok(ConfirmOutcome::NotFound),
                Some(lock) if lock.mentee_id != mentee_id => return Ok(ConfirmOutcome::NotOwner),
                Some(lock) => lock,
            };

            if lock.is_expired_at(now) {
                sqlx::query("DELETE FROM slot_locks WHERE id = $1")
                    .bind(&lock.id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to delete expired lock")?;
                tx.commit().await.context("Failed to commit lock removal")?;
                return Ok(ConfirmOutcome::Expired);
            }

            let profile: Option<(i64, i64)> = sqlx::query_as(
                "SELECT booking_version, hourly_rate_cents FROM mentor_profiles WHERE user_id = $1",
            )
            .bind(lock.mentor_id)
            .fetch_optional(&mut *tx)
            .await
            .context("Failed to read booking version")?;
            let Some((version, hourly_rate_cents)) = profile else {
                return Ok(ConfirmOutcome::NotFound);
            };

            let price_cents = session_price_cents(hourly_rate_cents, lock.duration_minutes());
            let status = BookingStatus::Confirmed;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO mentor_sessions (mentor_id, mentee_id, start_at, end_at, status, \
                 price_cents, payment_reference, note, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
            )
            .bind(lock.mentor_id)
            .bind(lock.mentee_id)
            .bind(lock.start_at)
            .bind(lock.end_at)
            .bind(status.to_string())
            .bind(price_cents)
            .bind(payment_reference)
            .bind(note)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to insert mentor session")?;

            sqlx::query("DELETE FROM slot_locks WHERE id = $1")
                .bind(&lock.id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete confirmed lock")?;

            let bumped = sqlx::query(
                "UPDATE mentor_profiles SET booking_version = $1 WHERE user_id = $2 AND booking_version = $3",
            )
            .bind(version + 1)
            .bind(lock.mentor_id)
            .bind(version)
            .execute(&mut *tx)
            .await
            .context("Failed to bump booking version")?
            .rows_affected();
            if bumped == 0 {
                return Ok(ConfirmOutcome::VersionConflict);
            }

            tx.commit().await.context("Failed to commit booking")?;

            ConfirmOutcome::Confirmed(MentorSession {
                id,
                mentor_id: lock.mentor_id,
                mentee_id: lock.mentee_id,
                start_at: lock.start_at,
                end_at: lock.end_at,
                status,
                price_cents,
                payment_reference: payment_reference.map(str::to_string),
                note: note.map(str::to_string),
                cancelled_by: None,
                created_at: now,
                updated_at: now,
            })
        });
        Ok(outcome)
    }
}

#[async_trait]
impl MentoringRepository for SqlxMentoringRepository {
    async fn upsert_profile(
        &self,
        user_id: i64,
        input: &UpsertMentorProfileInput,
        now: DateTime<Utc>,
    ) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO mentor_profiles (user_id, headline, bio, hourly_rate_cents, \
                 accepting_bookings, booking_version, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, 0, $6, $7) \
                 ON CONFLICT (user_id) DO UPDATE SET headline = excluded.headline, \
                 bio = excluded.bio, hourly_rate_cents = excluded.hourly_rate_cents, \
                 accepting_bookings = excluded.accepting_bookings, updated_at = excluded.updated_at",
            )
            .bind(user_id)
            .bind(&input.headline)
            .bind(&input.bio)
            .bind(input.hourly_rate_cents)
            .bind(input.accepting_bookings)
            .bind(now)
            .bind(now)
            .execute(conn)
            .await
            .context("Failed to upsert mentor profile")?;
        });
        Ok(())
    }

    async fn get_profile(&self, user_id: i64) -> Result<Option<MentorProfile>> {
        let sql = format!("{} WHERE p.user_id = $1", PROFILE_SELECT);
        let profile = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, MentorProfile>(&sql)
                .bind(user_id)
                .fetch_optional(conn)
                .await
                .context("Failed to get mentor profile")?
        });
        Ok(profile)
    }

    async fn list_accepting(&self) -> Result<Vec<MentorProfile>> {
        let sql = format!(
            "{} WHERE p.accepting_bookings = $1 AND u.status = $2 ORDER BY u.display_name ASC, p.user_id ASC",
            PROFILE_SELECT
        );
        let profiles = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, MentorProfile>(&sql)
                .bind(true)
                .bind("active")
                .fetch_all(conn)
                .await
                .context("Failed to list mentors")?
        });
        Ok(profiles)
    }

    async fn busy_intervals(
        &self,
        mentor_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>> {
        let (sessions, locks): (Vec<Span>, Vec<Span>) =
            with_pool!(self.pool, |conn| {
                let sessions: Vec<Span> = sqlx::query_as(
                    "SELECT start_at, end_at FROM mentor_sessions \
                     WHERE mentor_id = $1 AND status = $2 AND start_at < $3 AND end_at > $4",
                )
                .bind(mentor_id)
                .bind(BookingStatus::Confirmed.to_string())
                .bind(to)
                .bind(from)
                .fetch_all(conn)
                .await
                .context("Failed to load booked sessions")?;
                let locks: Vec<Span> = sqlx::query_as(
                    "SELECT start_at, end_at FROM slot_locks \
                     WHERE mentor_id = $1 AND expires_at > $2 AND start_at < $3 AND end_at > $4",
                )
                .bind(mentor_id)
                .bind(now)
                .bind(to)
                .bind(from)
                .fetch_all(conn)
                .await
                .context("Failed to load slot locks")?;
                (sessions, locks)
            });

        let mut intervals: Vec<BusyInterval> = sessions
            .into_iter()
            .map(|(start_at, end_at)| BusyInterval {
                start_at,
                end_at,
                kind: BusyKind::Session,
            })
            .chain(locks.into_iter().map(|(start_at, end_at)| BusyInterval {
                start_at,
                end_at,
                kind: BusyKind::Lock,
            }))
            .collect();
        intervals.sort_by_key(|i| i.start_at);
        Ok(intervals)
    }

    async fn acquire_lock(
        &self,
        mentee_id: i64,
        mentor_id: i64,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome> {
        match self
            .lock_slot(mentee_id, mentor_id, start_at, end_at, ttl, now)
            .await
        {
            Err(err) if self.is_write_contention(&err) => {
                tracing::warn!(mentor_id, error = %err, "Slot lock lost to a concurrent booking");
                Ok(LockOutcome::VersionConflict)
            }
            result => result,
        }
    }

    async fn get_lock(&self, id: &str) -> Result<Option<SlotLock>> {
        let sql = format!("SELECT {} FROM slot_locks WHERE id = $1", LOCK_COLUMNS);
        let lock = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, SlotLock>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get slot lock")?
        });
        Ok(lock)
    }

    async fn confirm_lock(
        &self,
        mentee_id: i64,
        lock_id: &str,
        payment_reference: Option<&str>,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome> {
        match self
            .confirm_slot(mentee_id, lock_id, payment_reference, note, now)
            .await
        {
            Err(err) if self.is_write_contention(&err) => {
                tracing::warn!(lock_id, error = %err, "Booking lost to a concurrent booking");
                Ok(ConfirmOutcome::VersionConflict)
            }
            result => result,
        }
    }

    async fn release_lock(&self, mentee_id: i64, lock_id: &str) -> Result<bool> {
        let removed = with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM slot_locks WHERE id = $1 AND mentee_id = $2")
                .bind(lock_id)
                .bind(mentee_id)
                .execute(conn)
                .await
                .context("Failed to release slot lock")?
                .rows_affected()
        });
        Ok(removed > 0)
    }

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64> {
        let removed = with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM slot_locks WHERE expires_at <= $1")
                .bind(now)
                .execute(conn)
                .await
                .context("Failed to release expired locks")?
                .rows_affected()
        });
        Ok(removed)
    }

    async fn get_session(&self, id: i64) -> Result<Option<MentorSession>> {
        let sql = format!("SELECT {} FROM mentor_sessions WHERE id = $1", SESSION_COLUMNS);
        let session = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, MentorSession>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get mentor session")?
        });
        Ok(session)
    }

    async fn transition_session(
        &self,
        id: i64,
        from: BookingStatus,
        to: BookingStatus,
        cancelled_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE mentor_sessions SET status = $1, cancelled_by = $2, updated_at = $3 \
                 WHERE id = $4 AND status = $5",
            )
            .bind(to.to_string())
            .bind(cancelled_by)
            .bind(now)
            .bind(id)
            .bind(from.to_string())
            .execute(conn)
            .await
            .context("Failed to update mentor session status")?
            .rows_affected()
        });
        Ok(affected == 1)
    }

    async fn list_sessions(
        &self,
        user_id: i64,
        role: ParticipantRole,
    ) -> Result<Vec<MentorSession>> {
        let column = match role {
            ParticipantRole::Mentor => "mentor_id",
            ParticipantRole::Mentee => "mentee_id",
        };
        let sql = format!(
            "SELECT {} FROM mentor_sessions WHERE {} = $1 ORDER BY start_at ASC",
            SESSION_COLUMNS, column
        );
        let sessions = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, MentorSession>(&sql)
                .bind(user_id)
                .fetch_all(conn)
                .await
                .context("Failed to list mentor sessions")?
        });
        Ok(sessions)
    }
}
