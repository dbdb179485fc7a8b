//! Notification service
//!
//! Events are grouped: while an unread notification with the same
//! `(user, group_key)` was touched within the grouping window, new events
//! bump its count instead of adding rows. Push delivery honours the
//! recipient's quiet hours by scheduling `deliver_after` at the end of the
//! quiet window.

use crate::db::repositories::NotificationRepository;
use crate::models::{
    ListParams, NewNotification, Notification, NotificationPreferences, PagedResult,
    UpdatePreferencesInput,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;

const MINUTES_PER_DAY: i64 = 24 * 60;
const MIN_UTC_OFFSET: i64 = -12 * 60;
const MAX_UTC_OFFSET: i64 = 14 * 60;
const DISPATCH_BATCH: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum NotificationServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Notification not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Outbound push channel
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn push(&self, notification: &Notification) -> Result<()>;
}

/// Push sender that only logs
pub struct LogPushSender;

#[async_trait]
impl PushSender for LogPushSender {
    async fn push(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            user_id = notification.user_id,
            kind = %notification.kind,
            count = notification.count,
            "push: {}",
            notification.title
        );
        Ok(())
    }
}

/// When a notification created at `now` may be pushed.
///
/// Quiet hours are `[start, end)` in minutes of the recipient's local day,
/// local time being UTC shifted by `offset_minutes`. The window may wrap
/// midnight; `start == end` means no quiet hours.
pub fn quiet_hours_release(
    now: DateTime<Utc>,
    start_minute: i64,
    end_minute: i64,
    offset_minutes: i64,
) -> DateTime<Utc> {
    if start_minute == end_minute {
        return now;
    }

    let local = now + Duration::minutes(offset_minutes);
    let secs = i64::from(local.num_seconds_from_midnight());
    let start = start_minute * 60;
    let end = end_minute * 60;

    let quiet = if start < end {
        secs >= start && secs < end
    } else {
        secs >= start || secs < end
    };
    if !quiet {
        return now;
    }

    let wait = if end > secs {
        end - secs
    } else {
        MINUTES_PER_DAY * 60 - secs + end
    };
    // whole-second release, sub-second part of `now` dropped
    now - Duration::nanoseconds(i64::from(local.nanosecond() % 1_000_000_000))
        + Duration::seconds(wait)
}

/// `deliver_after` for a recipient with these preferences
pub fn delivery_time(prefs: &NotificationPreferences, now: DateTime<Utc>) -> DateTime<Utc> {
    match (prefs.quiet_start_minute, prefs.quiet_end_minute) {
        (Some(start), Some(end)) if prefs.push_enabled => {
            quiet_hours_release(now, start, end, prefs.utc_offset_minutes)
        }
        _ => now,
    }
}

pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
    push: Arc<dyn PushSender>,
    group_window: Duration,
}

impl NotificationService {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        push: Arc<dyn PushSender>,
        group_window_minutes: i64,
    ) -> Self {
        Self {
            repo,
            push,
            group_window: Duration::minutes(group_window_minutes),
        }
    }

    /// Record an event for a user, grouping it with a recent unread one
    pub async fn notify(
        &self,
        input: NewNotification,
    ) -> Result<Notification, NotificationServiceError> {
        let now = Utc::now();
        let prefs = self.get_preferences(input.user_id).await?;
        let deliver_after = delivery_time(&prefs, now);

        let id = match self
            .repo
            .find_groupable(input.user_id, &input.group_key, now - self.group_window)
            .await?
        {
            Some(existing) => {
                self.repo.bump(existing.id, &input, deliver_after, now).await?;
                existing.id
            }
            None => self.repo.insert(&input, deliver_after, now).await?,
        };

        tracing::debug!(
            user_id = input.user_id,
            group_key = %input.group_key,
            notification_id = id,
            "Notification recorded"
        );
        self.repo
            .get_by_id(id)
            .await?
            .ok_or(NotificationServiceError::NotFound)
    }

    /// Best-effort variant used by other services; failures are logged
    pub async fn notify_quietly(&self, input: NewNotification) {
        let user_id = input.user_id;
        if let Err(e) = self.notify(input).await {
            tracing::error!(user_id, "Failed to record notification: {}", e);
        }
    }

    pub async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        params: ListParams,
    ) -> Result<PagedResult<Notification>, NotificationServiceError> {
        let (items, total) = self.repo.list(user_id, unread_only, &params).await?;
        Ok(PagedResult::new(items, total, &params))
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64, NotificationServiceError> {
        Ok(self.repo.unread_count(user_id).await?)
    }

    pub async fn mark_read(&self, user_id: i64, id: i64) -> Result<(), NotificationServiceError> {
        if !self.repo.mark_read(user_id, id, Utc::now()).await? {
            return Err(NotificationServiceError::NotFound);
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, NotificationServiceError> {
        Ok(self.repo.mark_all_read(user_id, Utc::now()).await?)
    }

    pub async fn get_preferences(
        &self,
        user_id: i64,
    ) -> Result<NotificationPreferences, NotificationServiceError> {
        Ok(self
            .repo
            .get_preferences(user_id)
            .await?
            .unwrap_or_else(|| NotificationPreferences::defaults_for(user_id)))
    }

    pub async fn update_preferences(
        &self,
        user_id: i64,
        input: UpdatePreferencesInput,
    ) -> Result<NotificationPreferences, NotificationServiceError> {
        validate_preferences(&input)?;

        let prefs = NotificationPreferences {
            user_id,
            push_enabled: input.push_enabled,
            quiet_start_minute: input.quiet_start_minute,
            quiet_end_minute: input.quiet_end_minute,
            utc_offset_minutes: input.utc_offset_minutes,
            updated_at: Utc::now(),
        };
        self.repo.upsert_preferences(&prefs).await?;
        Ok(prefs)
    }

    /// Push every notification whose delivery time has come.
    ///
    /// Recipients with push disabled are marked delivered without sending.
    /// A failed push stays pending and is retried on the next run, and so
    /// does a notification that gained another event while being pushed.
    /// Returns the number actually pushed.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<usize, NotificationServiceError> {
        let due = self.repo.due(now, DISPATCH_BATCH).await?;
        let mut prefs_by_user: HashMap<i64, NotificationPreferences> = HashMap::new();
        let mut pushed = 0;

        for notification in due {
            if !prefs_by_user.contains_key(&notification.user_id) {
                let prefs = self.get_preferences(notification.user_id).await?;
                prefs_by_user.insert(notification.user_id, prefs);
            }
            let push_enabled = prefs_by_user
                .get(&notification.user_id)
                .map(|prefs| prefs.push_enabled)
                .unwrap_or(true);

            if push_enabled {
                if let Err(e) = self.push.push(&notification).await {
                    tracing::warn!(notification_id = notification.id, "Push failed: {}", e);
                    continue;
                }
                pushed += 1;
            }
            let delivered = self
                .repo
                .mark_delivered(notification.id, notification.count, now)
                .await?;
            if !delivered {
                tracing::debug!(
                    notification_id = notification.id,
                    "Notification grouped again during dispatch, left pending"
                );
            }
        }

        if pushed > 0 {
            tracing::info!(pushed, "Dispatched due notifications");
        }
        Ok(pushed)
    }
}

fn validate_preferences(input: &UpdatePreferencesInput) -> Result<(), NotificationServiceError> {
    let in_day = |minute: i64| (0..MINUTES_PER_DAY).contains(&minute);
    match (input.quiet_start_minute, input.quiet_end_minute) {
        (Some(start), Some(end)) if !in_day(start) || !in_day(end) => {
            return Err(NotificationServiceError::ValidationError(
                "Quiet hours must be minutes of the day (0-1439)".to_string(),
            ));
        }
        (Some(_), None) | (None, Some(_)) => {
            return Err(NotificationServiceError::ValidationError(
                "Quiet hours need both a start and an end".to_string(),
            ));
        }
        _ => {}
    }
    if !(MIN_UTC_OFFSET..=MAX_UTC_OFFSET).contains(&input.utc_offset_minutes) {
        return Err(NotificationServiceError::ValidationError(format!(
            "UTC offset must be between {} and {} minutes",
            MIN_UTC_OFFSET, MAX_UTC_OFFSET
        )));
    }
    Ok(())
}
