//! Periodic housekeeping
//!
//! One pass releases expired slot locks, deletes expired sessions, pushes
//! due notifications, drops stale password reset data and prunes the login
//! limiter. A failing step is logged and the pass carries on.

use crate::services::mentoring::MentoringService;
use crate::services::notification::NotificationService;
use crate::services::password_reset::PasswordResetService;
use crate::services::rate_limiter::LoginRateLimiter;
use crate::services::user::UserService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Counts from one maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub released_locks: u64,
    pub expired_sessions: u64,
    pub dispatched_notifications: u64,
    pub reset_attempts_removed: u64,
    pub reset_tokens_removed: u64,
}

pub struct Maintenance {
    mentoring: Arc<MentoringService>,
    users: Arc<UserService>,
    notifications: Arc<NotificationService>,
    password_reset: Arc<PasswordResetService>,
    limiter: Arc<LoginRateLimiter>,
}

impl Maintenance {
    pub fn new(
        mentoring: Arc<MentoringService>,
        users: Arc<UserService>,
        notifications: Arc<NotificationService>,
        password_reset: Arc<PasswordResetService>,
        limiter: Arc<LoginRateLimiter>,
    ) -> Self {
        Self {
            mentoring,
            users,
            notifications,
            password_reset,
            limiter,
        }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.mentoring.release_expired_locks().await {
            Ok(n) => report.released_locks = n,
            Err(e) => tracing::error!("Maintenance: releasing locks failed: {}", e),
        }
        match self.users.cleanup_expired_sessions().await {
            Ok(n) => report.expired_sessions = n,
            Err(e) => tracing::error!("Maintenance: session cleanup failed: {}", e),
        }
        match self.notifications.dispatch_due(now).await {
            Ok(n) => report.dispatched_notifications = n as u64,
            Err(e) => tracing::error!("Maintenance: notification dispatch failed: {}", e),
        }
        match self.password_reset.cleanup(now).await {
            Ok((attempts, tokens)) => {
                report.reset_attempts_removed = attempts;
                report.reset_tokens_removed = tokens;
            }
            Err(e) => tracing::error!("Maintenance: password reset cleanup failed: {}", e),
        }
        self.limiter.cleanup().await;

        tracing::debug!(?report, "Maintenance pass finished");
        report
    }

    /// Run a pass every `every` on a background task
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_once(Utc::now()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::{BookingConfig, PasswordResetConfig};
    use crate::db::repositories::{
        SessionRepository, SqlxMentoringRepository, SqlxNotificationRepository,
        SqlxPasswordResetRepository, SqlxSessionRepository, SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations};
    use crate::models::{NewNotification, NotificationKind, RegisterInput, Session};
    use crate::services::email::LogMailer;
    use crate::services::notification::LogPushSender;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_run_once_reports_work_done() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let session_repo = SqlxSessionRepository::boxed(pool.clone());
        let users = Arc::new(UserService::new(
            user_repo.clone(),
            session_repo.clone(),
            7,
            Arc::new(MemoryCache::new()),
        ));
        let notifications = Arc::new(NotificationService::new(
            SqlxNotificationRepository::boxed(pool.clone()),
            Arc::new(LogPushSender),
            60,
        ));
        let mentoring = Arc::new(MentoringService::new(
            SqlxMentoringRepository::boxed(pool.clone()),
            notifications.clone(),
            Arc::new(MemoryCache::new()),
            BookingConfig::default(),
        ));
        let password_reset = Arc::new(PasswordResetService::new(
            SqlxPasswordResetRepository::boxed(pool.clone()),
            user_repo,
            session_repo.clone(),
            Arc::new(LogMailer),
            PasswordResetConfig::default(),
        ));
        let maintenance = Maintenance::new(
            mentoring,
            users.clone(),
            notifications.clone(),
            password_reset,
            Arc::new(LoginRateLimiter::new()),
        );

        let user = users
            .register(RegisterInput {
                email: "jo@example.com".to_string(),
                password: "password123".to_string(),
                display_name: "Jo".to_string(),
            })
            .await
            .unwrap();
        let now = Utc::now();
        session_repo
            .create(&Session {
                id: "stale".to_string(),
                user_id: user.id,
                expires_at: now - ChronoDuration::minutes(1),
                created_at: now - ChronoDuration::days(8),
            })
            .await
            .unwrap();
        notifications
            .notify(NewNotification {
                user_id: user.id,
                kind: NotificationKind::PostLike,
                group_key: "post:1:likes".to_string(),
                title: "Someone liked your post".to_string(),
                body: String::new(),
                link: None,
            })
            .await
            .unwrap();

        let report = maintenance
            .run_once(Utc::now() + ChronoDuration::seconds(1))
            .await;
        assert_eq!(report.expired_sessions, 1);
        assert_eq!(report.dispatched_notifications, 1);
        assert_eq!(report.released_locks, 0);

        let again = maintenance
            .run_once(Utc::now() + ChronoDuration::seconds(1))
            .await;
        assert_eq!(again, MaintenanceReport::default());
    }
}
