//! Notification repository

use crate::db::{with_pool, DynDatabasePool};
use crate::models::{ListParams, NewNotification, Notification, NotificationPreferences};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, group_key, title, body, link, count, \
     read_at, deliver_after, delivered_at, created_at, updated_at";

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// The unread notification of `(user_id, group_key)` touched after `since`
    async fn find_groupable(
        &self,
        user_id: i64,
        group_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>>;

    /// Fold another event into an existing notification and schedule it
    /// for delivery again
    async fn bump(
        &self,
        id: i64,
        input: &NewNotification,
        deliver_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn insert(
        &self,
        input: &NewNotification,
        deliver_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i64>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Notification>>;

    /// Most recently updated first
    async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        params: &ListParams,
    ) -> Result<(Vec<Notification>, i64)>;

    async fn unread_count(&self, user_id: i64) -> Result<i64>;

    /// Mark one notification read; false if it is not the user's
    async fn mark_read(&self, user_id: i64, id: i64, now: DateTime<Utc>) -> Result<bool>;

    async fn mark_all_read(&self, user_id: i64, now: DateTime<Utc>) -> Result<u64>;

    /// Undelivered notifications whose `deliver_after` has passed, oldest first
    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;

    /// Mark delivered as long as no event was grouped in since it was read
    /// with `count`; false when the notification moved on
    async fn mark_delivered(&self, id: i64, count: i64, now: DateTime<Utc>) -> Result<bool>;

    async fn get_preferences(&self, user_id: i64) -> Result<Option<NotificationPreferences>>;

    async fn upsert_preferences(&self, prefs: &NotificationPreferences) -> Result<()>;
}

pub struct SqlxNotificationRepository {
    pool: DynDatabasePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn NotificationRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn find_groupable(
        &self,
        user_id: i64,
        group_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let sql = format!(
            "SELECT {} FROM notifications WHERE user_id = $1 AND group_key = $2 \
             AND read_at IS NULL AND updated_at >= $3 ORDER BY updated_at DESC LIMIT 1",
            NOTIFICATION_COLUMNS
        );
        let found = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Notification>(&sql)
                .bind(user_id)
                .bind(group_key)
                .bind(since)
                .fetch_optional(conn)
                .await
                .context("Failed to look up notification group")?
        });
        Ok(found)
    }

    async fn bump(
        &self,
        id: i64,
        input: &NewNotification,
        deliver_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE notifications SET count = count + 1, title = $1, body = $2, link = $3, \
                 deliver_after = $4, delivered_at = NULL, updated_at = $5 WHERE id = $6",
            )
            .bind(&input.title)
            .bind(&input.body)
            .bind(&input.link)
            .bind(deliver_after)
            .bind(now)
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to update grouped notification")?;
        });
        Ok(())
    }

    async fn insert(
        &self,
        input: &NewNotification,
        deliver_after: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = with_pool!(self.pool, |conn| {
            sqlx::query_scalar(
                "INSERT INTO notifications (user_id, kind, group_key, title, body, link, count, \
                 deliver_after, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8, $9) RETURNING id",
            )
            .bind(input.user_id)
            .bind(input.kind.as_str())
            .bind(&input.group_key)
            .bind(&input.title)
            .bind(&input.body)
            .bind(&input.link)
            .bind(deliver_after)
            .bind(now)
            .bind(now)
            .fetch_one(conn)
            .await
            .context("Failed to insert notification")?
        });
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Notification>> {
        let sql = format!(
            "SELECT {} FROM notifications WHERE id = $1",
            NOTIFICATION_COLUMNS
        );
        let found = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Notification>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get notification")?
        });
        Ok(found)
    }

    async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        params: &ListParams,
    ) -> Result<(Vec<Notification>, i64)> {
        let filter = if unread_only {
            "user_id = $1 AND read_at IS NULL"
        } else {
            "user_id = $1"
        };
        let list_sql = format!(
            "SELECT {} FROM notifications WHERE {} ORDER BY updated_at DESC, id DESC LIMIT $2 OFFSET $3",
            NOTIFICATION_COLUMNS, filter
        );
        let count_sql = format!("SELECT COUNT(*) FROM notifications WHERE {}", filter);
        let (items, total) = with_pool!(self.pool, |conn| {
            let items = sqlx::query_as::<_, Notification>(&list_sql)
                .bind(user_id)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list notifications")?;
            let total: i64 = sqlx::query_scalar(&count_sql)
                .bind(user_id)
                .fetch_one(conn)
                .await
                .context("Failed to count notifications")?;
            (items, total)
        });
        Ok((items, total))
    }

    async fn unread_count(&self, user_id: i64) -> Result<i64> {
        let count: i64 = with_pool!(self.pool, |conn| {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND read_at IS NULL",
            )
            .bind(user_id)
            .fetch_one(conn)
            .await
            .context("Failed to count unread notifications")?
        });
        Ok(count)
    }

    async fn mark_read(&self, user_id: i64, id: i64, now: DateTime<Utc>) -> Result<bool> {
        // COALESCE keeps the first read time when marked twice
        let affected = with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE notifications SET read_at = COALESCE(read_at, $1) WHERE id = $2 AND user_id = $3",
            )
            .bind(now)
            .bind(id)
            .bind(user_id)
            .execute(conn)
            .await
            .context("Failed to mark notification read")?
            .rows_affected()
        });
        Ok(affected > 0)
    }

    async fn mark_all_read(&self, user_id: i64, now: DateTime<Utc>) -> Result<u64> {
        let affected = with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE notifications SET read_at = $1 WHERE user_id = $2 AND read_at IS NULL",
            )
            .bind(now)
            .bind(user_id)
            .execute(conn)
            .await
            .context("Failed to mark notifications read")?
            .rows_affected()
        });
        Ok(affected)
    }

    async fn due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {} FROM notifications WHERE delivered_at IS NULL AND deliver_after <= $1 \
             ORDER BY deliver_after ASC, id ASC LIMIT $2",
            NOTIFICATION_COLUMNS
        );
        let due = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Notification>(&sql)
                .bind(now)
                .bind(limit)
                .fetch_all(conn)
                .await
                .context("Failed to load due notifications")?
        });
        Ok(due)
    }

    async fn mark_delivered(&self, id: i64, count: i64, now: DateTime<Utc>) -> Result<bool> {
        let affected = with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE notifications SET delivered_at = $1 \
                 WHERE id = $2 AND count = $3 AND delivered_at IS NULL",
            )
            .bind(now)
            .bind(id)
            .bind(count)
            .execute(conn)
            .await
            .context("Failed to mark notification delivered")?
            .rows_affected()
        });
        Ok(affected > 0)
    }

    async fn get_preferences(&self, user_id: i64) -> Result<Option<NotificationPreferences>> {
        let prefs = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, NotificationPreferences>(
                "SELECT user_id, push_enabled, quiet_start_minute, quiet_end_minute, \
                 utc_offset_minutes, updated_at FROM notification_preferences WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_optional(conn)
            .await
            .context("Failed to get notification preferences")?
        });
        Ok(prefs)
    }

    async fn upsert_preferences(&self, prefs: &NotificationPreferences) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO notification_preferences (user_id, push_enabled, quiet_start_minute, \
                 quiet_end_minute, utc_offset_minutes, updated_at) VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (user_id) DO UPDATE SET push_enabled = excluded.push_enabled, \
                 quiet_start_minute = excluded.quiet_start_minute, \
                 quiet_end_minute = excluded.quiet_end_minute, \
                 utc_offset_minutes = excluded.utc_offset_minutes, updated_at = excluded.updated_at",
            )
            .bind(prefs.user_id)
            .bind(prefs.push_enabled)
            .bind(prefs.quiet_start_minute)
            .bind(prefs.quiet_end_minute)
            .bind(prefs.utc_offset_minutes)
            .bind(prefs.updated_at)
            .execute(conn)
            .await
            .context("Failed to save notification preferences")?;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::user::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{NewUser, NotificationKind, UserRole};
    use chrono::Duration;

    async fn setup() -> (SqlxNotificationRepository, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let user = SqlxUserRepository::new(pool.clone())
            .create(&NewUser {
                email: "n@example.com".to_string(),
                display_name: "N".to_string(),
                password_hash: "hash".to_string(),
                role: UserRole::Member,
            })
            .await
            .unwrap();
        (SqlxNotificationRepository::new(pool), user.id)
    }

    fn event(user_id: i64, group_key: &str) -> NewNotification {
        NewNotification {
            user_id,
            kind: NotificationKind::PostLike,
            group_key: group_key.to_string(),
            title: "New like".to_string(),
            body: "Someone liked your post".to_string(),
            link: Some("/posts/1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_group_lookup_and_bump() {
        let (repo, user) = setup().await;
        let now = Utc::now();
        let id = repo.insert(&event(user, "post:1:likes"), now, now).await.unwrap();

        let found = repo
            .find_groupable(user, "post:1:likes", now - Duration::minutes(60))
            .await
            .unwrap()
            .expect("group");
        assert_eq!(found.id, id);
        assert!(repo
            .find_groupable(user, "post:2:likes", now - Duration::minutes(60))
            .await
            .unwrap()
            .is_none());

        assert!(repo.mark_delivered(id, 1, now).await.unwrap());
        repo.bump(id, &event(user, "post:1:likes"), now, now).await.unwrap();
        let bumped = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(bumped.count, 2);
        assert!(bumped.delivered_at.is_none());

        repo.mark_read(user, id, now).await.unwrap();
        assert!(repo
            .find_groupable(user, "post:1:likes", now - Duration::minutes(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_and_read_state() {
        let (repo, user) = setup().await;
        let now = Utc::now();
        let first = repo.insert(&event(user, "a"), now, now).await.unwrap();
        repo.insert(&event(user, "b"), now, now).await.unwrap();

        assert_eq!(repo.unread_count(user).await.unwrap(), 2);
        assert!(repo.mark_read(user, first, now).await.unwrap());
        assert!(!repo.mark_read(user + 1, first, now).await.unwrap());

        let (unread, total) = repo.list(user, true, &ListParams::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(unread.len(), 1);

        let (all, total) = repo.list(user, false, &ListParams::default()).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);

        assert_eq!(repo.mark_all_read(user, now).await.unwrap(), 1);
        assert_eq!(repo.unread_count(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_due_respects_deliver_after() {
        let (repo, user) = setup().await;
        let now = Utc::now();
        let ready = repo.insert(&event(user, "a"), now, now).await.unwrap();
        repo.insert(&event(user, "b"), now + Duration::hours(3), now)
            .await
            .unwrap();

        let due = repo.due(now, 100).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ready);

        assert!(repo.mark_delivered(ready, 1, now).await.unwrap());
        assert!(repo.due(now, 100).await.unwrap().is_empty());
        assert_eq!(repo.due(now + Duration::hours(4), 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_grouped_event_during_dispatch_stays_due() {
        let (repo, user) = setup().await;
        let now = Utc::now();
        let id = repo.insert(&event(user, "post:1:likes"), now, now).await.unwrap();

        let due = repo.due(now, 100).await.unwrap();
        assert_eq!(due[0].count, 1);

        // another like lands while the first push is in flight
        repo.bump(id, &event(user, "post:1:likes"), now, now).await.unwrap();
        assert!(!repo.mark_delivered(id, due[0].count, now).await.unwrap());

        let due = repo.due(now, 100).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].count, 2);
        assert!(repo.mark_delivered(id, due[0].count, now).await.unwrap());
        assert!(repo.due(now, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preferences_upsert() {
        let (repo, user) = setup().await;
        assert!(repo.get_preferences(user).await.unwrap().is_none());

        let mut prefs = NotificationPreferences::defaults_for(user);
        prefs.quiet_start_minute = Some(22 * 60);
        prefs.quiet_end_minute = Some(7 * 60);
        repo.upsert_preferences(&prefs).await.unwrap();

        prefs.push_enabled = false;
        repo.upsert_preferences(&prefs).await.unwrap();

        let stored = repo.get_preferences(user).await.unwrap().expect("prefs");
        assert!(!stored.push_enabled);
        assert_eq!(stored.quiet_start_minute, Some(1320));
    }
}
