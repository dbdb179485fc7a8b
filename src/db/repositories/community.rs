//! Community repository
//!
//! Posts, comments and likes. The denormalized `comment_count` and
//! `like_count` columns are updated in the same transaction as the row
//! that changes them.

use crate::db::{with_pool, DynDatabasePool};
use crate::models::{Comment, ListParams, Post};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const POST_SELECT: &str = "SELECT p.id, p.author_id, u.display_name AS author_name, p.title, \
     p.body, p.comment_count, p.like_count, p.created_at, p.updated_at \
     FROM posts p JOIN users u ON u.id = p.author_id";

const COMMENT_SELECT: &str = "SELECT c.id, c.post_id, c.author_id, u.display_name AS author_name, \
     c.parent_id, c.body, c.created_at \
     FROM post_comments c JOIN users u ON u.id = c.author_id";

#[async_trait]
pub trait CommunityRepository: Send + Sync {
    async fn create_post(
        &self,
        author_id: i64,
        title: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<i64>;

    async fn get_post(&self, id: i64) -> Result<Option<Post>>;

    /// Newest first
    async fn list_posts(&self, params: &ListParams) -> Result<(Vec<Post>, i64)>;

    async fn update_post(&self, id: i64, title: &str, body: &str, now: DateTime<Utc>)
        -> Result<()>;

    async fn delete_post(&self, id: i64) -> Result<()>;

    /// Insert a comment and bump the post's comment count
    async fn add_comment(
        &self,
        post_id: i64,
        author_id: i64,
        parent_id: Option<i64>,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<i64>;

    async fn get_comment(&self, id: i64) -> Result<Option<Comment>>;

    /// Comments of a post, oldest first
    async fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>>;

    /// Delete a comment (and its replies) and recount the post's comments
    async fn delete_comment(&self, post_id: i64, comment_id: i64) -> Result<()>;

    /// Returns true when the like is new
    async fn like(&self, post_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool>;

    /// Returns true when a like was removed
    async fn unlike(&self, post_id: i64, user_id: i64) -> Result<bool>;

    async fn has_liked(&self, post_id: i64, user_id: i64) -> Result<bool>;
}

pub struct SqlxCommunityRepository {
    pool: DynDatabasePool,
}

impl SqlxCommunityRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommunityRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CommunityRepository for SqlxCommunityRepository {
    async fn create_post(
        &self,
        author_id: i64,
        title: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let id: i64 = with_pool!(self.pool, |conn| {
            sqlx::query_scalar(
                "INSERT INTO posts (author_id, title, body, comment_count, like_count, created_at, updated_at) \
                 VALUES ($1, $2, $3, 0, 0, $4, $5) RETURNING id",
            )
            .bind(author_id)
            .bind(title)
            .bind(body)
            .bind(now)
            .bind(now)
            .fetch_one(conn)
            .await
            .context("Failed to create post")?
        });
        Ok(id)
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>> {
        let sql = format!("{} WHERE p.id = $1", POST_SELECT);
        let post = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Post>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get post")?
        });
        Ok(post)
    }

    async fn list_posts(&self, params: &ListParams) -> Result<(Vec<Post>, i64)> {
        let sql = format!(
            "{} ORDER BY p.created_at DESC, p.id DESC LIMIT $1 OFFSET $2",
            POST_SELECT
        );
        let (posts, total) = with_pool!(self.pool, |conn| {
            let posts = sqlx::query_as::<_, Post>(&sql)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(conn)
                .await
                .context("Failed to list posts")?;
            let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM posts")
                .fetch_one(conn)
                .await
                .context("Failed to count posts")?;
            (posts, total)
        });
        Ok((posts, total))
    }

    async fn update_post(
        &self,
        id: i64,
        title: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query("UPDATE posts SET title = $1, body = $2, updated_at = $3 WHERE id = $4")
                .bind(title)
                .bind(body)
                .bind(now)
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to update post")?;
        });
        Ok(())
    }

    async fn delete_post(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete post")?;
        });
        Ok(())
    }

    async fn add_comment(
        &self,
        post_id: i64,
        author_id: i64,
        parent_id: Option<i64>,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let id = with_pool!(self.pool, |conn| {
            let mut tx = conn.begin().await.context("Failed to begin transaction")?;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO post_comments (post_id, author_id, parent_id, body, created_at) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
            )
            .bind(post_id)
            .bind(author_id)
            .bind(parent_id)
            .bind(body)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .context("Failed to insert comment")?;
            sqlx::query("UPDATE posts SET comment_count = comment_count + 1 WHERE id = $1")
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to bump comment count")?;
            tx.commit().await.context("Failed to commit comment")?;
            id
        });
        Ok(id)
    }

    async fn get_comment(&self, id: i64) -> Result<Option<Comment>> {
        let sql = format!("{} WHERE c.id = $1", COMMENT_SELECT);
        let comment = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Comment>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get comment")?
        });
        Ok(comment)
    }

    async fn list_comments(&self, post_id: i64) -> Result<Vec<Comment>> {
        let sql = format!(
            "{} WHERE c.post_id = $1 ORDER BY c.created_at ASC, c.id ASC",
            COMMENT_SELECT
        );
        let comments = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Comment>(&sql)
                .bind(post_id)
                .fetch_all(conn)
                .await
                .context("Failed to list comments")?
        });
        Ok(comments)
    }

    async fn delete_comment(&self, post_id: i64, comment_id: i64) -> Result<()> {
        with_pool!(self.pool, |conn| {
            let mut tx = conn.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM post_comments WHERE id = $1 AND post_id = $2")
                .bind(comment_id)
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete comment")?;
            sqlx::query(
                "UPDATE posts SET comment_count = \
                 (SELECT COUNT(*) FROM post_comments WHERE post_id = $1) WHERE id = $2",
            )
            .bind(post_id)
            .bind(post_id)
            .execute(&mut *tx)
            .await
            .context("Failed to recount comments")?;
            tx.commit().await.context("Failed to commit comment removal")?;
        });
        Ok(())
    }

    async fn like(&self, post_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let inserted = with_pool!(self.pool, |conn| {
            let mut tx = conn.begin().await.context("Failed to begin transaction")?;
            let inserted = sqlx::query(
                "INSERT INTO post_likes (post_id, user_id, created_at) VALUES ($1, $2, $3) \
                 ON CONFLICT (post_id, user_id) DO NOTHING",
            )
            .bind(post_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to like post")?
            .rows_affected()
                > 0;
            if inserted {
                sqlx::query("UPDATE posts SET like_count = like_count + 1 WHERE id = $1")
                    .bind(post_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to bump like count")?;
            }
            tx.commit().await.context("Failed to commit like")?;
            inserted
        });
        Ok(inserted)
    }

    async fn unlike(&self, post_id: i64, user_id: i64) -> Result<bool> {
        let removed = with_pool!(self.pool, |conn| {
            let mut tx = conn.begin().await.context("Failed to begin transaction")?;
            let removed = sqlx::query("DELETE FROM post_likes WHERE post_id = $1 AND user_id = $2")
                .bind(post_id)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .context("Failed to unlike post")?
                .rows_affected()
                > 0;
            if removed {
                sqlx::query(
                    "UPDATE posts SET like_count = like_count - 1 WHERE id = $1 AND like_count > 0",
                )
                .bind(post_id)
                .execute(&mut *tx)
                .await
                .context("Failed to decrement like count")?;
            }
            tx.commit().await.context("Failed to commit unlike")?;
            removed
        });
        Ok(removed)
    }

    async fn has_liked(&self, post_id: i64, user_id: i64) -> Result<bool> {
        let count: i64 = with_pool!(self.pool, |conn| {
            sqlx::query_scalar("SELECT COUNT(*) FROM post_likes WHERE post_id = $1 AND user_id = $2")
                .bind(post_id)
                .bind(user_id)
                .fetch_one(conn)
                .await
                .context("Failed to check like")?
        });
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::user::{SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{NewUser, UserRole};

    async fn setup() -> (SqlxCommunityRepository, i64, i64) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let users = SqlxUserRepository::new(pool.clone());
        let mut ids = Vec::new();
        for name in ["alice", "bob"] {
            let user = users
                .create(&NewUser {
                    email: format!("{}@example.com", name),
                    display_name: name.to_string(),
                    password_hash: "hash".to_string(),
                    role: UserRole::Member,
                })
                .await
                .unwrap();
            ids.push(user.id);
        }
        (SqlxCommunityRepository::new(pool), ids[0], ids[1])
    }

    #[tokio::test]
    async fn test_post_crud() {
        let (repo, alice, _) = setup().await;
        let id = repo
            .create_post(alice, "Hello", "First post", Utc::now())
            .await
            .unwrap();

        let post = repo.get_post(id).await.unwrap().expect("post");
        assert_eq!(post.author_name, "alice");
        assert_eq!(post.comment_count, 0);

        repo.update_post(id, "Hello again", "Edited", Utc::now())
            .await
            .unwrap();
        assert_eq!(repo.get_post(id).await.unwrap().unwrap().title, "Hello again");

        repo.delete_post(id).await.unwrap();
        assert!(repo.get_post(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_posts_newest_first() {
        let (repo, alice, _) = setup().await;
        let base = Utc::now();
        for i in 0..3 {
            repo.create_post(alice, &format!("Post {}", i), "body", base + chrono::Duration::seconds(i))
                .await
                .unwrap();
        }

        let (posts, total) = repo.list_posts(&ListParams::new(1, 2)).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].title, "Post 2");
    }

    #[tokio::test]
    async fn test_comment_counts_follow_thread() {
        let (repo, alice, bob) = setup().await;
        let post = repo.create_post(alice, "Q", "?", Utc::now()).await.unwrap();

        let root = repo
            .add_comment(post, bob, None, "answer", Utc::now())
            .await
            .unwrap();
        repo.add_comment(post, alice, Some(root), "thanks", Utc::now())
            .await
            .unwrap();
        assert_eq!(repo.get_post(post).await.unwrap().unwrap().comment_count, 2);
        assert_eq!(repo.list_comments(post).await.unwrap().len(), 2);

        // Deleting the root removes its reply too
        repo.delete_comment(post, root).await.unwrap();
        assert_eq!(repo.get_post(post).await.unwrap().unwrap().comment_count, 0);
        assert!(repo.list_comments(post).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_like_is_idempotent() {
        let (repo, alice, bob) = setup().await;
        let post = repo.create_post(alice, "Like me", "...", Utc::now()).await.unwrap();

        assert!(repo.like(post, bob, Utc::now()).await.unwrap());
        assert!(!repo.like(post, bob, Utc::now()).await.unwrap());
        assert!(repo.has_liked(post, bob).await.unwrap());
        assert_eq!(repo.get_post(post).await.unwrap().unwrap().like_count, 1);

        assert!(repo.unlike(post, bob).await.unwrap());
        assert!(!repo.unlike(post, bob).await.unwrap());
        assert_eq!(repo.get_post(post).await.unwrap().unwrap().like_count, 0);
    }
}
