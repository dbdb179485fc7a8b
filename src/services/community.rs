//! Community service
//!
//! Posts, threaded comments and likes. Authors hear about comments and
//! likes on their posts through grouped notifications, never about their
//! own activity.

use crate::db::repositories::CommunityRepository;
use crate::models::{
    Comment, CreateCommentInput, CreatePostInput, ListParams, NewNotification, NotificationKind,
    PagedResult, Post, PostDetail, UpdatePostInput, User, MAX_COMMENT_LEN, MAX_POST_BODY_LEN,
    MAX_TITLE_LEN,
};
use crate::services::notification::NotificationService;
use chrono::Utc;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum CommunityServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You are not allowed to change this {0}")]
    Forbidden(&'static str),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct CommunityService {
    repo: Arc<dyn CommunityRepository>,
    notifications: Arc<NotificationService>,
}

impl CommunityService {
    pub fn new(repo: Arc<dyn CommunityRepository>, notifications: Arc<NotificationService>) -> Self {
        Self {
            repo,
            notifications,
        }
    }

    pub async fn create_post(
        &self,
        author: &User,
        input: CreatePostInput,
    ) -> Result<Post, CommunityServiceError> {
        let title = validate_text("Title", &input.title, MAX_TITLE_LEN)?;
        let body = validate_text("Body", &input.body, MAX_POST_BODY_LEN)?;

        let id = self
            .repo
            .create_post(author.id, &title, &body, Utc::now())
            .await?;
        tracing::info!(post_id = id, author_id = author.id, "Post created");
        self.get_post_row(id).await
    }

    pub async fn list_posts(&self, params: ListParams) -> Result<PagedResult<Post>, CommunityServiceError> {
        let (posts, total) = self.repo.list_posts(&params).await?;
        Ok(PagedResult::new(posts, total, &params))
    }

    /// A post with its comments; `viewer` decides the `liked` flag
    pub async fn get_post(
        &self,
        id: i64,
        viewer: Option<&User>,
    ) -> Result<PostDetail, CommunityServiceError> {
        let post = self.get_post_row(id).await?;
        let comments = self.repo.list_comments(id).await?;
        let liked = match viewer {
            Some(user) => self.repo.has_liked(id, user.id).await?,
            None => false,
        };
        Ok(PostDetail {
            post,
            comments,
            liked,
        })
    }

    /// Only the author may edit
    pub async fn update_post(
        &self,
        user: &User,
        id: i64,
        input: UpdatePostInput,
    ) -> Result<Post, CommunityServiceError> {
        let post = self.get_post_row(id).await?;
        if post.author_id != user.id {
            return Err(CommunityServiceError::Forbidden("post"));
        }
        if !input.has_changes() {
            return Ok(post);
        }

        let title = match input.title {
            Some(title) => validate_text("Title", &title, MAX_TITLE_LEN)?,
            None => post.title,
        };
        let body = match input.body {
            Some(body) => validate_text("Body", &body, MAX_POST_BODY_LEN)?,
            None => post.body,
        };
        self.repo.update_post(id, &title, &body, Utc::now()).await?;
        self.get_post_row(id).await
    }

    /// Author or admin
    pub async fn delete_post(&self, user: &User, id: i64) -> Result<(), CommunityServiceError> {
        let post = self.get_post_row(id).await?;
        if !user.can_moderate(post.author_id) {
            return Err(CommunityServiceError::Forbidden("post"));
        }
        self.repo.delete_post(id).await?;
        tracing::info!(post_id = id, by = user.id, "Post deleted");
        Ok(())
    }

    pub async fn add_comment(
        &self,
        author: &User,
        post_id: i64,
        input: CreateCommentInput,
    ) -> Result<Comment, CommunityServiceError> {
        let body = validate_text("Comment", &input.body, MAX_COMMENT_LEN)?;
        let post = self.get_post_row(post_id).await?;

        if let Some(parent_id) = input.parent_id {
            let parent = self
                .repo
                .get_comment(parent_id)
                .await?
                .ok_or(CommunityServiceError::NotFound("Parent comment"))?;
            if parent.post_id != post_id {
                return Err(CommunityServiceError::ValidationError(
                    "Parent comment belongs to a different post".to_string(),
                ));
            }
        }

        let id = self
            .repo
            .add_comment(post_id, author.id, input.parent_id, &body, Utc::now())
            .await?;

        if post.author_id != author.id {
            self.notifications
                .notify_quietly(NewNotification {
                    user_id: post.author_id,
                    kind: NotificationKind::PostComment,
                    group_key: format!("post:{}:comments", post.id),
                    title: format!("{} commented on \"{}\"", author.display_name, post.title),
                    body: excerpt(&body, 140),
                    link: Some(format!("/posts/{}#comment-{}", post.id, id)),
                })
                .await;
        }

        self.repo
            .get_comment(id)
            .await?
            .ok_or(CommunityServiceError::NotFound("Comment"))
    }

    /// Author or admin; replies go with the comment
    pub async fn delete_comment(
        &self,
        user: &User,
        post_id: i64,
        comment_id: i64,
    ) -> Result<(), CommunityServiceError> {
        let comment = self
            .repo
            .get_comment(comment_id)
            .await?
            .filter(|comment| comment.post_id == post_id)
            .ok_or(CommunityServiceError::NotFound("Comment"))?;
        if !user.can_moderate(comment.author_id) {
            return Err(CommunityServiceError::Forbidden("comment"));
        }
        self.repo.delete_comment(post_id, comment_id).await?;
        Ok(())
    }

    /// Like a post; liking twice is a no-op. Returns the new like count.
    pub async fn like(&self, user: &User, post_id: i64) -> Result<i64, CommunityServiceError> {
        let post = self.get_post_row(post_id).await?;
        let is_new = self.repo.like(post_id, user.id, Utc::now()).await?;

        if is_new && post.author_id != user.id {
            self.notifications
                .notify_quietly(NewNotification {
                    user_id: post.author_id,
                    kind: NotificationKind::PostLike,
                    group_key: format!("post:{}:likes", post.id),
                    title: format!("{} liked \"{}\"", user.display_name, post.title),
                    body: String::new(),
                    link: Some(format!("/posts/{}", post.id)),
                })
                .await;
        }

        Ok(self.get_post_row(post_id).await?.like_count)
    }

    /// Returns the new like count
    pub async fn unlike(&self, user: &User, post_id: i64) -> Result<i64, CommunityServiceError> {
        self.get_post_row(post_id).await?;
        self.repo.unlike(post_id, user.id).await?;
        Ok(self.get_post_row(post_id).await?.like_count)
    }

    async fn get_post_row(&self, id: i64) -> Result<Post, CommunityServiceError> {
        self.repo
            .get_post(id)
            .await?
            .ok_or(CommunityServiceError::NotFound("Post"))
    }
}

fn validate_text(field: &str, value: &str, max: usize) -> Result<String, CommunityServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CommunityServiceError::ValidationError(format!(
            "{} cannot be empty",
            field
        )));
    }
    if value.chars().count() > max {
        return Err(CommunityServiceError::ValidationError(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value.to_string())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
