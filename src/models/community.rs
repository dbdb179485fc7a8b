//! Community board models: posts, threaded comments and likes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_POST_BODY_LEN: usize = 20_000;
pub const MAX_COMMENT_LEN: usize = 5_000;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    /// Author's display name at read time
    pub author_name: String,
    pub title: String,
    pub body: String,
    pub comment_count: i64,
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub author_name: String,
    /// Comment being replied to, always on the same post
    pub parent_id: Option<i64>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A post with its comment thread, oldest comment first
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<Comment>,
    /// Whether the viewer liked the post (false for anonymous viewers)
    pub liked: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePostInput {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePostInput {
    pub title: Option<String>,
    pub body: Option<String>,
}

impl UpdatePostInput {
    pub fn has_changes(&self) -> bool {
        self.title.is_some() || self.body.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommentInput {
    pub body: String,
    pub parent_id: Option<i64>,
}
