//! Document model
//!
//! Metadata for files kept in object storage. The bytes themselves never
//! pass through the API; clients move them with presigned URLs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    /// UUID v4
    pub id: String,
    pub owner_id: i64,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    /// Object key inside the configured bucket
    pub storage_key: String,
    #[sqlx(try_from = "String")]
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn is_uploaded(&self) -> bool {
        self.status == DocumentStatus::Uploaded
    }
}

/// Upload lifecycle: a row is `pending` until the client confirms the PUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Uploaded,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Uploaded => write!(f, "uploaded"),
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "uploaded" => Ok(DocumentStatus::Uploaded),
            _ => Err(anyhow::anyhow!("Invalid document status: {}", s)),
        }
    }
}

impl TryFrom<String> for DocumentStatus {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Client request to start an upload
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUploadInput {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
}

/// A signed link the client uses to move bytes directly to or from storage
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    /// `PUT` or `GET`
    pub method: String,
    pub expires_at: DateTime<Utc>,
}

/// Response to an upload request
#[derive(Debug, Clone, Serialize)]
pub struct UploadTicket {
    pub document: Document,
    pub upload: PresignedUrl,
}
