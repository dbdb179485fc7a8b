//! Document repository

use crate::db::{with_pool, DynDatabasePool};
use crate::models::{Document, DocumentStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

const DOCUMENT_COLUMNS: &str = "id, owner_id, file_name, content_type, size_bytes, storage_key, \
                                status, created_at, updated_at";

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn create(&self, document: &Document) -> Result<()>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>>;

    /// Documents of one owner, newest first
    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Document>>;

    async fn mark_uploaded(&self, id: &str, size_bytes: i64, now: DateTime<Utc>) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

pub struct SqlxDocumentRepository {
    pool: DynDatabasePool,
}

impl SqlxDocumentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn DocumentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl DocumentRepository for SqlxDocumentRepository {
    async fn create(&self, document: &Document) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "INSERT INTO documents (id, owner_id, file_name, content_type, size_bytes, storage_key, \
                 status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(&document.id)
            .bind(document.owner_id)
            .bind(&document.file_name)
            .bind(&document.content_type)
            .bind(document.size_bytes)
            .bind(&document.storage_key)
            .bind(document.status.to_string())
            .bind(document.created_at)
            .bind(document.updated_at)
            .execute(conn)
            .await
            .context("Failed to create document")?;
        });
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        let document = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Document>(&sql)
                .bind(id)
                .fetch_optional(conn)
                .await
                .context("Failed to get document")?
        });
        Ok(document)
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE owner_id = $1 ORDER BY created_at DESC",
            DOCUMENT_COLUMNS
        );
        let documents = with_pool!(self.pool, |conn| {
            sqlx::query_as::<_, Document>(&sql)
                .bind(owner_id)
                .fetch_all(conn)
                .await
                .context("Failed to list documents")?
        });
        Ok(documents)
    }

    async fn mark_uploaded(&self, id: &str, size_bytes: i64, now: DateTime<Utc>) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query(
                "UPDATE documents SET status = $1, size_bytes = $2, updated_at = $3 WHERE id = $4",
            )
            .bind(DocumentStatus::Uploaded.to_string())
            .bind(size_bytes)
            .bind(now)
            .bind(id)
            .execute(conn)
            .await
            .context("Failed to mark document uploaded")?;
        });
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        with_pool!(self.pool, |conn| {
            sqlx::query("DELETE FROM documents WHERE id = $1")
                .bind(id)
                .execute(conn)
                .await
                .context("Failed to delete document")?;
        });
        Ok(())
    }
}
