//! Document service
//!
//! Uploads are two-phase: `create_upload` stores a `pending` row and hands
//! out a presigned PUT URL, `confirm_upload` flips the row to `uploaded`
//! once the object is actually in the store.

use crate::config::StorageConfig;
use crate::db::repositories::DocumentRepository;
use crate::models::{CreateUploadInput, Document, DocumentStatus, PresignedUrl, UploadTicket, User};
use crate::services::storage::{LocalObjectStore, Presigner};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

const MAX_FILE_NAME_LEN: usize = 120;

#[derive(Debug, thiserror::Error)]
pub enum DocumentServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Document not found")]
    NotFound,

    #[error("You do not have access to this document")]
    Forbidden,

    #[error("Document upload has not been completed")]
    NotUploaded,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct DocumentService {
    repo: Arc<dyn DocumentRepository>,
    store: Arc<LocalObjectStore>,
    presigner: Arc<Presigner>,
    config: StorageConfig,
}

impl DocumentService {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        store: Arc<LocalObjectStore>,
        presigner: Arc<Presigner>,
        config: StorageConfig,
    ) -> Self {
        Self {
            repo,
            store,
            presigner,
            config,
        }
    }

    pub async fn create_upload(
        &self,
        owner: &User,
        input: CreateUploadInput,
    ) -> Result<UploadTicket, DocumentServiceError> {
        let content_type = input.content_type.trim().to_ascii_lowercase();
        if !self.config.is_type_allowed(&content_type) {
            return Err(DocumentServiceError::ValidationError(format!(
                "File type '{}' is not allowed",
                content_type
            )));
        }
        if input.size_bytes <= 0 {
            return Err(DocumentServiceError::ValidationError(
                "File size must be positive".to_string(),
            ));
        }
        if input.size_bytes as u64 > self.config.max_file_size {
            return Err(DocumentServiceError::ValidationError(format!(
                "File too large. Maximum size is {} bytes",
                self.config.max_file_size
            )));
        }
        let file_name = sanitize_file_name(&input.file_name).ok_or_else(|| {
            DocumentServiceError::ValidationError("File name is invalid".to_string())
        })?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let document = Document {
            storage_key: format!("documents/{}/{}/{}", owner.id, id, file_name),
            id,
            owner_id: owner.id,
            file_name,
            content_type,
            size_bytes: input.size_bytes,
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.repo.create(&document).await?;

        let upload = self.presigner.presign("PUT", &document.storage_key, now)?;
        tracing::info!(document_id = %document.id, owner_id = owner.id, "Upload started");
        Ok(UploadTicket { document, upload })
    }

    /// Mark an upload complete; the object must already be in the store
    pub async fn confirm_upload(
        &self,
        owner: &User,
        id: &str,
    ) -> Result<Document, DocumentServiceError> {
        let document = self.get_accessible(owner, id, false).await?;
        if document.is_uploaded() {
            return Ok(document);
        }

        let size = self
            .store
            .size(&document.storage_key)
            .await
            .context("Failed to stat uploaded object")?
            .ok_or(DocumentServiceError::NotUploaded)?;
        if size > self.config.max_file_size {
            return Err(DocumentServiceError::ValidationError(format!(
                "File too large. Maximum size is {} bytes",
                self.config.max_file_size
            )));
        }

        self.repo
            .mark_uploaded(&document.id, size as i64, Utc::now())
            .await?;
        self.repo
            .get_by_id(&document.id)
            .await?
            .ok_or(DocumentServiceError::NotFound)
    }

    /// Presigned GET link; owner or admin, upload must be complete
    pub async fn download_url(
        &self,
        user: &User,
        id: &str,
    ) -> Result<PresignedUrl, DocumentServiceError> {
        let document = self.get_accessible(user, id, true).await?;
        if !document.is_uploaded() {
            return Err(DocumentServiceError::NotUploaded);
        }
        Ok(self
            .presigner
            .presign("GET", &document.storage_key, Utc::now())?)
    }

    pub async fn list(&self, owner: &User) -> Result<Vec<Document>, DocumentServiceError> {
        Ok(self.repo.list_by_owner(owner.id).await?)
    }

    pub async fn delete(&self, user: &User, id: &str) -> Result<(), DocumentServiceError> {
        let document = self.get_accessible(user, id, true).await?;
        self.store
            .delete(&document.storage_key)
            .await
            .context("Failed to delete stored object")?;
        self.repo.delete(&document.id).await?;
        tracing::info!(document_id = %document.id, by = user.id, "Document deleted");
        Ok(())
    }

    async fn get_accessible(
        &self,
        user: &User,
        id: &str,
        admin_allowed: bool,
    ) -> Result<Document, DocumentServiceError> {
        let document = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(DocumentServiceError::NotFound)?;
        let allowed = document.owner_id == user.id || (admin_allowed && user.is_admin());
        if !allowed {
            return Err(DocumentServiceError::Forbidden);
        }
        Ok(document)
    }
}

/// Reduce a client file name to a safe single path segment.
/// Returns `None` when nothing usable is left.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return None;
    }
    Some(cleaned.chars().take(MAX_FILE_NAME_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxDocumentRepository, SqlxUserRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{NewUser, UserRole};
    use proptest::prelude::*;
    use tempfile::TempDir;

    struct Fixture {
        service: DocumentService,
        store: Arc<LocalObjectStore>,
        owner: User,
        other: User,
        admin: User,
        _dir: TempDir,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let users = SqlxUserRepository::new(pool.clone());
        let mut created = Vec::new();
        for (email, role) in [
            ("admin@example.com", UserRole::Admin),
            ("owner@example.com", UserRole::Member),
            ("other@example.com", UserRole::Member),
        ] {
            created.push(
                users
                    .create(&NewUser {
                        email: email.to_string(),
                        display_name: email.to_string(),
                        password_hash: "x".to_string(),
                        role,
                    })
                    .await
                    .unwrap(),
            );
        }
        let other = created.pop().unwrap();
        let owner = created.pop().unwrap();
        let admin = created.pop().unwrap();

        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            local_path: dir.path().to_path_buf(),
            max_file_size: 1024,
            ..StorageConfig::default()
        };
        let store = Arc::new(LocalObjectStore::new(dir.path()));
        let service = DocumentService::new(
            SqlxDocumentRepository::boxed(pool),
            store.clone(),
            Arc::new(Presigner::new(&config)),
            config,
        );
        Fixture {
            service,
            store,
            owner,
            other,
            admin,
            _dir: dir,
        }
    }

    fn pdf(size: i64) -> CreateUploadInput {
        CreateUploadInput {
            file_name: "My CV (2026).pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: size,
        }
    }

    #[tokio::test]
    async fn test_upload_lifecycle() {
        let f = setup().await;
        let ticket = f.service.create_upload(&f.owner, pdf(10)).await.unwrap();
        let doc = &ticket.document;
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.file_name, "My_CV__2026_.pdf");
        assert_eq!(
            doc.storage_key,
            format!("documents/{}/{}/My_CV__2026_.pdf", f.owner.id, doc.id)
        );
        assert_eq!(ticket.upload.method, "PUT");

        // not in the store yet
        assert!(matches!(
            f.service.confirm_upload(&f.owner, &doc.id).await,
            Err(DocumentServiceError::NotUploaded)
        ));
        assert!(matches!(
            f.service.download_url(&f.owner, &doc.id).await,
            Err(DocumentServiceError::NotUploaded)
        ));

        f.store.put(&doc.storage_key, b"%PDF-1.7").await.unwrap();
        let confirmed = f.service.confirm_upload(&f.owner, &doc.id).await.unwrap();
        assert!(confirmed.is_uploaded());
        assert_eq!(confirmed.size_bytes, 8);

        let url = f.service.download_url(&f.owner, &doc.id).await.unwrap();
        assert_eq!(url.method, "GET");
        assert!(f.service.download_url(&f.admin, &doc.id).await.is_ok());
        assert!(matches!(
            f.service.download_url(&f.other, &doc.id).await,
            Err(DocumentServiceError::Forbidden)
        ));

        assert_eq!(f.service.list(&f.owner).await.unwrap().len(), 1);
        assert!(f.service.list(&f.other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let f = setup().await;
        assert!(matches!(
            f.service.create_upload(&f.owner, pdf(4096)).await,
            Err(DocumentServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.create_upload(&f.owner, pdf(0)).await,
            Err(DocumentServiceError::ValidationError(_))
        ));

        let mut exe = pdf(10);
        exe.content_type = "application/x-msdownload".to_string();
        assert!(matches!(
            f.service.create_upload(&f.owner, exe).await,
            Err(DocumentServiceError::ValidationError(_))
        ));

        let mut nameless = pdf(10);
        nameless.file_name = "../..".to_string();
        assert!(matches!(
            f.service.create_upload(&f.owner, nameless).await,
            Err(DocumentServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_object() {
        let f = setup().await;
        let ticket = f.service.create_upload(&f.owner, pdf(3)).await.unwrap();
        let key = ticket.document.storage_key.clone();
        f.store.put(&key, b"abc").await.unwrap();

        assert!(matches!(
            f.service.delete(&f.other, &ticket.document.id).await,
            Err(DocumentServiceError::Forbidden)
        ));
        f.service.delete(&f.owner, &ticket.document.id).await.unwrap();
        assert!(f.store.size(&key).await.unwrap().is_none());
        assert!(matches!(
            f.service.delete(&f.owner, &ticket.document.id).await,
            Err(DocumentServiceError::NotFound)
        ));
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("resume.pdf").as_deref(), Some("resume.pdf"));
        assert_eq!(
            sanitize_file_name("C:\\Users\\jo\\cv.docx").as_deref(),
            Some("cv.docx")
        );
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("...").as_deref(), None);
        assert_eq!(sanitize_file_name("   ").as_deref(), None);
    }

    proptest! {
        #[test]
        fn prop_sanitized_names_are_single_safe_segments(name in ".{0,200}") {
            if let Some(clean) = sanitize_file_name(&name) {
                prop_assert!(!clean.contains('/'));
                prop_assert!(!clean.contains('\\'));
                prop_assert!(!clean.starts_with('.'));
                prop_assert!(clean != "..");
                prop_assert!(clean.chars().count() <= MAX_FILE_NAME_LEN);
            }
        }
    }
}
