//! Database repositories
//!
//! Repository pattern implementations for database access. Each repository
//! is a trait plus one sqlx implementation that serves both backends.

pub mod community;
pub mod document;
pub mod mentoring;
pub mod notification;
pub mod password_reset;
pub mod session;
pub mod user;

pub use community::{CommunityRepository, SqlxCommunityRepository};
pub use document::{DocumentRepository, SqlxDocumentRepository};
pub use mentoring::{ConfirmOutcome, LockOutcome, MentoringRepository, SqlxMentoringRepository};
pub use notification::{NotificationRepository, SqlxNotificationRepository};
pub use password_reset::{
    PasswordResetRepository, PasswordResetToken, SqlxPasswordResetRepository,
};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use user::{SqlxUserRepository, UserRepository};
