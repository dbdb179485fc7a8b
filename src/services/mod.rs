//! Services layer - Business logic
//!
//! Services own validation and business rules, coordinate repositories,
//! the cache and outbound channels (mail, push), and return typed errors
//! that the API layer maps to HTTP responses.

pub mod community;
pub mod document;
pub mod email;
pub mod maintenance;
pub mod mentoring;
pub mod notification;
pub mod password;
pub mod password_reset;
pub mod rate_limiter;
pub mod storage;
pub mod user;

pub use community::{CommunityService, CommunityServiceError};
pub use document::{DocumentService, DocumentServiceError};
pub use email::{mailer_from_config, LogMailer, Mailer, SmtpMailer};
pub use maintenance::{Maintenance, MaintenanceReport};
pub use mentoring::{MentoringService, MentoringServiceError};
pub use notification::{LogPushSender, NotificationService, NotificationServiceError, PushSender};
pub use password::{hash_password, verify_password};
pub use password_reset::{PasswordResetError, PasswordResetService};
pub use rate_limiter::LoginRateLimiter;
pub use storage::{LocalObjectStore, Presigner, StorageError};
pub use user::{UserService, UserServiceError};
