//! Data models
//!
//! Database entities (users, sessions, documents, mentoring, community
//! posts, notifications) plus the request inputs that create or change them.

mod community;
mod document;
mod mentor;
mod notification;
mod paging;
mod session;
mod user;

pub use community::{
    Comment, CreateCommentInput, CreatePostInput, Post, PostDetail, UpdatePostInput,
    MAX_COMMENT_LEN, MAX_POST_BODY_LEN, MAX_TITLE_LEN,
};
pub use document::{CreateUploadInput, Document, DocumentStatus, PresignedUrl, UploadTicket};
pub use mentor::{
    overlaps, session_price_cents, AcquireLockInput, BookingStatus, BusyInterval, BusyKind,
    ConfirmBookingInput, MentorProfile, MentorSession, ParticipantRole, SlotLock,
    UpsertMentorProfileInput,
};
pub use notification::{
    NewNotification, Notification, NotificationKind, NotificationPreferences,
    UpdatePreferencesInput,
};
pub use paging::{ListParams, PagedResult};
pub use session::Session;
pub use user::{NewUser, RegisterInput, UpdateProfileInput, User, UserRole, UserStatus};
