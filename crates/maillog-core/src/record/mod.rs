//! Persisted email records.
//!
//! One [`Email`] per send attempt, owning its [`Attachment`]s and tracking
//! [`LogEntry`]s. Deleting an email deletes its children.

mod model;
mod repository;

pub use model::{
    ANYMAIL_ID_HEADER, Attachment, AttachmentId, Email, EmailFilter, EmailId, LogEntry,
    LogEntryId, NewAttachment, NewEmail, NewLogEntry,
};
pub use repository::{EmailRepository, EmailTransaction};
