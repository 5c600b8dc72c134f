//! # maillog-core
//!
//! Persistent logging of outgoing email.
//!
//! This crate provides:
//! - **Logging backend** - wraps any [`Transport`] and records each message it sends
//! - **Record store** - `SQLite` storage of emails, attachments and tracking events
//! - **Content store** - attachment files kept outside the database
//! - **Event correlation** - provider callbacks matched to records by message id
//!
//! ```no_run
//! # async fn run() -> maillog_core::Result<()> {
//! use maillog_core::{Config, EmailLog, OutgoingMessage};
//!
//! let log = EmailLog::open(Config::default()).await?;
//! let message = OutgoingMessage::new("app@example.com", "Welcome", "Hello!").to("user@example.com");
//! let _ = log.configured_backend().send_messages(&[message]).await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
mod error;
pub mod message;
pub mod record;
mod service;
pub mod storage;
pub mod tracking;
pub mod transport;

pub use backend::{EmailBackend, ExtractedAttachment, extract_attachment};
pub use config::{AttachmentPathFn, AttachmentsPath, Config};
pub use error::{Error, Result};
pub use message::{Alternative, MessageAttachment, OutgoingMessage, join_addresses};
pub use record::{
    ANYMAIL_ID_HEADER, Attachment, AttachmentId, Email, EmailFilter, EmailId, EmailRepository,
    EmailTransaction, LogEntry, LogEntryId, NewAttachment, NewEmail, NewLogEntry,
};
pub use service::EmailLog;
pub use storage::{ContentStore, FileSystemStorage, MemoryStorage};
pub use tracking::{EventCorrelator, SendStatus, TrackingEvent};
pub use transport::{
    ConsoleTransport, DummyTransport, MemoryTransport, Transport, TransportError, TransportKind,
};
