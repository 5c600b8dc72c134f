//! Persisted record types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{OutgoingMessage, join_addresses};

/// Header key linking a record to a provider's message id.
pub const ANYMAIL_ID_HEADER: &str = "anymail_id";

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Identifier of a logged email.
    EmailId
);
record_id!(
    /// Identifier of a stored attachment.
    AttachmentId
);
record_id!(
    /// Identifier of a tracking log entry.
    LogEntryId
);

/// One logged send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Email {
    /// Record id.
    pub id: EmailId,
    /// Sender address.
    pub from_email: String,
    /// Primary recipients joined with `"; "`.
    pub recipients: String,
    /// CC recipients joined with `"; "`.
    pub cc_recipients: String,
    /// BCC recipients joined with `"; "`.
    pub bcc_recipients: String,
    /// Reply-To addresses joined with `"; "`.
    pub reply_to: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// HTML alternative body, empty when there is none.
    pub html_message: String,
    /// Extra headers, including the correlation key when present.
    pub extra_headers: BTreeMap<String, String>,
    /// Whether delivery was confirmed.
    pub ok: bool,
    /// When the record was created.
    pub date_sent: DateTime<Utc>,
    /// Transport error text for failed sends.
    pub error: Option<String>,
}

impl Email {
    /// The provider message id this record is correlated by, if any.
    #[must_use]
    pub fn anymail_id(&self) -> Option<&str> {
        self.extra_headers.get(ANYMAIL_ID_HEADER).map(String::as_str)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.recipients, self.subject)
    }
}

/// Field values for a new [`Email`] record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewEmail {
    /// Sender address.
    pub from_email: String,
    /// Primary recipients joined with `"; "`.
    pub recipients: String,
    /// CC recipients joined with `"; "`.
    pub cc_recipients: String,
    /// BCC recipients joined with `"; "`.
    pub bcc_recipients: String,
    /// Reply-To addresses joined with `"; "`.
    pub reply_to: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// HTML alternative body.
    pub html_message: String,
    /// Extra headers.
    pub extra_headers: BTreeMap<String, String>,
    /// Initial success flag.
    pub ok: bool,
}

impl NewEmail {
    /// Snapshot of a message before it is handed to the transport.
    #[must_use]
    pub fn pending(message: &OutgoingMessage) -> Self {
        Self {
            from_email: message.from.clone(),
            recipients: join_addresses(&message.to),
            cc_recipients: join_addresses(&message.cc),
            bcc_recipients: join_addresses(&message.bcc),
            reply_to: join_addresses(&message.reply_to),
            subject: message.subject.clone(),
            body: message.body.clone(),
            html_message: message.html_body().unwrap_or_default().to_string(),
            extra_headers: message.headers.clone(),
            ok: false,
        }
    }
}

/// A stored attachment belonging to an [`Email`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Attachment id.
    pub id: AttachmentId,
    /// Owning record.
    pub email_id: EmailId,
    /// Original filename.
    pub name: String,
    /// MIME type; empty when the transport reported the generic octet-stream type.
    pub mimetype: String,
    /// Path of the content in the content store.
    pub file: String,
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Field values for a new [`Attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    /// Original filename.
    pub name: String,
    /// MIME type, or empty.
    pub mimetype: String,
    /// Path of the content in the content store.
    pub file: String,
}

/// One provider tracking event recorded against an [`Email`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Entry id.
    pub id: LogEntryId,
    /// Owning record.
    pub email_id: EmailId,
    /// Event type tag (`delivered`, `opened`, `bounced`, ...).
    pub event_type: String,
    /// When the provider says the event happened.
    pub timestamp: DateTime<Utc>,
    /// Reporting provider.
    pub esp: String,
    /// Provider-assigned event id.
    pub event_id: Option<String>,
    /// Reject reason for rejected or bounced messages.
    pub reject_reason: Option<String>,
    /// Response text from the receiving MTA.
    pub mta_response: Option<String>,
    /// Tags attached to the message.
    pub tags: Vec<String>,
    /// User agent for opens and clicks.
    pub user_agent: Option<String>,
    /// Clicked URL.
    pub click_url: Option<String>,
    /// Provider metadata attached to the message.
    pub metadata: serde_json::Value,
    /// The provider's raw payload.
    pub raw: serde_json::Value,
}

/// Field values for a new [`LogEntry`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    /// Event type tag.
    pub event_type: String,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Reporting provider.
    pub esp: String,
    /// Provider-assigned event id.
    pub event_id: Option<String>,
    /// Reject reason.
    pub reject_reason: Option<String>,
    /// MTA response text.
    pub mta_response: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// User agent.
    pub user_agent: Option<String>,
    /// Clicked URL.
    pub click_url: Option<String>,
    /// Provider metadata.
    pub metadata: serde_json::Value,
    /// Raw provider payload.
    pub raw: serde_json::Value,
}

/// Query options for listing emails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailFilter {
    /// Only records with this success flag.
    pub ok: Option<bool>,
    /// Substring matched against subject, body and recipients.
    pub search: Option<String>,
    /// Only records sent at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Only records sent before this time.
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of records.
    pub limit: Option<u32>,
}

impl EmailFilter {
    /// Matches every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to the given success flag.
    #[must_use]
    pub const fn ok(mut self, ok: bool) -> Self {
        self.ok = Some(ok);
        self
    }

    /// Restricts to records containing `term`.
    #[must_use]
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    /// Restricts to records sent at or after `since`.
    #[must_use]
    pub const fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Restricts to records sent before `until`.
    #[must_use]
    pub const fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Caps the number of records.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}
