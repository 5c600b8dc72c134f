//! Event correlator.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::model::{SendStatus, TrackingEvent};
use crate::Result;
use crate::backend::extract_attachment;
use crate::config::Config;
use crate::message::OutgoingMessage;
use crate::record::{
    ANYMAIL_ID_HEADER, Email, EmailRepository, EmailTransaction, LogEntry, NewAttachment, NewEmail,
};
use crate::storage::ContentStore;

/// Rendered headers that duplicate first-class record fields.
const REDUNDANT_HEADERS: [&str; 6] = [
    "content-type",
    "date",
    "from",
    "mime-version",
    "subject",
    "to",
];

/// Records provider callbacks against stored emails.
///
/// Both callbacks do nothing when tracking is disabled in the configuration.
#[derive(Clone)]
pub struct EventCorrelator {
    config: Arc<Config>,
    repository: EmailRepository,
    storage: Arc<dyn ContentStore>,
}

impl EventCorrelator {
    /// Creates a correlator writing to `repository` and `storage`.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        repository: EmailRepository,
        storage: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            config,
            repository,
            storage,
        }
    }

    /// Returns true if callbacks are recorded.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.config.connect_tracking
    }

    /// Records a message the provider confirmed as accepted.
    ///
    /// The record is created already marked successful, with the provider's
    /// message id stored under [`ANYMAIL_ID_HEADER`]. The record and its
    /// attachments are written atomically: on failure nothing is stored.
    ///
    /// Returns `None` when tracking is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the record or any attachment cannot be stored.
    pub async fn log_successful_email(
        &self,
        esp: &str,
        message: &OutgoingMessage,
        status: &SendStatus,
    ) -> Result<Option<Email>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let mut new = NewEmail::pending(message);
        new.ok = true;
        new.extra_headers = sent_headers(message, &status.message_id);

        let mut tx = self.repository.begin().await?;
        let mut written = Vec::new();

        let result = self.write_record(&mut tx, &new, message, &mut written).await;
        match result {
            Ok(email) => {
                if let Err(e) = tx.commit().await {
                    self.discard(&written).await;
                    return Err(e);
                }
                info!(esp, message_id = %status.message_id, email_id = %email.id, "Recorded sent email");
                Ok(Some(email))
            }
            Err(e) => {
                error!(error = %e, esp, message_id = %status.message_id, "Failed to record sent email");
                if let Err(rollback) = tx.rollback().await {
                    debug!(error = %rollback, "Rollback failed");
                }
                self.discard(&written).await;
                Err(e)
            }
        }
    }

    /// Attaches a provider event to the email carrying its message id.
    ///
    /// Events without a message id, or whose id matches no email, are
    /// ignored and return `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup or the log write fails.
    pub async fn handle_tracking_event(
        &self,
        esp: &str,
        event: &TrackingEvent,
    ) -> Result<Option<LogEntry>> {
        if !self.is_connected() {
            return Ok(None);
        }

        let Some(message_id) = event.message_id.as_deref() else {
            debug!(esp, event_type = %event.event_type, "Tracking event without message id");
            return Ok(None);
        };

        let Some(email_id) = self.repository.find_by_anymail_id(message_id).await? else {
            debug!(esp, message_id, event_type = %event.event_type, "No email for tracking event");
            return Ok(None);
        };

        let entry = self
            .repository
            .add_log(email_id, &event.to_log_entry(esp))
            .await?;
        debug!(esp, message_id, %email_id, event_type = %entry.event_type, "Recorded tracking event");
        Ok(Some(entry))
    }

    async fn write_record(
        &self,
        tx: &mut EmailTransaction,
        new: &NewEmail,
        message: &OutgoingMessage,
        written: &mut Vec<String>,
    ) -> Result<Email> {
        let email = tx.create(new).await?;

        if self.config.save_attachments {
            for attachment in &message.attachments {
                let extracted = extract_attachment(attachment)?;
                let path = self
                    .config
                    .attachments_path
                    .resolve(&email, &extracted.filename);
                let file = self.storage.save(&path, &extracted.content).await?;
                written.push(file.clone());

                tx.add_attachment(
                    email.id,
                    &NewAttachment {
                        name: extracted.filename,
                        mimetype: extracted.mimetype,
                        file,
                    },
                )
                .await?;
            }
        }

        Ok(email)
    }

    async fn discard(&self, files: &[String]) {
        for file in files {
            if let Err(e) = self.storage.delete(file).await {
                debug!(error = %e, file = %file, "Failed to remove content of discarded email");
            }
        }
    }
}

/// Headers present at send time, minus those with their own record field,
/// plus the caller's headers and the correlation id.
fn sent_headers(message: &OutgoingMessage, message_id: &str) -> BTreeMap<String, String> {
    let mime_headers = message.mime_headers();
    let mut headers: BTreeMap<String, String> = mime_headers
        .iter()
        .filter(|(name, _)| {
            !REDUNDANT_HEADERS
                .iter()
                .any(|redundant| name.eq_ignore_ascii_case(redundant))
        })
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();

    headers.extend(
        message
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    headers.insert(ANYMAIL_ID_HEADER.to_string(), message_id.to_string());
    headers
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    async fn correlator(config: Config) -> (EventCorrelator, MemoryStorage) {
        let storage = MemoryStorage::new();
        let repository = EmailRepository::in_memory().await.unwrap();
        let correlator =
            EventCorrelator::new(Arc::new(config), repository, Arc::new(storage.clone()));
        (correlator, storage)
    }

    fn message() -> OutgoingMessage {
        OutgoingMessage::new("from@example.com", "Subject", "Body")
            .to("to@example.com")
            .cc("cc@example.com")
            .bcc("bcc@example.com")
            .header("X-Campaign", "launch")
    }

    #[test]
    fn test_sent_headers_strip_record_fields() {
        let headers = sent_headers(&message(), "42");

        assert_eq!(headers.get(ANYMAIL_ID_HEADER).map(String::as_str), Some("42"));
        assert_eq!(headers.get("X-Campaign").map(String::as_str), Some("launch"));
        assert!(headers.contains_key("Message-ID"));
        for name in ["Content-Type", "Date", "From", "MIME-Version", "Subject", "To"] {
            assert!(!headers.contains_key(name), "{name} should be stripped");
        }
    }

    #[test]
    fn test_correlation_id_wins_over_caller_header() {
        let msg = message().header(ANYMAIL_ID_HEADER, "spoofed");
        let headers = sent_headers(&msg, "42");
        assert_eq!(headers.get(ANYMAIL_ID_HEADER).map(String::as_str), Some("42"));
    }

    #[tokio::test]
    async fn test_successful_email_then_event() {
        let (correlator, _) = correlator(Config::default()).await;

        let email = correlator
            .log_successful_email("Mailgun", &message(), &SendStatus::new("42"))
            .await
            .unwrap()
            .unwrap();
        assert!(email.ok);
        assert_eq!(email.cc_recipients, "cc@example.com");
        assert_eq!(email.bcc_recipients, "bcc@example.com");
        assert_eq!(email.anymail_id(), Some("42"));

        let entry = correlator
            .handle_tracking_event("Mailgun", &TrackingEvent::new("open", "42"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.email_id, email.id);
        assert_eq!(entry.event_type, "open");
    }

    #[tokio::test]
    async fn test_unmatched_event_is_ignored() {
        let (correlator, _) = correlator(Config::default()).await;

        let entry = correlator
            .handle_tracking_event("Mailgun", &TrackingEvent::new("open", "missing"))
            .await
            .unwrap();
        assert!(entry.is_none());
        assert_eq!(correlator.repository.count_logs().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_is_inert() {
        let config = Config {
            connect_tracking: false,
            ..Config::default()
        };
        let (correlator, _) = correlator(config).await;

        let email = correlator
            .log_successful_email("Mailgun", &message(), &SendStatus::new("42"))
            .await
            .unwrap();
        assert!(email.is_none());
        assert_eq!(correlator.repository.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_attachments_written_with_record() {
        let config = Config {
            save_attachments: true,
            ..Config::default()
        };
        let (correlator, storage) = correlator(config).await;
        let msg = message().attach("f.txt", b"data".to_vec(), Some("text/plain"));

        let email = correlator
            .log_successful_email("Mailgun", &msg, &SendStatus::new("7"))
            .await
            .unwrap()
            .unwrap();

        let attachments = correlator.repository.attachments(email.id).await.unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].mimetype, "text/plain");
        assert_eq!(storage.open(&attachments[0].file).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_failed_attachment_rolls_back_record() {
        let config = Config {
            save_attachments: true,
            ..Config::default()
        };
        let (correlator, storage) = correlator(config).await;
        let msg = message()
            .attach("good.txt", b"data".to_vec(), None)
            .attach("/etc/passwd", b"x".to_vec(), None);

        let result = correlator
            .log_successful_email("Mailgun", &msg, &SendStatus::new("7"))
            .await;
        assert!(result.is_err());
        assert_eq!(correlator.repository.count().await.unwrap(), 0);
        assert!(storage.is_empty());
    }
}
