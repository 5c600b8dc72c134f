//! Logging email backend.
//!
//! [`EmailBackend`] sits in front of a real [`Transport`]. For every message
//! in a batch it writes a pending record (and optionally the attachment
//! content) before delegating, then records the outcome. Persistence
//! failures are logged and swallowed; the transport's result is returned
//! untouched.

use std::sync::Arc;

use maillog_mime::OCTET_STREAM;
use tracing::{debug, error};

use crate::config::Config;
use crate::message::{MessageAttachment, OutgoingMessage, attachment_contents};
use crate::record::{Attachment, Email, EmailId, EmailRepository, NewAttachment, NewEmail};
use crate::storage::ContentStore;
use crate::Result;
use crate::transport::{Transport, TransportError};

/// Attachment content pulled out of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAttachment {
    /// Filename given by the caller.
    pub filename: String,
    /// Raw payload.
    pub content: Vec<u8>,
    /// Declared type, empty for the generic octet-stream type.
    pub mimetype: String,
}

/// Resolves an attachment to its filename, payload and storable MIME type.
///
/// # Errors
///
/// Returns an error if a structured part has an undecodable body.
pub fn extract_attachment(attachment: &MessageAttachment) -> Result<ExtractedAttachment> {
    let (filename, content, declared) = attachment_contents(attachment)?;
    let mimetype = if declared == OCTET_STREAM {
        String::new()
    } else {
        declared
    };

    Ok(ExtractedAttachment {
        filename,
        content,
        mimetype,
    })
}

/// Transport wrapper that records every message it sends.
#[derive(Clone)]
pub struct EmailBackend {
    config: Arc<Config>,
    repository: EmailRepository,
    storage: Arc<dyn ContentStore>,
    transport: Arc<dyn Transport>,
}

impl EmailBackend {
    /// Wraps `transport`.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        repository: EmailRepository,
        storage: Arc<dyn ContentStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            repository,
            storage,
            transport,
        }
    }

    /// The record repository.
    #[must_use]
    pub const fn repository(&self) -> &EmailRepository {
        &self.repository
    }

    /// Sends a batch through the wrapped transport, recording each message.
    ///
    /// Records are created in input order before the transport is called.
    /// If the transport reports at least one message sent, every record of
    /// the batch is marked successful. If it fails, every record is marked
    /// failed with the error text.
    ///
    /// # Errors
    ///
    /// Returns exactly the error the wrapped transport returned.
    pub async fn send_messages(
        &self,
        messages: &[OutgoingMessage],
    ) -> std::result::Result<usize, TransportError> {
        let mut created = Vec::with_capacity(messages.len());

        for message in messages {
            match self.repository.create(&NewEmail::pending(message)).await {
                Ok(email) => {
                    if self.config.save_attachments {
                        self.save_attachments(&email, message).await;
                    }
                    created.push(email.id);
                }
                Err(e) => error!(error = %e, "Failed to save email to database (create)"),
            }
        }

        let result = self.transport.send_messages(messages).await;

        match &result {
            Ok(sent) if *sent > 0 => {
                debug!(sent, records = created.len(), "Batch sent");
                self.update_status(&created, true, None).await;
            }
            Ok(_) => debug!(records = created.len(), "Transport sent nothing"),
            Err(e) => {
                let detail = e.to_string();
                self.update_status(&created, false, Some(&detail)).await;
            }
        }

        result
    }

    async fn update_status(&self, ids: &[EmailId], ok: bool, detail: Option<&str>) {
        for &id in ids {
            if let Err(e) = self.repository.set_status(id, ok, detail).await {
                error!(error = %e, email_id = %id, "Failed to save email to database (update)");
            }
        }
    }

    /// Stores each attachment independently; one failure does not stop the rest.
    async fn save_attachments(&self, email: &Email, message: &OutgoingMessage) {
        for attachment in &message.attachments {
            if let Err(e) = self.save_attachment(email, attachment).await {
                error!(error = %e, email_id = %email.id, "Failed to save attachment");
            }
        }
    }

    async fn save_attachment(
        &self,
        email: &Email,
        attachment: &MessageAttachment,
    ) -> Result<Attachment> {
        let extracted = extract_attachment(attachment)?;
        let path = self
            .config
            .attachments_path
            .resolve(email, &extracted.filename);
        let file = self.storage.save(&path, &extracted.content).await?;

        let new = NewAttachment {
            name: extracted.filename,
            mimetype: extracted.mimetype,
            file,
        };
        match self.repository.add_attachment(email.id, &new).await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&new.file).await {
                    debug!(error = %cleanup, file = %new.file, "Failed to remove orphaned content");
                }
                Err(e)
            }
        }
    }
}
